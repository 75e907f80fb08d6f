/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains the error type shared by all faultline crates.

--*/
#![cfg_attr(not(feature = "std"), no_std)]

use core::num::{NonZeroU32, TryFromIntError};

/// Faultline Error Type
///
/// Wraps a non-zero 32-bit code. The upper half identifies the component
/// that raised the error, the lower half the condition within it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FaultlineError(pub NonZeroU32);

/// Macro to define error constants ensuring uniqueness
///
/// Takes a list of (name, value, doc) tuples and generates a constant
/// definition for each error code.
#[macro_export]
macro_rules! define_error_constants {
    ($(($name:ident, $value:expr, $doc:expr)),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const $name: FaultlineError = FaultlineError::new_const($value);
        )*

        #[cfg(test)]
        /// Returns all defined error constants for testing uniqueness
        pub fn all_constants() -> Vec<(&'static str, u32)> {
            vec![
                $(
                    (stringify!($name), $value),
                )*
            ]
        }
    };
}

impl FaultlineError {
    /// Create a faultline error; intended to only be used from const
    /// contexts. The preferred way to get a FaultlineError from a u32 at
    /// runtime is `FaultlineError::try_from()`.
    const fn new_const(val: u32) -> Self {
        match NonZeroU32::new(val) {
            Some(val) => Self(val),
            None => panic!("FaultlineError cannot be 0"),
        }
    }

    define_error_constants![
        // Configuration port transport
        (
            TRANSPORT_TIMEOUT,
            0x0001_0001,
            "Configuration port or DMA transfer did not complete in time"
        ),
        (
            TRANSPORT_PORT_HANG,
            0x0001_0002,
            "Configuration port unresponsive after bounded retries"
        ),
        (
            TRANSPORT_DMA_QUEUE_FULL,
            0x0001_0003,
            "DMA command queue full"
        ),
        (
            TRANSPORT_BAD_READBACK,
            0x0001_0004,
            "Readback transfer returned fewer words than requested"
        ),
        (
            TRANSPORT_BAD_FRAME_LEN,
            0x0001_0005,
            "Frame payload length does not match the device family"
        ),
        // Injectability classifier
        (
            CLASSIFIER_RESTORE_FAILED,
            0x0002_0001,
            "Probe could not restore the frame to its pre-probe content"
        ),
        // Injection target selectors
        (
            SELECTOR_EXHAUSTED,
            0x0003_0001,
            "No further injection target available under the configured filters"
        ),
        (
            SELECTOR_EMPTY_POOL,
            0x0003_0002,
            "No injectable frame matches the configured filters"
        ),
        (
            SELECTOR_UNKNOWN_FAR,
            0x0003_0003,
            "Fault list entry references a frame address not in the reference table"
        ),
        // Bit-flip / recovery engine
        (
            ENGINE_TOUCHED_OVERFLOW,
            0x0004_0001,
            "Recently-touched target list is full"
        ),
        (
            ENGINE_GROUP_BOUNDS,
            0x0004_0002,
            "Frame group rewrite would step outside the reference table"
        ),
        // Campaign orchestrator
        (
            CAMPAIGN_GOLDEN_RUN_FAILED,
            0x0005_0001,
            "Fault-free baseline run does not match the reference trace"
        ),
        (
            CAMPAIGN_BAD_MODE,
            0x0005_0002,
            "Job descriptor carries an unknown campaign mode"
        ),
        (
            CAMPAIGN_NOT_IDLE,
            0x0005_0003,
            "Campaign was already run to completion"
        ),
        (
            CAMPAIGN_MISSING_FAULT_LIST,
            0x0005_0004,
            "Fault-list mode requested without a fault list"
        ),
        // Host image formats
        (
            FORMAT_BAD_SYNC,
            0x0006_0001,
            "Sync word not present at the start of the image"
        ),
        (
            FORMAT_TRUNCATED,
            0x0006_0002,
            "Image ends before the length its header declares"
        ),
        (
            FORMAT_BAD_FAR,
            0x0006_0003,
            "Image references a frame address outside the reference table"
        ),
        // Bitstream cache
        (CACHE_MISS, 0x0007_0001, "Bitstream or bitmask not found in cache"),
        (CACHE_IO, 0x0007_0002, "Cache storage I/O failure"),
        // Emulated model
        (
            MODEL_PROTOCOL,
            0x0008_0001,
            "Emulated configuration engine received a malformed packet stream"
        ),
        (
            MODEL_READBACK_UNDERRUN,
            0x0008_0002,
            "Readback requested with no armed DMA destination"
        ),
    ];
}

impl From<core::num::NonZeroU32> for FaultlineError {
    fn from(val: core::num::NonZeroU32) -> Self {
        FaultlineError(val)
    }
}

impl From<FaultlineError> for core::num::NonZeroU32 {
    fn from(val: FaultlineError) -> Self {
        val.0
    }
}

impl From<FaultlineError> for u32 {
    fn from(val: FaultlineError) -> Self {
        core::num::NonZeroU32::from(val).get()
    }
}

impl TryFrom<u32> for FaultlineError {
    type Error = TryFromIntError;
    fn try_from(val: u32) -> Result<Self, TryFromIntError> {
        match NonZeroU32::try_from(val) {
            Ok(val) => Ok(FaultlineError(val)),
            Err(err) => Err(err),
        }
    }
}

pub type FaultlineResult<T> = Result<T, FaultlineError>;
