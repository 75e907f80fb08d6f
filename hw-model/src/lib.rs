// Licensed under the Apache-2.0 license

//! Emulated FPGA configuration engine and DUT for exercising the
//! injection engine without silicon. The emulated backend interprets
//! the real packet protocol word by word; tests drive the same
//! transports that run on hardware.

use faultline_drivers::{ConfigPort, DeviceFamily};
use faultline_error::FaultlineResult;

mod fabric;
mod model_emulated;

pub use fabric::{FabricGeometry, ModelCounters};
pub use model_emulated::{EmulatedConfigPort, EmulatedDut, ModelEmulated};

/// Model construction parameters.
pub struct InitParams {
    pub geometry: FabricGeometry,
    /// Seeds the golden image and essential-bit masks.
    pub seed: u64,
    /// Frames that silently drop writes (columns under active use).
    pub locked: Vec<u32>,
    /// State-carrying frames: their essential bits are visible to the
    /// latent-error checkpoint, not to the DUT output.
    pub checkpoint_fars: Vec<u32>,
    /// Frames rewritten by the recovery frame list.
    pub recovery_fars: Vec<u32>,
}

impl InitParams {
    /// A small single-row device, enough fabric for campaign tests.
    pub fn demo(family: DeviceFamily) -> Self {
        Self {
            geometry: FabricGeometry::demo(family),
            seed: 0x5Eu64,
            locked: Vec::new(),
            checkpoint_fars: Vec::new(),
            recovery_fars: Vec::new(),
        }
    }
}

/// An emulation of the configuration fabric, to be called from tests.
pub trait FabricModel: Sized {
    type Port: ConfigPort;

    fn init(params: InitParams) -> FaultlineResult<Self>;

    /// A configuration port handle into this model.
    fn config_port(&self) -> Self::Port;

    /// An emulated DUT workload driver bound to this model's fabric.
    fn dut(&self, workload_duration: u32) -> EmulatedDut;
}
