/*++

Licensed under the Apache-2.0 license.

File Name:

    transport.rs

Abstract:

    File contains the configuration port transfer primitive and the
    frame transport interface implemented per device family.

--*/

use crate::far::DeviceFamily;
use crate::frame::Frame;
use faultline_error::FaultlineResult;

/// Budget for a single frame operation.
pub const FRAME_OP_TIMEOUT_US: u32 = 10_000;
/// Budget for a complete bitstream replay.
pub const RELOAD_TIMEOUT_US: u32 = 1_000_000;
/// Frame readback attempts before the port is declared hung.
pub const READ_RETRY_ATTEMPTS: u32 = 5;

/// Low-level configuration access port.
///
/// This is the externally supplied transfer primitive: "push N words into
/// the engine, pull N words back". On silicon this is the ICAP FIFO or
/// the DevConfig/CSU DMA pair; in tests it is an emulated engine. Every
/// wait is bounded and surfaces `TRANSPORT_TIMEOUT`.
pub trait ConfigPort {
    /// Push a packet stream into the configuration engine.
    fn push(&mut self, words: &[u32]) -> FaultlineResult<()>;

    /// Arm the readback channel for `words` words, ahead of the command
    /// stream that produces them. DMA-driven ports set up the destination
    /// channel here; FIFO-driven ports need no preparation.
    fn arm_readback(&mut self, _words: usize) -> FaultlineResult<()> {
        Ok(())
    }

    /// Drain `out.len()` readback words.
    fn pull(&mut self, out: &mut [u32]) -> FaultlineResult<()>;

    /// Busy-poll the engine until it is idle, bounded by `timeout_us`.
    fn wait_idle(&mut self, timeout_us: u32) -> FaultlineResult<()>;

    /// Replay a complete bitstream through the configuration DMA engine.
    fn program(&mut self, bitstream: &[u32]) -> FaultlineResult<()>;
}

/// Frame-level operations over a configuration port.
///
/// One interface, one implementation per device family; packet assembly
/// and sequencing differ materially between the ICAP-driven and the
/// PCAP/DMA-driven paths.
pub trait FrameTransport {
    fn family(&self) -> DeviceFamily;

    /// Read one frame. `capture` latches current flip-flop state into
    /// configuration memory (GCAPTURE + RCAP) before the read.
    fn read_frame(&mut self, far: u32, capture: bool) -> FaultlineResult<Frame>;

    /// Write one frame. `restore` reasserts flip-flop set/reset state
    /// from the just-written configuration (GRESTORE).
    fn write_frame(&mut self, far: u32, frame: &Frame, restore: bool) -> FaultlineResult<()>;

    /// Write consecutive frames starting at `start_far` in one burst.
    /// `payload` is the concatenated frame data, a multiple of the
    /// family's frame length.
    fn write_frames(&mut self, start_far: u32, payload: &[u32]) -> FaultlineResult<()>;

    /// Replay the complete bitstream and poll for completion.
    fn reload_bitstream(&mut self, bitstream: &[u32]) -> FaultlineResult<()>;

    /// Read the current FAR register value (profiling walks the device
    /// through the engine's FAR auto-increment).
    fn read_far_register(&mut self) -> FaultlineResult<u32>;
}
