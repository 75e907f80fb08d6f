/*++

Licensed under the Apache-2.0 license.

File Name:

    pcap.rs

Abstract:

    File contains the UltraScale+ frame transport (PCAP with CSU-DMA
    readback).

--*/

use crate::far::DeviceFamily;
use crate::frame::Frame;
use crate::packet::{
    ConfigCmd, ConfigReg, PacketBuffer, BUS_WIDTH_DETECT, BUS_WIDTH_SYNC, DUMMY_WORD, SYNC_WORD,
};
use crate::transport::{
    ConfigPort, FrameTransport, FRAME_OP_TIMEOUT_US, READ_RETRY_ATTEMPTS, RELOAD_TIMEOUT_US,
};
use faultline_error::{FaultlineError, FaultlineResult};

// CAPTURE enable bit in CTL0, asserted around capture readback.
const CTL_CAPTURE_ENABLE: u32 = 0x0000_0800;

/// Frame transport for UltraScale+ parts and Zynq UltraScale+ MPSoCs.
///
/// Differs from the 7-series path in command sequencing, the extra pad
/// words after the null frame, and DMA-completion polling: the CSU DMA
/// destination is armed before the command stream is pushed.
pub struct UltraScalePlusTransport<P: ConfigPort> {
    port: P,
    slr_idcode: u32,
}

impl<P: ConfigPort> UltraScalePlusTransport<P> {
    pub fn new(port: P, slr_idcode: u32) -> Self {
        Self { port, slr_idcode }
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn preamble(buf: &mut PacketBuffer) {
        buf.push(DUMMY_WORD)
            .push(BUS_WIDTH_SYNC)
            .push(BUS_WIDTH_DETECT)
            .push(DUMMY_WORD)
            .push(SYNC_WORD)
            .noop(1);
    }

    /// Readback epilogue: restart the fabric clocking, reset the CRC,
    /// desynchronize. Issued even when the transfer itself failed.
    fn readback_epilogue(&mut self, capture: bool) -> FaultlineResult<()> {
        let mut buf = PacketBuffer::new();
        buf.noop(1);
        if capture {
            // Close the CAPTURE bracket.
            buf.write_reg(ConfigReg::Mask, CTL_CAPTURE_ENABLE)
                .write_reg(ConfigReg::Ctl0, 0);
        }
        buf.command(ConfigCmd::Start).noop(1);
        buf.command(ConfigCmd::Rcrc).noop(1);
        buf.command(ConfigCmd::Desync);
        buf.noop(2);
        self.port.push(buf.words())?;
        self.port.wait_idle(FRAME_OP_TIMEOUT_US)
    }

    fn try_read_frame(&mut self, far: u32, capture: bool) -> FaultlineResult<Frame> {
        let n = self.family().frame_words();
        let pad = self.family().readback_pad_words();
        let total = 2 * n + pad;

        let mut buf = PacketBuffer::new();
        Self::preamble(&mut buf);
        buf.command(ConfigCmd::Rcrc).noop(1);
        buf.noop(5);
        if capture {
            // Open the CAPTURE bracket before latching flip-flop state.
            buf.write_reg(ConfigReg::Mask, CTL_CAPTURE_ENABLE)
                .write_reg(ConfigReg::Ctl0, CTL_CAPTURE_ENABLE);
            buf.command(ConfigCmd::GCapture).noop(1);
        }
        buf.command(ConfigCmd::Rcfg).noop(1);
        buf.write_reg(ConfigReg::Far, far);
        buf.read_burst(ConfigReg::Fdro, total as u32);
        buf.noop(64);

        // The DMA destination must be armed before the command stream
        // reaches the engine.
        self.port.arm_readback(total)?;
        self.port.push(buf.words())?;

        let mut raw = vec![0u32; total];
        let mut result = self.port.wait_idle(FRAME_OP_TIMEOUT_US);
        if result.is_ok() {
            result = self.port.pull(&mut raw);
        }
        let epilogue = self.readback_epilogue(capture);
        result?;
        epilogue?;

        // Null frame plus pad words precede the payload.
        let mut words = raw[n + pad..].to_vec();
        let addr = self.family().decode_far(far);
        self.family().mask_fixed_words(&addr, &mut words);
        Ok(Frame::from_words(words))
    }

    fn push_write_stream(
        &mut self,
        start_far: u32,
        payload: &[u32],
        restore: bool,
        timeout_us: u32,
    ) -> FaultlineResult<()> {
        let n = self.family().frame_words();
        let pad = self.family().readback_pad_words();
        let count = payload.len() / n;
        let total = n * (count + 1) + pad;

        let mut buf = PacketBuffer::new();
        Self::preamble(&mut buf);
        buf.command(ConfigCmd::Rcrc).noop(1);
        buf.write_reg(ConfigReg::Idcode, self.slr_idcode);
        buf.command(ConfigCmd::Wcfg).noop(1);
        buf.write_reg(ConfigReg::Far, start_far).noop(1);
        buf.write_burst_header(ConfigReg::Fdri, total as u32);
        buf.extend(payload);
        for _ in 0..(n + pad) {
            buf.push(0xFFFF_FFFF);
        }
        if restore {
            buf.command(ConfigCmd::GRestore).noop(1);
        }
        buf.command(ConfigCmd::Rcrc).noop(2);
        buf.command(ConfigCmd::Desync);
        buf.noop(10);

        self.port.push(buf.words())?;
        self.port.wait_idle(timeout_us)
    }
}

impl<P: ConfigPort> FrameTransport for UltraScalePlusTransport<P> {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::UltraScalePlus
    }

    fn read_frame(&mut self, far: u32, capture: bool) -> FaultlineResult<Frame> {
        for _attempt in 0..READ_RETRY_ATTEMPTS {
            match self.try_read_frame(far, capture) {
                Err(err) if err == FaultlineError::TRANSPORT_TIMEOUT => {
                    log::warn!("PCAP readback timeout at FAR {far:08x}, retrying");
                }
                other => return other,
            }
        }
        Err(FaultlineError::TRANSPORT_PORT_HANG)
    }

    fn write_frame(&mut self, far: u32, frame: &Frame, restore: bool) -> FaultlineResult<()> {
        if frame.len() != self.family().frame_words() {
            return Err(FaultlineError::TRANSPORT_BAD_FRAME_LEN);
        }
        self.push_write_stream(far, frame.words(), restore, FRAME_OP_TIMEOUT_US)
    }

    fn write_frames(&mut self, start_far: u32, payload: &[u32]) -> FaultlineResult<()> {
        let n = self.family().frame_words();
        if payload.is_empty() || payload.len() % n != 0 {
            return Err(FaultlineError::TRANSPORT_BAD_FRAME_LEN);
        }
        self.push_write_stream(start_far, payload, false, RELOAD_TIMEOUT_US)
    }

    fn reload_bitstream(&mut self, bitstream: &[u32]) -> FaultlineResult<()> {
        self.port.program(bitstream)?;
        self.port.wait_idle(RELOAD_TIMEOUT_US)
    }

    fn read_far_register(&mut self) -> FaultlineResult<u32> {
        let mut buf = PacketBuffer::new();
        Self::preamble(&mut buf);
        buf.read_reg(ConfigReg::Far, 1).noop(2);

        self.port.arm_readback(1)?;
        self.port.push(buf.words())?;

        let mut value = [0u32; 1];
        let mut result = self.port.wait_idle(FRAME_OP_TIMEOUT_US);
        if result.is_ok() {
            result = self.port.pull(&mut value);
        }

        let mut epilogue = PacketBuffer::new();
        epilogue.command(ConfigCmd::Desync).noop(2);
        let desync = self
            .port
            .push(epilogue.words())
            .and_then(|_| self.port.wait_idle(FRAME_OP_TIMEOUT_US));

        result?;
        desync?;
        Ok(value[0])
    }
}
