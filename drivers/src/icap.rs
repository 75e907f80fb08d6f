/*++

Licensed under the Apache-2.0 license.

File Name:

    icap.rs

Abstract:

    File contains the 7-series / Zynq-7000 frame transport (ICAP and
    DevConfig PCAP share this packet sequencing).

--*/

use crate::far::DeviceFamily;
use crate::frame::Frame;
use crate::packet::{
    type1_packet, ConfigCmd, ConfigReg, PacketBuffer, BUS_WIDTH_DETECT, BUS_WIDTH_SYNC, DUMMY_WORD,
    OP_WRITE, SYNC_WORD,
};
use crate::transport::{
    ConfigPort, FrameTransport, FRAME_OP_TIMEOUT_US, READ_RETRY_ATTEMPTS, RELOAD_TIMEOUT_US,
};
use faultline_error::{FaultlineError, FaultlineResult};

// GLUTMASK_B plus CAPTURE control bits used around readback.
const CTL_READBACK_BRACKET: u32 = 0x0000_0500;
const CTL_GLUTMASK: u32 = 0x0000_0100;
const CTL_PERSIST: u32 = 0x0000_0400;

/// Frame transport for 7-series parts and Zynq-7000 SoCs.
pub struct Series7Transport<P: ConfigPort> {
    port: P,
    idcode: u32,
}

impl<P: ConfigPort> Series7Transport<P> {
    pub fn new(port: P, idcode: u32) -> Self {
        Self { port, idcode }
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Common write epilogue: drop GLUTMASK, park the FAR, reset CRC,
    /// desynchronize.
    fn write_epilogue(&self, buf: &mut PacketBuffer) {
        buf.write_reg(ConfigReg::Mask, CTL_GLUTMASK)
            .write_reg(ConfigReg::Ctl0, 0);
        buf.write_reg(ConfigReg::Far, self.family().far_park());
        buf.command(ConfigCmd::Rcrc);
        buf.command(ConfigCmd::Desync);
        buf.noop(16).align_to(16);
    }

    /// Issued after a readback, successful or not.
    fn desync_epilogue(&mut self) -> FaultlineResult<()> {
        let mut buf = PacketBuffer::new();
        buf.write_reg(ConfigReg::Mask, CTL_GLUTMASK)
            .write_reg(ConfigReg::Ctl0, 0);
        buf.command(ConfigCmd::Rcrc);
        buf.command(ConfigCmd::Desync);
        buf.noop(1).align_to(16);
        self.port.push(buf.words())?;
        self.port.wait_idle(FRAME_OP_TIMEOUT_US)
    }

    fn try_read_frame(&mut self, far: u32, capture: bool) -> FaultlineResult<Frame> {
        let n = self.family().frame_words();

        let mut buf = PacketBuffer::new();
        buf.push(DUMMY_WORD)
            .push(BUS_WIDTH_SYNC)
            .push(BUS_WIDTH_DETECT)
            .push(DUMMY_WORD)
            .push(SYNC_WORD)
            .noop(1);
        buf.command(ConfigCmd::Rcrc).noop(2);
        buf.write_reg(ConfigReg::Idcode, self.idcode);
        buf.command(ConfigCmd::Null);
        // Open the LUT/capture bracket for readback.
        buf.write_reg(ConfigReg::Mask, CTL_READBACK_BRACKET)
            .write_reg(ConfigReg::Ctl0, CTL_READBACK_BRACKET);
        if capture {
            buf.command(ConfigCmd::GCapture).noop(2);
            buf.command(ConfigCmd::Rcap).noop(2);
        }
        buf.command(ConfigCmd::Rcfg).noop(1);
        buf.write_reg(ConfigReg::Far, far);
        buf.read_burst(ConfigReg::Fdro, (2 * n) as u32);
        buf.noop(32).align_to(16);

        self.port.arm_readback(2 * n)?;
        self.port.push(buf.words())?;

        let mut raw = vec![0u32; 2 * n];
        let mut result = self.port.wait_idle(FRAME_OP_TIMEOUT_US);
        if result.is_ok() {
            result = self.port.pull(&mut raw);
        }
        // DESYNC regardless of the transfer outcome.
        let desync = self.desync_epilogue();
        result?;
        desync?;

        // The first frame out of the engine is the null frame.
        let mut words = raw[n..].to_vec();
        let addr = self.family().decode_far(far);
        self.family().mask_fixed_words(&addr, &mut words);
        Ok(Frame::from_words(words))
    }
}

impl<P: ConfigPort> FrameTransport for Series7Transport<P> {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Series7
    }

    fn read_frame(&mut self, far: u32, capture: bool) -> FaultlineResult<Frame> {
        for _attempt in 0..READ_RETRY_ATTEMPTS {
            match self.try_read_frame(far, capture) {
                Err(err) if err == FaultlineError::TRANSPORT_TIMEOUT => {
                    log::warn!("frame readback timeout at FAR {far:08x}, retrying");
                }
                other => return other,
            }
        }
        Err(FaultlineError::TRANSPORT_PORT_HANG)
    }

    fn write_frame(&mut self, far: u32, frame: &Frame, restore: bool) -> FaultlineResult<()> {
        let n = self.family().frame_words();
        if frame.len() != n {
            return Err(FaultlineError::TRANSPORT_BAD_FRAME_LEN);
        }

        let mut buf = PacketBuffer::new();
        buf.push(DUMMY_WORD)
            .push(BUS_WIDTH_SYNC)
            .push(BUS_WIDTH_DETECT)
            .noop(1)
            .push(SYNC_WORD)
            .noop(1);
        buf.command(ConfigCmd::Rcrc).noop(2);
        buf.write_reg(ConfigReg::Idcode, self.idcode);
        buf.command(ConfigCmd::Null);
        buf.write_reg(ConfigReg::Mask, CTL_GLUTMASK)
            .write_reg(ConfigReg::Ctl0, CTL_GLUTMASK);
        buf.write_reg(ConfigReg::Mask, CTL_PERSIST)
            .write_reg(ConfigReg::Ctl0, CTL_PERSIST);
        buf.command(ConfigCmd::Wcfg).noop(1);
        buf.write_reg(ConfigReg::Far, far).noop(1);
        // Frame data plus the mandatory trailing pad frame.
        buf.push(type1_packet(OP_WRITE, ConfigReg::Fdri, (2 * n) as u32));
        buf.extend(frame.words());
        for _ in 0..n {
            buf.push(0xFFFF_FFFF);
        }
        if restore {
            buf.command(ConfigCmd::GRestore).noop(1);
        }
        self.write_epilogue(&mut buf);

        self.port.push(buf.words())?;
        self.port.wait_idle(FRAME_OP_TIMEOUT_US)
    }

    fn write_frames(&mut self, start_far: u32, payload: &[u32]) -> FaultlineResult<()> {
        let n = self.family().frame_words();
        if payload.is_empty() || payload.len() % n != 0 {
            return Err(FaultlineError::TRANSPORT_BAD_FRAME_LEN);
        }
        let count = payload.len() / n;

        let mut buf = PacketBuffer::new();
        buf.push(DUMMY_WORD)
            .push(BUS_WIDTH_SYNC)
            .push(BUS_WIDTH_DETECT)
            .noop(1)
            .push(SYNC_WORD)
            .noop(1);
        buf.command(ConfigCmd::Rcrc).noop(2);
        buf.write_reg(ConfigReg::Idcode, self.idcode);
        buf.command(ConfigCmd::Null);
        buf.write_reg(ConfigReg::Mask, CTL_GLUTMASK)
            .write_reg(ConfigReg::Ctl0, CTL_GLUTMASK);
        buf.write_reg(ConfigReg::Mask, CTL_PERSIST)
            .write_reg(ConfigReg::Ctl0, CTL_PERSIST);
        buf.command(ConfigCmd::Wcfg).noop(1);
        buf.write_reg(ConfigReg::Far, start_far).noop(1);
        buf.write_burst_header(ConfigReg::Fdri, (n * (count + 1)) as u32);
        buf.extend(payload);
        for _ in 0..n {
            buf.push(0xFFFF_FFFF);
        }
        self.write_epilogue(&mut buf);

        self.port.push(buf.words())?;
        self.port.wait_idle(RELOAD_TIMEOUT_US)
    }

    fn reload_bitstream(&mut self, bitstream: &[u32]) -> FaultlineResult<()> {
        self.port.program(bitstream)?;
        self.port.wait_idle(RELOAD_TIMEOUT_US)
    }

    fn read_far_register(&mut self) -> FaultlineResult<u32> {
        let mut buf = PacketBuffer::new();
        for _ in 0..8 {
            buf.push(DUMMY_WORD);
        }
        buf.push(BUS_WIDTH_SYNC).push(BUS_WIDTH_DETECT);
        buf.push(DUMMY_WORD).push(SYNC_WORD).noop(1);
        buf.read_reg(ConfigReg::Far, 1).noop(2);

        self.port.arm_readback(1)?;
        self.port.push(buf.words())?;

        let mut value = [0u32; 1];
        let mut result = self.port.wait_idle(FRAME_OP_TIMEOUT_US);
        if result.is_ok() {
            result = self.port.pull(&mut value);
        }

        let mut epilogue = PacketBuffer::new();
        epilogue.command(ConfigCmd::Desync).noop(4);
        let desync = self
            .port
            .push(epilogue.words())
            .and_then(|_| self.port.wait_idle(FRAME_OP_TIMEOUT_US));

        result?;
        desync?;
        Ok(value[0])
    }
}
