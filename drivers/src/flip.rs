/*++

Licensed under the Apache-2.0 license.

File Name:

    flip.rs

Abstract:

    File contains the bit-flip and recovery engine.

--*/

use crate::dut::WorkloadDriver;
use crate::frame_table::FrameTable;
use crate::selector::{CellType, InjectionTarget};
use crate::transport::FrameTransport;
use faultline_error::{FaultlineError, FaultlineResult};

/// Lowest minor index of the CLB frame group sharing control state; a
/// touched frame in 30..=35 forces a rewrite of the whole group.
const CLB_GROUP_FIRST_MINOR: u32 = 30;
const CLB_GROUP_FRAMES: usize = 6;

/// Result of one flip attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipOutcome {
    /// The modified frame read back as written.
    Applied,
    /// The write did not take; the column is under active use. Counted,
    /// not retried.
    Locked,
}

/// Result of an incremental recovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Clean,
    /// A golden rewrite failed verification; the orchestrator escalates
    /// to full reconfiguration.
    StuckFrame,
}

/// Executes atomic read-modify-write flips and restores touched frames
/// to their golden content between experiments.
pub struct InjectionEngine {
    touched: Vec<InjectionTarget>,
    capacity: usize,
}

impl InjectionEngine {
    pub fn new(capacity: usize) -> Self {
        Self {
            touched: Vec::new(),
            capacity,
        }
    }

    pub fn touched(&self) -> &[InjectionTarget] {
        &self.touched
    }

    /// Flip bits in the target word: `mask` when supplied, otherwise the
    /// single target bit. Verifies the write stuck unless `verify` is
    /// cleared.
    pub fn flip<T: FrameTransport, W: WorkloadDriver + ?Sized>(
        &mut self,
        transport: &mut T,
        dut: &mut W,
        target: &InjectionTarget,
        mask: Option<u32>,
        verify: bool,
    ) -> FaultlineResult<FlipOutcome> {
        // Capturing flip-flop state would latch over the very state a
        // flip-flop fault is about to corrupt.
        let capture_restore = target.cell_type != CellType::FlipFlop;

        let mut frame = transport.read_frame(target.far, capture_restore)?;
        frame.xor_word(target.word, mask.unwrap_or(1 << target.bit));
        transport.write_frame(target.far, &frame, capture_restore)?;
        if capture_restore {
            dut.trigger_gsr()?;
        }
        self.record(target)?;

        if !verify {
            return Ok(FlipOutcome::Applied);
        }
        let readback = transport.read_frame(target.far, false)?;
        if readback != frame {
            log::warn!(
                "locked target at FAR {:08x}, word {}, bit {}",
                target.far,
                target.word,
                target.bit
            );
            return Ok(FlipOutcome::Locked);
        }
        Ok(FlipOutcome::Applied)
    }

    /// Record a target for later incremental recovery, deduplicated by
    /// (FAR, word, bit).
    fn record(&mut self, target: &InjectionTarget) -> FaultlineResult<()> {
        let dup = self
            .touched
            .iter()
            .any(|t| t.far == target.far && t.word == target.word && t.bit == target.bit);
        if dup {
            return Ok(());
        }
        if self.touched.len() >= self.capacity {
            return Err(FaultlineError::ENGINE_TOUCHED_OVERFLOW);
        }
        self.touched.push(*target);
        Ok(())
    }

    /// Incremental recovery: write back the golden content of every
    /// touched frame and verify it took. Frames inside a CLB control
    /// group trigger a rewrite of the surrounding 6-minor group. The
    /// touched list is cleared regardless of the result.
    pub fn recover<T: FrameTransport>(
        &mut self,
        transport: &mut T,
        table: &FrameTable,
        rewrite_recovery_list: bool,
    ) -> FaultlineResult<RecoveryOutcome> {
        let family = table.family();
        let mut outcome = RecoveryOutcome::Clean;

        for i in 0..self.touched.len() {
            let target = self.touched[i];
            let desc = &table.frames[target.frame_index];
            let golden = desc.golden_frame();

            transport.write_frame(desc.far, &golden, false)?;
            let readback = transport.read_frame(desc.far, false)?;
            if readback.words() != &desc.data[..] {
                log::warn!("stuck frame during recovery at FAR {:08x}", desc.far);
                outcome = RecoveryOutcome::StuckFrame;
                break;
            }

            let addr = family.decode_far(desc.far);
            if addr.is_clb() && addr.minor >= CLB_GROUP_FIRST_MINOR {
                self.rewrite_clb_group(transport, table, target.frame_index, addr.minor)?;
            }
        }
        self.touched.clear();

        if rewrite_recovery_list {
            for &idx in &table.recovery {
                let desc = &table.frames[idx];
                transport.write_frame(desc.far, &desc.golden_frame(), false)?;
            }
        }
        Ok(outcome)
    }

    /// Certain CLB frame groups share control state that only a full
    /// group rewrite cleans reliably.
    fn rewrite_clb_group<T: FrameTransport>(
        &self,
        transport: &mut T,
        table: &FrameTable,
        frame_index: usize,
        minor: u32,
    ) -> FaultlineResult<()> {
        let offset = (minor - CLB_GROUP_FIRST_MINOR) as usize;
        if offset > frame_index {
            return Err(FaultlineError::ENGINE_GROUP_BOUNDS);
        }
        let start = frame_index - offset;
        if start + CLB_GROUP_FRAMES > table.frames.len() {
            return Err(FaultlineError::ENGINE_GROUP_BOUNDS);
        }
        let payload: Vec<u32> = table.frames[start..start + CLB_GROUP_FRAMES]
            .iter()
            .flat_map(|f| f.data.iter().copied())
            .collect();
        transport.write_frames(table.frames[start].far, &payload)
    }

    /// Full recovery: replay the original bitstream.
    pub fn recover_full<T: FrameTransport>(
        &mut self,
        transport: &mut T,
        bitstream: &[u32],
    ) -> FaultlineResult<()> {
        log::info!("recovery: complete reconfiguration");
        transport.reload_bitstream(bitstream)?;
        self.touched.clear();
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::far::DeviceFamily;
    use crate::frame::Frame;
    use std::collections::{BTreeMap, HashSet};

    /// Trait-level transport backed by a plain frame map; protocol-exact
    /// emulation lives in the hw-model crate.
    pub struct MapTransport {
        pub family: DeviceFamily,
        pub frames: BTreeMap<u32, Vec<u32>>,
        pub locked: HashSet<u32>,
        pub reloads: u32,
        pub golden: BTreeMap<u32, Vec<u32>>,
    }

    impl MapTransport {
        pub fn new(family: DeviceFamily, fars: &[u32]) -> Self {
            let frames: BTreeMap<u32, Vec<u32>> = fars
                .iter()
                .enumerate()
                .map(|(i, &far)| (far, vec![i as u32 + 1; family.frame_words()]))
                .collect();
            Self {
                family,
                golden: frames.clone(),
                frames,
                locked: HashSet::new(),
                reloads: 0,
            }
        }
    }

    impl FrameTransport for MapTransport {
        fn family(&self) -> DeviceFamily {
            self.family
        }

        fn read_frame(&mut self, far: u32, _capture: bool) -> FaultlineResult<Frame> {
            Ok(Frame::from_words(self.frames[&far].clone()))
        }

        fn write_frame(&mut self, far: u32, frame: &Frame, _restore: bool) -> FaultlineResult<()> {
            if !self.locked.contains(&far) {
                self.frames.insert(far, frame.words().to_vec());
            }
            Ok(())
        }

        fn write_frames(&mut self, start_far: u32, payload: &[u32]) -> FaultlineResult<()> {
            let n = self.family.frame_words();
            let fars: Vec<u32> = self.frames.keys().copied().collect();
            let mut pos = fars.iter().position(|&f| f == start_far).unwrap();
            for chunk in payload.chunks(n) {
                let far = fars[pos];
                if !self.locked.contains(&far) {
                    self.frames.insert(far, chunk.to_vec());
                }
                pos += 1;
            }
            Ok(())
        }

        fn reload_bitstream(&mut self, _bitstream: &[u32]) -> FaultlineResult<()> {
            self.frames = self.golden.clone();
            self.reloads += 1;
            Ok(())
        }

        fn read_far_register(&mut self) -> FaultlineResult<u32> {
            Ok(0)
        }
    }

    pub struct NullDut {
        pub gsr_pulses: u32,
    }

    impl NullDut {
        pub fn new() -> Self {
            Self { gsr_pulses: 0 }
        }
    }

    impl WorkloadDriver for NullDut {
        fn workload_duration(&self) -> u32 {
            100
        }

        fn run_cycles(&mut self, _cycles: u32) -> FaultlineResult<()> {
            Ok(())
        }

        fn evaluate(&mut self, _stop_at_first_mismatch: bool) -> FaultlineResult<u32> {
            Ok(0)
        }

        fn reset_dut(&mut self, _cycles: u32) -> FaultlineResult<()> {
            Ok(())
        }

        fn trigger_gsr(&mut self) -> FaultlineResult<()> {
            self.gsr_pulses += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{MapTransport, NullDut};
    use super::*;
    use crate::far::{DeviceFamily, FrameAddress, BLOCK_CLB};
    use crate::frame_table::ReferenceFrame;

    fn fixture() -> (MapTransport, FrameTable) {
        let family = DeviceFamily::Series7;
        let fars: Vec<u32> = (0..4)
            .map(|minor| family.encode_far(&FrameAddress::new(BLOCK_CLB, 0, 0, 20, minor)))
            .collect();
        let transport = MapTransport::new(family, &fars);
        let mut table = FrameTable::new(family);
        for &far in &fars {
            let mut frame = ReferenceFrame::new(far, family.frame_words());
            frame.data = transport.golden[&far].clone();
            frame.essential_bits = 1;
            table.push_frame(frame);
        }
        table.rebuild_index();
        (transport, table)
    }

    fn target(table: &FrameTable, frame_index: usize, word: usize, bit: u32) -> InjectionTarget {
        InjectionTarget {
            far: table.frames[frame_index].far,
            frame_index,
            word,
            bit,
            cell_type: CellType::Unknown,
            inj_cycle: 0,
        }
    }

    #[test]
    fn test_flip_involution() {
        let (mut transport, table) = fixture();
        let mut engine = InjectionEngine::new(16);
        let mut dut = NullDut::new();
        let t = target(&table, 1, 5, 17);

        let before = transport.frames[&t.far].clone();
        assert_eq!(
            engine.flip(&mut transport, &mut dut, &t, None, true).unwrap(),
            FlipOutcome::Applied
        );
        assert_ne!(transport.frames[&t.far], before);
        assert_eq!(
            engine.flip(&mut transport, &mut dut, &t, None, true).unwrap(),
            FlipOutcome::Applied
        );
        assert_eq!(transport.frames[&t.far], before);
        // Capture path pulses GSR on each flip.
        assert_eq!(dut.gsr_pulses, 2);
    }

    #[test]
    fn test_flip_locked_frame_is_reported() {
        let (mut transport, table) = fixture();
        let mut engine = InjectionEngine::new(16);
        let mut dut = NullDut::new();
        let t = target(&table, 2, 0, 0);
        transport.locked.insert(t.far);

        assert_eq!(
            engine.flip(&mut transport, &mut dut, &t, None, true).unwrap(),
            FlipOutcome::Locked
        );
    }

    #[test]
    fn test_flipflop_target_skips_gsr() {
        let (mut transport, table) = fixture();
        let mut engine = InjectionEngine::new(16);
        let mut dut = NullDut::new();
        let mut t = target(&table, 0, 1, 1);
        t.cell_type = CellType::FlipFlop;

        engine.flip(&mut transport, &mut dut, &t, None, true).unwrap();
        assert_eq!(dut.gsr_pulses, 0);
    }

    #[test]
    fn test_recover_restores_golden() {
        let (mut transport, table) = fixture();
        let mut engine = InjectionEngine::new(16);
        let mut dut = NullDut::new();

        for (frame_index, word) in [(0usize, 3usize), (2, 9)] {
            let t = target(&table, frame_index, word, 4);
            engine.flip(&mut transport, &mut dut, &t, None, true).unwrap();
        }
        assert_eq!(engine.touched().len(), 2);

        let outcome = engine.recover(&mut transport, &table, false).unwrap();
        assert_eq!(outcome, RecoveryOutcome::Clean);
        assert!(engine.touched().is_empty());
        for frame in &table.frames {
            assert_eq!(transport.frames[&frame.far], frame.data);
        }
    }

    #[test]
    fn test_recover_reports_stuck_frame() {
        let (mut transport, table) = fixture();
        let mut engine = InjectionEngine::new(16);
        let mut dut = NullDut::new();
        let t = target(&table, 1, 0, 0);

        engine.flip(&mut transport, &mut dut, &t, None, false).unwrap();
        transport.locked.insert(t.far);
        let outcome = engine.recover(&mut transport, &table, false).unwrap();
        assert_eq!(outcome, RecoveryOutcome::StuckFrame);
        assert!(engine.touched().is_empty());
    }

    #[test]
    fn test_recover_rewrites_clb_control_group() {
        let family = DeviceFamily::Series7;
        let fars: Vec<u32> = (28..=36)
            .map(|minor| family.encode_far(&FrameAddress::new(BLOCK_CLB, 0, 0, 20, minor)))
            .collect();
        let mut transport = MapTransport::new(family, &fars);
        let mut table = FrameTable::new(family);
        for &far in &fars {
            let mut frame = ReferenceFrame::new(far, family.frame_words());
            frame.data = transport.golden[&far].clone();
            frame.essential_bits = 1;
            table.push_frame(frame);
        }
        table.rebuild_index();

        let mut engine = InjectionEngine::new(16);
        let mut dut = NullDut::new();
        // Touch minor 32; its whole 30..=35 group must come back golden.
        let t = target(&table, 4, 2, 11);
        engine.flip(&mut transport, &mut dut, &t, None, true).unwrap();
        // Scribble over another frame of the same group behind the
        // engine's back; only the group rewrite can repair it.
        let group_far = table.frames[6].far;
        let mut dirty = transport.frames[&group_far].clone();
        dirty[7] ^= 0xFF;
        transport.frames.insert(group_far, dirty);

        let outcome = engine.recover(&mut transport, &table, false).unwrap();
        assert_eq!(outcome, RecoveryOutcome::Clean);
        assert_eq!(transport.frames[&group_far], table.frames[6].data);
    }

    #[test]
    fn test_touched_list_dedup_and_capacity() {
        let (mut transport, table) = fixture();
        let mut engine = InjectionEngine::new(1);
        let mut dut = NullDut::new();
        let t = target(&table, 0, 0, 0);

        engine.flip(&mut transport, &mut dut, &t, None, false).unwrap();
        // Same coordinate again: deduplicated, no overflow.
        engine.flip(&mut transport, &mut dut, &t, None, false).unwrap();
        assert_eq!(engine.touched().len(), 1);

        let other = target(&table, 3, 0, 0);
        let err = engine
            .flip(&mut transport, &mut dut, &other, None, false)
            .unwrap_err();
        assert_eq!(err, FaultlineError::ENGINE_TOUCHED_OVERFLOW);
    }
}
