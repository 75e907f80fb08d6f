// Licensed under the Apache-2.0 license

use crate::fabric::{FabricState, ModelCounters};
use crate::{FabricModel, InitParams};
use faultline_drivers::{
    build_design_image, ConfigPort, DeviceFamily, FrameFlags, FrameTable, ReferenceFrame,
    WorkloadDriver,
};
use faultline_error::FaultlineResult;
use std::cell::RefCell;
use std::rc::Rc;

/// Emulated fabric, shared by port and DUT handles.
pub struct ModelEmulated {
    state: Rc<RefCell<FabricState>>,
}

impl FabricModel for ModelEmulated {
    type Port = EmulatedConfigPort;

    fn init(params: InitParams) -> FaultlineResult<Self> {
        let mut state = FabricState::new(&params.geometry, params.seed);
        state.locked = params.locked.iter().copied().collect();
        state.checkpoint_fars = params.checkpoint_fars.iter().copied().collect();
        state.recovery_fars = params.recovery_fars;
        Ok(Self {
            state: Rc::new(RefCell::new(state)),
        })
    }

    fn config_port(&self) -> EmulatedConfigPort {
        EmulatedConfigPort {
            state: Rc::clone(&self.state),
        }
    }

    fn dut(&self, workload_duration: u32) -> EmulatedDut {
        EmulatedDut {
            state: Rc::clone(&self.state),
            workload_duration,
        }
    }
}

impl ModelEmulated {
    pub fn family(&self) -> DeviceFamily {
        self.state.borrow().family
    }

    /// All valid frame addresses of the emulated device, ascending.
    pub fn frame_addresses(&self) -> Vec<u32> {
        self.state.borrow().frame_addresses().to_vec()
    }

    /// Reference frame table describing the emulated design, as the
    /// synthesis flow would have produced it.
    pub fn design_table(&self) -> FrameTable {
        let state = self.state.borrow();
        let family = state.family;
        let mut table = FrameTable::new(family);
        for &far in state.frame_addresses() {
            let mut frame = ReferenceFrame::new(far, family.frame_words());
            frame.data = state.golden[&far].clone();
            frame.mask = state.essential[&far].clone();
            frame.essential_bits = frame.mask.iter().map(|w| w.count_ones()).sum();
            if frame.essential_bits > 0 {
                frame.flags = FrameFlags::NOT_EMPTY;
            }
            table.push_frame(frame);
        }
        let recovery_fars = state.recovery_fars.clone();
        for far in recovery_fars {
            if let Some(index) = table.index_of_far(far) {
                table.recovery.push(index);
            }
        }
        table.checkpoint_fars = state.checkpoint_fars.iter().copied().collect();
        table.checkpoint_fars.sort_unstable();
        table.rebuild_index();
        table
    }

    /// The design description image for this fabric.
    pub fn design_image(&self) -> Vec<u32> {
        build_design_image(&self.design_table())
    }

    /// An opaque full bitstream accepted by the emulated DMA engine.
    pub fn golden_bitstream(&self) -> Vec<u32> {
        let state = self.state.borrow();
        let mut words = vec![0xFFFF_FFFF, 0xAA99_5566];
        for data in state.golden.values() {
            words.extend_from_slice(data);
        }
        words
    }

    pub fn live_frame(&self, far: u32) -> Option<Vec<u32>> {
        self.state.borrow().frames.get(&far).cloned()
    }

    pub fn golden_frame(&self, far: u32) -> Option<Vec<u32>> {
        self.state.borrow().golden.get(&far).cloned()
    }

    /// Mark a frame as locked: writes to it are silently dropped.
    pub fn lock_frame(&self, far: u32) {
        self.state.borrow_mut().locked.insert(far);
    }

    /// Force the next `count` wait-idle polls to time out.
    pub fn inject_timeouts(&self, count: u32) {
        self.state.borrow_mut().timeout_budget = count;
    }

    /// Corrupt fabric state behind the engine's back (latent faults).
    pub fn corrupt_frame(&self, far: u32, word: usize, mask: u32) {
        let mut state = self.state.borrow_mut();
        if let Some(frame) = state.frames.get_mut(&far) {
            frame[word] ^= mask;
        }
    }

    pub fn counters(&self) -> ModelCounters {
        self.state.borrow().counters
    }

    /// DUT clock cycles released since the last reset.
    pub fn dut_cycles(&self) -> u64 {
        self.state.borrow().dut_cycles
    }
}

/// Configuration port handle interpreting the pushed packet streams.
pub struct EmulatedConfigPort {
    state: Rc<RefCell<FabricState>>,
}

impl ConfigPort for EmulatedConfigPort {
    fn push(&mut self, words: &[u32]) -> FaultlineResult<()> {
        self.state.borrow_mut().interpret(words)
    }

    fn arm_readback(&mut self, words: usize) -> FaultlineResult<()> {
        self.state.borrow_mut().arm_readback(words);
        Ok(())
    }

    fn pull(&mut self, out: &mut [u32]) -> FaultlineResult<()> {
        self.state.borrow_mut().pull(out)
    }

    fn wait_idle(&mut self, _timeout_us: u32) -> FaultlineResult<()> {
        self.state.borrow_mut().wait_idle()
    }

    fn program(&mut self, _bitstream: &[u32]) -> FaultlineResult<()> {
        self.state.borrow_mut().program();
        Ok(())
    }
}

/// Emulated DUT: output pass/fail derives from the essential bits of
/// the live fabric vs. the golden image; checkpoint frames only show up
/// in internal state.
pub struct EmulatedDut {
    state: Rc<RefCell<FabricState>>,
    workload_duration: u32,
}

impl WorkloadDriver for EmulatedDut {
    fn workload_duration(&self) -> u32 {
        self.workload_duration
    }

    fn run_cycles(&mut self, cycles: u32) -> FaultlineResult<()> {
        self.state.borrow_mut().dut_cycles += cycles as u64;
        Ok(())
    }

    fn evaluate(&mut self, _stop_at_first_mismatch: bool) -> FaultlineResult<u32> {
        Ok(self.state.borrow().output_mismatches())
    }

    fn reset_dut(&mut self, _cycles: u32) -> FaultlineResult<()> {
        self.state.borrow_mut().dut_cycles = 0;
        Ok(())
    }

    fn trigger_gsr(&mut self) -> FaultlineResult<()> {
        self.state.borrow_mut().counters.gsr_pulses += 1;
        Ok(())
    }
}
