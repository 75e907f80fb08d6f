/*++

Licensed under the Apache-2.0 license.

File Name:

    campaign.rs

Abstract:

    File contains the campaign orchestrator: the end-to-end experiment
    state machine.

--*/

use crate::dut::WorkloadDriver;
use crate::far::BLOCK_BRAM;
use crate::fault_list::{FaultDescriptor, FaultList};
use crate::flip::{FlipOutcome, InjectionEngine, RecoveryOutcome};
use crate::frame::Frame;
use crate::frame_table::FrameTable;
use crate::job::{CampaignMode, JobDescriptor};
use crate::selector::{
    BlockFilter, CellType, ExhaustiveSelector, InjectionTarget, RandomSelector, TargetFilter,
};
use crate::stats::{FailureMode, InjectionStatistics};
use crate::transport::FrameTransport;
use faultline_error::{FaultlineError, FaultlineResult};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Upper bound on the FAR auto-increment walk per block type half.
const MAX_PROFILE_STEPS: usize = 20_000;

/// Orchestrator knobs not carried by the job descriptor.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    /// Abort the campaign when the fault-free baseline run mismatches
    /// the reference trace. The firmware this derives from only warned;
    /// results after a failed golden run are untrustworthy either way.
    pub golden_run_fatal: bool,
    /// Capacity of the recently-touched target list.
    pub touched_capacity: usize,
    /// Rebuild the per-word injectable masks from probing instead of
    /// trusting the design description.
    pub classify_build_mask: bool,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            golden_run_fatal: false,
            touched_capacity: 1024,
            classify_build_mask: false,
        }
    }
}

/// Campaign progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignState {
    Idle,
    GoldenRunCheck,
    Sampling,
    Exhaustive,
    FaultList,
    Profiling,
    Completed,
}

/// Literal outcome of one fault-list group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultOutcome {
    pub id: u32,
    pub mode: FailureMode,
    pub mismatches: u32,
}

enum Selector {
    Random(RandomSelector),
    Exhaustive(ExhaustiveSelector),
}

impl Selector {
    fn next_target(
        &mut self,
        table: &mut FrameTable,
        filter: &TargetFilter,
    ) -> FaultlineResult<InjectionTarget> {
        match self {
            Selector::Random(s) => s.next_target(table, filter),
            Selector::Exhaustive(s) => s.next_target(table, filter),
        }
    }
}

/// Drives a full injection campaign over an injected transport and DUT
/// workload driver.
pub struct Campaign<T: FrameTransport, W: WorkloadDriver> {
    transport: T,
    dut: W,
    table: FrameTable,
    job: JobDescriptor,
    config: CampaignConfig,
    state: CampaignState,
    engine: InjectionEngine,
    stats: InjectionStatistics,
    checkpoints: Vec<Frame>,
    fault_outcomes: Vec<FaultOutcome>,
    rng: SmallRng,
}

impl<T: FrameTransport, W: WorkloadDriver> Campaign<T, W> {
    pub fn new(
        transport: T,
        dut: W,
        table: FrameTable,
        job: JobDescriptor,
        config: CampaignConfig,
    ) -> Self {
        let engine = InjectionEngine::new(config.touched_capacity);
        Self {
            transport,
            dut,
            table,
            engine,
            state: CampaignState::Idle,
            stats: InjectionStatistics::new(job.population_size as f64),
            checkpoints: Vec::new(),
            fault_outcomes: Vec::new(),
            rng: SmallRng::seed_from_u64(job.rng_seed as u64 ^ 0x5EED_0000),
            job,
            config,
        }
    }

    pub fn state(&self) -> CampaignState {
        self.state
    }

    pub fn statistics(&self) -> &InjectionStatistics {
        &self.stats
    }

    pub fn fault_outcomes(&self) -> &[FaultOutcome] {
        &self.fault_outcomes
    }

    pub fn table(&self) -> &FrameTable {
        &self.table
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn filter(&self) -> TargetFilter {
        TargetFilter {
            block: BlockFilter::from(self.job.block_type),
            essential_only: self.job.essential_bits > 0,
            without_repetition: self.job.sampling_without_repetition != 0,
            cell_type: CellType::from(self.job.cell_type),
        }
    }

    fn latent_detection(&self) -> bool {
        self.job.detect_latent_errors != 0 && !self.table.checkpoint_fars.is_empty()
    }

    /// Run the campaign to completion and return the final statistics.
    pub fn run(
        &mut self,
        bitstream: &[u32],
        fault_list: Option<&mut FaultList>,
    ) -> FaultlineResult<InjectionStatistics> {
        if self.state != CampaignState::Idle {
            return Err(FaultlineError::CAMPAIGN_NOT_IDLE);
        }
        let mode = self.job.campaign_mode()?;

        self.state = CampaignState::GoldenRunCheck;
        self.golden_run_check(bitstream)?;

        if self.job.filter_frames != 0 {
            self.table
                .classify(&mut self.transport, self.config.classify_build_mask)?;
        }

        match mode {
            CampaignMode::Sampling => {
                self.state = CampaignState::Sampling;
                let selector = Selector::Random(RandomSelector::new(self.job.rng_seed as u64));
                self.run_statistical(selector, bitstream)?;
            }
            CampaignMode::Exhaustive => {
                self.state = CampaignState::Exhaustive;
                let selector = Selector::Exhaustive(ExhaustiveSelector::new());
                self.run_statistical(selector, bitstream)?;
            }
            CampaignMode::FaultList => {
                self.state = CampaignState::FaultList;
                let list = fault_list.ok_or(FaultlineError::CAMPAIGN_MISSING_FAULT_LIST)?;
                self.run_fault_list(bitstream, list)?;
            }
            CampaignMode::Profiling => {
                self.state = CampaignState::Profiling;
                let map = self.profile_far_map(bitstream)?;
                log::info!(
                    "Tag_{:9} | Profiling Result: {:8} frames",
                    self.job.sync_tag,
                    map.len()
                );
            }
            CampaignMode::CacheMaintenance => {
                // Storage housekeeping happens in the host layer; nothing
                // to drive against the fabric.
                log::info!("cache maintenance mode: no fabric work");
            }
        }

        self.state = CampaignState::Completed;
        self.stats.update_estimates();
        Ok(self.stats.clone())
    }

    /// Load the full bitstream, verify the fault-free baseline and take
    /// the latent-detection checkpoint.
    fn golden_run_check(&mut self, bitstream: &[u32]) -> FaultlineResult<()> {
        self.transport.reload_bitstream(bitstream)?;
        let mismatches = self.dut.evaluate(false)?;
        if self.latent_detection() {
            self.save_checkpoints()?;
        }
        if mismatches > 0 {
            log::error!("golden run mismatch: {mismatches} trace words differ");
            if self.config.golden_run_fatal {
                self.state = CampaignState::Completed;
                return Err(FaultlineError::CAMPAIGN_GOLDEN_RUN_FAILED);
            }
        } else {
            log::info!("golden run verified against reference trace");
        }
        Ok(())
    }

    fn save_checkpoints(&mut self) -> FaultlineResult<()> {
        self.checkpoints.clear();
        for i in 0..self.table.checkpoint_fars.len() {
            let far = self.table.checkpoint_fars[i];
            self.checkpoints.push(self.transport.read_frame(far, true)?);
        }
        log::debug!("checkpoint saved: {} frames", self.checkpoints.len());
        Ok(())
    }

    fn count_checkpoint_mismatches(&mut self) -> FaultlineResult<u32> {
        let mut mismatches = 0;
        for i in 0..self.checkpoints.len() {
            let far = self.table.checkpoint_fars[i];
            let current = self.transport.read_frame(far, true)?;
            mismatches += current
                .words()
                .iter()
                .zip(self.checkpoints[i].words())
                .filter(|(a, b)| a != b)
                .count() as u32;
        }
        Ok(mismatches)
    }

    fn population(&self, mode: CampaignMode) -> f64 {
        let base = self.job.population_size as f64;
        // With a free injection time every workload cycle multiplies the
        // population.
        if mode == CampaignMode::Sampling && self.job.injection_time == 0 {
            base * self.job.workload_duration.max(1) as f64
        } else {
            base
        }
    }

    fn sampling_goals_met(&self) -> bool {
        let job = &self.job;
        let stats = &self.stats;
        if job.sample_size_goal > 0 && stats.injections < job.sample_size_goal {
            return false;
        }
        let margin_goal = job.error_margin_goal as f64;
        if margin_goal > 0.0
            && (stats.failure_error_margin > margin_goal
                || stats.masked_error_margin > margin_goal)
        {
            return false;
        }
        if job.sample_size_goal == 0
            && job.error_margin_goal == 0.0
            && (stats.injections as f64) < stats.population
        {
            return false;
        }
        true
    }

    fn run_statistical(&mut self, mut selector: Selector, bitstream: &[u32]) -> FaultlineResult<()> {
        let mode = self.job.campaign_mode()?;
        let population = self.population(mode);
        let filter = self.filter();

        self.stats = if self.job.start_index > 0 {
            // Resume: re-derive the selector sequence up to the persisted
            // index, then pick the counters back up.
            for _ in 0..self.job.start_index {
                selector.next_target(&mut self.table, &filter)?;
            }
            log::info!("selector state recovered at index {}", self.job.start_index);
            InjectionStatistics::resume(
                population,
                self.job.start_index,
                self.job.current_failure_count,
                self.job.current_masked_count,
                self.job.current_latent_count,
            )
        } else {
            InjectionStatistics::new(population)
        };

        log::info!(
            "Tag_{:9} | {:?} campaign: {}, population = {:.0}, sample goal = {}, margin goal = {:.5}",
            self.job.sync_tag,
            mode,
            if self.job.essential_bits > 0 {
                "essential bits"
            } else {
                "blind"
            },
            population,
            self.job.sample_size_goal,
            self.job.error_margin_goal,
        );

        self.transport.reload_bitstream(bitstream)?;

        loop {
            let done = match mode {
                CampaignMode::Exhaustive => self.stats.injections as f64 >= population,
                _ => self.sampling_goals_met(),
            };
            if done {
                break;
            }

            let (failures, last_target) = match self.run_experiment(&mut selector, &filter) {
                Ok(result) => result,
                Err(err) if err == FaultlineError::SELECTOR_EXHAUSTED => {
                    log::info!("target population exhausted after {} injections", self.stats.injections);
                    break;
                }
                Err(err) => return Err(err),
            };
            let cp_mismatches = if self.latent_detection() {
                self.count_checkpoint_mismatches()?
            } else {
                0
            };

            let outcome = if failures > 0 {
                FailureMode::Sdc
            } else if cp_mismatches > 0 {
                FailureMode::Latent
            } else {
                FailureMode::Masked
            };
            self.stats.record(outcome);

            let cadence = self.job.log_cadence.max(1);
            if self.stats.injections % cadence == 0 || self.stats.injections as f64 >= population {
                self.stats.update_estimates();
                self.log_progress();
            }
            if self.job.detailed_log != 0 {
                if let Some(target) = last_target {
                    log::info!(
                        ">> Run[{:5}]: {:8}:{:8}:{:8}:{:8}:{}",
                        self.stats.injections,
                        target.far,
                        target.word,
                        target.bit,
                        target.inj_cycle,
                        outcome.label()
                    );
                }
            }

            // Recover to the fault-free state; a stuck frame escalates to
            // full reconfiguration.
            let recovery = self
                .engine
                .recover(&mut self.transport, &self.table, failures > 0)?;
            if recovery == RecoveryOutcome::StuckFrame {
                self.engine.recover_full(&mut self.transport, bitstream)?;
                self.stats.complete_reconfigurations += 1;
            }

            // Periodically verify the DUT actually recovered.
            if self.job.check_recovery > 0
                && self.stats.injections % self.job.check_recovery == 0
                && self.dut.evaluate(true)? > 0
            {
                self.engine.recover_full(&mut self.transport, bitstream)?;
                self.stats.complete_reconfigurations += 1;
            }
        }
        Ok(())
    }

    /// One experiment: run to the injection cycle, flip, run out the
    /// workload, evaluate.
    fn run_experiment(
        &mut self,
        selector: &mut Selector,
        filter: &TargetFilter,
    ) -> FaultlineResult<(u32, Option<InjectionTarget>)> {
        let duration = self.job.workload_duration.max(1);
        let inj_cycle = if self.job.injection_time == 0 {
            self.rng.gen_range(0..duration)
        } else {
            self.job.injection_time - 1
        };
        if inj_cycle > 0 {
            self.dut.run_cycles(inj_cycle)?;
        }

        let mut last_target = None;
        for _ in 0..self.job.fault_multiplicity.max(1) {
            let mut target = selector.next_target(&mut self.table, filter)?;
            target.inj_cycle = inj_cycle;
            let outcome =
                self.engine
                    .flip(&mut self.transport, &mut self.dut, &target, None, true)?;
            if outcome == FlipOutcome::Locked {
                self.stats.locked_targets += 1;
            }
            last_target = Some(target);
        }

        self.dut.run_cycles(duration - inj_cycle)?;
        let failures = self.dut.evaluate(true)?;
        Ok((failures, last_target))
    }

    fn log_progress(&self) {
        let stats = &self.stats;
        log::info!(
            "Tag_{:9} | Injection[{:9}] / [{:.0}]  complete_reconfigurations= {:5} | locked_targets= {:5} | Masked: {:6}, Rate= {:.3} +/- {:.3} | Failures: {:6}, Rate = {:.3} +/- {:.3} | Latent: {:6}, Rate = {:.3} +/- {:.3}",
            self.job.sync_tag,
            stats.injections,
            stats.population,
            stats.complete_reconfigurations,
            stats.locked_targets,
            stats.masked,
            stats.masked_rate_pct(),
            100.0 * stats.masked_error_margin,
            stats.failures,
            stats.failure_rate_pct(),
            100.0 * stats.failure_error_margin,
            stats.latent,
            stats.latent_rate_pct(),
            100.0 * stats.latent_error_margin,
        );
    }

    /// Fault-list mode: full reconfiguration brackets every group, no
    /// statistics goals, literal outcome per group.
    fn run_fault_list(&mut self, bitstream: &[u32], list: &mut FaultList) -> FaultlineResult<()> {
        self.stats = InjectionStatistics::new(list.descriptors.len() as f64);
        self.fault_outcomes.clear();

        if !list.reference_data_present {
            list.capture_reference(&mut self.transport)?;
        }

        self.transport.reload_bitstream(bitstream)?;

        // Explicit group bounds; the terminating record is the slice end.
        let groups: Vec<(usize, usize)> = {
            let mut bounds = Vec::new();
            let mut start = 0;
            while start < list.descriptors.len() {
                let id = list.descriptors[start].id;
                let mut end = start + 1;
                while end < list.descriptors.len() && list.descriptors[end].id == id {
                    end += 1;
                }
                bounds.push((start, end));
                start = end;
            }
            bounds
        };

        for (start, end) in groups {
            let id = list.descriptors[start].id;
            // All descriptors of the group go in before the workload runs.
            for i in start..end {
                let descriptor = list.descriptors[i];
                self.inject_descriptor(&descriptor)?;
            }

            self.dut.run_cycles(100)?;
            self.dut.reset_dut(0)?;
            let mismatches = self.dut.evaluate(true)?;

            let mode = if mismatches > 0 {
                FailureMode::Sdc
            } else {
                FailureMode::Masked
            };
            // Literal outcome recorded per descriptor.
            for _ in start..end {
                self.stats.record(mode);
                self.fault_outcomes.push(FaultOutcome {
                    id,
                    mode,
                    mismatches,
                });
            }
            log::info!(
                "FaultId={:5}, Fmode= {:10}, mismatches= {}",
                id,
                mode.label(),
                mismatches
            );

            if self.stats.injections % self.job.log_cadence.max(1) == 0 {
                self.stats.update_estimates();
                self.log_progress();
            }

            // Back to a known-good state before the next group.
            self.transport.reload_bitstream(bitstream)?;
            self.stats.complete_reconfigurations += 1;
        }
        Ok(())
    }

    fn inject_descriptor(&mut self, descriptor: &FaultDescriptor) -> FaultlineResult<()> {
        let capture = CellType::from(descriptor.cell_type) != CellType::FlipFlop;
        let mut frame = self.transport.read_frame(descriptor.far, capture)?;
        let live = frame.word(descriptor.word as usize);
        if descriptor.reference_word != live {
            // Stale golden data from the host; the injection still goes in.
            log::warn!(
                "reference word mismatch at FAR {:08x} word {}: {:08x} != {:08x}",
                descriptor.far,
                descriptor.word,
                live,
                descriptor.reference_word
            );
        }
        frame.xor_word(descriptor.word as usize, descriptor.mask);
        self.transport.write_frame(descriptor.far, &frame, capture)?;
        if capture {
            self.dut.trigger_gsr()?;
        }
        Ok(())
    }

    /// Profiling mode: walk the device frame map through FAR
    /// auto-increment readback.
    pub fn profile_far_map(&mut self, bitstream: &[u32]) -> FaultlineResult<Vec<u32>> {
        self.transport.reload_bitstream(bitstream)?;
        let family = self.table.family();
        let mut fars = Vec::new();

        for half in 0..2u32 {
            let mut far = half;
            for _ in 0..MAX_PROFILE_STEPS {
                let addr = family.decode_far(far);
                if addr.block > BLOCK_BRAM {
                    break;
                }
                if fars.last() != Some(&far) {
                    fars.push(far);
                }
                self.transport.read_frame(far, false)?;
                let next = self.transport.read_far_register()? | half;
                if next == far {
                    break;
                }
                far = next;
            }
        }
        fars.sort_unstable();
        fars.dedup();
        Ok(fars)
    }
}
