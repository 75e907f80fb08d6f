/*++

Licensed under the Apache-2.0 license.

File Name:

    job.rs

Abstract:

    File contains the job descriptor received from the host at campaign
    start.

--*/

use faultline_error::{FaultlineError, FaultlineResult};
use zerocopy::{AsBytes, FromBytes};

/// Sync word preceding the job descriptor block.
pub const JOB_SYNC_WORD: u32 = 0xAABB_CCDD;

/// Campaign modes carried in `JobDescriptor::mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignMode {
    CacheMaintenance,
    Profiling,
    Sampling,
    Exhaustive,
    FaultList,
}

impl TryFrom<u32> for CampaignMode {
    type Error = FaultlineError;

    fn try_from(val: u32) -> FaultlineResult<Self> {
        match val {
            1 => Ok(CampaignMode::CacheMaintenance),
            4 => Ok(CampaignMode::Profiling),
            101 => Ok(CampaignMode::Sampling),
            102 => Ok(CampaignMode::Exhaustive),
            201 => Ok(CampaignMode::FaultList),
            _ => Err(FaultlineError::CAMPAIGN_BAD_MODE),
        }
    }
}

/// Campaign configuration uploaded by the host, read once at startup.
///
/// The resumption counters (`start_index` and the current counts) let a
/// campaign restart mid-way: the selector replays its draw sequence up
/// to `start_index` before the first new experiment.
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug, Default, PartialEq)]
pub struct JobDescriptor {
    pub bitstream_id: u32,
    pub sync_tag: u32,
    pub bitstream_addr: u32,
    pub bitstream_size: u32,
    pub bitmask_addr: u32,
    pub bitmask_size: u32,
    pub update_bitstream: u32,
    pub mode: u32,
    /// 0 = CLB, 1 = BRAM, >= 2 = any.
    pub block_type: u32,
    pub cell_type: u32,
    /// Non-zero restricts targets to essential bits.
    pub essential_bits: u32,
    /// Re-run the workload fault-free every N experiments to verify
    /// recovery actually recovered.
    pub check_recovery: u32,
    /// Progress line every N experiments.
    pub log_cadence: u32,
    pub start_index: u32,
    pub experiments_completed: u32,
    pub current_failure_count: u32,
    pub current_masked_count: u32,
    pub current_latent_count: u32,
    pub current_sdc_count: u32,
    pub sample_size_goal: u32,
    pub error_margin_goal: f32,
    pub fault_multiplicity: u32,
    pub population_size: f32,
    pub sampling_without_repetition: u32,
    /// 0 = random cycle per experiment, otherwise inject at cycle - 1.
    pub injection_time: u32,
    pub workload_duration: u32,
    pub detect_latent_errors: u32,
    pub detailed_log: u32,
    pub filter_frames: u32,
    pub rng_seed: u32,
}

impl JobDescriptor {
    pub fn campaign_mode(&self) -> FaultlineResult<CampaignMode> {
        CampaignMode::try_from(self.mode)
    }
}

/// Parse the host transfer block: sync word, then the descriptor.
pub fn parse_job_descriptor(bytes: &[u8]) -> FaultlineResult<JobDescriptor> {
    let sync = u32::read_from_prefix(bytes).ok_or(FaultlineError::FORMAT_TRUNCATED)?;
    if sync != JOB_SYNC_WORD {
        return Err(FaultlineError::FORMAT_BAD_SYNC);
    }
    JobDescriptor::read_from_prefix(bytes.get(4..).ok_or(FaultlineError::FORMAT_TRUNCATED)?)
        .ok_or(FaultlineError::FORMAT_TRUNCATED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let mut desc = JobDescriptor::default();
        desc.bitstream_id = 42;
        desc.mode = 101;
        desc.sample_size_goal = 500;
        desc.error_margin_goal = 0.01;
        desc.population_size = 1.0e6;

        let mut bytes = JOB_SYNC_WORD.to_le_bytes().to_vec();
        bytes.extend_from_slice(desc.as_bytes());

        let parsed = parse_job_descriptor(&bytes).unwrap();
        assert_eq!(parsed.bitstream_id, 42);
        assert_eq!(parsed.campaign_mode().unwrap(), CampaignMode::Sampling);
        assert_eq!(parsed.sample_size_goal, 500);
        assert!((parsed.population_size - 1.0e6).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_rejects_bad_sync() {
        let desc = JobDescriptor::default();
        let mut bytes = 0xDEAD_BEEFu32.to_le_bytes().to_vec();
        bytes.extend_from_slice(desc.as_bytes());
        assert_eq!(
            parse_job_descriptor(&bytes),
            Err(FaultlineError::FORMAT_BAD_SYNC)
        );
    }

    #[test]
    fn test_parse_rejects_truncated() {
        let bytes = JOB_SYNC_WORD.to_le_bytes().to_vec();
        assert_eq!(
            parse_job_descriptor(&bytes),
            Err(FaultlineError::FORMAT_TRUNCATED)
        );
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let mut desc = JobDescriptor::default();
        desc.mode = 77;
        assert_eq!(
            desc.campaign_mode(),
            Err(FaultlineError::CAMPAIGN_BAD_MODE)
        );
    }
}
