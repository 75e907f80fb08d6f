// Licensed under the Apache-2.0 license

//! Shared fixtures for the end-to-end campaign tests.

use faultline_drivers::{
    DeviceFamily, FrameTable, JobDescriptor, Series7Transport,
};
use faultline_hw_model::{EmulatedConfigPort, FabricModel, InitParams, ModelEmulated};

pub const SERIES7_IDCODE: u32 = 0x0372_7093;
pub const USP_SLR_IDCODE: u32 = 0x04A5_A093;

/// A demo Series7 fabric plus its design table and transport.
pub fn series7_setup(
    checkpoint_last_n: usize,
) -> (
    ModelEmulated,
    Series7Transport<EmulatedConfigPort>,
    FrameTable,
) {
    let mut params = InitParams::demo(DeviceFamily::Series7);
    if checkpoint_last_n > 0 {
        let fars = params.geometry.frame_addresses();
        params.checkpoint_fars = fars.iter().rev().take(checkpoint_last_n).copied().collect();
    }
    let model = ModelEmulated::init(params).unwrap();
    let transport = Series7Transport::new(model.config_port(), SERIES7_IDCODE);
    let table = model.design_table();
    (model, transport, table)
}

/// Baseline job descriptor for the demo fabric.
pub fn job_base(mode: u32) -> JobDescriptor {
    JobDescriptor {
        mode,
        sync_tag: 7,
        block_type: 2,
        essential_bits: 1,
        log_cadence: 10,
        workload_duration: 50,
        injection_time: 5,
        fault_multiplicity: 1,
        population_size: 100_000.0,
        rng_seed: 42,
        ..Default::default()
    }
}

/// Every live frame matches the golden image.
pub fn assert_fabric_clean(model: &ModelEmulated) {
    for far in model.frame_addresses() {
        assert_eq!(
            model.live_frame(far).unwrap(),
            model.golden_frame(far).unwrap(),
            "FAR {far:08x} differs from golden"
        );
    }
}
