// Licensed under the Apache-2.0 license

//! End-to-end campaign scenarios against the emulated fabric.

use faultline_drivers::{
    Campaign, CampaignConfig, CampaignState, CellType, DeviceFamily, FailureMode, FaultDescriptor,
    FaultList, FlipOutcome, InjectionEngine, InjectionTarget, RecoveryOutcome,
    UltraScalePlusTransport,
};
use faultline_hw_model::{FabricModel, InitParams, ModelEmulated};
use faultline_test::{assert_fabric_clean, job_base, series7_setup, USP_SLR_IDCODE};

#[test]
fn sdc_scenario_inject_observe_recover() {
    let (model, mut transport, table) = series7_setup(0);
    let mut dut = model.dut(50);
    let mut engine = InjectionEngine::new(64);

    // Fault-free baseline.
    use faultline_drivers::WorkloadDriver;
    assert_eq!(dut.evaluate(false).unwrap(), 0);

    // Word 0 carries essential bits in every demo frame.
    let frame_index = table.injectable()[0];
    let target = InjectionTarget {
        far: table.frames[frame_index].far,
        frame_index,
        word: 0,
        bit: 0,
        cell_type: CellType::Unknown,
        inj_cycle: 0,
    };
    assert!(table.frames[frame_index].is_essential(0, 0));

    let outcome = engine
        .flip(&mut transport, &mut dut, &target, None, true)
        .unwrap();
    assert_eq!(outcome, FlipOutcome::Applied);

    // The DUT observes the corruption: signalled / SDC.
    let mismatches = dut.evaluate(true).unwrap();
    assert!(mismatches > 0);
    let mode = if mismatches > 0 {
        FailureMode::Sdc
    } else {
        FailureMode::Masked
    };
    assert!(mode.is_failure());

    // Recover and re-run: the workload must match the reference exactly.
    let recovery = engine.recover(&mut transport, &table, false).unwrap();
    assert_eq!(recovery, RecoveryOutcome::Clean);
    assert_eq!(dut.evaluate(false).unwrap(), 0);
    assert_fabric_clean(&model);
}

#[test]
fn classifier_probes_and_restores_every_frame() {
    let (model, mut transport, mut table) = series7_setup(0);
    table.classify(&mut transport, true).unwrap();

    // Probing must leave the device in its pre-probe state.
    assert_fabric_clean(&model);

    let family = table.family();
    for frame in &table.frames {
        let addr = family.decode_far(frame.far);
        // Word-granularity classifier: fixed words never injectable.
        assert_eq!(frame.mask[faultline_drivers::CLB_FIXED_WORD], 0);
        if addr.is_bram() {
            for &word in family.bram_masked_words() {
                assert_eq!(frame.mask[word], 0, "ECC word {word} marked injectable");
            }
        }
        // Every other word of the demo fabric round-trips.
        assert_eq!(frame.mask[0], 0xFFFF_FFFF);
        assert!(frame.essential_bits > 0);
    }
}

#[test]
fn classifier_soundness_on_locked_frame() {
    let (model, mut transport, mut table) = series7_setup(0);
    let locked_far = table.frames[2].far;
    model.lock_frame(locked_far);

    table.classify(&mut transport, true).unwrap();

    // No word of the locked frame round-trips; the whole frame is
    // excluded from the selector pool.
    let locked_index = table.index_of_far(locked_far).unwrap();
    assert!(table.frames[locked_index]
        .flags
        .contains(faultline_drivers::FrameFlags::EXCLUDED));
    assert!(!table.injectable().contains(&locked_index));
    assert_fabric_clean(&model);
}

#[test]
fn sampling_campaign_essential_bits_all_signalled() {
    let (model, transport, table) = series7_setup(0);
    let mut job = job_base(101);
    job.sample_size_goal = 25;
    job.sampling_without_repetition = 1;
    job.check_recovery = 4;
    job.injection_time = 0; // random injection cycle per experiment

    let dut = model.dut(50);
    let mut campaign = Campaign::new(transport, dut, table, job, CampaignConfig::default());
    let stats = campaign.run(&model.golden_bitstream(), None).unwrap();

    assert_eq!(campaign.state(), CampaignState::Completed);
    assert_eq!(stats.injections, 25);
    assert_eq!(stats.masked + stats.failures + stats.latent, stats.injections);
    // Every essential-bit hit perturbs the DUT output on this fabric.
    assert_eq!(stats.failures, 25);
    assert!(stats.failure_rate >= 0.0 && stats.failure_rate <= 1.0);
    assert_fabric_clean(&model);
}

#[test]
fn sampling_campaign_blind_mix() {
    let (model, transport, table) = series7_setup(0);
    let mut job = job_base(101);
    job.sample_size_goal = 30;
    job.essential_bits = 0; // blind: non-essential bits allowed

    let dut = model.dut(50);
    let mut campaign = Campaign::new(transport, dut, table, job, CampaignConfig::default());
    let stats = campaign.run(&model.golden_bitstream(), None).unwrap();

    assert_eq!(stats.injections, 30);
    assert_eq!(stats.masked + stats.failures + stats.latent, 30);
    // Blind sampling of this fabric hits mostly non-essential bits.
    assert!(stats.masked > 0);
    assert_fabric_clean(&model);
}

#[test]
fn latent_faults_detected_through_checkpoints() {
    let (model, transport, mut table) = series7_setup(2);

    // Narrow the pool to the two state-carrying checkpoint frames.
    let checkpoint_fars = table.checkpoint_fars.clone();
    for frame in table.frames.iter_mut() {
        if !checkpoint_fars.contains(&frame.far) {
            frame.mask.iter_mut().for_each(|w| *w = 0);
            frame.essential_bits = 0;
        }
    }
    table.rebuild_index();
    assert_eq!(table.injectable().len(), 2);

    let mut job = job_base(101);
    job.sample_size_goal = 5;
    job.detect_latent_errors = 1;

    let dut = model.dut(50);
    let mut campaign = Campaign::new(transport, dut, table, job, CampaignConfig::default());
    let stats = campaign.run(&model.golden_bitstream(), None).unwrap();

    // State-only corruption: invisible at the outputs, caught by the
    // checkpoint compare.
    assert_eq!(stats.injections, 5);
    assert_eq!(stats.latent, 5);
    assert_eq!(stats.failures, 0);
}

#[test]
fn locked_targets_counted_campaign_proceeds() {
    let (model, transport, table) = series7_setup(0);
    for far in model.frame_addresses() {
        model.lock_frame(far);
    }

    let mut job = job_base(101);
    job.sample_size_goal = 10;

    let dut = model.dut(50);
    let mut campaign = Campaign::new(transport, dut, table, job, CampaignConfig::default());
    let stats = campaign.run(&model.golden_bitstream(), None).unwrap();

    // Writes never take: every target reports locked, every outcome is
    // masked, and the campaign still completes.
    assert_eq!(stats.injections, 10);
    assert_eq!(stats.locked_targets, 10);
    assert_eq!(stats.masked, 10);
}

#[test]
fn exhaustive_campaign_walks_population() {
    let (model, transport, table) = series7_setup(0);
    let mut job = job_base(102);
    job.population_size = 12.0;
    job.sampling_without_repetition = 0;

    let dut = model.dut(50);
    let mut campaign = Campaign::new(transport, dut, table, job, CampaignConfig::default());
    let stats = campaign.run(&model.golden_bitstream(), None).unwrap();

    assert_eq!(stats.injections, 12);
    assert_eq!(stats.failures, 12);
    assert_fabric_clean(&model);
}

#[test]
fn fault_list_groups_are_atomic_and_bracketed() {
    let (model, transport, table) = series7_setup(0);
    let far_a = table.frames[0].far;
    let far_b = table.frames[1].far;

    let descriptor = |id: u32, far: u32, word: u32, mask: u32| FaultDescriptor {
        id,
        far,
        word,
        mask,
        ..Default::default()
    };
    let mut list = FaultList {
        descriptors: vec![
            // Multi-bit group on essential words: signalled.
            descriptor(1, far_a, 0, 0x0000_0001),
            descriptor(1, far_b, 0, 0x0000_0004),
            // Non-essential word: masked.
            descriptor(2, far_a, 1, 0x0000_0010),
        ],
        reference_data_present: false,
    };

    let mut job = job_base(201);
    job.essential_bits = 0;

    let dut = model.dut(50);
    let mut campaign = Campaign::new(transport, dut, table, job, CampaignConfig::default());
    let stats = campaign
        .run(&model.golden_bitstream(), Some(&mut list))
        .unwrap();

    let outcomes = campaign.fault_outcomes();
    assert_eq!(outcomes.len(), 3);
    // The multi-bit group shares one literal outcome across both of its
    // descriptors.
    assert_eq!(outcomes[0].id, 1);
    assert_eq!(outcomes[1].id, 1);
    assert!(outcomes[0].mode.is_failure());
    assert_eq!(outcomes[0].mode, outcomes[1].mode);
    assert_eq!(outcomes[2].id, 2);
    assert_eq!(outcomes[2].mode, FailureMode::Masked);

    // One descriptor counted per injection, one full reconfiguration per
    // group, fabric clean at the end.
    assert_eq!(stats.injections, 3);
    assert_eq!(stats.complete_reconfigurations, 2);
    // Reference words were captured from the live fabric before any
    // injection went in.
    assert!(list.reference_data_present);
    assert_fabric_clean(&model);
}

#[test]
fn profiling_walk_covers_device_frames() {
    let (model, transport, table) = series7_setup(0);
    let job = job_base(4);
    let dut = model.dut(1);
    let mut campaign = Campaign::new(transport, dut, table, job, CampaignConfig::default());

    let map = campaign.profile_far_map(&model.golden_bitstream()).unwrap();
    for far in model.frame_addresses() {
        assert!(map.contains(&far), "FAR {far:08x} missing from profile");
    }
}

#[test]
fn ultrascale_plus_campaign_end_to_end() {
    let model = ModelEmulated::init(InitParams::demo(DeviceFamily::UltraScalePlus)).unwrap();
    let transport = UltraScalePlusTransport::new(model.config_port(), USP_SLR_IDCODE);
    let table = model.design_table();

    let mut job = job_base(101);
    job.sample_size_goal = 5;

    let dut = model.dut(50);
    let mut campaign = Campaign::new(transport, dut, table, job, CampaignConfig::default());
    let stats = campaign.run(&model.golden_bitstream(), None).unwrap();

    assert_eq!(stats.injections, 5);
    assert_eq!(stats.failures, 5);
    assert_fabric_clean(&model);
}

#[test]
fn design_image_round_trip_drives_campaign() {
    // The campaign can be driven entirely from the serialized design
    // description, as the host tooling produces it.
    let (model, transport, _table) = series7_setup(0);
    let words = model.design_image();
    let table =
        faultline_drivers::parse_design_image(DeviceFamily::Series7, &words).unwrap();

    let mut job = job_base(101);
    job.sample_size_goal = 4;

    let dut = model.dut(50);
    let mut campaign = Campaign::new(transport, dut, table, job, CampaignConfig::default());
    let stats = campaign.run(&model.golden_bitstream(), None).unwrap();
    assert_eq!(stats.injections, 4);
}
