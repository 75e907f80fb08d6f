/*++

Licensed under the Apache-2.0 license.

File Name:

    main.rs

Abstract:

    File contains the faultline campaign runner: loads host images,
    maintains the bitstream cache and drives campaigns against the
    emulated fabric.

--*/

use clap::{arg, value_parser, ArgMatches, Command};
use faultline_drivers::{
    parse_design_image, parse_job_descriptor, words_from_bytes, Campaign, CampaignConfig,
    CampaignMode, DeviceFamily, FaultList, FrameTable, FrameTransport, JobDescriptor,
    Series7Transport, UltraScalePlusTransport, JOB_SYNC_WORD,
};
use faultline_error::FaultlineError;
use faultline_hw_model::{EmulatedDut, FabricModel, InitParams, ModelEmulated};
use std::fs;
use std::io;
use std::path::PathBuf;
use zerocopy::AsBytes;

mod cache;
use cache::BitstreamCache;

const SERIES7_IDCODE: u32 = 0x0372_7093;
const USP_SLR_IDCODE: u32 = 0x04A5_A093;

fn to_io(err: FaultlineError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("faultline error {err:?}"))
}

fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes
}

fn parse_family(name: Option<&String>) -> io::Result<DeviceFamily> {
    match name.map(|s| s.as_str()) {
        None | Some("series7") | Some("zynq") => Ok(DeviceFamily::Series7),
        Some("ultrascale") => Ok(DeviceFamily::UltraScale),
        Some("ultrascale+") | Some("zynqmp") => Ok(DeviceFamily::UltraScalePlus),
        Some(other) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unknown device family {other:?}"),
        )),
    }
}

fn build_model(family: DeviceFamily, job: &JobDescriptor) -> io::Result<ModelEmulated> {
    let mut params = InitParams::demo(family);
    params.seed = job.rng_seed as u64;
    if job.detect_latent_errors != 0 {
        // Designate the last two frames as state-carrying checkpoints.
        let fars = params.geometry.frame_addresses();
        params.checkpoint_fars = fars.iter().rev().take(2).copied().collect();
    }
    ModelEmulated::init(params).map_err(to_io)
}

fn run_campaign<T: FrameTransport>(
    transport: T,
    dut: EmulatedDut,
    table: FrameTable,
    job: JobDescriptor,
    config: CampaignConfig,
    bitstream: &[u32],
    mut fault_list: Option<FaultList>,
) -> io::Result<()> {
    let mut campaign = Campaign::new(transport, dut, table, job, config);
    let stats = campaign
        .run(bitstream, fault_list.as_mut())
        .map_err(to_io)?;

    println!(
        "Tag_{:9} | Injection Result: Injections = {:9} of {:.0},  Masked: {:6}, Masked Rate= {:.3} +/- {:.3}, Failures = {:5}, Failure Rate = {:.5} +/- {:.5}",
        job.sync_tag,
        stats.injections,
        stats.population,
        stats.masked,
        stats.masked_rate_pct(),
        100.0 * stats.masked_error_margin,
        stats.failures,
        stats.failure_rate_pct(),
        100.0 * stats.failure_error_margin,
    );
    for outcome in campaign.fault_outcomes() {
        println!(
            ">> FaultId {:5}: {} ({} mismatches)",
            outcome.id,
            outcome.mode.label(),
            outcome.mismatches
        );
    }
    println!("Result: Success");
    Ok(())
}

fn cmd_run(matches: &ArgMatches) -> io::Result<()> {
    let job_path = matches.get_one::<PathBuf>("job").unwrap();
    let default_dir = PathBuf::from(".");
    let cache_dir = matches
        .get_one::<PathBuf>("cache-dir")
        .unwrap_or(&default_dir);
    let family = parse_family(matches.get_one::<String>("family"))?;

    let job_bytes = fs::read(job_path)?;
    let job = parse_job_descriptor(&job_bytes).map_err(to_io)?;
    let mode = job.campaign_mode().map_err(to_io)?;
    let cache = BitstreamCache::new(cache_dir);

    if mode == CampaignMode::CacheMaintenance {
        for (name, size) in cache.list() {
            println!("\tFile: {name:16} | size = {size:x}");
        }
        let removed = cache.clean().map_err(to_io)?;
        println!("CLEANUP FINISHED: {removed} files removed");
        println!("Result: Success");
        return Ok(());
    }

    let model = build_model(family, &job)?;

    // Write-through on a host-side bitstream update, read-through
    // otherwise; a miss is surfaced, not repaired locally.
    let (bit_bytes, mask_bytes) = if job.update_bitstream != 0 {
        let bit = words_to_bytes(&model.golden_bitstream());
        let mask = words_to_bytes(&model.design_image());
        cache.store(job.bitstream_id, &bit, &mask).map_err(to_io)?;
        (bit, mask)
    } else {
        cache.load(job.bitstream_id).map_err(to_io)?
    };

    let bitstream = words_from_bytes(&bit_bytes).map_err(to_io)?;
    let mask_words = words_from_bytes(&mask_bytes).map_err(to_io)?;
    let table = parse_design_image(family, &mask_words).map_err(to_io)?;

    let fault_list = match matches.get_one::<PathBuf>("fault-list") {
        Some(path) => Some(FaultList::parse(&fs::read(path)?).map_err(to_io)?),
        None => None,
    };

    let config = CampaignConfig {
        golden_run_fatal: matches.contains_id("golden-run-fatal"),
        ..Default::default()
    };
    let dut = model.dut(job.workload_duration.max(1));

    match family {
        DeviceFamily::Series7 => run_campaign(
            Series7Transport::new(model.config_port(), SERIES7_IDCODE),
            dut,
            table,
            job,
            config,
            &bitstream,
            fault_list,
        ),
        DeviceFamily::UltraScalePlus => run_campaign(
            UltraScalePlusTransport::new(model.config_port(), USP_SLR_IDCODE),
            dut,
            table,
            job,
            config,
            &bitstream,
            fault_list,
        ),
        DeviceFamily::UltraScale => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "no transport backend for plain UltraScale parts",
        )),
    }
}

fn profile_with<T: FrameTransport>(
    transport: T,
    model: &ModelEmulated,
    job: JobDescriptor,
) -> io::Result<Vec<u32>> {
    let mut campaign = Campaign::new(
        transport,
        model.dut(1),
        model.design_table(),
        job,
        CampaignConfig::default(),
    );
    campaign
        .profile_far_map(&model.golden_bitstream())
        .map_err(to_io)
}

fn cmd_profile(matches: &ArgMatches) -> io::Result<()> {
    let family = parse_family(matches.get_one::<String>("family"))?;
    let job = JobDescriptor {
        mode: 4,
        workload_duration: 1,
        ..Default::default()
    };
    let model = build_model(family, &job)?;

    let map = match family {
        DeviceFamily::Series7 => profile_with(
            Series7Transport::new(model.config_port(), SERIES7_IDCODE),
            &model,
            job,
        )?,
        DeviceFamily::UltraScalePlus => profile_with(
            UltraScalePlusTransport::new(model.config_port(), USP_SLR_IDCODE),
            &model,
            job,
        )?,
        DeviceFamily::UltraScale => {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "no transport backend for plain UltraScale parts",
            ))
        }
    };
    for far in &map {
        println!("{far:08x}");
    }
    println!("Profiling Result: {:8} frames", map.len());
    Ok(())
}

fn cmd_make_job(matches: &ArgMatches) -> io::Result<()> {
    let out = matches.get_one::<PathBuf>("out").unwrap();
    let mode = match matches
        .get_one::<String>("mode")
        .map(|s| s.as_str())
        .unwrap_or("sampling")
    {
        "cache-clean" => 1,
        "profiling" => 4,
        "sampling" => 101,
        "exhaustive" => 102,
        "fault-list" => 201,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown mode {other:?}"),
            ))
        }
    };

    let job = JobDescriptor {
        bitstream_id: *matches.get_one::<u32>("id").unwrap_or(&1),
        mode,
        update_bitstream: 1,
        block_type: 2,
        essential_bits: 1,
        log_cadence: 10,
        sample_size_goal: *matches.get_one::<u32>("samples").unwrap_or(&100),
        population_size: *matches.get_one::<f32>("population").unwrap_or(&10_000.0),
        workload_duration: *matches.get_one::<u32>("workload").unwrap_or(&50),
        injection_time: 5,
        fault_multiplicity: 1,
        sampling_without_repetition: 1,
        detect_latent_errors: *matches.get_one::<u32>("latent").unwrap_or(&0),
        rng_seed: *matches.get_one::<u32>("seed").unwrap_or(&1),
        sync_tag: 1,
        ..Default::default()
    };

    let mut bytes = JOB_SYNC_WORD.to_le_bytes().to_vec();
    bytes.extend_from_slice(job.as_bytes());
    fs::write(out, &bytes)?;
    println!("job descriptor written to {}", out.display());
    Ok(())
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("faultline")
        .about("SEU emulation campaign runner")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Run an injection campaign from a job descriptor")
                .arg(arg!(--job <FILE> "Job descriptor image").value_parser(value_parser!(PathBuf)))
                .arg(
                    arg!(--"cache-dir" <DIR> "Bitstream cache directory")
                        .required(false)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--"fault-list" <FILE> "Fault list image")
                        .required(false)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(arg!(--family <NAME> "series7 | ultrascale | ultrascale+").required(false))
                .arg(
                    arg!(--"golden-run-fatal" "Abort when the golden run mismatches")
                        .required(false),
                ),
        )
        .subcommand(
            Command::new("profile")
                .about("Walk the device frame map through FAR auto-increment")
                .arg(arg!(--family <NAME> "series7 | ultrascale | ultrascale+").required(false)),
        )
        .subcommand(
            Command::new("make-job")
                .about("Write a job descriptor image")
                .arg(arg!(--out <FILE> "Output path").value_parser(value_parser!(PathBuf)))
                .arg(arg!(--mode <MODE> "sampling | exhaustive | fault-list | profiling | cache-clean").required(false))
                .arg(arg!(--id <N> "Bitstream id").required(false).value_parser(value_parser!(u32)))
                .arg(arg!(--samples <N> "Sample size goal").required(false).value_parser(value_parser!(u32)))
                .arg(arg!(--population <N> "Population size").required(false).value_parser(value_parser!(f32)))
                .arg(arg!(--workload <N> "Workload duration in cycles").required(false).value_parser(value_parser!(u32)))
                .arg(arg!(--latent <N> "Enable latent-error detection").required(false).value_parser(value_parser!(u32)))
                .arg(arg!(--seed <N> "Campaign RNG seed").required(false).value_parser(value_parser!(u32))),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("run", sub)) => cmd_run(sub),
        Some(("profile", sub)) => cmd_profile(sub),
        Some(("make-job", sub)) => cmd_make_job(sub),
        _ => unreachable!("subcommand required"),
    }
}
