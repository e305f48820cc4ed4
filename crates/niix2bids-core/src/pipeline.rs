//! End-to-end conversion workflow with timed stages.

use std::time::{Duration, Instant};

use tracing::info;

use crate::classify::driver::{classify_records, ClassificationSummary};
use crate::classify::sanity::SIEMENS_CHECKS;
use crate::config::RunConfig;
use crate::discovery::filesystem::discover_volumes;
use crate::discovery::loader::load_records;
use crate::discovery::probe::{FsProbe, VolumeProbe};
use crate::errors::NiixResult;
use crate::logging::Stage;
use crate::models::RecordSet;
use crate::writer::{
    apply_bids_architecture, write_dataset_description, write_other_files, PlacementStats,
    RejectionReport,
};

/// Outcome of one run.
#[derive(Debug)]
pub struct RunReport {
    pub records: RecordSet,
    pub summary: ClassificationSummary,
    pub placement: PlacementStats,
    pub rejections: RejectionReport,
    pub elapsed: Duration,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Convert the configured input directories into a BIDS tree on disk.
pub fn run(config: &RunConfig) -> NiixResult<RunReport> {
    run_with_probe(config, &FsProbe)
}

/// [`run`] with an explicit probe for side files and NIfTI headers.
pub fn run_with_probe(config: &RunConfig, probe: &dyn VolumeProbe) -> NiixResult<RunReport> {
    let started = Instant::now();
    info!("niix2bids=={}", env!("CARGO_PKG_VERSION"));
    for dir in &config.in_dirs {
        info!("in_dir  : {}", dir.display());
    }
    info!("out_dir : {}", config.out_dir.display());
    info!("out_dir write method = {}", config.write_mode);

    // fail on a bad routing file before reading anything
    let table = config.routing_table()?;

    let stage = Stage::start("Fetch all files, isolate NIfTI, pair with .json");
    let pairs = discover_volumes(&config.in_dirs)?;
    stage.done();

    let stage = Stage::start("Read all .json files");
    let mut records = load_records(&pairs, default_workers());
    stage.done();

    let stage = Stage::start("Apply decision tree");
    let summary = classify_records(&mut records, &table, SIEMENS_CHECKS, probe)?;
    stage.done();

    std::fs::create_dir_all(&config.out_dir)?;

    let stage = Stage::start("Apply BIDS architecture");
    let placement = apply_bids_architecture(&config.out_dir, &records, config.write_mode)?;
    stage.done();

    let stage = Stage::start("Writing dataset_description.json");
    write_dataset_description(&config.out_dir)?;
    stage.done();

    let stage = Stage::start("Writing README, CHANGES, LICENSE, .bidsignore files");
    write_other_files(&config.out_dir)?;
    stage.done();

    let rejections = RejectionReport::build(&records, &summary);
    rejections.log(&records);

    let elapsed = started.elapsed();
    info!("Total execution time is : {:.3}s", elapsed.as_secs_f64());

    Ok(RunReport {
        records,
        summary,
        placement,
        rejections,
        elapsed,
    })
}
