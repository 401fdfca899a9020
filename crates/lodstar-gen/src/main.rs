//! Generates a streaming octree dataset from a point catalog.
//!
//! Reads the catalog, partitions it with the selected generator and writes
//! `metadata.bin` plus one payload file per octant to the output directory,
//! together with a `stats.json` summary and a `log` of the arguments used.

mod args;
mod catalog;

use std::fs;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use lodstar::dataset::{self, METADATA_FILE, PARTICLES_DIR};
use lodstar::{BuildParams, BuildStats, Error, Result};
use serde::Serialize;
use tracing::info;

use args::Args;

/// Summary written next to the dataset.
#[derive(Serialize)]
struct Report<'a> {
    input: &'a Path,
    params: &'a BuildParams,
    dist_cap: Option<f64>,
    stats: &'a BuildStats,
}

fn main() -> ExitCode {
    {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Generation failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let params = args.build_params();
    params.validate()?;

    let mut records = catalog::load(&args.input, args.format)?;
    if let Some(cap) = args.dist_cap {
        records = catalog::cap_distance(records, cap);
    }

    let output = lodstar::build(records, &params)?;
    for (depth, [octants, objects]) in output.stats.levels.iter().enumerate() {
        info!("Level {depth}: {octants} octants, {objects} objects");
    }
    if output.stats.discarded > 0 {
        info!("{} objects were discarded", output.stats.discarded);
    }

    prepare_output(&args.output)?;
    dataset::write_dataset(&output.octree, &args.output)?;

    let report = Report {
        input: &args.input,
        params: &params,
        dist_cap: args.dist_cap,
        stats: &output.stats,
    };
    let path = args.output.join("stats.json");
    let json = serde_json::to_string_pretty(&report).map_err(|e| Error::Io {
        path: path.clone(),
        source: e.into(),
    })?;
    write(&path, &json)?;
    write(&args.output.join("log"), &format!("{args:#?}\n"))?;

    info!("Dataset written to {}", args.output.display());
    Ok(())
}

/// Create the output directory, removing a previous dataset in it.
fn prepare_output(dir: &Path) -> Result<()> {
    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| Error::Io { path, source }
    };

    let particles = dir.join(PARTICLES_DIR);
    if particles.exists() {
        info!("Removing previous payloads in {}", particles.display());
        fs::remove_dir_all(&particles).map_err(io_error(&particles))?;
    }
    let metadata = dir.join(METADATA_FILE);
    if metadata.exists() {
        fs::remove_file(&metadata).map_err(io_error(&metadata))?;
    }
    fs::create_dir_all(dir).map_err(io_error(dir))
}

fn write(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}
