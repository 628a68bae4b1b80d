//! Command-line driver for the hseg-core hierarchical segmentation engine.
//!
//! A single executable accepting one positional argument (path to a
//! parameter file) or the flags `-h`/`-help` and `-v`/`-version`. Exit
//! status is 0 on success, non-zero on any fatal error.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Instant;

use hseg_core::output::append_level;
use hseg_core::raster::{load_image, load_raw, write_boundary_map, write_label_map};
use hseg_core::telemetry::{append_runs_csv, make_dump, write_json_dump};
use hseg_core::{build_pixels, paramfile, run_driver};

#[derive(Parser)]
#[command(name = "hseg")]
#[command(about = "Hierarchical segmentation of 2-D raster imagery")]
#[command(version)]
struct Cli {
    /// Path to the parameter file driving this run.
    param_file: PathBuf,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,

    /// Number of threads for the parallel tiling dispatcher (default: rayon's own heuristic).
    #[arg(short, long)]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to initialize thread pool")?;
        log::info!("using {threads} threads for parallel tiling");
    }

    run(&cli.param_file)
}

fn run(param_file: &Path) -> Result<()> {
    log::info!("loading parameters: {}", param_file.display());
    let params = paramfile::load(param_file)
        .with_context(|| format!("failed to parse parameter file: {}", param_file.display()))?;

    let input_path = Path::new(&params.input_image);
    log::info!("loading raster: {}", input_path.display());
    let raster = load_raster(input_path)
        .with_context(|| format!("failed to load input raster: {}", input_path.display()))?;

    let mask = match &params.mask_image {
        Some(p) => Some(load_mask(Path::new(p))?),
        None => None,
    };

    log::info!(
        "segmenting {}x{}x{} raster, {} bands, program_mode={:?}",
        raster.width,
        raster.height,
        raster.depth,
        raster.bands.len(),
        params.program_mode,
    );

    let start = Instant::now();
    let pixels = build_pixels(&params, &raster, mask.as_deref(), None, None);
    let result = run_driver(&params, &raster, &pixels).context("segmentation failed")?;
    let elapsed = start.elapsed();
    log::info!("segmentation completed in {:.2}s, {} levels emitted", elapsed.as_secs_f64(), result.levels.len());

    write_outputs(&params, &raster, &result)?;

    let dump = make_dump(
        &params.input_image,
        &params,
        (raster.width, raster.height, raster.depth, raster.bands.len()),
        &result,
        elapsed.as_millis() as u64,
    );
    let sidecar_path = PathBuf::from(format!("{}.oparams.json", params.output_prefix));
    write_json_dump(&sidecar_path, &dump).context("failed to write telemetry dump")?;
    append_runs_csv(&sidecar_path, &dump).context("failed to append telemetry csv")?;

    Ok(())
}

fn load_raster(input_path: &Path) -> Result<hseg_core::RasterImage> {
    match input_path.extension().and_then(|e| e.to_str()) {
        Some("json") => {
            let data_path = input_path.with_extension("bin");
            load_raw(input_path, &data_path).map_err(Into::into)
        }
        _ => load_image(input_path).map_err(Into::into),
    }
}

fn load_mask(mask_path: &Path) -> Result<Vec<u8>> {
    let mask_raster = load_raster(mask_path)
        .with_context(|| format!("failed to load mask raster: {}", mask_path.display()))?;
    Ok(mask_raster.bands[0].iter().map(|&v| v as u8).collect())
}

fn write_outputs(params: &hseg_core::Params, raster: &hseg_core::RasterImage, result: &hseg_core::DriverResult) -> Result<()> {
    let out_dir = Path::new(&params.output_prefix)
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default();
    if !out_dir.as_os_str().is_empty() {
        std::fs::create_dir_all(&out_dir)
            .with_context(|| format!("failed to create output directory: {}", out_dir.display()))?;
    }

    for level in &result.levels {
        let records_path = PathBuf::from(format!("{}.level{}.records", params.output_prefix, level.level));
        let buffer = hseg_core::output::LevelBuffer {
            level: level.level,
            threshold: level.threshold,
            records: level.records.clone(),
        };
        let file = std::fs::File::create(&records_path)
            .with_context(|| format!("failed to create: {}", records_path.display()))?;
        append_level(file, &buffer).context("failed to write level record buffer")?;

        let label_path = PathBuf::from(format!("{}.level{}.labels", params.output_prefix, level.level));
        write_label_map(&label_path, &level.labels, raster.width, raster.height).context("failed to write label map")?;
    }

    if let Some(boundary_map) = &result.boundary_map {
        let boundary_path = PathBuf::from(format!("{}.boundary", params.output_prefix));
        write_boundary_map(&boundary_path, boundary_map).context("failed to write boundary map")?;
    }

    let params_path = PathBuf::from(format!("{}.oparams.json", params.output_prefix));
    result
        .output_params
        .write_json(&params_path)
        .context("failed to write output-parameter sidecar")?;

    log::info!("wrote {} level(s) to prefix {}", result.levels.len(), params.output_prefix);
    Ok(())
}
