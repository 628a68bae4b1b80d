//! Telemetry: per-run config & stats dump (JSON + CSV).
//!
//! Writes `<basename>.run.json` next to the output-parameter sidecar and
//! appends a row to `runs.csv` in the same directory. This captures the
//! *resolved* parameters (after validation/defaulting) plus headline run
//! statistics, so a failed or surprising segmentation can be triaged from
//! the sidecar alone without re-running the engine.

use crate::config::Params;
use crate::driver::DriverResult;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct RunInput {
    pub path: String,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub bands: usize,
}

/// Resolved configuration actually used for the run (after defaulting and
/// validation), so a dump is self-contained even if the parameter file
/// later changes.
#[derive(Debug, Serialize)]
pub struct Resolved {
    pub program_mode: String,
    pub dissim_crit: u8,
    pub conn_type: u8,
    pub spclust_wght: f64,
    pub init_threshold: f64,
    pub edge_wght: f64,
    pub min_nregions: usize,
    pub conv_nregions: usize,
    pub spclust_min: usize,
    pub spclust_max: usize,
    pub rnb_levels: u32,
}

impl From<&Params> for Resolved {
    fn from(p: &Params) -> Self {
        Resolved {
            program_mode: format!("{:?}", p.program_mode),
            dissim_crit: p.dissim_crit as u8,
            conn_type: p.conn_type,
            spclust_wght: p.spclust_wght,
            init_threshold: p.init_threshold,
            edge_wght: p.edge_wght,
            min_nregions: p.min_nregions,
            conv_nregions: p.conv_nregions,
            spclust_min: p.spclust_band.min,
            spclust_max: p.spclust_band.max,
            rnb_levels: p.rnb_levels,
        }
    }
}

#[derive(Debug, Serialize, Default)]
pub struct Stats {
    pub nlevels: u32,
    pub nclasses_level0: u32,
    pub nclasses_final: u32,
    pub final_threshold: f64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct Build {
    pub git_sha: String,
    pub branch: String,
    pub built_at: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct Dump {
    pub image: RunInput,
    pub resolved: Resolved,
    pub stats: Stats,
    pub build: Build,
}

fn git_info() -> (String, String) {
    let sha = option_env!("VERGEN_GIT_SHA")
        .or(option_env!("GIT_COMMIT"))
        .or(option_env!("GITHUB_SHA"))
        .unwrap_or("unknown")
        .to_string();
    let branch = option_env!("VERGEN_GIT_BRANCH")
        .or(option_env!("GIT_BRANCH"))
        .unwrap_or("unknown")
        .to_string();
    (sha, branch)
}

fn exe_version() -> String {
    option_env!("CARGO_PKG_VERSION").unwrap_or("0.0.0").to_string()
}

/// Write `<basename>.run.json` next to `sidecar_path`.
pub fn write_json_dump(sidecar_path: &Path, dump: &Dump) -> io::Result<PathBuf> {
    let json_path = replace_extension(sidecar_path, "run.json");
    if let Some(parent) = json_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(&json_path)?;
    serde_json::to_writer_pretty(file, dump)?;
    Ok(json_path)
}

/// Append a one-line CSV summary to `runs.csv` in the same directory.
pub fn append_runs_csv(sidecar_path: &Path, dump: &Dump) -> io::Result<PathBuf> {
    let dir = sidecar_path.parent().unwrap_or_else(|| Path::new("."));
    let csv_path = dir.join("runs.csv");
    let file_exists = csv_path.exists();

    let mut f = OpenOptions::new().create(true).append(true).open(&csv_path)?;

    if !file_exists {
        writeln!(
            f,
            "ts,image,program_mode,dissim_crit,nlevels,nclasses_level0,nclasses_final,final_threshold,elapsed_ms"
        )?;
    }

    let ts = Utc::now().to_rfc3339();
    writeln!(
        f,
        "{ts},{img},{mode},{crit},{nlevels},{nc0},{ncf},{thr:.6},{ms}",
        ts = ts,
        img = dump.image.path,
        mode = dump.resolved.program_mode,
        crit = dump.resolved.dissim_crit,
        nlevels = dump.stats.nlevels,
        nc0 = dump.stats.nclasses_level0,
        ncf = dump.stats.nclasses_final,
        thr = dump.stats.final_threshold,
        ms = dump.stats.elapsed_ms,
    )?;

    Ok(csv_path)
}

/// Build a [`Dump`] from a completed run, filling in build metadata.
pub fn make_dump(image_path: &str, params: &Params, raster_shape: (usize, usize, usize, usize), result: &DriverResult, elapsed_ms: u64) -> Dump {
    let (width, height, depth, bands) = raster_shape;
    let (git_sha, branch) = git_info();

    let nclasses_final = result.levels.last().map(|l| l.records.len() as u32).unwrap_or(0);
    let final_threshold = result.levels.last().map(|l| l.threshold).unwrap_or(0.0);

    Dump {
        image: RunInput { path: image_path.to_string(), width, height, depth, bands },
        resolved: Resolved::from(params),
        stats: Stats {
            nlevels: result.output_params.nlevels,
            nclasses_level0: result.output_params.nclasses_level0,
            nclasses_final,
            final_threshold,
            elapsed_ms,
        },
        build: Build {
            git_sha,
            branch,
            built_at: Utc::now().to_rfc3339(),
            version: exe_version(),
        },
    }
}

fn replace_extension(path: &Path, new_ext: &str) -> PathBuf {
    let p = path.to_path_buf();
    if let Some(stem) = p.file_stem().and_then(|s| s.to_str()) {
        let parent = p.parent().map(|pp| pp.to_path_buf()).unwrap_or_default();
        return parent.join(format!("{stem}.{new_ext}"));
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_dump_writes_alongside_the_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("run.oparams.json");
        let dump = Dump {
            image: RunInput { path: "in.raw".into(), width: 4, height: 4, depth: 1, bands: 1 },
            resolved: Resolved::from(&Params::default()),
            stats: Stats::default(),
            build: Build { git_sha: "unknown".into(), branch: "unknown".into(), built_at: "t".into(), version: "0.0.0".into() },
        };
        let path = write_json_dump(&sidecar, &dump).unwrap();
        assert!(path.exists());
        assert_eq!(path.file_name().unwrap(), "run.run.json");
    }

    #[test]
    fn csv_append_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("run.oparams.json");
        let dump = Dump {
            image: RunInput { path: "in.raw".into(), width: 4, height: 4, depth: 1, bands: 1 },
            resolved: Resolved::from(&Params::default()),
            stats: Stats::default(),
            build: Build { git_sha: "unknown".into(), branch: "unknown".into(), built_at: "t".into(), version: "0.0.0".into() },
        };
        append_runs_csv(&sidecar, &dump).unwrap();
        append_runs_csv(&sidecar, &dump).unwrap();
        let text = std::fs::read_to_string(dir.path().join("runs.csv")).unwrap();
        assert_eq!(text.lines().count(), 3);
    }
}
