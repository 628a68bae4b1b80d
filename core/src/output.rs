//! Per-level output records and the output-parameter sidecar (spec §6
//! "Output records"). The int/double interleaving and per-level length
//! prefix mirror the legacy on-disk layout closely enough that a consumer
//! written against §6 can parse it without guessing field order.

use crate::config::Params;
use crate::region::{Region, RegionStats};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// One region-class record, with only the fields enabled in configuration
/// actually populated (spec §6: "the exact byte layout is stable and
/// determined by the fields enabled in configuration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRecord {
    pub label: u32,
    pub npix: u64,
    pub sum: Option<Vec<f64>>,
    pub sumsq: Option<Vec<f64>>,
    pub sumxlogx: Option<Vec<f64>>,
    pub std_dev: Option<Vec<f64>>,
    pub boundary_npix: Option<u64>,
    pub merge_threshold: Option<f64>,
    pub nb_objects: Option<u32>,
    pub object_labels: Option<Vec<u32>>,
}

impl ClassRecord {
    pub fn from_region(params: &Params, region: &Region, merge_threshold: Option<f64>) -> Self {
        let stats: &RegionStats = &region.stats;
        ClassRecord {
            label: region.label(),
            npix: stats.npix,
            sum: if params.region_sum_flag { Some(stats.sum.clone()) } else { None },
            sumsq: if params.region_sum_flag { stats.sumsq.clone() } else { None },
            sumxlogx: if params.region_sum_flag { stats.sumxlogx.clone() } else { None },
            std_dev: if params.region_std_dev_flag {
                stats.sum_std_dev.clone().map(|sd| {
                    sd.iter().map(|s| s / stats.npix.max(1) as f64).collect()
                })
            } else {
                None
            },
            // Real boundary-pixel counts require the current label map, which
            // isn't available to a single region in isolation; `driver::emit_level`
            // overwrites this with the per-level count when the flag is set.
            boundary_npix: if params.region_boundary_npix_flag { Some(0) } else { None },
            merge_threshold: if params.region_threshold_flag { merge_threshold } else { None },
            nb_objects: None,
            object_labels: None,
        }
    }

    /// Encode as an interleaved int buffer and double buffer (spec §6).
    /// Returns `(ints, doubles)`; the caller writes both with a per-record
    /// length prefix.
    pub fn encode(&self) -> (Vec<i64>, Vec<f64>) {
        let mut ints = vec![self.label as i64, self.npix as i64];
        let mut doubles = Vec::new();

        if let Some(sum) = &self.sum {
            doubles.extend_from_slice(sum);
        }
        if let Some(sumsq) = &self.sumsq {
            doubles.extend_from_slice(sumsq);
        }
        if let Some(sumxlogx) = &self.sumxlogx {
            doubles.extend_from_slice(sumxlogx);
        }
        if let Some(std_dev) = &self.std_dev {
            doubles.extend_from_slice(std_dev);
        }
        if let Some(b) = self.boundary_npix {
            ints.push(b as i64);
        }
        if let Some(t) = self.merge_threshold {
            doubles.push(t);
        }
        if let Some(n) = self.nb_objects {
            ints.push(n as i64);
        }
        if let Some(objs) = &self.object_labels {
            ints.extend(objs.iter().map(|&o| o as i64));
        }
        (ints, doubles)
    }
}

/// Per-level record buffer: every class record at one emitted level, with a
/// length prefix so a reader can skip a level without decoding every record.
pub struct LevelBuffer {
    pub level: u32,
    pub threshold: f64,
    pub records: Vec<ClassRecord>,
}

impl LevelBuffer {
    /// Serialize this level's records to a single byte buffer: a 4-byte
    /// record count, then per record a 4-byte int-count, 4-byte
    /// double-count, the ints (`i64` LE), then the doubles (`f64` LE).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        for record in &self.records {
            let (ints, doubles) = record.encode();
            buf.extend_from_slice(&(ints.len() as u32).to_le_bytes());
            buf.extend_from_slice(&(doubles.len() as u32).to_le_bytes());
            for i in ints {
                buf.extend_from_slice(&i.to_le_bytes());
            }
            for d in doubles {
                buf.extend_from_slice(&d.to_le_bytes());
            }
        }
        buf
    }
}

/// Per-level summary recorded in the output-parameter sidecar (spec §6
/// "Output-parameter sidecar").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelSummary {
    pub level: u32,
    pub threshold: f64,
    pub record_buffer_bytes: usize,
    pub global_dissim: Option<f64>,
}

/// The output-parameter sidecar itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputParams {
    pub nlevels: u32,
    pub levels: Vec<LevelSummary>,
    pub nclasses_level0: u32,
    pub nobjects_level0: Option<u32>,
}

impl OutputParams {
    pub fn write_json(&self, path: &std::path::Path) -> crate::error::HsegResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Appends one level's encoded record buffer to an open output stream and
/// returns its byte length (for the sidecar's `record_buffer_bytes`).
pub fn append_level(mut out: impl Write, level: &LevelBuffer) -> crate::error::HsegResult<usize> {
    let bytes = level.encode();
    out.write_all(&bytes)?;
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionSet;

    #[test]
    fn class_record_only_populates_enabled_fields() {
        let mut params = Params::default();
        params.region_sum_flag = true;
        let mut stats = RegionStats::new(2);
        stats.npix = 4;
        stats.sum = vec![10.0, 20.0];
        let regions = RegionSet::new(vec![stats]);
        let record = ClassRecord::from_region(&params, regions.get(0), Some(1.5));
        assert_eq!(record.sum, Some(vec![10.0, 20.0]));
        assert!(record.merge_threshold.is_none());
        assert!(record.boundary_npix.is_none());
    }

    #[test]
    fn level_buffer_round_trips_record_count_in_its_prefix() {
        let params = Params::default();
        let mut stats = RegionStats::new(1);
        stats.npix = 1;
        let regions = RegionSet::new(vec![stats]);
        let record = ClassRecord::from_region(&params, regions.get(0), None);
        let level = LevelBuffer { level: 0, threshold: 0.0, records: vec![record] };
        let bytes = level.encode();
        let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(count, 1);
    }
}
