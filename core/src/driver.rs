//! Component J — `hseg`, the top-level driver orchestrating init → (r)hseg
//! → output at each requested level (spec §4.J).

use crate::config::{OutputSchedule, Params, ProgramMode};
use crate::conncomp;
use crate::dispatch::{RecurDispatcher, SerialDispatcher};
use crate::error::{HsegError, HsegResult};
use crate::first_merge::{first_merge, stencil_2d};
use crate::merger::Merger;
use crate::output::{ClassRecord, LevelBuffer, LevelSummary, OutputParams};
use crate::pixel::Pixel;
use crate::raster::RasterImage;
use crate::region::{self, RegionSet};
use crate::tiler::{self, Window};
use std::collections::HashMap;

/// Everything one emitted level produces (spec §6 "Output records").
pub struct EmittedLevel {
    pub level: u32,
    pub threshold: f64,
    pub labels: Vec<u32>,
    pub records: Vec<ClassRecord>,
    /// Per-pixel object label (0 = unlabeled), present only when
    /// `region_nb_objects_flag` is set (spec §4.I).
    pub object_label_map: Option<Vec<u32>>,
}

/// Full result of a driver run: every emitted level plus the sidecar.
pub struct DriverResult {
    pub levels: Vec<EmittedLevel>,
    pub output_params: OutputParams,
    /// Highest level at which each pixel still bordered a different-labeled
    /// neighbor (spec §6 "Boundary map"), present only when
    /// `boundary_map_flag` is set.
    pub boundary_map: Option<Vec<u16>>,
}

/// Build `Pixel[]` from a loaded raster plus optional mask/std-dev/edge
/// planes (spec §4.J step 1).
pub fn build_pixels(
    params: &Params,
    raster: &RasterImage,
    mask: Option<&[u8]>,
    std_dev: Option<&RasterImage>,
    edge: Option<&[f64]>,
) -> Vec<Pixel> {
    let n = raster.pixel_count();
    (0..n)
        .map(|p| {
            let features = raster.features_at(p);
            let sd = std_dev.map(|sd| sd.features_at(p));
            let e = edge.map(|e| e[p]);
            let masked_in = mask.map(|m| m[p] != params.mask_value).unwrap_or(true);
            Pixel::new(features, sd, e, masked_in)
        })
        .collect()
}

/// Total-ordered wrapper so `f64` distances can be used as a sort key
/// without pulling in a floating-point-ordering crate for one comparator.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DistanceKey(f64);

impl Eq for DistanceKey {}
impl PartialOrd for DistanceKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DistanceKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Sort regions by distance from the per-band minimum feature vector across
/// the whole image, for deterministic final renumbering (spec §4.J step 3,
/// §9 Open Question: "reproduce exactly for bit-identical outputs").
fn sort_key_distance_from_minimum(region: &crate::region::Region, minimum: &[f64]) -> DistanceKey {
    let mean = region.stats.mean();
    let dist_sq: f64 = mean.iter().zip(minimum).map(|(x, m)| (x - m).powi(2)).sum();
    DistanceKey(dist_sq)
}

/// Run the full driver over an already-built pixel array and return every
/// emitted level plus the output-parameter sidecar (spec §4.J).
pub fn run(params: &Params, raster: &RasterImage, pixels: &[Pixel]) -> HsegResult<DriverResult> {
    params.validate()?;
    if raster.is_3d() {
        return Err(HsegError::dimension_error(format!(
            "3-D rasters (depth={}) are not supported by this engine; the tiling, \
             connectivity-stencil, and pixel model are 2-D only",
            raster.depth
        )));
    }

    let minimum = raster.per_band_minimum();
    let stencil = stencil_2d(params.conn_type, raster.width);
    let object_stencil = if params.object_conn_type1 {
        stencil_2d(1, raster.width)
    } else {
        stencil.clone()
    };

    // Step 2: initial segmentation via Tiler (RHSEG) or FirstMerge directly.
    let (mut regions, mut labels) = if params.program_mode == ProgramMode::Rhseg && params.rnb_levels > 0 {
        let window = Window { col0: 0, row0: 0, cols: raster.width, rows: raster.height };
        let dispatcher = SerialDispatcher;
        let result = tiler::run(params, &dispatcher, pixels, raster.width, window, params.rnb_levels);
        (result.regions, result.labels)
    } else {
        let mut labels = vec![0u32; pixels.len()];
        let result = first_merge(params, pixels, &mut labels, &stencil, raster.width);
        (result.regions, labels)
    };

    // Step 3: sort by distance from the per-band minimum, renumber.
    let (compacted, relabel) =
        regions.compact(Some(|r: &crate::region::Region| sort_key_distance_from_minimum(r, &minimum)));
    regions = compacted;
    for label in labels.iter_mut() {
        if *label != 0 {
            *label = relabel[*label as usize - 1].map(|i| (i + 1) as u32).unwrap_or(0);
        }
    }

    // Step 4: build heaps.
    let mut merger = Merger::new(params, regions.len());
    merger.rebuild_nghbr_heap(&mut regions);
    if params.spclust_enabled() {
        merger.rebuild_region_heap(&mut regions);
    }

    let mut levels = Vec::new();
    let mut level_summaries = Vec::new();
    let mut level_idx = 0u32;
    let mut boundary_map: Vec<u16> = vec![0; pixels.len()];

    // Step 5: emit level 0 (post-init state).
    emit_level(
        params,
        &regions,
        &labels,
        level_idx,
        0.0,
        raster,
        &stencil,
        &object_stencil,
        &mut boundary_map,
        &mut levels,
        &mut level_summaries,
    );
    level_idx += 1;

    // Steps 6-8: iterate to the next checkpoint, per the configured schedule.
    match &params.output_schedule {
        OutputSchedule::ByCount { chk_nregions } => {
            let mut target = *chk_nregions;
            loop {
                if regions.active_count <= params.conv_nregions || target == 0 {
                    break;
                }
                let converge = target.max(params.conv_nregions);
                merger.run(&mut regions, converge, &[]);
                relabel_pixels_after_merge(&mut regions, &mut labels);
                emit_level(
                    params,
                    &regions,
                    &labels,
                    level_idx,
                    merger.max_threshold,
                    raster,
                    &stencil,
                    &object_stencil,
                    &mut boundary_map,
                    &mut levels,
                    &mut level_summaries,
                );
                level_idx += 1;
                if regions.active_count <= params.conv_nregions {
                    break;
                }
                target /= 2;
            }
        }
        OutputSchedule::ByNregionsList { nregions } => {
            for &target in nregions {
                if regions.active_count <= target.max(params.conv_nregions) {
                    continue;
                }
                merger.run(&mut regions, target.max(params.conv_nregions), &[]);
                relabel_pixels_after_merge(&mut regions, &mut labels);
                emit_level(
                    params,
                    &regions,
                    &labels,
                    level_idx,
                    merger.max_threshold,
                    raster,
                    &stencil,
                    &object_stencil,
                    &mut boundary_map,
                    &mut levels,
                    &mut level_summaries,
                );
                level_idx += 1;
            }
            if regions.active_count > params.conv_nregions {
                merger.run(&mut regions, params.conv_nregions, &[]);
                relabel_pixels_after_merge(&mut regions, &mut labels);
                emit_level(
                    params,
                    &regions,
                    &labels,
                    level_idx,
                    merger.max_threshold,
                    raster,
                    &stencil,
                    &object_stencil,
                    &mut boundary_map,
                    &mut levels,
                    &mut level_summaries,
                );
            }
        }
        OutputSchedule::ByThresholdsList { thresholds } => {
            merger.run(&mut regions, params.conv_nregions, thresholds);
            relabel_pixels_after_merge(&mut regions, &mut labels);
            for (i, _) in thresholds.iter().enumerate() {
                emit_level(
                    params,
                    &regions,
                    &labels,
                    level_idx + i as u32,
                    merger.max_threshold,
                    raster,
                    &stencil,
                    &object_stencil,
                    &mut boundary_map,
                    &mut levels,
                    &mut level_summaries,
                );
            }
        }
        OutputSchedule::ConvergenceOnly => {
            merger.run(&mut regions, params.conv_nregions, &[]);
            relabel_pixels_after_merge(&mut regions, &mut labels);
            emit_level(
                params,
                &regions,
                &labels,
                level_idx,
                merger.max_threshold,
                raster,
                &stencil,
                &object_stencil,
                &mut boundary_map,
                &mut levels,
                &mut level_summaries,
            );
        }
    }

    let nobjects_level0 = levels.first().and_then(|l| {
        l.object_label_map
            .as_ref()
            .map(|m| m.iter().cloned().max().unwrap_or(0))
    });
    let output_params = OutputParams {
        nlevels: levels.len() as u32,
        levels: level_summaries,
        nclasses_level0: levels.first().map(|l| l.records.len() as u32).unwrap_or(0),
        nobjects_level0,
    };

    let boundary_map = if params.boundary_map_flag { Some(boundary_map) } else { None };

    Ok(DriverResult { levels, output_params, boundary_map })
}

/// After a `Merger::run`, the region arena itself is unchanged in shape (it
/// deactivates merged-away regions in place); only the pixel label map needs
/// the union-find `find` applied so it reflects the current merge chains.
fn relabel_pixels_after_merge(regions: &mut RegionSet, labels: &mut [u32]) {
    for label in labels.iter_mut() {
        if *label == 0 {
            continue;
        }
        let root = regions.find(*label as usize - 1);
        *label = regions.get(root).label();
    }
}

fn emit_level(
    params: &Params,
    regions: &RegionSet,
    labels: &[u32],
    level: u32,
    threshold: f64,
    raster: &RasterImage,
    stencil: &[isize],
    object_stencil: &[isize],
    boundary_map: &mut [u16],
    levels: &mut Vec<EmittedLevel>,
    summaries: &mut Vec<LevelSummary>,
) {
    let mut records: Vec<ClassRecord> = regions
        .regions
        .iter()
        .filter(|r| r.active)
        .map(|r| ClassRecord::from_region(params, r, Some(threshold)))
        .collect();

    if params.region_boundary_npix_flag || params.boundary_map_flag {
        let boundary = region::boundary_pixel_flags(labels, raster.width, stencil);

        if params.region_boundary_npix_flag {
            let mut counts: HashMap<u32, u64> = HashMap::new();
            for (p, &is_boundary) in boundary.iter().enumerate() {
                if is_boundary {
                    *counts.entry(labels[p]).or_insert(0) += 1;
                }
            }
            for record in records.iter_mut() {
                record.boundary_npix = Some(counts.get(&record.label).copied().unwrap_or(0));
            }
        }

        if params.boundary_map_flag {
            for (p, &is_boundary) in boundary.iter().enumerate() {
                if is_boundary {
                    boundary_map[p] = level as u16;
                }
            }
        }
    }

    let object_label_map = if params.region_nb_objects_flag {
        let (object_label_map, objects) = conncomp::label_objects(labels, raster.width, object_stencil, &raster.bands);

        let mut nb_objects: HashMap<u32, u32> = HashMap::new();
        let mut objects_by_class: HashMap<u32, Vec<u32>> = HashMap::new();
        for obj in &objects {
            *nb_objects.entry(obj.class_label).or_insert(0) += 1;
            objects_by_class.entry(obj.class_label).or_default().push(obj.object_label);
        }
        for record in records.iter_mut() {
            record.nb_objects = nb_objects.get(&record.label).copied();
            if params.region_objects_list_flag {
                record.object_labels = objects_by_class.get(&record.label).cloned();
            }
        }
        Some(object_label_map)
    } else {
        None
    };

    let buffer = LevelBuffer { level, threshold, records: records.clone() };
    let bytes = buffer.encode();

    summaries.push(LevelSummary {
        level,
        threshold,
        record_buffer_bytes: bytes.len(),
        global_dissim: if params.gdissim_flag { Some(threshold) } else { None },
    });
    levels.push(EmittedLevel { level, threshold, labels: labels.to_vec(), records, object_label_map });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DissimCrit;

    fn uniform_raster(side: usize, value: f64) -> RasterImage {
        RasterImage {
            width: side,
            height: side,
            depth: 1,
            bands: vec![vec![value; side * side]],
        }
    }

    #[test]
    fn uniform_image_converges_to_a_single_region() {
        let mut params = Params::default();
        params.program_mode = ProgramMode::Hseg;
        params.spclust_wght = 0.0;
        params.conv_nregions = 1;
        params.min_nregions = 1;
        params.dissim_crit = DissimCrit::BandSumMse;

        let raster = uniform_raster(4, 10.0);
        let pixels = build_pixels(&params, &raster, None, None, None);
        let result = run(&params, &raster, &pixels).unwrap();

        assert_eq!(result.levels.first().unwrap().records.len(), 16);
        assert_eq!(result.levels.last().unwrap().records.len(), 1);
        assert_eq!(result.levels.last().unwrap().records[0].npix, 16);
    }

    #[test]
    fn masked_column_never_receives_a_label() {
        let mut params = Params::default();
        params.program_mode = ProgramMode::Hseg;
        params.spclust_wght = 0.0;
        params.conv_nregions = 1;
        params.min_nregions = 1;

        let raster = uniform_raster(4, 10.0);
        let mut mask = vec![1u8; 16];
        for row in 0..4 {
            mask[row * 4] = 0;
        }
        let pixels = build_pixels(&params, &raster, Some(&mask), None, None);
        let result = run(&params, &raster, &pixels).unwrap();

        let level0 = &result.levels[0];
        for row in 0..4 {
            assert_eq!(level0.labels[row * 4], 0);
        }
        assert_eq!(level0.records.len(), 12);
    }

    #[test]
    fn object_counts_are_populated_when_flag_is_set() {
        let mut params = Params::default();
        params.program_mode = ProgramMode::Hseg;
        params.spclust_wght = 0.0;
        params.conv_nregions = 1;
        params.min_nregions = 1;
        params.region_nb_objects_flag = true;
        params.region_objects_list_flag = true;
        params.dissim_crit = DissimCrit::BandSumMse;

        let raster = uniform_raster(4, 10.0);
        let pixels = build_pixels(&params, &raster, None, None, None);
        let result = run(&params, &raster, &pixels).unwrap();

        // Every region stays one spatially-connected blob under pure
        // neighbor-adjacency merging, so each final class is exactly one object.
        let final_record = &result.levels.last().unwrap().records[0];
        assert_eq!(final_record.nb_objects, Some(1));
        assert_eq!(final_record.object_labels.as_ref().map(|v| v.len()), Some(1));

        let level0 = &result.levels[0];
        assert_eq!(level0.object_label_map.as_ref().map(|m| m.len()), Some(16));
        assert!(level0.records.iter().all(|r| r.nb_objects == Some(1)));
    }

    #[test]
    fn boundary_map_tracks_highest_level_a_pixel_remained_on_a_boundary() {
        let mut params = Params::default();
        params.program_mode = ProgramMode::Hseg;
        params.spclust_wght = 0.0;
        params.conv_nregions = 1;
        params.min_nregions = 1;
        params.boundary_map_flag = true;
        params.dissim_crit = DissimCrit::BandSumMse;
        params.output_schedule = OutputSchedule::ByNregionsList { nregions: vec![8] };

        let raster = uniform_raster(4, 10.0);
        let pixels = build_pixels(&params, &raster, None, None, None);
        let result = run(&params, &raster, &pixels).unwrap();

        let boundary_map = result.boundary_map.expect("boundary map should be produced");
        assert_eq!(boundary_map.len(), 16);
        // The intermediate 8-region checkpoint (level 1) still has pixels
        // bordering a differently-labeled neighbor; the final, single-region
        // level has none, so only level 1's boundary pixels record a nonzero
        // highest-level value.
        assert!(boundary_map.iter().any(|&v| v == 1));
    }
}
