//! Component C — region sufficient statistics, neighbor sets, and the
//! merge-chain arena.
//!
//! Cross-referencing regions follows the rewrite guidance in spec §9: rather
//! than raw pointers, regions live in a dense [`Vec<Region>`] arena and are
//! referenced by [`RegionIdx`]. `best_nghbr`/`best_region` are
//! `Option<RegionIdx>`; a separate `merge_target` vector implements
//! union-find with path compression in place of the legacy
//! `while (merge_region_label != 0)` walk.

use crate::config::{DissimCrit, Params};
use crate::dissim;
use std::collections::BTreeSet;

/// Dense index into a [`RegionSet`]'s arena. Stable for the lifetime of one
/// arena generation (until the next compaction/renumbering pass).
pub type RegionIdx = usize;

/// Banded sufficient statistics for one region (spec §3 "Region").
#[derive(Debug, Clone)]
pub struct RegionStats {
    pub npix: u64,
    pub sum: Vec<f64>,
    pub sumsq: Option<Vec<f64>>,
    pub sumxlogx: Option<Vec<f64>>,
    /// Sum of per-pixel per-band standard deviation, if the input carried one.
    pub sum_std_dev: Option<Vec<f64>>,
    /// Sum of per-pixel scalar edge value, if the input carried an edge image.
    pub sum_edge: Option<f64>,
    /// Running per-band maximum of per-pixel standard deviation.
    pub max_std_dev: Option<Vec<f64>>,
}

impl RegionStats {
    pub fn new(bands: usize) -> Self {
        RegionStats {
            npix: 0,
            sum: vec![0.0; bands],
            sumsq: None,
            sumxlogx: None,
            sum_std_dev: None,
            sum_edge: None,
            max_std_dev: None,
        }
    }

    pub fn bands(&self) -> usize {
        self.sum.len()
    }

    pub fn mean(&self) -> Vec<f64> {
        let n = self.npix.max(1) as f64;
        self.sum.iter().map(|s| s / n).collect()
    }

    /// Accumulate one pixel's contribution into this region's statistics.
    pub fn accumulate(&mut self, crit: DissimCrit, features: &[f64], std_dev: Option<&[f64]>, edge: Option<f64>) {
        self.npix += 1;
        for (s, &x) in self.sum.iter_mut().zip(features) {
            *s += x;
        }
        if crit.needs_sumsq() {
            let sq = self.sumsq.get_or_insert_with(|| vec![0.0; features.len()]);
            for (s, &x) in sq.iter_mut().zip(features) {
                *s += x * x;
            }
        }
        if crit.needs_sumxlogx() {
            let sxlx = self.sumxlogx.get_or_insert_with(|| vec![0.0; features.len()]);
            for (s, &x) in sxlx.iter_mut().zip(features) {
                *s += if x > 0.0 { x * x.ln() } else { 0.0 };
            }
        }
        if let Some(sd) = std_dev {
            let acc = self.sum_std_dev.get_or_insert_with(|| vec![0.0; sd.len()]);
            for (s, &x) in acc.iter_mut().zip(sd) {
                *s += x;
            }
            let mx = self.max_std_dev.get_or_insert_with(|| vec![0.0; sd.len()]);
            for (m, &x) in mx.iter_mut().zip(sd) {
                *m = m.max(x);
            }
        }
        if let Some(e) = edge {
            *self.sum_edge.get_or_insert(0.0) += e;
        }
    }

    /// Combine two regions' statistics as if merged, without mutating either
    /// (spec §4.B: "computed as if merged"; there is no separate pair state).
    pub fn merge_preview(a: &RegionStats, b: &RegionStats) -> RegionStats {
        let add_opt = |x: &Option<Vec<f64>>, y: &Option<Vec<f64>>| -> Option<Vec<f64>> {
            match (x, y) {
                (Some(x), Some(y)) => Some(x.iter().zip(y).map(|(p, q)| p + q).collect()),
                (Some(x), None) => Some(x.clone()),
                (None, Some(y)) => Some(y.clone()),
                (None, None) => None,
            }
        };
        let max_opt = |x: &Option<Vec<f64>>, y: &Option<Vec<f64>>| -> Option<Vec<f64>> {
            match (x, y) {
                (Some(x), Some(y)) => Some(x.iter().zip(y).map(|(p, q)| p.max(*q)).collect()),
                (Some(x), None) => Some(x.clone()),
                (None, Some(y)) => Some(y.clone()),
                (None, None) => None,
            }
        };
        RegionStats {
            npix: a.npix + b.npix,
            sum: a.sum.iter().zip(&b.sum).map(|(x, y)| x + y).collect(),
            sumsq: add_opt(&a.sumsq, &b.sumsq),
            sumxlogx: add_opt(&a.sumxlogx, &b.sumxlogx),
            sum_std_dev: add_opt(&a.sum_std_dev, &b.sum_std_dev),
            sum_edge: match (a.sum_edge, b.sum_edge) {
                (Some(x), Some(y)) => Some(x + y),
                (Some(x), None) => Some(x),
                (None, Some(y)) => Some(y),
                (None, None) => None,
            },
            max_std_dev: max_opt(&a.max_std_dev, &b.max_std_dev),
        }
    }

    /// Merge `other` into `self` in place (the survivor absorbs the loser).
    pub fn merge_in_place(&mut self, other: &RegionStats) {
        *self = RegionStats::merge_preview(self, other);
    }
}

/// One region in the arena.
#[derive(Debug, Clone)]
pub struct Region {
    pub idx: RegionIdx,
    pub stats: RegionStats,
    /// Symmetric: `b in nghbrs(a) iff a in nghbrs(b)` (spec invariant 5),
    /// maintained only between merges — mid-merge the invariant is restored
    /// before the next pop.
    pub nghbrs: BTreeSet<RegionIdx>,
    pub best_nghbr: Option<RegionIdx>,
    pub best_nghbr_dissim: f64,
    pub best_region: Option<RegionIdx>,
    pub best_region_dissim: f64,
    pub active: bool,
    pub initial_merge_flag: bool,
    pub merged_flag: bool,
    pub large_nghbr_merged_flag: bool,
    pub nghbr_heap_index: Option<usize>,
    pub region_heap_index: Option<usize>,
}

impl Region {
    fn new(idx: RegionIdx, stats: RegionStats) -> Self {
        Region {
            idx,
            stats,
            nghbrs: BTreeSet::new(),
            best_nghbr: None,
            best_nghbr_dissim: f64::INFINITY,
            best_region: None,
            best_region_dissim: f64::INFINITY,
            active: true,
            initial_merge_flag: false,
            merged_flag: false,
            large_nghbr_merged_flag: false,
            nghbr_heap_index: None,
            region_heap_index: None,
        }
    }

    /// Current externally-visible label within this arena generation
    /// (1-based; arena position `idx` maps to label `idx + 1`).
    pub fn label(&self) -> u32 {
        (self.idx + 1) as u32
    }
}

/// Owns the region arena and the union-find merge chains over it.
pub struct RegionSet {
    pub regions: Vec<Region>,
    /// `merge_target[i] = Some(j)` means region `i` was merged away into `j`
    /// (not necessarily the current root — resolved via [`RegionSet::find`]).
    merge_target: Vec<Option<RegionIdx>>,
    pub active_count: usize,
}

impl RegionSet {
    pub fn new(stats: Vec<RegionStats>) -> Self {
        let n = stats.len();
        let regions = stats
            .into_iter()
            .enumerate()
            .map(|(i, s)| Region::new(i, s))
            .collect();
        RegionSet {
            regions,
            merge_target: vec![None; n],
            active_count: n,
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Resolve a possibly-stale index through the union-find chain to the
    /// current active root, compressing the path as we go (spec §3 invariant
    /// 5: "chains terminate at an active region in at most O(log N) steps
    /// after path compression").
    pub fn find(&mut self, idx: RegionIdx) -> RegionIdx {
        let mut root = idx;
        while let Some(next) = self.merge_target[root] {
            root = next;
        }
        // Path compression: point every visited node directly at the root.
        let mut cur = idx;
        while let Some(next) = self.merge_target[cur] {
            self.merge_target[cur] = Some(root);
            cur = next;
        }
        root
    }

    pub fn get(&self, idx: RegionIdx) -> &Region {
        &self.regions[idx]
    }

    pub fn get_mut(&mut self, idx: RegionIdx) -> &mut Region {
        &mut self.regions[idx]
    }

    /// Add a symmetric neighbor relation.
    pub fn add_neighbor(&mut self, a: RegionIdx, b: RegionIdx) {
        if a == b {
            return;
        }
        self.regions[a].nghbrs.insert(b);
        self.regions[b].nghbrs.insert(a);
    }

    /// Merge region `b` into region `a`. `a` survives; `b` is deactivated and
    /// its `merge_target` set to `a`. Returns the set of neighbor indices
    /// whose relation to `a` changed (for heap maintenance upstream).
    pub fn do_merge(&mut self, crit: DissimCrit, a: RegionIdx, b: RegionIdx) -> Vec<RegionIdx> {
        debug_assert!(self.regions[a].active && self.regions[b].active);
        debug_assert_ne!(a, b);

        let b_stats = self.regions[b].stats.clone();
        self.regions[a].stats.merge_in_place(&b_stats);

        // Union b's neighbors into a's, excluding self-references to a/b.
        let b_nghbrs: Vec<RegionIdx> = self.regions[b].nghbrs.iter().copied().collect();
        let mut touched = Vec::new();
        for &c in &b_nghbrs {
            if c == a {
                continue;
            }
            // c currently points at b; repoint it at a.
            self.regions[c].nghbrs.remove(&b);
            self.regions[c].nghbrs.insert(a);
            self.regions[a].nghbrs.insert(c);
            touched.push(c);
        }
        self.regions[a].nghbrs.remove(&b);
        self.regions[a].nghbrs.remove(&a);

        self.regions[b].nghbrs.clear();
        self.regions[b].active = false;
        self.regions[b].merged_flag = true;
        self.regions[a].merged_flag = true;
        self.merge_target[b] = Some(a);
        self.active_count -= 1;

        touched
    }

    /// Recompute `best_nghbr`/`best_nghbr_dissim` for `idx` by scanning its
    /// current neighbor set (spec §4.C `best_nghbr_init`).
    pub fn best_nghbr_init(&mut self, params: &Params, idx: RegionIdx) {
        let nghbrs: Vec<RegionIdx> = self.regions[idx].nghbrs.iter().copied().collect();
        let mut best: Option<RegionIdx> = None;
        let mut best_d = f64::INFINITY;
        let my_stats = self.regions[idx].stats.clone();
        for c in nghbrs {
            let d = Self::pairwise_dissim(params, &my_stats, &self.regions[c].stats);
            if d < best_d || (d == best_d && best.map_or(true, |b| self.regions[c].label() < self.regions[b].label())) {
                best_d = d;
                best = Some(c);
            }
        }
        self.regions[idx].best_nghbr = best;
        self.regions[idx].best_nghbr_dissim = best_d;
    }

    /// Recompute `best_region`/`best_region_dissim` for `idx` by scanning the
    /// supplied candidate set (regions with `npix >= min_npixels`), spec
    /// §4.C `best_region_init`.
    pub fn best_region_init(&mut self, params: &Params, idx: RegionIdx, candidates: &[RegionIdx]) {
        let my_stats = self.regions[idx].stats.clone();
        let mut best: Option<RegionIdx> = None;
        let mut best_d = f64::INFINITY;
        for &c in candidates {
            if c == idx || !self.regions[c].active {
                continue;
            }
            let d = Self::pairwise_dissim(params, &my_stats, &self.regions[c].stats);
            if d < best_d || (d == best_d && best.map_or(true, |b| self.regions[c].label() < self.regions[b].label())) {
                best_d = d;
                best = Some(c);
            }
        }
        self.regions[idx].best_region = best;
        self.regions[idx].best_region_dissim = best_d;
    }

    /// Full pairwise merge cost: base criterion, sqrt mode, std-dev weighting,
    /// and edge weighting (spec §4.B). There is no per-neighbor-pair boundary
    /// tracking in this region model (only whole-region sufficient
    /// statistics), so the edge feature is approximated as the combined
    /// region pair's mean per-pixel edge strength rather than a true shared-
    /// boundary sample (see DESIGN.md Open Question decisions).
    pub(crate) fn pairwise_dissim(params: &Params, a: &RegionStats, b: &RegionStats) -> f64 {
        let base = dissim::base_dissim(params.dissim_crit, a, b);
        let d = dissim::apply_sqrt_mode(params.dissim_crit, params.dissim_sqrt_flag, base);
        let combined = RegionStats::merge_preview(a, b);
        let d = dissim::apply_std_dev_weight(d, params.std_dev_wght, combined.max_std_dev.as_deref());
        let n = combined.npix.max(1) as f64;
        let edge_feature = combined.sum_edge.map(|s| s / n).unwrap_or(0.0);
        dissim::apply_edge_weight(d, params.edge_dissim_option, params.edge_wght, params.edge_power, edge_feature)
    }

    /// Active region indices, in arena order.
    pub fn active_indices(&self) -> Vec<RegionIdx> {
        self.regions.iter().filter(|r| r.active).map(|r| r.idx).collect()
    }

    /// Build a fresh, compact arena containing only the active regions,
    /// optionally sorted by a caller-supplied key. Returns the new `RegionSet`
    /// together with an `old_idx -> new_idx` relabel table (spec §4.F
    /// "compact and renumber").
    pub fn compact<F, K>(&mut self, mut sort_key: Option<F>) -> (RegionSet, Vec<Option<RegionIdx>>)
    where
        F: FnMut(&Region) -> K,
        K: Ord,
    {
        let mut active: Vec<RegionIdx> = self.active_indices();
        if let Some(key) = sort_key.as_mut() {
            active.sort_by_key(|&i| key(&self.regions[i]));
        }

        let mut relabel = vec![None; self.regions.len()];
        let mut new_regions = Vec::with_capacity(active.len());
        for (new_idx, &old_idx) in active.iter().enumerate() {
            relabel[old_idx] = Some(new_idx);
            new_regions.push(self.regions[old_idx].clone());
        }
        // Rewrite neighbor sets and best pointers under the new indices.
        for (new_idx, region) in new_regions.iter_mut().enumerate() {
            region.idx = new_idx;
            region.nghbrs = region
                .nghbrs
                .iter()
                .filter_map(|&old| relabel[old])
                .collect();
            region.best_nghbr = region.best_nghbr.and_then(|old| relabel[old]);
            region.best_region = region.best_region.and_then(|old| relabel[old]);
            region.nghbr_heap_index = None;
            region.region_heap_index = None;
            region.merged_flag = false;
            region.large_nghbr_merged_flag = false;
        }

        let n = new_regions.len();
        let new_set = RegionSet {
            regions: new_regions,
            merge_target: vec![None; n],
            active_count: n,
        };
        (new_set, relabel)
    }

    /// Apply a label-rename table to a region's neighbor set (spec §4.C
    /// `nghbrs_label_set_renumber`), used when a caller (e.g. the `Tiler`)
    /// holds indices from a stale generation.
    pub fn nghbrs_renumber(&mut self, idx: RegionIdx, map: &[Option<RegionIdx>]) {
        let renamed: BTreeSet<RegionIdx> = self.regions[idx]
            .nghbrs
            .iter()
            .filter_map(|&old| map[old])
            .collect();
        self.regions[idx].nghbrs = renamed;
    }
}

/// Per-pixel boundary flag for a label map (spec §3 "boundary pixel count",
/// §9 "a pixel's boundary-map value is the highest level at which it still
/// borders a different-labeled neighbor"). A masked-in pixel is a boundary
/// pixel if any stencil neighbor is masked-in and carries a different label.
pub fn boundary_pixel_flags(labels: &[u32], width: usize, stencil: &[isize]) -> Vec<bool> {
    let n = labels.len();
    let mut flags = vec![false; n];
    for p in 0..n {
        if labels[p] == 0 {
            continue;
        }
        for &d in stencil {
            let q = p as isize + d;
            if q < 0 || q as usize >= n {
                continue;
            }
            let q = q as usize;
            if !step_in_bounds(p, q, width) {
                continue;
            }
            if labels[q] != 0 && labels[q] != labels[p] {
                flags[p] = true;
                break;
            }
        }
    }
    flags
}

fn step_in_bounds(p: usize, q: usize, width: usize) -> bool {
    let row_p = p / width;
    let row_q = q / width;
    let col_p = (p % width) as isize;
    let col_q = (q % width) as isize;
    (col_q - col_p).abs() <= 2 && (row_q as isize - row_p as isize).unsigned_abs() as usize <= 2
}
