//! Component E — the dual-heap iteration core (`lhseg`).
//!
//! A `Merger` owns a [`RegionSet`] plus the two heaps over it and drives
//! merges until a region-count or threshold stopping condition fires. The
//! neighbor/spectral split, the throttling of `min_npixels`, and the 2014
//! `process_flag` correction (spec §9 Open Question) are all implemented
//! here exactly as in 4.E.

use crate::config::Params;
use crate::heap::IndexedHeap;
use crate::region::{RegionIdx, RegionSet};

/// Drives merges over a [`RegionSet`] to a stopping point.
pub struct Merger<'p> {
    pub params: &'p Params,
    pub nghbr_heap: IndexedHeap,
    pub region_heap: IndexedHeap,
    pub min_npixels: usize,
    pub max_threshold: f64,
}

/// Outcome of one call to [`Merger::run`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub merges_applied: usize,
    pub final_nregions: usize,
    pub final_threshold: f64,
}

impl<'p> Merger<'p> {
    pub fn new(params: &'p Params, capacity: usize) -> Self {
        Merger {
            params,
            nghbr_heap: IndexedHeap::new(capacity),
            region_heap: IndexedHeap::new(capacity),
            min_npixels: params.spclust_band.min.max(1),
            max_threshold: 0.0,
        }
    }

    fn region_candidates(&self, regions: &RegionSet) -> Vec<RegionIdx> {
        regions
            .active_indices()
            .into_iter()
            .filter(|&i| regions.get(i).stats.npix >= self.min_npixels as u64)
            .collect()
    }

    /// Rebuild `nghbr_heap` over every active region (spec §4.D "build O(N)").
    pub fn rebuild_nghbr_heap(&mut self, regions: &mut RegionSet) {
        self.nghbr_heap = IndexedHeap::new(regions.len());
        for idx in regions.active_indices() {
            regions.best_nghbr_init(self.params, idx);
            let r = regions.get(idx);
            self.nghbr_heap.push_or_update(idx, r.best_nghbr_dissim, r.label());
        }
    }

    /// Rebuild `region_heap` over regions with `npix >= min_npixels` (spec
    /// §4.D). Only meaningful when spectral clustering is enabled.
    pub fn rebuild_region_heap(&mut self, regions: &mut RegionSet) {
        self.region_heap = IndexedHeap::new(regions.len());
        if !self.params.spclust_enabled() {
            return;
        }
        let candidates = self.region_candidates(regions);
        for &idx in &candidates {
            regions.best_region_init(self.params, idx, &candidates);
            let r = regions.get(idx);
            self.region_heap.push_or_update(idx, r.best_region_dissim, r.label());
        }
    }

    /// Spec §4.D throttling policy: recompute `min_npixels` so the count of
    /// regions with `npix >= min_npixels` stays within `[spclust_min,
    /// spclust_max]`, preferring to stay above `spclust_min` unless doing so
    /// would require admitting more than 6x `spclust_max` regions.
    fn retune_min_npixels(&mut self, regions: &mut RegionSet) -> bool {
        if !self.params.spclust_enabled() {
            return false;
        }
        let band = self.params.spclust_band;
        let mut npix_sorted: Vec<u64> = regions
            .active_indices()
            .into_iter()
            .map(|i| regions.get(i).stats.npix)
            .collect();
        npix_sorted.sort_unstable_by(|a, b| b.cmp(a));

        let count_at = |threshold: u64| npix_sorted.iter().filter(|&&n| n >= threshold).count();
        let current = count_at(self.min_npixels as u64);
        if current <= band.max && current >= band.min.min(npix_sorted.len()) {
            return false;
        }

        // Smallest npix threshold such that count_at(threshold) <= spclust_max.
        let mut new_min = self.min_npixels as u64;
        if current > band.max {
            new_min = npix_sorted
                .get(band.max.saturating_sub(1))
                .copied()
                .unwrap_or(u64::MAX)
                .max(1);
            while count_at(new_min) > band.max {
                new_min += 1;
            }
        } else if current < band.min.min(npix_sorted.len()) && self.min_npixels > 1 {
            // Back off, but cap admission at 6x spclust_max to bound cost.
            let cap = (6 * band.max).max(band.max);
            let mut candidate = self.min_npixels as u64;
            loop {
                let next = candidate.saturating_sub(1).max(1);
                if next == candidate {
                    break;
                }
                let cnt = count_at(next);
                if cnt > cap {
                    break;
                }
                candidate = next;
                if cnt >= band.min || candidate == 1 {
                    break;
                }
            }
            new_min = candidate;
        }
        new_min = new_min.max(1);
        if new_min as usize == self.min_npixels {
            return false;
        }
        let old_min = self.min_npixels;
        let decreased = (new_min as usize) < old_min;
        self.min_npixels = new_min as usize;
        // Always enforce a heap of size >= 2 while more than one region remains.
        if regions.active_count > 1 && count_at(self.min_npixels as u64) < 2 {
            self.min_npixels = 1;
        }

        if decreased {
            // A lower admission bar can surface region-heap candidates the
            // prior threshold never saw; stop trusting the old ceiling.
            self.max_threshold = 0.0;
        }

        // Regions whose npix falls in the band between the old and new
        // thresholds flipped region_heap eligibility; refresh their
        // nghbr_heap entry too so both heaps stay consistent with the new
        // `min_npixels`.
        let lo = old_min.min(self.min_npixels) as u64;
        let hi = old_min.max(self.min_npixels) as u64;
        for idx in regions.active_indices() {
            let npix = regions.get(idx).stats.npix;
            if npix >= lo && npix <= hi {
                regions.best_nghbr_init(self.params, idx);
                let r = regions.get(idx);
                self.nghbr_heap.push_or_update(idx, r.best_nghbr_dissim, r.label());
            }
        }

        decreased
    }

    /// Single merge step: pop the cheaper of the two heap tops and apply it.
    /// Returns the applied dissimilarity, or `None` if both heaps are empty
    /// (no further merge possible).
    fn merge_regions(&mut self, regions: &mut RegionSet) -> Option<f64> {
        let nghbr_top = self.nghbr_heap.peek();
        let region_top = if self.region_heap.len() >= 2 {
            self.region_heap
                .peek()
                .map(|(r, d)| (r, d * self.params.spclust_wght.max(f64::MIN_POSITIVE)))
        } else {
            None
        };

        let use_region_heap = match (nghbr_top, region_top) {
            (None, None) => return None,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (Some((_, nd)), Some((_, rd))) => rd < nd,
        };

        let (a, applied) = if use_region_heap {
            let (a, _) = self.region_heap.pop().unwrap();
            let b = regions.get(a).best_region.expect("region_heap top has a best_region");
            (a, (b, regions.get(a).best_region_dissim))
        } else {
            let (a, _) = self.nghbr_heap.pop().unwrap();
            let b = regions.get(a).best_nghbr.expect("nghbr_heap top has a best_nghbr");
            (a, (b, regions.get(a).best_nghbr_dissim))
        };
        let (b, dissim) = applied;

        // Survivor: larger npix; tie -> smaller label.
        let (survivor, loser) = {
            let ra = regions.get(a);
            let rb = regions.get(b);
            if ra.stats.npix > rb.stats.npix || (ra.stats.npix == rb.stats.npix && ra.label() < rb.label()) {
                (a, b)
            } else {
                (b, a)
            }
        };

        self.nghbr_heap.remove(loser);
        self.region_heap.remove(loser);
        self.nghbr_heap.remove(survivor);
        self.region_heap.remove(survivor);

        let loser_was_small = regions.get(a).stats.npix < self.min_npixels as u64
            || regions.get(b).stats.npix < self.min_npixels as u64;

        let touched = regions.do_merge(self.params.dissim_crit, survivor, loser);

        self.max_threshold = self.max_threshold.max(dissim);

        if self.params.merge_accel_flag && loser_was_small {
            regions.get_mut(survivor).large_nghbr_merged_flag = true;
        }

        // Neighbor heap: every region whose best_nghbr could have been the
        // loser was, by definition, a neighbor of the loser (best_nghbr is
        // always drawn from nghbrs), so `touched` is exactly the refresh set.
        regions.best_nghbr_init(self.params, survivor);
        let r = regions.get(survivor);
        self.nghbr_heap.push_or_update(survivor, r.best_nghbr_dissim, r.label());
        for &c in &touched {
            regions.best_nghbr_init(self.params, c);
            let rc = regions.get(c);
            self.nghbr_heap.push_or_update(c, rc.best_nghbr_dissim, rc.label());
        }

        // Region heap: best_region can point anywhere, but the heap itself is
        // kept small by throttling, so a full scan over its members is cheap.
        if self.params.spclust_enabled() {
            let candidates = self.region_candidates(regions);
            if regions.get(survivor).stats.npix >= self.min_npixels as u64 {
                regions.best_region_init(self.params, survivor, &candidates);
                let r = regions.get(survivor);
                self.region_heap.push_or_update(survivor, r.best_region_dissim, r.label());
            }
            let stale: Vec<RegionIdx> = self
                .region_heap
                .indices()
                .filter(|&i| regions.get(i).best_region == Some(loser) || regions.get(i).best_region == Some(survivor))
                .collect();
            for c in stale {
                regions.best_region_init(self.params, c, &candidates);
                let rc = regions.get(c);
                self.region_heap.push_or_update(c, rc.best_region_dissim, rc.label());
            }
        }

        Some(dissim)
    }

    /// Run the merge loop to `converge_nregions`, optionally stopping early
    /// at the next entry in `hseg_out_thresholds` (spec §4.E steps 1-4).
    pub fn run(
        &mut self,
        regions: &mut RegionSet,
        converge_nregions: usize,
        hseg_out_thresholds: &[f64],
    ) -> RunStats {
        let mut merges_applied = 0;

        // Step 1: fast homogeneous-neighbor pass, only from a cold start.
        if self.max_threshold == 0.0 {
            let mut any = false;
            while self.nghbr_heap.peek().map_or(false, |(_, d)| d == 0.0) {
                if self.merge_regions(regions).is_none() {
                    break;
                }
                any = true;
                merges_applied += 1;
            }
            if any {
                if let Some((_, top)) = self.nghbr_heap.peek() {
                    let cap = hseg_out_thresholds.first().copied().unwrap_or(f64::INFINITY);
                    self.max_threshold = top.min(cap);
                }
            }
        }

        // `next_threshold` only names a real checkpoint when a schedule was
        // given; with an empty list there is no threshold to wait for or
        // reach, so that disjunct must be inert rather than defaulting to
        // "always below" (which it effectively was at `+INFINITY`, and made
        // step 2 and step 4 below ignore `converge_nregions` entirely for
        // every current call site, since none pass a non-empty schedule).
        let has_threshold_schedule = !hseg_out_thresholds.is_empty();
        let next_threshold = hseg_out_thresholds
            .iter()
            .find(|&&t| t > self.max_threshold)
            .copied()
            .unwrap_or(f64::INFINITY);

        // Step 2: neighbor-only loop while spectral clustering isn't yet
        // warranted. This is the 2014 bugfix form: `region_heap_size < 2`
        // gates the neighbor-only phase, not merely "spectral clustering off".
        loop {
            let nregions = regions.active_count;
            let process_flag = nregions > converge_nregions
                || (has_threshold_schedule && self.max_threshold < next_threshold);
            let process_flag = process_flag && (self.region_heap.len() < 2);
            if !process_flag {
                break;
            }
            let before = regions.active_count;
            match self.merge_regions(regions) {
                Some(_) => merges_applied += 1,
                None => break,
            }
            if self.max_threshold >= f64::MAX || regions.active_count == before {
                break;
            }
        }

        // Step 3: re-evaluate throttling, rebuild region_heap.
        if self.params.spclust_enabled() {
            self.retune_min_npixels(regions);
            self.rebuild_region_heap(regions);
        }

        // Step 4: combined loop. Stopping condition is a disjunction (spec
        // §6 "emit when nregions <= next entry or max_threshold >= next
        // entry"), not a conjunction: either the region-count target or the
        // threshold target is enough to stop, independent of the other.
        loop {
            let nregions = regions.active_count;
            if nregions <= converge_nregions
                || (has_threshold_schedule && self.max_threshold >= next_threshold)
            {
                break;
            }
            if nregions <= 1 {
                break;
            }
            let before = regions.active_count;
            match self.merge_regions(regions) {
                Some(_) => merges_applied += 1,
                None => break,
            }
            if regions.active_count == before {
                break;
            }
            if self.params.spclust_enabled() {
                let changed = self.retune_min_npixels(regions);
                if changed {
                    self.rebuild_region_heap(regions);
                }
            }
        }

        RunStats {
            merges_applied,
            final_nregions: regions.active_count,
            final_threshold: self.max_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionStats;

    fn stat(v: f64, npix: u64) -> RegionStats {
        let mut s = RegionStats::new(1);
        s.sum[0] = v * npix as f64;
        s.npix = npix;
        s
    }

    fn line_of_regions(vals: &[f64]) -> RegionSet {
        let stats: Vec<RegionStats> = vals.iter().map(|&v| stat(v, 1)).collect();
        let mut rs = RegionSet::new(stats);
        for i in 0..vals.len() - 1 {
            rs.add_neighbor(i, i + 1);
        }
        rs
    }

    #[test]
    fn merges_identical_neighbors_down_to_convergence_target() {
        let mut regions = line_of_regions(&[1.0, 1.0, 1.0, 1.0, 5.0]);
        let params = Params {
            spclust_wght: 0.0,
            ..Params::default()
        };
        let mut merger = Merger::new(&params, regions.len());
        merger.rebuild_nghbr_heap(&mut regions);
        let stats = merger.run(&mut regions, 2, &[]);
        assert_eq!(stats.final_nregions, 2);
        assert!(merger.max_threshold.is_finite());
    }

    #[test]
    fn stops_when_no_further_merge_is_possible() {
        let mut regions = line_of_regions(&[1.0, 100.0]);
        let params = Params {
            spclust_wght: 0.0,
            ..Params::default()
        };
        let mut merger = Merger::new(&params, regions.len());
        merger.rebuild_nghbr_heap(&mut regions);
        let stats = merger.run(&mut regions, 1, &[]);
        assert_eq!(stats.merges_applied, 1);
        assert_eq!(stats.final_nregions, 1);
    }
}
