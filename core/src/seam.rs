//! Component H — `SeamFixer`: removes the artificial region boundaries a
//! tiled recursion introduces at every split plane (spec §4.H).

use crate::region::{RegionIdx, RegionSet};

/// One pixel pair straddling a seam, with the edge-scaled dissimilarity
/// between the regions on either side (spec §4.G step 4 "propagate
/// adjacency across seams").
#[derive(Debug, Clone, Copy)]
pub struct SeamPair {
    pub region_a: RegionIdx,
    pub region_b: RegionIdx,
    pub edge_dissim: f64,
}

/// Result of one `SeamFixer` pass.
#[derive(Debug, Default)]
pub struct SeamFixResult {
    pub merges_applied: usize,
    pub max_threshold: f64,
}

/// Force-merge every seam-straddling region pair whose edge-scaled
/// dissimilarity falls below `seam_edge_threshold`, in order of increasing
/// dissimilarity (spec §4.H). `crit`/`sqrt_flag` are unused here since the
/// caller supplies already-scaled `edge_dissim` values; they are accepted to
/// keep the signature uniform with the rest of the merge machinery.
pub fn fix_seams(
    regions: &mut RegionSet,
    mut seam_pairs: Vec<SeamPair>,
    seam_edge_threshold: f64,
) -> SeamFixResult {
    seam_pairs.sort_by(|a, b| a.edge_dissim.partial_cmp(&b.edge_dissim).unwrap_or(std::cmp::Ordering::Equal));

    let mut result = SeamFixResult::default();
    for pair in seam_pairs {
        if pair.edge_dissim >= seam_edge_threshold {
            break;
        }
        let a = regions.find(pair.region_a);
        let b = regions.find(pair.region_b);
        if a == b || !regions.get(a).active || !regions.get(b).active {
            continue;
        }
        let (survivor, loser) = if regions.get(a).stats.npix >= regions.get(b).stats.npix {
            (a, b)
        } else {
            (b, a)
        };
        regions.do_merge(crate::config::DissimCrit::default(), survivor, loser);
        result.merges_applied += 1;
        result.max_threshold = result.max_threshold.max(pair.edge_dissim);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionStats;

    fn stat(v: f64) -> RegionStats {
        let mut s = RegionStats::new(1);
        s.sum[0] = v;
        s.npix = 1;
        s
    }

    #[test]
    fn merges_pairs_below_threshold_in_increasing_order() {
        let mut regions = RegionSet::new(vec![stat(1.0), stat(2.0), stat(3.0), stat(4.0)]);
        regions.add_neighbor(0, 1);
        regions.add_neighbor(2, 3);
        let pairs = vec![
            SeamPair { region_a: 0, region_b: 1, edge_dissim: 0.02 },
            SeamPair { region_a: 2, region_b: 3, edge_dissim: 0.2 },
        ];
        let result = fix_seams(&mut regions, pairs, 0.05);
        assert_eq!(result.merges_applied, 1);
        assert!(regions.find(0) == regions.find(1));
        assert!(regions.find(2) != regions.find(3));
    }

    #[test]
    fn skips_pairs_already_in_the_same_region() {
        let mut regions = RegionSet::new(vec![stat(1.0), stat(2.0)]);
        regions.do_merge(crate::config::DissimCrit::default(), 0, 1);
        let pairs = vec![SeamPair { region_a: 0, region_b: 1, edge_dissim: 0.0 }];
        let result = fix_seams(&mut regions, pairs, 0.05);
        assert_eq!(result.merges_applied, 0);
    }
}
