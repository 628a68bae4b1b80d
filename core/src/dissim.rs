//! Component B — pairwise dissimilarity over region sufficient statistics.
//!
//! Every criterion is a pure function of two regions' statistics plus their
//! combined statistics "as if merged" (spec §4.B) — there is no separate
//! pair-state cache. Degenerate arithmetic (division by zero, a `NaN` from
//! floating-point cancellation) is normalised to `+INFINITY` here, once, so
//! the rest of the engine never has to special-case it (spec §7).

use crate::config::{DissimCrit, EdgeDissimOption};
use crate::region::RegionStats;

/// Clamp any non-finite or negative-by-floating-error result to a sane value.
#[inline]
fn guard(value: f64) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else if value.is_finite() {
        // Concave criteria can dip slightly below zero from cancellation.
        0.0
    } else {
        f64::INFINITY
    }
}

fn mean(stats: &RegionStats) -> Vec<f64> {
    let n = stats.npix as f64;
    stats.sum.iter().map(|s| s / n).collect()
}

/// Base dissimilarity for the selected criterion, before std-dev/edge
/// modifiers are applied.
pub fn base_dissim(crit: DissimCrit, a: &RegionStats, b: &RegionStats) -> f64 {
    if a.npix == 0 || b.npix == 0 {
        return f64::INFINITY;
    }
    let d = match crit {
        DissimCrit::Norm1 => norm1(a, b),
        DissimCrit::Norm2 => norm2(a, b),
        DissimCrit::NormInf => norm_inf(a, b),
        DissimCrit::SpectralAngle => spectral_angle(a, b),
        DissimCrit::SpectralInfoDivergence => spectral_info_divergence(a, b),
        DissimCrit::BandSumMse => band_sum_mse(a, b),
        DissimCrit::BandMaxMse => band_max_mse(a, b),
        DissimCrit::NormalizedVector => normalized_vector(a, b),
        DissimCrit::Entropy => entropy_dissim(a, b),
        DissimCrit::SarSpeckle => sar_speckle(a, b),
    };
    guard(d)
}

/// Apply the square-root modifier for `BandSumMse` (spec §4.C) if configured.
pub fn apply_sqrt_mode(crit: DissimCrit, sqrt_flag: bool, dissim: f64) -> f64 {
    if crit == DissimCrit::BandSumMse && sqrt_flag {
        guard(dissim).sqrt()
    } else {
        dissim
    }
}

/// Apply the standard-deviation weighting modifier (spec §4.B):
/// `dissim *= 1 + w * max(std-dev of combined region)`.
pub fn apply_std_dev_weight(dissim: f64, wght: f64, combined_max_std_dev: Option<&[f64]>) -> f64 {
    if wght <= 0.0 {
        return dissim;
    }
    let Some(max_sd) = combined_max_std_dev else {
        return dissim;
    };
    let m = max_sd.iter().cloned().fold(0.0_f64, f64::max);
    dissim * (1.0 + wght * m)
}

/// Apply the edge weighting modifier (spec §4.B). `edge_feature` is the
/// already-scaled `f ∈ [0,1]` derived from the pair's boundary edge sums.
pub fn apply_edge_weight(
    dissim: f64,
    option: EdgeDissimOption,
    edge_wght: f64,
    edge_power: f64,
    edge_feature: f64,
) -> f64 {
    if edge_wght <= 0.0 {
        return dissim;
    }
    let f = edge_feature.clamp(0.0, 1.0).powf(edge_power);
    match option {
        EdgeDissimOption::Enhance => {
            let denom = 1.0 - (1.0 - edge_wght) * f;
            if denom <= 0.0 {
                f64::INFINITY
            } else {
                dissim / denom
            }
        }
        EdgeDissimOption::Suppress => dissim * (1.0 + edge_wght * f),
    }
}

fn norm1(a: &RegionStats, b: &RegionStats) -> f64 {
    let (ma, mb) = (mean(a), mean(b));
    ma.iter().zip(mb.iter()).map(|(x, y)| (x - y).abs()).sum()
}

fn norm2(a: &RegionStats, b: &RegionStats) -> f64 {
    let (ma, mb) = (mean(a), mean(b));
    ma.iter()
        .zip(mb.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn norm_inf(a: &RegionStats, b: &RegionStats) -> f64 {
    let (ma, mb) = (mean(a), mean(b));
    ma.iter()
        .zip(mb.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0_f64, f64::max)
}

fn spectral_angle(a: &RegionStats, b: &RegionStats) -> f64 {
    let (ma, mb) = (mean(a), mean(b));
    let dot: f64 = ma.iter().zip(mb.iter()).map(|(x, y)| x * y).sum();
    let na = ma.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = mb.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return f64::INFINITY;
    }
    (dot / (na * nb)).clamp(-1.0, 1.0).acos()
}

fn spectral_info_divergence(a: &RegionStats, b: &RegionStats) -> f64 {
    let (ma, mb) = (mean(a), mean(b));
    let sa: f64 = ma.iter().sum();
    let sb: f64 = mb.iter().sum();
    if sa <= 0.0 || sb <= 0.0 || ma.iter().any(|&x| x <= 0.0) || mb.iter().any(|&x| x <= 0.0) {
        return f64::INFINITY;
    }
    let mut sid = 0.0;
    for (&x, &y) in ma.iter().zip(mb.iter()) {
        let p = x / sa;
        let q = y / sb;
        sid += p * (p / q).ln() + q * (q / p).ln();
    }
    sid
}

/// Sample-size-weighted squared mean difference, summed over bands —
/// the standard Ward-linkage-style region-growing merge cost.
fn weighted_sq_diffs(a: &RegionStats, b: &RegionStats) -> Vec<f64> {
    let (ma, mb) = (mean(a), mean(b));
    let weight = (a.npix as f64 * b.npix as f64) / (a.npix + b.npix) as f64;
    ma.iter()
        .zip(mb.iter())
        .map(|(x, y)| weight * (x - y).powi(2))
        .collect()
}

fn band_sum_mse(a: &RegionStats, b: &RegionStats) -> f64 {
    weighted_sq_diffs(a, b).into_iter().sum()
}

fn band_max_mse(a: &RegionStats, b: &RegionStats) -> f64 {
    weighted_sq_diffs(a, b)
        .into_iter()
        .fold(0.0_f64, f64::max)
}

fn normalized_vector(a: &RegionStats, b: &RegionStats) -> f64 {
    let (ma, mb) = (mean(a), mean(b));
    let diff_norm = ma
        .iter()
        .zip(mb.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt();
    let combined_norm = ma
        .iter()
        .zip(mb.iter())
        .map(|(x, y)| {
            let c = (x + y) / 2.0;
            c * c
        })
        .sum::<f64>()
        .sqrt();
    if combined_norm == 0.0 {
        return if diff_norm == 0.0 { 0.0 } else { f64::INFINITY };
    }
    diff_norm / combined_norm
}

/// Per-region "entropy" derived from the sum-x-log-x sufficient statistic:
/// `sum_band(sumxlogx - sum * ln(sum / npix))`, i.e. `sum(x ln x) - n*mean*ln(mean)`.
fn region_entropy(stats: &RegionStats) -> f64 {
    let Some(sumxlogx) = &stats.sumxlogx else {
        return f64::NAN;
    };
    let n = stats.npix as f64;
    let mut h = 0.0;
    for (&sxlx, &s) in sumxlogx.iter().zip(stats.sum.iter()) {
        let mean = s / n;
        if mean > 0.0 {
            h += sxlx - s * mean.ln();
        }
    }
    h
}

fn entropy_dissim(a: &RegionStats, b: &RegionStats) -> f64 {
    let combined = RegionStats::merge_preview(a, b);
    let h_combined = region_entropy(&combined);
    let h_a = region_entropy(a);
    let h_b = region_entropy(b);
    if h_combined.is_nan() || h_a.is_nan() || h_b.is_nan() {
        return f64::INFINITY;
    }
    h_combined - h_a - h_b
}

/// Generalized likelihood-ratio statistic for merging regions under a
/// multiplicative (Gamma-distributed) speckle model, summed over bands.
fn sar_speckle(a: &RegionStats, b: &RegionStats) -> f64 {
    let (ma, mb) = (mean(a), mean(b));
    let na = a.npix as f64;
    let nb = b.npix as f64;
    let mut stat = 0.0;
    for (&xa, &xb) in ma.iter().zip(mb.iter()) {
        if xa <= 0.0 || xb <= 0.0 {
            return f64::INFINITY;
        }
        let combined_mean = (na * xa + nb * xb) / (na + nb);
        stat += na * (combined_mean / xa).ln() + nb * (combined_mean / xb).ln();
    }
    stat
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(sum: Vec<f64>, npix: u64) -> RegionStats {
        let mut s = RegionStats::new(sum.len());
        s.npix = npix;
        s.sum = sum;
        s
    }

    #[test]
    fn identical_regions_have_zero_dissim() {
        let a = stats(vec![10.0], 4);
        let b = stats(vec![10.0], 4);
        for crit in [
            DissimCrit::Norm1,
            DissimCrit::Norm2,
            DissimCrit::NormInf,
            DissimCrit::BandSumMse,
            DissimCrit::BandMaxMse,
            DissimCrit::NormalizedVector,
        ] {
            assert_eq!(base_dissim(crit, &a, &b), 0.0, "{crit:?}");
        }
    }

    #[test]
    fn band_sum_mse_scales_with_weighted_squared_difference() {
        let a = stats(vec![10.0], 8);
        let b = stats(vec![20.0], 8);
        let d = base_dissim(DissimCrit::BandSumMse, &a, &b);
        // weight = (8*8)/16 = 4, diff^2 = 100 -> 400
        assert!((d - 400.0).abs() < 1e-9);
    }

    #[test]
    fn zero_npix_is_infinite() {
        let a = stats(vec![1.0], 0);
        let b = stats(vec![1.0], 4);
        assert_eq!(base_dissim(DissimCrit::Norm2, &a, &b), f64::INFINITY);
    }

    #[test]
    fn edge_suppress_raises_cost_more_for_stronger_edges() {
        let base = 10.0;
        let weak = apply_edge_weight(base, EdgeDissimOption::Suppress, 0.5, 1.0, 0.1);
        let strong = apply_edge_weight(base, EdgeDissimOption::Suppress, 0.5, 1.0, 1.0);
        assert!(strong > weak);
    }

    #[test]
    fn edge_enhance_lowers_cost_less_as_feature_grows() {
        let base = 10.0;
        let no_edge = apply_edge_weight(base, EdgeDissimOption::Enhance, 0.5, 1.0, 0.0);
        let full_edge = apply_edge_weight(base, EdgeDissimOption::Enhance, 0.5, 1.0, 1.0);
        assert!((no_edge - base).abs() < 1e-9);
        assert!(full_edge > base);
    }
}
