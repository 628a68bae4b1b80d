//! Component G — the recursive divide-and-conquer tiling driver (`lrhseg`).
//!
//! Each recursion level halves the current window along one axis (so an
//! `rnb_levels`-deep recursion yields `2^rnb_levels` leaf tiles), recurses
//! through a [`RecurDispatcher`], then stitches the children's regions back
//! together: collect, build seam adjacency, run [`SeamFixer`], and — under
//! `ProgramMode::Rhseg` — run a bounded [`Merger`] pass before returning to
//! the parent (spec §4.G).

use crate::config::Params;
use crate::dispatch::RecurDispatcher;
use crate::first_merge::{first_merge, stencil_2d};
use crate::merger::Merger;
use crate::pixel::Pixel;
use crate::region::RegionSet;
use crate::seam::{fix_seams, SeamPair};

/// A rectangular processing window within the full image, in pixel
/// coordinates (spec §4.G "a processing window in column/row").
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub col0: usize,
    pub row0: usize,
    pub cols: usize,
    pub rows: usize,
}

impl Window {
    fn split_vertical(&self) -> (Window, Window) {
        let left_cols = self.cols / 2;
        (
            Window { col0: self.col0, row0: self.row0, cols: left_cols, rows: self.rows },
            Window {
                col0: self.col0 + left_cols,
                row0: self.row0,
                cols: self.cols - left_cols,
                rows: self.rows,
            },
        )
    }

    fn split_horizontal(&self) -> (Window, Window) {
        let top_rows = self.rows / 2;
        (
            Window { col0: self.col0, row0: self.row0, cols: self.cols, rows: top_rows },
            Window {
                col0: self.col0,
                row0: self.row0 + top_rows,
                cols: self.cols,
                rows: self.rows - top_rows,
            },
        )
    }

    /// Split along whichever axis is currently longer, to keep children
    /// balanced (spec §4.G step 1 "chosen to keep child dimensions balanced").
    fn split(&self) -> (Window, Window) {
        if self.cols >= self.rows {
            self.split_vertical()
        } else {
            self.split_horizontal()
        }
    }

    fn is_leaf(&self, levels_remaining: u32) -> bool {
        levels_remaining == 0 || (self.cols <= 1 && self.rows <= 1)
    }
}

/// Extracts the sub-raster for `window` out of a full-image pixel array
/// stored row-major with the given full-image width.
fn slice_window(pixels: &[Pixel], full_width: usize, window: Window) -> Vec<Pixel> {
    let mut out = Vec::with_capacity(window.cols * window.rows);
    for r in 0..window.rows {
        let row_start = (window.row0 + r) * full_width + window.col0;
        out.extend_from_slice(&pixels[row_start..row_start + window.cols]);
    }
    out
}

/// Result of processing one recursion level: the region set for this
/// window's pixels, the (possibly relabeled) label map over the window, and
/// the running `max_threshold`.
pub struct TileResult {
    pub regions: RegionSet,
    pub labels: Vec<u32>,
    pub max_threshold: f64,
}

/// Recursively segment `window` (spec §4.G/§4.F). `levels_remaining` counts
/// down from `params.rnb_levels`; at zero (or a 1x1 window) this runs
/// `FirstMerge` directly.
pub fn run<D: RecurDispatcher>(
    params: &Params,
    dispatcher: &D,
    full_pixels: &[Pixel],
    full_width: usize,
    window: Window,
    levels_remaining: u32,
) -> TileResult {
    if window.is_leaf(levels_remaining) {
        let tile_pixels = slice_window(full_pixels, full_width, window);
        let stencil = stencil_2d(params.conn_type, window.cols.max(1));
        let mut labels = vec![0u32; tile_pixels.len()];
        let result = first_merge(params, &tile_pixels, &mut labels, &stencil, window.cols.max(1));
        return TileResult { regions: result.regions, labels, max_threshold: 0.0 };
    }

    let (win_a, win_b) = window.split();
    let jobs: Vec<Box<dyn FnOnce() -> (Window, TileResult) + Send + 'static>> = vec![
        Box::new({
            let params = params.clone();
            let full_pixels = full_pixels.to_vec();
            move || (win_a, run(&params, &SerialRecurse, &full_pixels, full_width, win_a, levels_remaining - 1))
        }),
        Box::new({
            let params = params.clone();
            let full_pixels = full_pixels.to_vec();
            move || (win_b, run(&params, &SerialRecurse, &full_pixels, full_width, win_b, levels_remaining - 1))
        }),
    ];
    let children: Vec<(Window, TileResult)> = dispatcher.dispatch(jobs);

    // Collect: concatenate child region arrays, offsetting labels so they
    // stay globally unique within this level, and build the combined window
    // label map.
    let mut combined_stats = Vec::new();
    let mut combined_labels = vec![0u32; window.cols * window.rows];
    let mut child_label_offsets = Vec::with_capacity(children.len());

    for (child_window, child_result) in &children {
        let offset = combined_stats.len();
        child_label_offsets.push(offset);
        combined_stats.extend(child_result.regions.regions.iter().map(|r| r.stats.clone()));

        for r in 0..child_window.rows {
            let src_row_start = r * child_window.cols;
            let dst_row = (child_window.row0 - window.row0) + r;
            let dst_col0 = child_window.col0 - window.col0;
            let dst_start = dst_row * window.cols + dst_col0;
            for c in 0..child_window.cols {
                let label = child_result.labels[src_row_start + c];
                combined_labels[dst_start + c] =
                    if label == 0 { 0 } else { label + offset as u32 };
            }
        }
    }

    let mut regions = RegionSet::new(combined_stats);

    // Re-home each child's neighbor sets under the combined indices.
    for ((_, child_result), &offset) in children.iter().zip(&child_label_offsets) {
        for region in &child_result.regions.regions {
            for &n in &region.nghbrs {
                regions.add_neighbor(region.idx + offset, n + offset);
            }
        }
    }

    // Propagate adjacency across the seam: scan the shared boundary column
    // or row and union neighboring pixels' regions (spec §4.G step 5).
    let seam_pairs = propagate_seam_adjacency(params, &combined_labels, window, &children, &mut regions);

    let seam_result = fix_seams(&mut regions, seam_pairs, params.seam_edge_threshold);
    let mut max_threshold = children
        .iter()
        .map(|(_, r)| r.max_threshold)
        .fold(0.0_f64, f64::max)
        .max(seam_result.max_threshold);

    if params.program_mode == crate::config::ProgramMode::Rhseg {
        let mut merger = Merger::new(params, regions.len());
        merger.rebuild_nghbr_heap(&mut regions);
        if params.spclust_enabled() {
            merger.rebuild_region_heap(&mut regions);
        }
        merger.max_threshold = max_threshold;
        let converge = params.min_nregions;
        let stats = merger.run(&mut regions, converge, &[]);
        max_threshold = stats.final_threshold;
    }

    let (compacted, relabel) = regions.compact::<fn(&crate::region::Region) -> u32, u32>(None);
    for label in combined_labels.iter_mut() {
        if *label != 0 {
            *label = relabel[*label as usize - 1].map(|i| (i + 1) as u32).unwrap_or(0);
        }
    }

    TileResult { regions: compacted, labels: combined_labels, max_threshold }
}

/// For every seam plane between two adjacent children, look at pixels on
/// either side within `seam_size` and record the straddling region pairs,
/// each carrying the real pairwise dissimilarity between the two regions'
/// current statistics (spec §4.H: `fix_seams` force-merges on this value, so
/// it must reflect the regions' actual feature difference, not a stand-in).
fn propagate_seam_adjacency(
    params: &Params,
    combined_labels: &[u32],
    window: Window,
    children: &[(Window, TileResult)],
    regions: &mut RegionSet,
) -> Vec<SeamPair> {
    let mut pairs = Vec::new();
    if children.len() != 2 {
        return pairs;
    }
    let (win_a, _) = &children[0];
    let (win_b, _) = &children[1];

    let mut seen = std::collections::HashSet::new();
    let mut push_pair = |regions: &mut RegionSet, pairs: &mut Vec<SeamPair>, a: usize, b: usize| {
        if a == b || !seen.insert((a.min(b), a.max(b))) {
            return;
        }
        regions.add_neighbor(a, b);
        let edge_dissim = RegionSet::pairwise_dissim(params, &regions.get(a).stats, &regions.get(b).stats);
        pairs.push(SeamPair { region_a: a, region_b: b, edge_dissim });
    };

    if win_a.row0 == win_b.row0 {
        // Vertical split: seam runs along the shared column.
        let seam_col = win_b.col0 - window.col0;
        for r in 0..window.rows {
            let left = r * window.cols + seam_col - 1;
            let right = r * window.cols + seam_col;
            if combined_labels[left] == 0 || combined_labels[right] == 0 {
                continue;
            }
            let a = combined_labels[left] as usize - 1;
            let b = combined_labels[right] as usize - 1;
            push_pair(regions, &mut pairs, a, b);
        }
    } else {
        // Horizontal split: seam runs along the shared row.
        let seam_row = win_b.row0 - window.row0;
        for c in 0..window.cols {
            let top = (seam_row - 1) * window.cols + c;
            let bottom = seam_row * window.cols + c;
            if combined_labels[top] == 0 || combined_labels[bottom] == 0 {
                continue;
            }
            let a = combined_labels[top] as usize - 1;
            let b = combined_labels[bottom] as usize - 1;
            push_pair(regions, &mut pairs, a, b);
        }
    }
    pairs
}

/// Placeholder dispatcher used only for the recursive call inside a boxed
/// job closure; the outer `run` call always receives the caller's real
/// dispatcher, and nested levels below the top always recurse serially
/// within their own job (parallelism is applied once per split, not
/// recursively nested, to bound thread fan-out to the dispatcher's pool).
#[derive(Debug, Default, Clone, Copy)]
struct SerialRecurse;

impl RecurDispatcher for SerialRecurse {
    fn dispatch<F, R>(&self, jobs: Vec<F>) -> Vec<R>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        jobs.into_iter().map(|job| job()).collect()
    }
}
