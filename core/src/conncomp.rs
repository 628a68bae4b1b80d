//! Component I — connected-component labeling of region *objects* within a
//! single region-class label (spec §4.I), grounded on the scanline
//! union-find approach used for n-dimensional labeling in the pack's
//! `ndarray-ndimage` crate.

use crate::region::RegionStats;
use std::collections::HashMap;

/// Per-object sufficient statistics, reusing the same accumulator as
/// [`RegionStats`] but computed over pixels sharing one class label rather
/// than over already-merged region stats (spec §4.I).
pub struct ObjectStats {
    pub class_label: u32,
    pub object_label: u32,
    pub stats: RegionStats,
}

/// Label connected components within each class label in `class_labels`
/// (row-major, `width x height`), using `stencil` for adjacency (already
/// filtered to `conn_type`, or forced 4-connected by `object_conn_type1` per
/// §6). Masked pixels (`class_labels[i] == 0`) are never labeled.
///
/// Returns the per-pixel object-label map (0 = unlabeled/masked) and the
/// list of non-empty objects with their sufficient statistics.
pub fn label_objects(
    class_labels: &[u32],
    width: usize,
    stencil: &[isize],
    band_values: &[Vec<f64>],
) -> (Vec<u32>, Vec<ObjectStats>) {
    let n = class_labels.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }
    fn union(parent: &mut [usize], a: usize, b: usize) {
        let ra = find(parent, a);
        let rb = find(parent, b);
        if ra != rb {
            parent[ra] = rb;
        }
    }

    // First pass: union every masked-in pixel with same-class neighbors that
    // precede it in raster order (classic scanline equivalence-class pass).
    for p in 0..n {
        if class_labels[p] == 0 {
            continue;
        }
        for &d in stencil {
            if d >= 0 {
                continue; // only look backward, forward neighbors seen from their own scan
            }
            let q = p as isize + d;
            if q < 0 {
                continue;
            }
            let q = q as usize;
            if !same_row_or_col_bounded(p, q, width) {
                continue;
            }
            if class_labels[q] == class_labels[p] {
                union(&mut parent, p, q);
            }
        }
    }

    // Second pass: assign compact object labels per root, keyed by class so
    // two objects of different classes never collide.
    let mut root_to_object: HashMap<usize, u32> = HashMap::new();
    let mut object_labels = vec![0u32; n];
    let mut objects: Vec<ObjectStats> = Vec::new();

    for p in 0..n {
        if class_labels[p] == 0 {
            continue;
        }
        let root = find(&mut parent, p);
        let obj_label = *root_to_object.entry(root).or_insert_with(|| {
            objects.push(ObjectStats {
                class_label: class_labels[p],
                object_label: (objects.len() + 1) as u32,
                stats: RegionStats::new(band_values.len()),
            });
            objects.len() as u32
        });
        object_labels[p] = obj_label;
    }

    // Accumulate sufficient statistics per object (components with zero
    // pixels never got a root, so none are culled here; the map construction
    // above already guarantees `objects` has no empty entries).
    for p in 0..n {
        let obj_label = object_labels[p];
        if obj_label == 0 {
            continue;
        }
        let obj = &mut objects[obj_label as usize - 1];
        let features: Vec<f64> = band_values.iter().map(|band| band[p]).collect();
        obj.stats.accumulate(crate::config::DissimCrit::default(), &features, None, None);
    }

    (object_labels, objects)
}

fn same_row_or_col_bounded(p: usize, q: usize, width: usize) -> bool {
    let row_p = p / width;
    let row_q = q / width;
    let col_p = (p % width) as isize;
    let col_q = (q % width) as isize;
    (col_q - col_p).abs() <= 2 && (row_q as isize - row_p as isize).unsigned_abs() as usize <= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_disjoint_blocks_of_same_class_become_two_objects() {
        // 4x4 grid, class 1 occupies two diagonal 1x1 corners, class 0 elsewhere (masked).
        #[rustfmt::skip]
        let class_labels = vec![
            1, 0, 0, 0,
            0, 0, 0, 0,
            0, 0, 0, 0,
            0, 0, 0, 1,
        ];
        let stencil = vec![-1, 1, -4, 4];
        let band_values = vec![vec![1.0; 16]];
        let (labels, objects) = label_objects(&class_labels, 4, &stencil, &band_values);
        assert_eq!(objects.len(), 2);
        assert_ne!(labels[0], labels[15]);
        assert_eq!(objects[0].stats.npix, 1);
    }

    #[test]
    fn connected_pixels_of_same_class_become_one_object() {
        #[rustfmt::skip]
        let class_labels = vec![
            1, 1, 0, 0,
            1, 1, 0, 0,
            0, 0, 0, 0,
            0, 0, 0, 0,
        ];
        let stencil = vec![-1, 1, -4, 4];
        let band_values = vec![vec![1.0; 16]];
        let (_labels, objects) = label_objects(&class_labels, 4, &stencil, &band_values);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].stats.npix, 4);
    }
}
