//! # hseg-core
//!
//! Hierarchical segmentation of 2-D multi-band raster imagery: a
//! region-growing and spectral-clustering merge loop (`lhseg`), a recursive
//! divide-and-conquer tiling driver (`lrhseg`/`rhseg`) with seam artifact
//! elimination, and the region/heap/dissimilarity machinery that drives it.

pub mod config;
pub mod conncomp;
pub mod dispatch;
pub mod dissim;
pub mod driver;
pub mod error;
pub mod first_merge;
pub mod heap;
pub mod merger;
pub mod output;
pub mod paramfile;
pub mod pixel;
pub mod raster;
pub mod region;
pub mod seam;
pub mod telemetry;
pub mod tile_store;
pub mod tiler;

pub use config::{DissimCrit, EdgeDissimOption, OutputSchedule, Params, ProgramMode};
pub use driver::{build_pixels, run as run_driver, DriverResult, EmittedLevel};
pub use error::{HsegError, HsegResult};
pub use pixel::Pixel;
pub use raster::RasterImage;
pub use region::{Region, RegionIdx, RegionSet, RegionStats};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_to_end_uniform_image_converges_to_one_region() {
        let mut params = Params::default();
        params.program_mode = ProgramMode::Hseg;
        params.spclust_wght = 0.0;
        params.conv_nregions = 1;
        params.min_nregions = 1;

        let raster = RasterImage {
            width: 4,
            height: 4,
            depth: 1,
            bands: vec![vec![10.0; 16]],
        };
        let pixels = build_pixels(&params, &raster, None, None, None);
        let result = run_driver(&params, &raster, &pixels).unwrap();

        assert_eq!(result.levels.first().unwrap().records.len(), 16);
        assert_eq!(result.levels.last().unwrap().records.len(), 1);
    }
}
