//! Configuration types for the HSeg segmentation engine.
//!
//! `Params` is the process-wide, immutable configuration handle threaded
//! down through the recursion by value/reference (never a process global —
//! see DESIGN.md's "process-wide config" note). It is built either from
//! [`Default`] or from a text parameter file (see [`crate::paramfile`]).

use serde::{Deserialize, Serialize};

/// Top-level run mode, selecting how much of the engine is exercised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgramMode {
    /// Hierarchical Stepwise Optimization: no recursion, no spectral clustering.
    Hswo,
    /// Hierarchical segmentation: no recursion, spectral clustering allowed.
    Hseg,
    /// Recursive hierarchical segmentation: tiled divide-and-conquer.
    Rhseg,
}

impl Default for ProgramMode {
    fn default() -> Self {
        ProgramMode::Rhseg
    }
}

/// Dissimilarity criterion selector (spec §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DissimCrit {
    /// 1-norm of the mean difference vector.
    Norm1 = 1,
    /// 2-norm (Euclidean) of the mean difference vector.
    Norm2 = 2,
    /// Infinity-norm (max absolute component) of the mean difference vector.
    NormInf = 3,
    /// Spectral angle between mean vectors.
    SpectralAngle = 4,
    /// Spectral information divergence.
    SpectralInfoDivergence = 5,
    /// Band-sum mean-squared-error (optionally square-rooted, see
    /// `Params::dissim_sqrt_flag`).
    BandSumMse = 6,
    /// Band-max mean-squared-error.
    BandMaxMse = 7,
    /// Normalised vector distance.
    NormalizedVector = 8,
    /// Entropy criterion (uses sum-x-log-x sufficient statistics).
    Entropy = 9,
    /// SAR multiplicative-speckle-noise likelihood-ratio criterion.
    SarSpeckle = 10,
}

impl DissimCrit {
    /// Whether this criterion needs the sum-of-squares sufficient statistic.
    pub fn needs_sumsq(self) -> bool {
        matches!(
            self,
            DissimCrit::BandSumMse | DissimCrit::BandMaxMse | DissimCrit::NormalizedVector
        )
    }

    /// Whether this criterion needs the sum-x-log-x sufficient statistic.
    pub fn needs_sumxlogx(self) -> bool {
        matches!(self, DissimCrit::Entropy)
    }
}

impl Default for DissimCrit {
    fn default() -> Self {
        DissimCrit::BandSumMse
    }
}

/// How edge evidence modifies a base dissimilarity (spec §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeDissimOption {
    /// Multiply dissim by `1 / (1 - (1-e)*f^p)`, making strong edges cheaper to cross less so.
    Enhance,
    /// Multiply dissim by `1 + e*f^p`, making strong edges more costly to cross.
    Suppress,
}

/// Mutually exclusive ways of picking when to emit an output level (spec §4.J).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum OutputSchedule {
    /// Emit whenever `nregions` falls to `chk_nregions`, then halve it.
    ByCount { chk_nregions: usize },
    /// Emit at each listed region count.
    ByNregionsList { nregions: Vec<usize> },
    /// Emit at each listed merge threshold.
    ByThresholdsList { thresholds: Vec<f64> },
    /// Emit exactly once, at convergence.
    #[default]
    ConvergenceOnly,
}

/// Spectral-clustering region_heap size throttling band (spec §4.D).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpclustBand {
    pub min: usize,
    pub max: usize,
}

impl Default for SpclustBand {
    fn default() -> Self {
        // Library defaults: a generous band so min_npixels rarely has to move
        // for small test images, while still bounding real ones.
        SpclustBand {
            min: 2,
            max: 20_000,
        }
    }
}

/// Process-wide immutable configuration, threaded as an explicit context
/// rather than kept in process globals (DESIGN.md / spec §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
    pub program_mode: ProgramMode,
    pub dissim_crit: DissimCrit,
    /// Neighbor stencil id; 2-D: 1..5, 3-D: 1..3 (spec §4.C).
    pub conn_type: u8,
    /// Spectral-clustering merge weight. `0.0` disables spectral clustering.
    pub spclust_wght: f64,
    pub init_threshold: f64,
    pub edge_threshold: f64,
    pub edge_wght: f64,
    pub edge_power: f64,
    pub edge_dissim_option: EdgeDissimOption,
    pub seam_edge_threshold: f64,
    pub min_nregions: usize,
    pub conv_nregions: usize,
    pub output_schedule: OutputSchedule,
    pub spclust_band: SpclustBand,
    pub rnb_levels: u32,
    pub ionb_levels: u32,
    pub seam_size: u32,

    pub gdissim_flag: bool,
    pub merge_accel_flag: bool,
    pub sort_flag: bool,
    pub random_init_seed_flag: bool,
    pub boundary_map_flag: bool,
    pub region_nb_objects_flag: bool,
    pub object_conn_type1: bool,
    pub region_sum_flag: bool,
    pub region_std_dev_flag: bool,
    pub region_boundary_npix_flag: bool,
    pub region_threshold_flag: bool,
    pub region_objects_list_flag: bool,
    pub complete_labeling_flag: bool,
    pub std_dev_wght: f64,
    /// Only consulted when `dissim_crit == BandSumMse` (spec §4.C "Numeric semantics").
    pub dissim_sqrt_flag: bool,

    /// Mask pixel value meaning "excluded" (spec §6). Default `0`.
    pub mask_value: u8,

    /// Number of threads for the `RayonDispatcher`. `None` = rayon default.
    pub threads: Option<usize>,

    /// Path to the input raster, as declared in the parameter file. Empty
    /// when `Params` is built via [`Default`] rather than [`crate::paramfile`].
    pub input_image: String,
    /// Path prefix for output artifacts (`<prefix>.oparams.json`, per-level
    /// record buffers, telemetry sidecar).
    pub output_prefix: String,
    pub mask_image: Option<String>,
    pub std_dev_image: Option<String>,
    pub edge_image: Option<String>,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            program_mode: ProgramMode::default(),
            dissim_crit: DissimCrit::default(),
            conn_type: 2,
            spclust_wght: 0.0,
            init_threshold: 0.0,
            edge_threshold: 0.0,
            edge_wght: 0.0,
            edge_power: 1.0,
            edge_dissim_option: EdgeDissimOption::Enhance,
            seam_edge_threshold: 0.05,
            min_nregions: 2,
            conv_nregions: 2,
            output_schedule: OutputSchedule::ConvergenceOnly,
            spclust_band: SpclustBand::default(),
            rnb_levels: 0,
            ionb_levels: 0,
            seam_size: 2,
            gdissim_flag: false,
            merge_accel_flag: false,
            sort_flag: true,
            random_init_seed_flag: false,
            boundary_map_flag: false,
            region_nb_objects_flag: false,
            object_conn_type1: false,
            region_sum_flag: false,
            region_std_dev_flag: false,
            region_boundary_npix_flag: false,
            region_threshold_flag: false,
            region_objects_list_flag: false,
            complete_labeling_flag: false,
            std_dev_wght: 0.0,
            dissim_sqrt_flag: false,
            mask_value: 0,
            threads: None,
            input_image: String::new(),
            output_prefix: String::new(),
            mask_image: None,
            std_dev_image: None,
            edge_image: None,
        }
    }
}

impl Params {
    /// Validate mutually-exclusive / required combinations (spec §7
    /// "Configuration errors").
    pub fn validate(&self) -> crate::error::HsegResult<()> {
        use crate::error::HsegError;

        if self.program_mode != ProgramMode::Hswo && self.spclust_wght < 0.0 {
            return Err(HsegError::config_error(
                "spclust_wght must be >= 0 when spectral clustering may run",
            ));
        }
        if self.spclust_wght > 1.0 {
            return Err(HsegError::config_error("spclust_wght must be <= 1.0"));
        }
        if self.spclust_band.min == 0 || self.spclust_band.min >= self.spclust_band.max {
            return Err(HsegError::config_error(
                "spclust_min must be > 0 and < spclust_max",
            ));
        }
        if self.edge_wght < 0.0 || self.edge_wght >= 1.0 {
            return Err(HsegError::config_error("edge_wght must be in [0.0, 1.0)"));
        }
        if matches!(self.edge_dissim_option, EdgeDissimOption::Suppress)
            && !self.spclust_enabled()
            && self.edge_wght > 0.0
        {
            // Spec §4.B: suppression is forbidden when spectral clustering is
            // disabled; an inert Suppress selection with edge_wght == 0 is harmless.
            return Err(HsegError::config_error(
                "edge suppression requires spectral clustering to be enabled",
            ));
        }
        if self.conv_nregions == 0 {
            return Err(HsegError::config_error("conv_nregions must be >= 1"));
        }
        if self.min_nregions < self.conv_nregions {
            return Err(HsegError::config_error(
                "min_nregions must be >= conv_nregions",
            ));
        }
        Ok(())
    }

    /// True when spectral (non-spatial) clustering merges are permitted at all.
    pub fn spclust_enabled(&self) -> bool {
        self.program_mode != ProgramMode::Hswo && self.spclust_wght > 0.0
    }
}
