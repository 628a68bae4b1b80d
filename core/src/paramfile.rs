//! Text parameter file parser (spec §6 "Configuration (enumerated)").
//!
//! One `key = value` pair per line; `#` starts a comment; list-valued keys
//! (`hseg_out_nregions`, `hseg_out_thresholds`) are comma-separated.

use crate::config::{DissimCrit, EdgeDissimOption, OutputSchedule, Params, ProgramMode};
use crate::error::{HsegError, HsegResult};
use std::collections::HashMap;
use std::path::Path;

/// Parse a parameter file into a validated [`Params`].
pub fn load(path: &Path) -> HsegResult<Params> {
    let text = std::fs::read_to_string(path)?;
    parse(&text)
}

/// Parse parameter-file text (exposed separately so the CLI/tests can avoid
/// touching the filesystem).
pub fn parse(text: &str) -> HsegResult<Params> {
    let mut raw: HashMap<String, String> = HashMap::new();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(HsegError::config_error(format!("malformed parameter line: {line}")));
        };
        raw.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    let mut params = Params::default();

    if let Some(v) = raw.get("program_mode") {
        params.program_mode = match v.to_ascii_uppercase().as_str() {
            "HSWO" => ProgramMode::Hswo,
            "HSEG" => ProgramMode::Hseg,
            "RHSEG" => ProgramMode::Rhseg,
            other => return Err(HsegError::config_error(format!("unknown program_mode: {other}"))),
        };
    }
    if let Some(v) = raw.get("dissim_crit") {
        params.dissim_crit = parse_dissim_crit(v)?;
    }
    if let Some(v) = raw.get("conn_type") {
        params.conn_type = parse_num(v, "conn_type")?;
    }
    if let Some(v) = raw.get("spclust_wght") {
        params.spclust_wght = parse_num(v, "spclust_wght")?;
    } else if params.program_mode != ProgramMode::Hswo {
        return Err(HsegError::config_error("spclust_wght is required unless program_mode = HSWO"));
    }
    if let Some(v) = raw.get("init_threshold") {
        params.init_threshold = parse_num(v, "init_threshold")?;
    }
    if let Some(v) = raw.get("edge_threshold") {
        params.edge_threshold = parse_num(v, "edge_threshold")?;
    }
    if let Some(v) = raw.get("edge_wght") {
        params.edge_wght = parse_num(v, "edge_wght")?;
    }
    if let Some(v) = raw.get("edge_power") {
        params.edge_power = parse_num(v, "edge_power")?;
    }
    if let Some(v) = raw.get("edge_dissim_option") {
        params.edge_dissim_option = match v.to_ascii_lowercase().as_str() {
            "enhance" => EdgeDissimOption::Enhance,
            "suppress" => EdgeDissimOption::Suppress,
            other => return Err(HsegError::config_error(format!("unknown edge_dissim_option: {other}"))),
        };
    }
    if let Some(v) = raw.get("seam_edge_threshold") {
        params.seam_edge_threshold = parse_num(v, "seam_edge_threshold")?;
    }
    if let Some(v) = raw.get("min_nregions") {
        params.min_nregions = parse_num(v, "min_nregions")?;
    }
    if let Some(v) = raw.get("conv_nregions") {
        params.conv_nregions = parse_num(v, "conv_nregions")?;
    }
    if let Some(v) = raw.get("spclust_min") {
        params.spclust_band.min = parse_num(v, "spclust_min")?;
    }
    if let Some(v) = raw.get("spclust_max") {
        params.spclust_band.max = parse_num(v, "spclust_max")?;
    }
    if let Some(v) = raw.get("rnb_levels") {
        params.rnb_levels = parse_num(v, "rnb_levels")?;
    }
    if let Some(v) = raw.get("ionb_levels") {
        params.ionb_levels = parse_num(v, "ionb_levels")?;
    }
    if let Some(v) = raw.get("std_dev_wght") {
        params.std_dev_wght = parse_num(v, "std_dev_wght")?;
    }
    if let Some(v) = raw.get("mask_value") {
        params.mask_value = parse_num(v, "mask_value")?;
    }
    if let Some(v) = raw.get("input_image") {
        params.input_image = v.clone();
    } else {
        return Err(HsegError::config_error("input_image is required"));
    }
    if let Some(v) = raw.get("output_prefix") {
        params.output_prefix = v.clone();
    } else {
        return Err(HsegError::config_error("output_prefix is required"));
    }
    params.mask_image = raw.get("mask_image").cloned();
    params.std_dev_image = raw.get("std_dev_image").cloned();
    params.edge_image = raw.get("edge_image").cloned();

    params.output_schedule = parse_output_schedule(&raw)?;

    macro_rules! apply_flag {
        ($field:ident, $key:literal) => {
            if let Some(v) = raw.get($key) {
                params.$field = parse_bool(v, $key)?;
            }
        };
    }
    apply_flag!(gdissim_flag, "gdissim_flag");
    apply_flag!(merge_accel_flag, "merge_accel_flag");
    apply_flag!(sort_flag, "sort_flag");
    apply_flag!(random_init_seed_flag, "random_init_seed_flag");
    apply_flag!(boundary_map_flag, "boundary_map_flag");
    apply_flag!(region_nb_objects_flag, "region_nb_objects_flag");
    apply_flag!(object_conn_type1, "object_conn_type1");
    apply_flag!(region_sum_flag, "region_sum_flag");
    apply_flag!(region_std_dev_flag, "region_std_dev_flag");
    apply_flag!(region_boundary_npix_flag, "region_boundary_npix_flag");
    apply_flag!(region_threshold_flag, "region_threshold_flag");
    apply_flag!(region_objects_list_flag, "region_objects_list_flag");
    apply_flag!(complete_labeling_flag, "complete_labeling_flag");
    apply_flag!(dissim_sqrt_flag, "dissim_sqrt_flag");

    params.validate()?;
    Ok(params)
}

fn parse_output_schedule(raw: &HashMap<String, String>) -> HsegResult<OutputSchedule> {
    let has_chk = raw.contains_key("chk_nregions");
    let has_nregions_list = raw.contains_key("hseg_out_nregions");
    let has_thresholds_list = raw.contains_key("hseg_out_thresholds");

    let exclusive_count = [has_chk, has_nregions_list, has_thresholds_list]
        .iter()
        .filter(|&&x| x)
        .count();
    if exclusive_count > 1 {
        return Err(HsegError::config_error(
            "chk_nregions, hseg_out_nregions, and hseg_out_thresholds are mutually exclusive",
        ));
    }

    if has_chk {
        Ok(OutputSchedule::ByCount {
            chk_nregions: parse_num(&raw["chk_nregions"], "chk_nregions")?,
        })
    } else if has_nregions_list {
        Ok(OutputSchedule::ByNregionsList {
            nregions: parse_num_list(&raw["hseg_out_nregions"], "hseg_out_nregions")?,
        })
    } else if has_thresholds_list {
        Ok(OutputSchedule::ByThresholdsList {
            thresholds: parse_num_list(&raw["hseg_out_thresholds"], "hseg_out_thresholds")?,
        })
    } else {
        Ok(OutputSchedule::ConvergenceOnly)
    }
}

fn parse_dissim_crit(v: &str) -> HsegResult<DissimCrit> {
    Ok(match parse_num::<u8>(v, "dissim_crit")? {
        1 => DissimCrit::Norm1,
        2 => DissimCrit::Norm2,
        3 => DissimCrit::NormInf,
        4 => DissimCrit::SpectralAngle,
        5 => DissimCrit::SpectralInfoDivergence,
        6 => DissimCrit::BandSumMse,
        7 => DissimCrit::BandMaxMse,
        8 => DissimCrit::NormalizedVector,
        9 => DissimCrit::Entropy,
        10 => DissimCrit::SarSpeckle,
        other => return Err(HsegError::config_error(format!("dissim_crit must be 1..10, got {other}"))),
    })
}

fn parse_num<T: std::str::FromStr>(v: &str, field: &str) -> HsegResult<T> {
    v.trim()
        .parse()
        .map_err(|_| HsegError::config_error(format!("invalid value for {field}: {v}")))
}

fn parse_num_list<T: std::str::FromStr>(v: &str, field: &str) -> HsegResult<Vec<T>> {
    v.split(',').map(|s| parse_num(s.trim(), field)).collect()
}

fn parse_bool(v: &str, field: &str) -> HsegResult<bool> {
    match v.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(HsegError::config_error(format!("invalid boolean for {field}: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_parameter_file() {
        let text = "\
            program_mode = HSEG\n\
            dissim_crit = 6\n\
            spclust_wght = 0.1\n\
            conv_nregions = 4\n\
            min_nregions = 4\n\
            input_image = scene.raw\n\
            output_prefix = out/scene\n\
        ";
        let params = parse(text).unwrap();
        assert_eq!(params.program_mode, ProgramMode::Hseg);
        assert_eq!(params.dissim_crit, DissimCrit::BandSumMse);
        assert!((params.spclust_wght - 0.1).abs() < 1e-12);
        assert_eq!(params.input_image, "scene.raw");
        assert_eq!(params.output_prefix, "out/scene");
    }

    #[test]
    fn rejects_conflicting_output_schedule_keys() {
        let text = "\
            spclust_wght = 0.1\n\
            chk_nregions = 100\n\
            hseg_out_nregions = 10,5,2\n\
        ";
        assert!(parse(text).is_err());
    }

    #[test]
    fn parses_explicit_threshold_list() {
        let text = "\
            spclust_wght = 0.0\n\
            hseg_out_thresholds = 1.0, 2.5, 10.0\n\
            input_image = scene.raw\n\
            output_prefix = out/scene\n\
        ";
        let params = parse(text).unwrap();
        match params.output_schedule {
            OutputSchedule::ByThresholdsList { thresholds } => {
                assert_eq!(thresholds, vec![1.0, 2.5, 10.0]);
            }
            _ => panic!("expected ByThresholdsList"),
        }
    }

    #[test]
    fn rejects_out_of_range_dissim_crit() {
        let text = "spclust_wght = 0.0\ndissim_crit = 99\n";
        assert!(parse(text).is_err());
    }
}
