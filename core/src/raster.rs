//! `ImageIO` collaborator (spec §6), grounded in a concrete `RasterImage`
//! type: banded `f64` storage. `depth` is carried in the type and validated
//! here, but the segmentation engine itself (`Tiler`/`Driver`) is 2-D only —
//! a `depth > 1` raster is rejected by `driver::run` before it ever reaches
//! the tiling/connectivity machinery. Two loaders ship: a generic flat
//! band-interleaved binary format with a JSON sidecar header (for
//! multi-band rasters the `image` crate cannot represent), and an
//! `image`-crate-backed loader for ordinary 2-D 8-bit PNG/TIFF imagery.

use crate::error::{HsegError, HsegResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A loaded raster: `bands` planes of `width * height * depth` `f64` samples
/// each, row-major within a plane, planes stacked slice-major for 3-D.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub bands: Vec<Vec<f64>>,
}

impl RasterImage {
    pub fn pixel_count(&self) -> usize {
        self.width * self.height * self.depth
    }

    pub fn is_3d(&self) -> bool {
        self.depth > 1
    }

    pub fn validate(&self) -> HsegResult<()> {
        let n = self.pixel_count();
        if n == 0 {
            return Err(HsegError::dimension_error("raster has zero pixels"));
        }
        for (i, band) in self.bands.iter().enumerate() {
            if band.len() != n {
                return Err(HsegError::dimension_error(format!(
                    "band {i} has {} samples, expected {n}",
                )));
            }
        }
        Ok(())
    }

    /// Feature vector for pixel `p`, one entry per band.
    pub fn features_at(&self, p: usize) -> Vec<f64> {
        self.bands.iter().map(|band| band[p]).collect()
    }

    /// Per-band minimum over the whole image (spec §9: used for the
    /// sort-by-distance-from-minimum-vector final renumbering).
    pub fn per_band_minimum(&self) -> Vec<f64> {
        self.bands
            .iter()
            .map(|band| band.iter().cloned().fold(f64::INFINITY, f64::min))
            .collect()
    }
}

/// Sidecar header for the generic flat binary raster format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterHeader {
    pub width: usize,
    pub height: usize,
    #[serde(default = "one")]
    pub depth: usize,
    pub bands: usize,
}

fn one() -> usize {
    1
}

/// Load a band-interleaved flat binary raster plus its JSON sidecar header.
/// Element type on disk is always little-endian `f64`; callers that need
/// integer promotion handle it before writing the sidecar.
pub fn load_raw(header_path: &Path, data_path: &Path) -> HsegResult<RasterImage> {
    let header_text = std::fs::read_to_string(header_path)?;
    let header: RasterHeader = serde_json::from_str(&header_text)?;
    let bytes = std::fs::read(data_path)?;

    let n = header.width * header.height * header.depth;
    let expected_bytes = n * header.bands * std::mem::size_of::<f64>();
    if bytes.len() != expected_bytes {
        return Err(HsegError::dimension_error(format!(
            "raster data is {} bytes, expected {expected_bytes}",
            bytes.len()
        )));
    }

    let mut bands = vec![Vec::with_capacity(n); header.bands];
    let mut offset = 0;
    for p in 0..n {
        for band in bands.iter_mut() {
            let v = f64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
            band.push(v);
            offset += 8;
        }
        let _ = p;
    }

    let raster = RasterImage {
        width: header.width,
        height: header.height,
        depth: header.depth,
        bands,
    };
    raster.validate()?;
    Ok(raster)
}

/// Load an ordinary 2-D image (PNG/TIFF) via the `image` crate, treating it
/// as a 1-, 3-, or 4-band `u8` raster promoted to `f64`.
pub fn load_image(path: &Path) -> HsegResult<RasterImage> {
    let img = image::open(path)?;
    let (width, height) = (img.width() as usize, img.height() as usize);
    let rgba = img.to_rgba8();
    let channels = if is_grayscale(&rgba) { 1 } else { 4 };

    let mut bands = vec![Vec::with_capacity(width * height); channels];
    for pixel in rgba.pixels() {
        if channels == 1 {
            bands[0].push(pixel[0] as f64);
        } else {
            for (band, &v) in bands.iter_mut().zip(pixel.0.iter()) {
                band.push(v as f64);
            }
        }
    }

    let raster = RasterImage { width, height, depth: 1, bands };
    raster.validate()?;
    Ok(raster)
}

fn is_grayscale(rgba: &image::RgbaImage) -> bool {
    rgba.pixels().all(|p| p[0] == p[1] && p[1] == p[2] && p[3] == 255)
}

/// Write a region-class label map as a raw band-interleaved `i32` raster
/// (spec §6 "Region-class label map: 32-bit integer").
pub fn write_label_map(path: &Path, labels: &[u32], width: usize, height: usize) -> HsegResult<()> {
    let _ = (width, height);
    let mut bytes = Vec::with_capacity(labels.len() * 4);
    for &l in labels {
        bytes.extend_from_slice(&(l as i32).to_le_bytes());
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Write the per-pixel boundary map as a raw 16-bit integer raster (spec §6
/// "Boundary map (optional): 16-bit integer; value = highest level at which
/// the pixel was on a region boundary").
pub fn write_boundary_map(path: &Path, boundary_map: &[u16]) -> HsegResult<()> {
    let mut bytes = Vec::with_capacity(boundary_map.len() * 2);
    for &v in boundary_map {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Optional grayscale PNG debug preview of a 2-D 1-band label map; never the
/// canonical output format (spec §6 [SUPPLEMENT]).
pub fn write_label_preview_png(path: &Path, labels: &[u32], width: usize, height: usize) -> HsegResult<()> {
    let max_label = labels.iter().cloned().max().unwrap_or(1).max(1);
    let mut img = image::GrayImage::new(width as u32, height as u32);
    for (p, &l) in labels.iter().enumerate() {
        let x = (p % width) as u32;
        let y = (p / width) as u32;
        let shade = ((l as f64 / max_label as f64) * 255.0) as u8;
        img.put_pixel(x, y, image::Luma([shade]));
    }
    img.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_raster_round_trips_through_header_and_data_files() {
        let dir = tempfile::tempdir().unwrap();
        let header_path = dir.path().join("header.json");
        let data_path = dir.path().join("data.bin");

        let header = RasterHeader { width: 2, height: 2, depth: 1, bands: 2 };
        std::fs::write(&header_path, serde_json::to_string(&header).unwrap()).unwrap();

        let mut bytes = Vec::new();
        for p in 0..4u32 {
            bytes.extend_from_slice(&(p as f64).to_le_bytes());
            bytes.extend_from_slice(&((p as f64) * 10.0).to_le_bytes());
        }
        std::fs::write(&data_path, bytes).unwrap();

        let raster = load_raw(&header_path, &data_path).unwrap();
        assert_eq!(raster.bands.len(), 2);
        assert_eq!(raster.bands[0], vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(raster.bands[1], vec![0.0, 10.0, 20.0, 30.0]);
    }

    #[test]
    fn per_band_minimum_is_computed_across_the_whole_image() {
        let raster = RasterImage {
            width: 2,
            height: 1,
            depth: 1,
            bands: vec![vec![5.0, -3.0]],
        };
        assert_eq!(raster.per_band_minimum(), vec![-3.0]);
    }

    #[test]
    fn validate_rejects_mismatched_band_length() {
        let raster = RasterImage {
            width: 2,
            height: 2,
            depth: 1,
            bands: vec![vec![0.0, 1.0]],
        };
        assert!(raster.validate().is_err());
    }
}
