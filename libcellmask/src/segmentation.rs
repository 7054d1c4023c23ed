//! Initial label masks: the segmentation model seam, a built-in threshold
//! fallback and the post-segmentation cell filter.

use image::{ImageBuffer, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::error::{CellMaskError, Result};
use crate::features::{IntensityChannel, IntensityImage};
use crate::label::{LabelMatrix, RegionIndex};

/// Parameters forwarded unmodified to the segmentation model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub model: String,
    /// Expected cell diameter in microns
    pub diameter: f64,
    pub flow_threshold: f64,
    pub intensity_threshold: f64,
    /// Minimum cell area in square microns
    pub min_area: f64,
    /// Minimum fraction of pixels above `intensity_threshold`, in percent
    pub min_coverage: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model: "cyto3".to_string(),
            diameter: 22.0,
            flow_threshold: 0.4,
            intensity_threshold: 62.0,
            min_area: 0.0,
            min_coverage: 5.0,
        }
    }
}

impl ModelParams {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(CellMaskError::Configuration(
                "model name must not be empty".to_string(),
            ));
        }
        let finite = [
            ("diameter", self.diameter),
            ("flow_threshold", self.flow_threshold),
            ("intensity_threshold", self.intensity_threshold),
            ("min_area", self.min_area),
            ("min_coverage", self.min_coverage),
        ];
        for (name, value) in finite {
            if !value.is_finite() || value < 0.0 {
                return Err(CellMaskError::Configuration(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.min_coverage > 100.0 {
            return Err(CellMaskError::Configuration(format!(
                "min_coverage is a percentage, got {}",
                self.min_coverage
            )));
        }
        Ok(())
    }
}

/// Produces the initial label matrix of one image.
///
/// Implementations must only return fully built matrices; the session
/// installs whatever comes back as is.
pub trait Segmenter {
    fn name(&self) -> &str;

    fn segment(&self, image: &IntensityImage, params: &ModelParams) -> Result<LabelMatrix>;
}

/// Connected components of the first-channel pixels brighter than the
/// intensity threshold
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdSegmenter;

impl ThresholdSegmenter {
    pub fn new() -> Self {
        Self
    }
}

impl Segmenter for ThresholdSegmenter {
    fn name(&self) -> &str {
        "threshold"
    }

    fn segment(&self, image: &IntensityImage, params: &ModelParams) -> Result<LabelMatrix> {
        let channel = image.channel(0).ok_or_else(|| {
            CellMaskError::Configuration("image to segment has no channels".to_string())
        })?;
        let (width, height) = channel.dimensions();
        let threshold = params.intensity_threshold as f32;

        let foreground: ImageBuffer<Luma<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
                let value = channel.values()[[y as usize, x as usize]];
                Luma([u8::from(value > threshold)])
            });
        let labelled = connected_components(&foreground, Connectivity::Eight, Luma([0u8]));

        let matrix = LabelMatrix::from_luma32(&labelled)?;
        log::debug!(
            "{} segmentation found {} regions",
            self.name(),
            matrix.max_label()
        );
        Ok(matrix)
    }
}

/// Check whether enough of an image is brighter than `threshold` to be worth
/// segmenting. `min_percentage` is in percent of the image area.
pub fn has_sufficient_signal(channel: &IntensityChannel, threshold: f64, min_percentage: f64) -> bool {
    let total = channel.values().len();
    let bright = channel
        .values()
        .iter()
        .filter(|&&value| f64::from(value) > threshold)
        .count();
    bright as f64 >= min_percentage / 100.0 * total as f64
}

/// Cleans a raw segmentation into the cells that are analysed
#[derive(Debug, Clone, Default)]
pub struct CellFilter {
    config: FilterConfig,
}

impl CellFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Relabel 8-connected components, then drop border cells, cells at or
    /// under the minimum area and cells without enough nucleus signal.
    /// Survivors are numbered from 1 in scan order.
    pub fn apply(
        &self,
        matrix: &LabelMatrix,
        ratio: f64,
        nucleus: Option<&IntensityChannel>,
    ) -> Result<LabelMatrix> {
        if self.config.min_area > 0.0 && !(ratio > 0.0 && ratio.is_finite()) {
            return Err(CellMaskError::Configuration(format!(
                "min_area of {} square microns needs a positive pixel-to-micron ratio, got {ratio}",
                self.config.min_area
            )));
        }

        let components = connected_components(
            &matrix.to_luma32(),
            Connectivity::Eight,
            Luma([0u32]),
        );
        let relabelled = LabelMatrix::from_luma32(&components)?;
        let (width, height) = relabelled.dimensions();

        if let (Some(channel), Some(_)) = (nucleus, &self.config.nucleus) {
            if channel.dimensions() != (width, height) {
                return Err(CellMaskError::DimensionMismatch {
                    expected: (width, height),
                    actual: channel.dimensions(),
                });
            }
        }

        let min_pixels = if self.config.min_area > 0.0 {
            self.config.min_area / (ratio * ratio)
        } else {
            0.0
        };

        let mut labels = Array2::<u32>::zeros((height, width));
        let mut next_id = 1;
        let mut dropped = 0;
        for region in RegionIndex::build(&relabelled).iter() {
            let touches_border = region.pixels.iter().any(|p| {
                p.x == 0 || p.y == 0 || p.x as usize == width - 1 || p.y as usize == height - 1
            });
            let large_enough = region.area() as f64 > min_pixels;
            let nucleus_ok = match (&self.config.nucleus, nucleus) {
                (Some(requirement), Some(channel)) => {
                    let bright = region
                        .pixels
                        .iter()
                        .filter(|&&p| f64::from(channel.value_at(p)) >= requirement.threshold)
                        .count();
                    bright as f64 >= requirement.min_percentage / 100.0 * region.area() as f64
                }
                _ => true,
            };

            if (self.config.clear_border && touches_border) || !large_enough || !nucleus_ok {
                dropped += 1;
                continue;
            }
            for pixel in &region.pixels {
                labels[[pixel.y as usize, pixel.x as usize]] = next_id;
            }
            next_id += 1;
        }

        log::debug!("Cell filter kept {} regions, dropped {}", next_id - 1, dropped);
        LabelMatrix::from_array(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_fraction() {
        let values = Array2::from_shape_fn((10, 10), |(y, _)| if y == 0 { 100.0 } else { 0.0 });
        let channel = IntensityChannel::new("marker", values);
        assert!(has_sufficient_signal(&channel, 62.0, 10.0));
        assert!(!has_sufficient_signal(&channel, 62.0, 10.5));
    }

    #[test]
    fn test_min_area_needs_positive_ratio() {
        let matrix = LabelMatrix::from_rows(&[
            vec![0, 0, 0, 0],
            vec![0, 1, 1, 0],
            vec![0, 0, 0, 0],
        ])
        .unwrap();
        let filter = CellFilter::new(FilterConfig {
            min_area: 1.0,
            ..FilterConfig::default()
        });
        let err = filter.apply(&matrix, 0.0, None).unwrap_err();
        assert!(err.is_configuration());

        // without an area limit a zero ratio is harmless
        let kept = CellFilter::default().apply(&matrix, 0.0, None).unwrap();
        assert_eq!(kept.max_label(), 1);
        let kept = filter.apply(&matrix, 1.0, None).unwrap();
        assert_eq!(kept.pixel_count(1), 2);
    }

    #[test]
    fn test_default_params_are_valid() {
        assert!(ModelParams::default().validate().is_ok());
        let params = ModelParams {
            min_coverage: 120.0,
            ..ModelParams::default()
        };
        assert!(params.validate().is_err());
    }
}
