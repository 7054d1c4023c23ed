use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CellMaskError, Result};
use crate::export::{ExportOptions, WriteMode};
use crate::features::{validate_ratio, RecordMetadata};
use crate::segmentation::ModelParams;

/// Measurement settings applied to every image of a save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Microns per pixel
    pub pixel_to_micron: f64,
    #[serde(default)]
    pub condition: String,
    #[serde(default = "default_replicate")]
    pub replicate: u32,
}

fn default_replicate() -> u32 {
    1
}

impl AnalysisConfig {
    pub fn new(pixel_to_micron: f64) -> Self {
        Self {
            pixel_to_micron,
            condition: String::new(),
            replicate: default_replicate(),
        }
    }

    pub fn metadata(&self) -> RecordMetadata {
        RecordMetadata {
            condition: self.condition.clone(),
            replicate: self.replicate,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_ratio(self.pixel_to_micron)
    }
}

/// Output names of a save, relative to an output directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Table file name; `.csv` is appended when missing
    pub table_name: String,
    /// Folder for ROI files, `None` to skip ROI export
    #[serde(default)]
    pub roi_folder: Option<String>,
    /// Table name for toggled-out regions
    #[serde(default)]
    pub excluded_table_name: Option<String>,
    #[serde(default)]
    pub mode: WriteMode,
}

impl ExportConfig {
    pub fn validate(&self) -> Result<()> {
        validate_name("table_name", &self.table_name)?;
        if let Some(folder) = &self.roi_folder {
            validate_name("roi_folder", folder)?;
        }
        if let Some(name) = &self.excluded_table_name {
            validate_name("excluded_table_name", name)?;
            if csv_name(name) == csv_name(&self.table_name) {
                return Err(CellMaskError::Configuration(
                    "excluded table must not share the table name".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Resolve the configured names inside `dir`
    pub fn options(&self, dir: &Path) -> ExportOptions {
        ExportOptions {
            table_path: dir.join(csv_name(&self.table_name)),
            roi_dir: self.roi_folder.as_ref().map(|folder| dir.join(folder)),
            excluded_table_path: self
                .excluded_table_name
                .as_ref()
                .map(|name| dir.join(csv_name(name))),
            mode: self.mode,
        }
    }
}

fn csv_name(name: &str) -> String {
    if name.to_ascii_lowercase().ends_with(".csv") {
        name.to_string()
    } else {
        format!("{name}.csv")
    }
}

fn validate_name(field: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CellMaskError::Configuration(format!("{field} must not be empty")));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(CellMaskError::Configuration(format!(
            "{field} must be a plain name, got '{name}'"
        )));
    }
    Ok(())
}

/// Nucleus signal a cell must contain to be kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NucleusRequirement {
    /// Pixels at or above this value count as nucleus
    pub threshold: f64,
    /// Required share of nucleus pixels inside the cell, in percent
    pub min_percentage: f64,
}

/// Post-segmentation filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub clear_border: bool,
    /// Cells must be strictly larger than this, in square microns
    pub min_area: f64,
    pub nucleus: Option<NucleusRequirement>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            clear_border: true,
            min_area: 0.0,
            nucleus: None,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.min_area.is_finite() || self.min_area < 0.0 {
            return Err(CellMaskError::Configuration(format!(
                "min_area must be a non-negative number, got {}",
                self.min_area
            )));
        }
        if let Some(nucleus) = &self.nucleus {
            if !(0.0..=100.0).contains(&nucleus.min_percentage) {
                return Err(CellMaskError::Configuration(format!(
                    "nucleus min_percentage must be within [0, 100], got {}",
                    nucleus.min_percentage
                )));
            }
            if !nucleus.threshold.is_finite() {
                return Err(CellMaskError::Configuration(
                    "nucleus threshold must be finite".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// One image of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub id: String,
    /// Raw channel files; the first one is segmented
    pub channels: Vec<PathBuf>,
    /// Pre-computed label mask, used instead of segmenting
    #[serde(default)]
    pub mask: Option<PathBuf>,
    /// Index into `channels` of the nucleus stain
    #[serde(default)]
    pub nucleus_channel: Option<usize>,
}

/// Full description of a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub images: Vec<ImageSpec>,
    /// Column names of the channels; defaults to `channel<N>`
    #[serde(default)]
    pub channel_names: Vec<String>,
    pub analysis: AnalysisConfig,
    pub export: ExportConfig,
    #[serde(default)]
    pub model: ModelParams,
    #[serde(default)]
    pub filter: FilterConfig,
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        self.analysis.validate()?;
        self.export.validate()?;
        self.model.validate()?;
        self.filter.validate()?;
        if self.filter.min_area > 0.0 && self.analysis.pixel_to_micron == 0.0 {
            return Err(CellMaskError::Configuration(
                "filter min_area needs a non-zero pixel_to_micron".to_string(),
            ));
        }

        if self.images.is_empty() {
            return Err(CellMaskError::Configuration(
                "batch has no images".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for image in &self.images {
            if !seen.insert(image.id.as_str()) {
                return Err(CellMaskError::Configuration(format!(
                    "image id '{}' listed twice",
                    image.id
                )));
            }
            if image.channels.is_empty() {
                return Err(CellMaskError::Configuration(format!(
                    "image '{}' has no channels",
                    image.id
                )));
            }
            if !self.channel_names.is_empty() && self.channel_names.len() != image.channels.len() {
                return Err(CellMaskError::Configuration(format!(
                    "image '{}' has {} channels, {} channel names configured",
                    image.id,
                    image.channels.len(),
                    self.channel_names.len()
                )));
            }
            if let Some(index) = image.nucleus_channel {
                if index >= image.channels.len() {
                    return Err(CellMaskError::Configuration(format!(
                        "image '{}' nucleus channel {} out of range",
                        image.id, index
                    )));
                }
            }
        }
        Ok(())
    }

    /// Name of channel `index`
    pub fn channel_name(&self, index: usize) -> String {
        self.channel_names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("channel{index}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_names_resolve() {
        let config = ExportConfig {
            table_name: "run1".to_string(),
            roi_folder: Some("rois".to_string()),
            excluded_table_name: Some("run1_excluded.csv".to_string()),
            mode: WriteMode::CreateNew,
        };
        config.validate().unwrap();
        let options = config.options(Path::new("/data/out"));
        assert_eq!(options.table_path, PathBuf::from("/data/out/run1.csv"));
        assert_eq!(options.roi_dir, Some(PathBuf::from("/data/out/rois")));
    }

    #[test]
    fn test_rejects_path_like_names() {
        let config = ExportConfig {
            table_name: "../run1".to_string(),
            roi_folder: None,
            excluded_table_name: None,
            mode: WriteMode::Append,
        };
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_area_filter_needs_ratio() {
        let mut config = BatchConfig {
            images: vec![ImageSpec {
                id: "a.tif".to_string(),
                channels: vec![PathBuf::from("a.tif")],
                mask: None,
                nucleus_channel: None,
            }],
            channel_names: Vec::new(),
            analysis: AnalysisConfig::new(0.0),
            export: ExportConfig {
                table_name: "run".to_string(),
                roi_folder: None,
                excluded_table_name: None,
                mode: WriteMode::CreateNew,
            },
            model: ModelParams::default(),
            filter: FilterConfig {
                min_area: 10.0,
                ..FilterConfig::default()
            },
        };
        assert!(config.validate().unwrap_err().is_configuration());
        config.analysis = AnalysisConfig::new(0.5);
        config.validate().unwrap();
    }
}
