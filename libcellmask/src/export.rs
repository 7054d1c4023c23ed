//! Transactional export of feature tables and ROI files.
//!
//! Every artifact is first written to a temporary file next to its
//! destination and only moved into place once all of them were staged.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{CellMaskError, Result};
use crate::features::FeatureRecord;
use crate::roi::RoiBoundary;

/// Columns preceding the per-channel intensity columns, without `roi_name`
pub const SHAPE_COLUMNS: [&str; 15] = [
    "area",
    "bbox_area",
    "area_convex",
    "perimeter",
    "perimeter_crofton",
    "eccentricity",
    "extent",
    "major_axis_length",
    "minor_axis_length",
    "equivalent_diameter",
    "feret_diameter_max",
    "orientation",
    "solidity",
    "centroid_y",
    "centroid_x",
];

/// How the feature table destination is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Refuse to touch an existing table
    #[default]
    CreateNew,
    /// Add rows to an existing table with an identical header
    Append,
}

/// Destinations of one save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    pub table_path: PathBuf,
    /// Folder receiving one `.roi` file per retained region
    pub roi_dir: Option<PathBuf>,
    /// Table listing the regions that were toggled out
    pub excluded_table_path: Option<PathBuf>,
    pub mode: WriteMode,
}

impl ExportOptions {
    pub fn new(table_path: impl Into<PathBuf>) -> Self {
        Self {
            table_path: table_path.into(),
            roi_dir: None,
            excluded_table_path: None,
            mode: WriteMode::CreateNew,
        }
    }

    pub fn with_roi_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.roi_dir = Some(dir.into());
        self
    }

    pub fn with_excluded_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.excluded_table_path = Some(path.into());
        self
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Everything one save writes
#[derive(Debug, Clone, Copy)]
pub struct ExportBatch<'a> {
    pub records: &'a [FeatureRecord],
    pub channel_names: &'a [String],
    pub boundaries: &'a [RoiBoundary],
    pub excluded: &'a [FeatureRecord],
}

/// What a successful save wrote
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub rows_written: usize,
    pub roi_files_written: usize,
    pub excluded_rows: usize,
    pub table_path: PathBuf,
    pub roi_dir: Option<PathBuf>,
    pub excluded_table_path: Option<PathBuf>,
}

/// Column names for a table with the given channels
pub fn table_header(channel_names: &[String], with_roi: bool) -> Vec<String> {
    let mut header = vec!["image_id".to_string(), "region_id".to_string()];
    if with_roi {
        header.push("roi_name".to_string());
    }
    header.push("condition".to_string());
    header.push("replicate".to_string());
    header.extend(SHAPE_COLUMNS.iter().map(|c| c.to_string()));

    for (i, name) in channel_names.iter().enumerate() {
        let suffix = if i == 0 {
            String::new()
        } else {
            format!("_{name}")
        };
        for stat in ["max_intensity", "mean_intensity", "min_intensity"] {
            header.push(format!("{stat}{suffix}"));
        }
    }
    header
}

fn record_row(record: &FeatureRecord, with_roi: bool) -> Vec<String> {
    let mut row = vec![record.image_id.clone(), record.region_id.to_string()];
    if with_roi {
        row.push(record.roi_name.clone().unwrap_or_default());
    }
    row.push(record.condition.clone());
    row.push(record.replicate.to_string());

    let shape = [
        record.area,
        record.bbox_area,
        record.area_convex,
        record.perimeter,
        record.perimeter_crofton,
        record.eccentricity,
        record.extent,
        record.major_axis_length,
        record.minor_axis_length,
        record.equivalent_diameter,
        record.feret_diameter_max,
        record.orientation,
        record.solidity,
        record.centroid_y,
        record.centroid_x,
    ];
    row.extend(shape.iter().map(f64::to_string));
    for channel in &record.intensities {
        row.push(channel.max.to_string());
        row.push(channel.mean.to_string());
        row.push(channel.min.to_string());
    }
    row
}

/// A staged artifact waiting to be moved into place
struct Staged {
    file: NamedTempFile,
    destination: PathBuf,
    /// Copy of the file being replaced, restored if the save is rolled back
    backup: Option<NamedTempFile>,
}

/// Writes one save as a single transaction
#[derive(Debug, Clone)]
pub struct ExportWriter {
    options: ExportOptions,
}

impl ExportWriter {
    pub fn new(options: ExportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Write the table, the optional excluded table and the optional ROI
    /// files. Either all of them land on disk or none does.
    pub fn write(&self, batch: &ExportBatch<'_>) -> Result<ExportSummary> {
        let with_roi = self.options.roi_dir.is_some();
        let header = table_header(batch.channel_names, with_roi);
        for record in batch.records.iter().chain(batch.excluded) {
            if record.intensities.len() != batch.channel_names.len() {
                return Err(CellMaskError::Configuration(format!(
                    "record {}/{} has {} intensity channels, table has {}",
                    record.image_id,
                    record.region_id,
                    record.intensities.len(),
                    batch.channel_names.len()
                )));
            }
        }

        let roi_targets = self.roi_targets(batch.boundaries)?;
        self.check_table(&self.options.table_path, &header)?;
        if let Some(path) = &self.options.excluded_table_path {
            self.check_table(path, &header)?;
        }

        let created_roi_dir = match &self.options.roi_dir {
            Some(dir) if !dir.exists() => {
                fs::create_dir_all(dir)?;
                Some(dir.clone())
            }
            _ => None,
        };

        let staged = self.stage(batch, &header, with_roi, &roi_targets);
        let result = staged.and_then(commit);
        if result.is_err() {
            if let Some(dir) = created_roi_dir {
                // Only removes the folder if nothing else landed in it
                let _ = fs::remove_dir(dir);
            }
        }
        result?;

        let summary = ExportSummary {
            rows_written: batch.records.len(),
            roi_files_written: roi_targets.len(),
            excluded_rows: if self.options.excluded_table_path.is_some() {
                batch.excluded.len()
            } else {
                0
            },
            table_path: self.options.table_path.clone(),
            roi_dir: self.options.roi_dir.clone(),
            excluded_table_path: self.options.excluded_table_path.clone(),
        };
        log::info!(
            "Wrote {} rows to {} ({} ROI files)",
            summary.rows_written,
            summary.table_path.display(),
            summary.roi_files_written
        );
        Ok(summary)
    }

    fn roi_targets(&self, boundaries: &[RoiBoundary]) -> Result<Vec<(PathBuf, Vec<u8>)>> {
        let Some(dir) = &self.options.roi_dir else {
            return Ok(Vec::new());
        };
        let mut seen = HashSet::with_capacity(boundaries.len());
        boundaries
            .iter()
            .map(|boundary| {
                let path = dir.join(boundary.file_name());
                if !seen.insert(path.clone()) {
                    return Err(CellMaskError::Configuration(format!(
                        "two regions of this save map to {}",
                        path.display()
                    )));
                }
                if path.exists() {
                    return Err(already_exists(&path));
                }
                Ok((path, boundary.encode()?))
            })
            .collect()
    }

    fn check_table(&self, path: &Path, header: &[String]) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        match self.options.mode {
            WriteMode::CreateNew => Err(already_exists(path)),
            WriteMode::Append => {
                let mut reader = csv::ReaderBuilder::new()
                    .has_headers(false)
                    .from_path(path)?;
                let mut existing = csv::StringRecord::new();
                if !reader.read_record(&mut existing)? {
                    return Ok(());
                }
                if existing.iter().ne(header.iter().map(String::as_str)) {
                    return Err(CellMaskError::Configuration(format!(
                        "{} has a different column layout",
                        path.display()
                    )));
                }
                Ok(())
            }
        }
    }

    fn stage(
        &self,
        batch: &ExportBatch<'_>,
        header: &[String],
        with_roi: bool,
        roi_targets: &[(PathBuf, Vec<u8>)],
    ) -> Result<Vec<Staged>> {
        let mut staged = Vec::new();

        for (path, bytes) in roi_targets {
            let mut file = temp_beside(path)?;
            file.write_all(bytes)?;
            file.flush()?;
            staged.push(Staged {
                file,
                destination: path.clone(),
                backup: None,
            });
        }

        if let Some(path) = &self.options.excluded_table_path {
            staged.push(self.stage_table(path, header, batch.excluded, with_roi)?);
        }
        // Last so that a commit failure never leaves a half-updated table
        staged.push(self.stage_table(
            &self.options.table_path,
            header,
            batch.records,
            with_roi,
        )?);
        Ok(staged)
    }

    fn stage_table(
        &self,
        path: &Path,
        header: &[String],
        records: &[FeatureRecord],
        with_roi: bool,
    ) -> Result<Staged> {
        let mut file = temp_beside(path)?;
        let backup = if self.options.mode == WriteMode::Append && path.exists() {
            let original = fs::read(path)?;
            let mut backup = temp_beside(path)?;
            backup.write_all(&original)?;
            backup.flush()?;

            let permissions = fs::metadata(path)?.permissions();
            fs::set_permissions(file.path(), permissions.clone())?;
            fs::set_permissions(backup.path(), permissions)?;

            file.write_all(&original)?;
            if original.last().is_some_and(|&byte| byte != b'\n') {
                file.write_all(b"\n")?;
            }
            Some((backup, !original.is_empty()))
        } else {
            None
        };
        let has_content = matches!(backup, Some((_, true)));

        {
            let mut writer = csv::Writer::from_writer(&mut file);
            if !has_content {
                writer.write_record(header)?;
            }
            for record in records {
                writer.write_record(record_row(record, with_roi))?;
            }
            writer.flush()?;
        }

        Ok(Staged {
            file,
            destination: path.to_path_buf(),
            backup: backup.map(|(backup, _)| backup),
        })
    }
}

fn temp_beside(path: &Path) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok(tempfile::Builder::new()
        .prefix(".cellmask-")
        .suffix(".tmp")
        .tempfile_in(dir)?)
}

/// Move staged files into place. If one fails, files created so far are
/// removed and replaced files get their previous content back.
fn commit(staged: Vec<Staged>) -> Result<()> {
    let mut created: Vec<PathBuf> = Vec::new();
    let mut replaced: Vec<(NamedTempFile, PathBuf)> = Vec::new();
    for Staged {
        file,
        destination,
        backup,
    } in staged
    {
        let persisted = if backup.is_some() {
            file.persist(&destination)
        } else {
            file.persist_noclobber(&destination)
        };
        if let Err(err) = persisted {
            rollback(&created, replaced);
            return Err(CellMaskError::Io(err.error));
        }
        match backup {
            Some(original) => replaced.push((original, destination)),
            None => created.push(destination),
        }
    }
    Ok(())
}

fn rollback(created: &[PathBuf], replaced: Vec<(NamedTempFile, PathBuf)>) {
    for path in created {
        let _ = fs::remove_file(path);
    }
    for (original, path) in replaced {
        if let Err(err) = original.persist(&path) {
            log::error!("Could not restore {}: {}", path.display(), err.error);
        }
    }
}

fn already_exists(path: &Path) -> CellMaskError {
    CellMaskError::Io(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("{} already exists", path.display()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged(path: &Path, content: &str, previous: Option<&str>) -> Staged {
        let mut file = temp_beside(path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let backup = previous.map(|previous| {
            let mut backup = temp_beside(path).unwrap();
            backup.write_all(previous.as_bytes()).unwrap();
            backup
        });
        Staged {
            file,
            destination: path.to_path_buf(),
            backup,
        }
    }

    #[test]
    fn test_failed_commit_restores_replaced_files() {
        let dir = tempfile::tempdir().unwrap();
        let roi = dir.path().join("a_label1.roi");
        let excluded = dir.path().join("excluded.csv");
        let table = dir.path().join("table.csv");
        fs::write(&excluded, "header\nold\n").unwrap();
        fs::write(&table, "taken").unwrap();

        let err = commit(vec![
            staged(&roi, "roi", None),
            staged(&excluded, "header\nold\nnew\n", Some("header\nold\n")),
            staged(&table, "header\nnew\n", None),
        ])
        .unwrap_err();

        assert!(matches!(err, CellMaskError::Io(_)));
        assert!(!roi.exists());
        assert_eq!(fs::read_to_string(&excluded).unwrap(), "header\nold\n");
        assert_eq!(fs::read_to_string(&table).unwrap(), "taken");
        // no temp files or backups left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_header_suffixes_extra_channels() {
        let names = vec!["marker".to_string(), "dapi".to_string()];
        let header = table_header(&names, true);
        assert_eq!(header[2], "roi_name");
        assert_eq!(header.len(), 2 + 1 + 2 + SHAPE_COLUMNS.len() + 6);
        assert_eq!(header[header.len() - 6], "max_intensity");
        assert_eq!(header[header.len() - 1], "min_intensity_dapi");
    }
}
