#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::doc_markdown,
    clippy::uninlined_format_args,
    clippy::match_same_arms,
    clippy::needless_pass_by_value,
    clippy::cast_possible_truncation
)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use cellmask::config::ImageSpec;
use cellmask::segmentation::has_sufficient_signal;
use cellmask::{
    BatchConfig, CellFilter, CellMaskError, EditCommand, IntensityChannel, IntensityImage,
    LabelMatrix, RegionIndex, Segmenter, SessionState, ThresholdSegmenter,
};

/// Cellmask CLI tools
#[derive(Parser)]
#[command(name = "cellmask")]
#[command(about = "Cellmask CLI tools - segment, correct and measure cell masks")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment, edit and export a batch of images
    Process {
        /// Batch configuration (toml, json or yaml)
        config: PathBuf,
        /// Output directory for the tables and ROI folder
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
        /// JSON list of edits to replay before saving
        #[arg(short, long)]
        edits: Option<PathBuf>,
    },
    /// Summarize the regions of a label mask
    Inspect {
        /// Label mask image (8 or 16-bit grayscale)
        mask: PathBuf,
        /// Output format (json, yaml, toml)
        #[arg(short, long, default_value = "json")]
        format: InspectFormat,
        /// Pretty print output
        #[arg(short, long)]
        pretty: bool,
    },
    /// Validate a batch configuration without processing it
    Validate {
        /// Batch configuration (toml, json or yaml)
        config: PathBuf,
        /// Also check that every referenced image file exists
        #[arg(long)]
        check_files: bool,
    },
}

#[derive(clap::ValueEnum, Clone)]
enum InspectFormat {
    Json,
    Yaml,
    Toml,
}

/// One entry of an edit script
#[derive(Debug, Deserialize)]
struct ScriptedEdit {
    image: String,
    #[serde(flatten)]
    command: EditCommand,
}

#[derive(Serialize)]
struct MaskSummary {
    file: String,
    width: usize,
    height: usize,
    region_count: usize,
    max_label: u32,
    regions: Vec<RegionSummary>,
}

#[derive(Serialize)]
struct RegionSummary {
    id: u32,
    area: usize,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.quiet {
        log::LevelFilter::Error
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Err(e) = run(args) {
        error!("Command failed: {:#}", e);

        // Map to appropriate exit codes
        let exit_code = match e.downcast_ref::<CellMaskError>() {
            Some(err) if err.is_configuration() => 3,
            Some(CellMaskError::Io(_)) => 4,
            Some(err) if err.is_recoverable() => 1,
            _ => 2,
        };

        process::exit(exit_code);
    }
}

fn run(args: Args) -> Result<()> {
    let quiet = args.quiet;
    match args.command {
        Commands::Process {
            config,
            output_dir,
            edits,
        } => cmd_process(config, output_dir, edits, quiet),
        Commands::Inspect {
            mask,
            format,
            pretty,
        } => cmd_inspect(mask, format, pretty),
        Commands::Validate {
            config,
            check_files,
        } => cmd_validate(config, check_files),
    }
}

fn cmd_process(
    config_path: PathBuf,
    output_dir: PathBuf,
    edits: Option<PathBuf>,
    quiet: bool,
) -> Result<()> {
    let config = load_config(&config_path)?;
    config.validate()?;
    let base = config_path.parent().unwrap_or_else(|| Path::new("."));

    let script = edits.map(|path| load_edits(&path)).transpose()?;

    let segmenter = ThresholdSegmenter::new();
    let filter = CellFilter::new(config.filter.clone());
    let mut session = SessionState::new();

    let progress = if quiet {
        None
    } else {
        Some(create_progress_bar(config.images.len() as u64))
    };

    for spec in &config.images {
        if let Some(ref pb) = progress {
            pb.set_message(spec.id.clone());
        }

        let channels = load_channels(&config, spec, base)?;
        let mask = match &spec.mask {
            Some(path) => load_mask(&base.join(path))?,
            None => {
                let first = channels
                    .channel(0)
                    .context("image has no channels")?;
                if !has_sufficient_signal(
                    first,
                    config.model.intensity_threshold,
                    config.model.min_coverage,
                ) {
                    warn!("Skipping '{}': not enough signal to segment", spec.id);
                    if let Some(ref pb) = progress {
                        pb.inc(1);
                    }
                    continue;
                }
                segmenter.segment(&channels, &config.model)?
            }
        };

        let nucleus = spec.nucleus_channel.and_then(|index| channels.channel(index));
        let filtered = filter.apply(&mask, config.analysis.pixel_to_micron, nucleus)?;
        session.install(spec.id.clone(), filtered, channels)?;

        if let Some(ref pb) = progress {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress {
        pb.finish_with_message("segmentation complete");
    }

    if let Some(script) = script {
        replay_edits(&mut session, script)?;
    }

    fs::create_dir_all(&output_dir)?;
    let options = config.export.options(&output_dir);
    let summary = cellmask::save(&session, &config.analysis, &options)?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn cmd_inspect(mask: PathBuf, format: InspectFormat, pretty: bool) -> Result<()> {
    info!("Inspecting {}", mask.display());

    let matrix = load_mask(&mask)?;
    let index = RegionIndex::build(&matrix);
    let regions = index
        .iter()
        .filter_map(|region| {
            region.bounds().map(|bounds| RegionSummary {
                id: region.id,
                area: region.area(),
                min_x: bounds.min_x,
                min_y: bounds.min_y,
                max_x: bounds.max_x,
                max_y: bounds.max_y,
            })
        })
        .collect();

    let summary = MaskSummary {
        file: mask.display().to_string(),
        width: matrix.width(),
        height: matrix.height(),
        region_count: index.len(),
        max_label: matrix.max_label(),
        regions,
    };

    let output = match format {
        InspectFormat::Json => {
            if pretty {
                serde_json::to_string_pretty(&summary)?
            } else {
                serde_json::to_string(&summary)?
            }
        }
        InspectFormat::Yaml => serde_yaml::to_string(&summary)?,
        InspectFormat::Toml => toml::to_string_pretty(&summary)?,
    };

    println!("{}", output);
    Ok(())
}

fn cmd_validate(config_path: PathBuf, check_files: bool) -> Result<()> {
    info!("Validating {}", config_path.display());

    let config = load_config(&config_path)?;
    config.validate()?;
    info!("✓ Configuration validation passed");

    if check_files {
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        for spec in &config.images {
            for path in spec.channels.iter().chain(spec.mask.iter()) {
                let resolved = base.join(path);
                if !resolved.is_file() {
                    anyhow::bail!(
                        "Image '{}' references missing file {}",
                        spec.id,
                        resolved.display()
                    );
                }
            }
        }
        info!("✓ All {} images have their files", config.images.len());
    }

    info!("Validation completed successfully");
    Ok(())
}

fn load_config(path: &Path) -> Result<BatchConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let config = match extension.as_deref() {
        Some("toml") => toml::from_str(&text)?,
        Some("json") => serde_json::from_str(&text)?,
        Some("yaml" | "yml") => serde_yaml::from_str(&text)?,
        _ => anyhow::bail!(
            "Unsupported configuration format: {} (expected .toml, .json or .yaml)",
            path.display()
        ),
    };
    Ok(config)
}

fn load_edits(path: &Path) -> Result<Vec<ScriptedEdit>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let edits: Vec<ScriptedEdit> = serde_json::from_str(&text)
        .with_context(|| format!("parsing edit script {}", path.display()))?;
    info!("Loaded {} edits from {}", edits.len(), path.display());
    Ok(edits)
}

fn load_channels(config: &BatchConfig, spec: &ImageSpec, base: &Path) -> Result<IntensityImage> {
    let channels = spec
        .channels
        .iter()
        .enumerate()
        .map(|(index, path)| {
            let resolved = base.join(path);
            let image = image::open(&resolved)
                .with_context(|| format!("opening {}", resolved.display()))?;
            Ok(IntensityChannel::from_dynamic(config.channel_name(index), &image))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(IntensityImage::new(channels)?)
}

fn load_mask(path: &Path) -> Result<LabelMatrix> {
    let image = image::open(path).with_context(|| format!("opening {}", path.display()))?;
    let matrix = match image {
        image::DynamicImage::ImageLuma16(buffer) => LabelMatrix::from_luma16(&buffer)?,
        image::DynamicImage::ImageLuma8(buffer) => {
            let widened = image::ImageBuffer::from_fn(buffer.width(), buffer.height(), |x, y| {
                image::Luma([u16::from(buffer.get_pixel(x, y)[0])])
            });
            LabelMatrix::from_luma16(&widened)?
        }
        other => anyhow::bail!(
            "Mask {} must be 8 or 16-bit grayscale, found {:?}",
            path.display(),
            other.color()
        ),
    };
    Ok(matrix)
}

fn replay_edits(session: &mut SessionState, script: Vec<ScriptedEdit>) -> Result<()> {
    let mut applied = 0;
    for edit in script {
        let Some(index) = session.index_of(&edit.image) else {
            warn!("Edit for unknown or skipped image '{}' ignored", edit.image);
            continue;
        };
        match session.apply(index, edit.command) {
            Ok(_) => applied += 1,
            Err(e) if e.is_recoverable() => warn!("Edit on '{}' rejected: {}", edit.image, e),
            Err(e) => return Err(e.into()),
        }
    }
    info!("Applied {} edits", applied);
    Ok(())
}

fn create_progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .expect("Invalid progress bar template")
            .progress_chars("##-"),
    );
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_edit_parsing() {
        let text = r#"[
            {"image": "a", "op": "toggle", "region": 3},
            {"image": "b", "op": "connect", "stroke": [{"x": 1, "y": 2}, {"x": 5, "y": 2}]}
        ]"#;
        let edits: Vec<ScriptedEdit> = serde_json::from_str(text).unwrap();
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0].image, "a");
        assert_eq!(edits[0].command, EditCommand::Toggle { region: 3 });
        assert_eq!(edits[1].command.name(), "connect");
    }

    #[test]
    fn test_load_config_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.toml");
        fs::write(
            &path,
            r#"
channel_names = ["marker"]

[[images]]
id = "well_a1"
channels = ["a1.tif"]

[analysis]
pixel_to_micron = 0.5

[export]
table_name = "cells"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.images[0].id, "well_a1");
        assert_eq!(config.channel_name(0), "marker");

        let unsupported = dir.path().join("batch.ini");
        fs::write(&unsupported, "").unwrap();
        assert!(load_config(&unsupported).is_err());
    }

    #[test]
    fn test_load_mask_widens_8bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.png");
        let buffer = image::GrayImage::from_fn(4, 3, |x, _| image::Luma([if x < 2 { 7 } else { 0 }]));
        buffer.save(&path).unwrap();

        let matrix = load_mask(&path).unwrap();
        assert_eq!(matrix.dimensions(), (4, 3));
        assert_eq!(matrix.pixel_count(7), 6);
    }
}
