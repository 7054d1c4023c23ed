#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]

//! Cellmask - review, correct and measure cell segmentation masks
//!
//! This library holds the per-image label matrices of a batch, applies the
//! toggle, connect, draw and erase edits to them, and turns the final masks
//! into a per-cell feature table plus ImageJ ROI files.

pub mod config;
pub mod edit;
pub mod error;
pub mod export;
pub mod features;
pub mod geometry;
pub mod label;
pub mod pipeline;
pub mod roi;
pub mod segmentation;
pub mod session;

pub use config::{AnalysisConfig, BatchConfig, ExportConfig, FilterConfig};
pub use edit::{EditCommand, EditEffect, EditEngine, EditOutcome, EditState, ExclusionSet};
pub use error::{CellMaskError, EditWarning, Result};
pub use export::{ExportOptions, ExportSummary, ExportWriter, WriteMode};
pub use features::{FeatureRecord, IntensityChannel, IntensityImage, RecordMetadata};
pub use geometry::Point;
pub use label::{regions, LabelMatrix, Pixel, Region, RegionIndex};
pub use pipeline::save;
pub use roi::RoiBoundary;
pub use segmentation::{CellFilter, ModelParams, Segmenter, ThresholdSegmenter};
pub use session::SessionState;

/// Largest gap in pixels between the first and last vertex of a shape that
/// still counts as closed
pub const OPEN_SHAPE_TOLERANCE: f64 = 3.0;

/// Largest accepted pixel-to-micron ratio
pub const MAX_PIXEL_TO_MICRON: f64 = 2.0;
