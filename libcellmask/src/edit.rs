//! Label-mask edit operations.
//!
//! Every operation takes the current state by reference and returns a new
//! one, so a rejected edit never leaves a half-updated matrix behind.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{CellMaskError, EditWarning, Result};
use crate::geometry::{close_polygon, rasterize_polygon, stroke_path, Point};
use crate::label::{LabelMatrix, Pixel};

/// Region ids toggled out of the saved analysis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionSet(BTreeSet<u32>);

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.0.contains(&id)
    }

    /// Excluded ids in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy of the set with `id` flipped; returns whether `id` is now excluded
    fn flipped(&self, id: u32) -> (Self, bool) {
        let mut ids = self.0.clone();
        let excluded = if ids.remove(&id) {
            false
        } else {
            ids.insert(id);
            true
        };
        (Self(ids), excluded)
    }

    /// Copy of the set restricted to ids still present in `matrix`
    fn pruned(&self, matrix: &LabelMatrix) -> Self {
        if self.0.is_empty() {
            return self.clone();
        }
        let present = matrix.label_set();
        Self(self.0.intersection(&present).copied().collect())
    }
}

impl FromIterator<u32> for ExclusionSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Partition of a merged region as it stood right before the merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRecord {
    /// Label shared by the merged pixels
    pub canonical: u32,
    /// Original id of every member and the pixels it owned
    pub members: BTreeMap<u32, Vec<Pixel>>,
}

impl MergeRecord {
    fn member_of(&self, pixel: Pixel) -> Option<u32> {
        self.members
            .iter()
            .find(|(_, pixels)| pixels.contains(&pixel))
            .map(|(&id, _)| id)
    }
}

/// Connect history of one image. Each record is one merged equivalence
/// class together with the partition needed to split it again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeLog {
    records: Vec<MergeRecord>,
}

impl MergeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges that have not been reversed, oldest first
    pub fn records(&self) -> &[MergeRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Highest id a split could restore, 0 without merges
    pub fn max_member(&self) -> u32 {
        self.records
            .iter()
            .filter_map(|record| record.members.keys().next_back().copied())
            .max()
            .unwrap_or(0)
    }

    fn with_record(&self, record: MergeRecord) -> Self {
        let mut log = self.clone();
        log.records.push(record);
        log
    }

    fn without_record(&self, index: usize) -> Self {
        let mut log = self.clone();
        log.records.remove(index);
        log
    }
}

/// Editable state of one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditState {
    pub matrix: LabelMatrix,
    pub exclusions: ExclusionSet,
    pub merges: MergeLog,
}

impl EditState {
    /// Fresh state straight out of segmentation
    pub fn new(matrix: LabelMatrix) -> Self {
        Self {
            matrix,
            exclusions: ExclusionSet::new(),
            merges: MergeLog::new(),
        }
    }
}

/// Closed set of user edits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditCommand {
    /// Flip a region in or out of the saved analysis
    Toggle { region: u32 },
    /// Merge the regions a stroke joins, or split a merge it crosses again
    Connect { stroke: Vec<Point> },
    /// Add a new region covering a freehand outline
    Draw { polygon: Vec<Point> },
    /// Clear the pixels of one region inside a freehand outline
    Erase { polygon: Vec<Point>, region: u32 },
}

impl EditCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Toggle { .. } => "toggle",
            Self::Connect { .. } => "connect",
            Self::Draw { .. } => "draw",
            Self::Erase { .. } => "erase",
        }
    }
}

/// What an edit did to the region id set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum EditEffect {
    Toggled { region: u32, excluded: bool },
    Merged { canonical: u32, absorbed: u32 },
    Split { canonical: u32, restored: Vec<u32> },
    Drawn { region: u32, pixels: usize },
    Erased { region: u32, pixels: usize },
    Unchanged,
}

/// Result of a successful edit
#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    pub effect: EditEffect,
    pub warnings: Vec<EditWarning>,
}

/// Applies edit commands to the state of one image
#[derive(Debug, Clone)]
pub struct EditEngine<'a> {
    image: &'a str,
    open_shape_tolerance: f64,
}

impl<'a> EditEngine<'a> {
    pub fn new(image: &'a str) -> Self {
        Self {
            image,
            open_shape_tolerance: crate::OPEN_SHAPE_TOLERANCE,
        }
    }

    /// Set the largest first-to-last gap (in pixels) still treated as closed
    pub fn with_open_shape_tolerance(mut self, tolerance: f64) -> Self {
        self.open_shape_tolerance = tolerance;
        self
    }

    /// Apply one command, returning the replacement state
    pub fn apply(
        &self,
        state: &EditState,
        command: &EditCommand,
    ) -> Result<(EditState, EditOutcome)> {
        let (next, outcome) = match command {
            EditCommand::Toggle { region } => {
                let (exclusions, excluded) = self.toggle(&state.matrix, &state.exclusions, *region)?;
                (
                    EditState {
                        exclusions,
                        ..state.clone()
                    },
                    EditOutcome {
                        effect: EditEffect::Toggled {
                            region: *region,
                            excluded,
                        },
                        warnings: Vec::new(),
                    },
                )
            }
            EditCommand::Connect { stroke } => {
                let (matrix, merges, effect) =
                    self.connect(&state.matrix, &state.merges, stroke, &state.exclusions);
                (
                    EditState {
                        exclusions: state.exclusions.pruned(&matrix),
                        matrix,
                        merges,
                    },
                    EditOutcome {
                        effect,
                        warnings: Vec::new(),
                    },
                )
            }
            EditCommand::Draw { polygon } => {
                let (matrix, effect, warnings) =
                    self.draw_above(&state.matrix, polygon, state.merges.max_member())?;
                (
                    EditState {
                        exclusions: state.exclusions.pruned(&matrix),
                        matrix,
                        merges: state.merges.clone(),
                    },
                    EditOutcome { effect, warnings },
                )
            }
            EditCommand::Erase { polygon, region } => {
                let (matrix, effect, warnings) = self.erase(&state.matrix, polygon, *region)?;
                (
                    EditState {
                        exclusions: state.exclusions.pruned(&matrix),
                        matrix,
                        merges: state.merges.clone(),
                    },
                    EditOutcome { effect, warnings },
                )
            }
        };

        for warning in &outcome.warnings {
            log::warn!("{} on '{}': {}", command.name(), self.image, warning);
        }
        log::debug!("{} on '{}': {:?}", command.name(), self.image, outcome.effect);
        Ok((next, outcome))
    }

    /// Flip `id` in the exclusion set. The matrix is not touched.
    pub fn toggle(
        &self,
        matrix: &LabelMatrix,
        exclusions: &ExclusionSet,
        id: u32,
    ) -> Result<(ExclusionSet, bool)> {
        if !matrix.contains_label(id) {
            return Err(self.unknown_region(id));
        }
        Ok(exclusions.flipped(id))
    }

    /// Merge or split regions along a stroke.
    ///
    /// Background and excluded regions are ignored. When the stroke joins two
    /// or more ids, the end pair (first id hit and the last hit id that
    /// differs from it) is merged into the lower id. When it stays inside one
    /// merged id and its first and last hits fall into different members of
    /// that merge, the merge is reversed.
    pub fn connect(
        &self,
        matrix: &LabelMatrix,
        merges: &MergeLog,
        stroke: &[Point],
        exclusions: &ExclusionSet,
    ) -> (LabelMatrix, MergeLog, EditEffect) {
        let hits: Vec<(Pixel, u32)> = stroke_path(stroke)
            .into_iter()
            .filter(|p| matrix.in_bounds(i64::from(p.x), i64::from(p.y)))
            .map(|p| Pixel::new(p.x as u32, p.y as u32))
            .map(|pixel| (pixel, matrix.label_at(pixel)))
            .filter(|&(_, id)| id != 0 && !exclusions.contains(id))
            .collect();

        let (Some(&(start, first)), Some(&(end, _))) = (hits.first(), hits.last()) else {
            return (matrix.clone(), merges.clone(), EditEffect::Unchanged);
        };

        if let Some(&(_, other)) = hits.iter().rev().find(|&&(_, id)| id != first) {
            return self.merge(matrix, merges, first, other);
        }

        let reversible = merges
            .records
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, record)| record.canonical == first)
            .find(|(_, record)| match (record.member_of(start), record.member_of(end)) {
                (Some(a), Some(b)) => a != b,
                _ => false,
            })
            .map(|(index, _)| index);

        match reversible {
            Some(index) => self.split(matrix, merges, index),
            None => (matrix.clone(), merges.clone(), EditEffect::Unchanged),
        }
    }

    fn merge(
        &self,
        matrix: &LabelMatrix,
        merges: &MergeLog,
        a: u32,
        b: u32,
    ) -> (LabelMatrix, MergeLog, EditEffect) {
        let (canonical, absorbed) = if a < b { (a, b) } else { (b, a) };

        let mut members: BTreeMap<u32, Vec<Pixel>> = BTreeMap::new();
        for ((y, x), &label) in matrix.labels().indexed_iter() {
            if label == canonical || label == absorbed {
                members
                    .entry(label)
                    .or_default()
                    .push(Pixel::new(x as u32, y as u32));
            }
        }

        let relabelled = matrix.with_assignments(
            members
                .get(&absorbed)
                .into_iter()
                .flatten()
                .map(|&pixel| (pixel, canonical)),
        );
        let log = merges.with_record(MergeRecord { canonical, members });
        (relabelled, log, EditEffect::Merged { canonical, absorbed })
    }

    fn split(
        &self,
        matrix: &LabelMatrix,
        merges: &MergeLog,
        index: usize,
    ) -> (LabelMatrix, MergeLog, EditEffect) {
        let record = &merges.records[index];
        let canonical = record.canonical;

        // Pixels edited away since the merge stay as they are now
        let restored = matrix.with_assignments(record.members.iter().flat_map(|(&id, pixels)| {
            pixels
                .iter()
                .filter(|&&pixel| matrix.label_at(pixel) == canonical)
                .map(move |&pixel| (pixel, id))
        }));
        let ids = record.members.keys().copied().collect();
        (
            restored,
            merges.without_record(index),
            EditEffect::Split {
                canonical,
                restored: ids,
            },
        )
    }

    /// Add a new region covering the interior of a closed polygon.
    ///
    /// The new id is one above the current maximum; interior pixels are
    /// claimed from whatever region held them.
    pub fn draw(
        &self,
        matrix: &LabelMatrix,
        polygon: &[Point],
    ) -> Result<(LabelMatrix, EditEffect, Vec<EditWarning>)> {
        self.draw_above(matrix, polygon, 0)
    }

    /// Draw with a new id above both the matrix maximum and `reserved`, so
    /// ids a pending split would restore are never reused
    fn draw_above(
        &self,
        matrix: &LabelMatrix,
        polygon: &[Point],
        reserved: u32,
    ) -> Result<(LabelMatrix, EditEffect, Vec<EditWarning>)> {
        let (pixels, warnings) = self.interior(matrix, polygon)?;
        let region = matrix.max_label().max(reserved).checked_add(1).ok_or_else(|| {
            CellMaskError::InvalidMask("Label space exhausted".to_string())
        })?;

        let count = pixels.len();
        let drawn = matrix.with_assignments(pixels.into_iter().map(|pixel| (pixel, region)));
        Ok((drawn, EditEffect::Drawn { region, pixels: count }, warnings))
    }

    /// Clear the pixels of region `id` that lie inside a closed polygon.
    ///
    /// Remnants that end up disconnected keep `id`.
    pub fn erase(
        &self,
        matrix: &LabelMatrix,
        polygon: &[Point],
        id: u32,
    ) -> Result<(LabelMatrix, EditEffect, Vec<EditWarning>)> {
        if !matrix.contains_label(id) {
            return Err(self.unknown_region(id));
        }
        let (pixels, warnings) = self.interior(matrix, polygon)?;
        let targets: Vec<Pixel> = pixels
            .into_iter()
            .filter(|&pixel| matrix.label_at(pixel) == id)
            .collect();

        if targets.is_empty() {
            return Ok((matrix.clone(), EditEffect::Unchanged, warnings));
        }
        let count = targets.len();
        let erased = matrix.with_assignments(targets.into_iter().map(|pixel| (pixel, 0)));
        Ok((erased, EditEffect::Erased { region: id, pixels: count }, warnings))
    }

    fn interior(
        &self,
        matrix: &LabelMatrix,
        polygon: &[Point],
    ) -> Result<(Vec<Pixel>, Vec<EditWarning>)> {
        let closed = close_polygon(polygon, self.open_shape_tolerance);
        if closed.vertices.len() < 3 {
            return Err(CellMaskError::EmptyShape(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                closed.vertices.len()
            )));
        }

        let (width, height) = matrix.dimensions();
        let pixels = rasterize_polygon(&closed.vertices, width, height);
        if pixels.is_empty() {
            return Err(CellMaskError::EmptyShape(
                "polygon does not cover any pixel of the image".to_string(),
            ));
        }

        let warnings = closed
            .gap
            .map(|gap| EditWarning::OpenShape { gap })
            .into_iter()
            .collect();
        Ok((pixels, warnings))
    }

    fn unknown_region(&self, region: u32) -> CellMaskError {
        CellMaskError::UnknownRegion {
            image: self.image.to_string(),
            region,
        }
    }
}
