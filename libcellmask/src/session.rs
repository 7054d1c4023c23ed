use std::collections::HashSet;

use crate::edit::{EditCommand, EditEngine, EditOutcome, EditState, ExclusionSet, MergeLog};
use crate::error::{CellMaskError, Result};
use crate::features::IntensityImage;
use crate::label::{LabelMatrix, Region, RegionIndex};

/// Edit state of one image in the batch
#[derive(Debug, Clone)]
pub struct ImageState {
    image_id: String,
    edit: EditState,
    history: Vec<EditCommand>,
}

impl ImageState {
    fn new(image_id: String, matrix: LabelMatrix) -> Self {
        Self {
            image_id,
            edit: EditState::new(matrix),
            history: Vec::new(),
        }
    }

    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    pub fn matrix(&self) -> &LabelMatrix {
        &self.edit.matrix
    }

    pub fn exclusions(&self) -> &ExclusionSet {
        &self.edit.exclusions
    }

    pub fn merges(&self) -> &MergeLog {
        &self.edit.merges
    }

    /// Commands applied successfully so far, oldest first
    pub fn history(&self) -> &[EditCommand] {
        &self.history
    }
}

/// One image: its edit state and the raw channels it is measured on
#[derive(Debug, Clone)]
pub struct ImageEntry {
    pub state: ImageState,
    pub channels: IntensityImage,
}

/// All images of a batch session.
///
/// Every image keeps its state in memory for the whole session, so moving
/// between images never discards edits.
#[derive(Debug, Clone)]
pub struct SessionState {
    images: Vec<ImageEntry>,
    ids: HashSet<String>,
    current: usize,
    open_shape_tolerance: f64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            images: Vec::new(),
            ids: HashSet::new(),
            current: 0,
            open_shape_tolerance: crate::OPEN_SHAPE_TOLERANCE,
        }
    }

    /// Set the open-shape tolerance used for draw and erase
    pub fn with_open_shape_tolerance(mut self, tolerance: f64) -> Self {
        self.open_shape_tolerance = tolerance;
        self
    }

    /// Add a fully segmented image to the end of the batch and return its index
    pub fn install(
        &mut self,
        image_id: impl Into<String>,
        matrix: LabelMatrix,
        channels: IntensityImage,
    ) -> Result<usize> {
        let image_id = image_id.into();
        if self.ids.contains(&image_id) {
            return Err(CellMaskError::DuplicateImage(image_id));
        }
        if let Some(actual) = channels.dimensions() {
            let expected = matrix.dimensions();
            if actual != expected {
                return Err(CellMaskError::DimensionMismatch { expected, actual });
            }
        }

        log::debug!(
            "Installed '{}' ({} regions)",
            image_id,
            matrix.label_set().len()
        );
        self.ids.insert(image_id.clone());
        self.images.push(ImageEntry {
            state: ImageState::new(image_id, matrix),
            channels,
        });
        Ok(self.images.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageEntry> {
        self.images.iter()
    }

    pub fn image(&self, index: usize) -> Result<&ImageEntry> {
        self.images.get(index).ok_or(CellMaskError::ImageIndex {
            index,
            len: self.images.len(),
        })
    }

    /// Index of the image with the given id
    pub fn index_of(&self, image_id: &str) -> Option<usize> {
        self.images
            .iter()
            .position(|entry| entry.state.image_id == image_id)
    }

    /// Image under review, `None` for an empty session
    pub fn current_image(&self) -> Option<&ImageEntry> {
        self.images.get(self.current)
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Make `index` the image under review
    pub fn goto(&mut self, index: usize) -> Result<&ImageEntry> {
        if index >= self.images.len() {
            return Err(CellMaskError::ImageIndex {
                index,
                len: self.images.len(),
            });
        }
        self.current = index;
        Ok(&self.images[index])
    }

    /// Advance to the next image; stays on the last one
    pub fn next(&mut self) -> Option<&ImageEntry> {
        if self.current + 1 < self.images.len() {
            self.current += 1;
        }
        self.current_image()
    }

    /// Step back to the previous image; stays on the first one
    pub fn previous(&mut self) -> Option<&ImageEntry> {
        self.current = self.current.saturating_sub(1);
        self.current_image()
    }

    /// Apply an edit to image `index`. On error the stored state is untouched.
    pub fn apply(&mut self, index: usize, command: EditCommand) -> Result<EditOutcome> {
        let len = self.images.len();
        let tolerance = self.open_shape_tolerance;
        let entry = self
            .images
            .get_mut(index)
            .ok_or(CellMaskError::ImageIndex { index, len })?;

        let engine =
            EditEngine::new(&entry.state.image_id).with_open_shape_tolerance(tolerance);
        let (next, outcome) = engine.apply(&entry.state.edit, &command)?;

        entry.state.edit = next;
        entry.state.history.push(command);
        Ok(outcome)
    }

    /// Regions that the next save will include, in ascending id order
    pub fn finalize(&self, index: usize) -> Result<Vec<Region>> {
        let state = &self.image(index)?.state;
        Ok(RegionIndex::build(state.matrix())
            .into_regions()
            .into_iter()
            .filter(|region| !state.exclusions().contains(region.id))
            .collect())
    }

    /// Regions currently toggled out, in ascending id order
    pub fn excluded(&self, index: usize) -> Result<Vec<Region>> {
        let state = &self.image(index)?.state;
        Ok(RegionIndex::build(state.matrix())
            .into_regions()
            .into_iter()
            .filter(|region| state.exclusions().contains(region.id))
            .collect())
    }

    pub fn history_len(&self, index: usize) -> Result<usize> {
        Ok(self.image(index)?.state.history.len())
    }

    pub fn history(&self, index: usize) -> Result<&[EditCommand]> {
        Ok(self.image(index)?.state.history())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> LabelMatrix {
        LabelMatrix::from_rows(&[vec![1, 1, 0], vec![0, 2, 2], vec![3, 0, 0]]).unwrap()
    }

    #[test]
    fn test_navigation_clamps() {
        let mut session = SessionState::new();
        assert!(session.current_image().is_none());
        session.install("a", matrix(), IntensityImage::default()).unwrap();
        session.install("b", matrix(), IntensityImage::default()).unwrap();

        assert_eq!(session.previous().unwrap().state.image_id(), "a");
        assert_eq!(session.next().unwrap().state.image_id(), "b");
        assert_eq!(session.next().unwrap().state.image_id(), "b");
        assert_eq!(session.current_index(), 1);
    }

    #[test]
    fn test_failed_edit_keeps_history() {
        let mut session = SessionState::new();
        let index = session.install("a", matrix(), IntensityImage::default()).unwrap();
        let err = session
            .apply(index, EditCommand::Toggle { region: 9 })
            .unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(session.history_len(index).unwrap(), 0);
    }
}
