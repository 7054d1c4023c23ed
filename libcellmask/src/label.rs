use std::collections::{BTreeMap, BTreeSet};

use image::{ImageBuffer, Luma};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{CellMaskError, Result};

/// Pixel coordinate inside a label matrix (`x` = column, `y` = row)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pixel {
    pub x: u32,
    pub y: u32,
}

impl Pixel {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Inclusive pixel bounds of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBounds {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl PixelBounds {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }
}

/// Integer label partition of one image.
///
/// Label 0 is background; every positive value identifies one region. Ids
/// are unique within the matrix, not across a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatrix {
    labels: Array2<u32>,
}

impl LabelMatrix {
    /// Create an all-background matrix
    pub fn new(width: usize, height: usize) -> Result<Self> {
        Self::from_array(Array2::zeros((height, width)))
    }

    /// Wrap an existing `[[row, col]]` label array
    pub fn from_array(labels: Array2<u32>) -> Result<Self> {
        let (height, width) = labels.dim();
        if width == 0 || height == 0 {
            return Err(CellMaskError::InvalidMask(
                "Label grid must have at least one row and one column".to_string(),
            ));
        }
        Ok(Self { labels })
    }

    /// Build a matrix from nested rows of signed integers.
    ///
    /// Rejects ragged rows and negative labels.
    pub fn from_rows<T: Copy + Into<i64>>(rows: &[Vec<T>]) -> Result<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        let mut labels = Array2::zeros((height, width));

        for (y, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(CellMaskError::InvalidMask(format!(
                    "Row {} has {} columns, expected {}",
                    y,
                    row.len(),
                    width
                )));
            }
            for (x, &value) in row.iter().enumerate() {
                let value: i64 = value.into();
                let label = u32::try_from(value).map_err(|_| {
                    CellMaskError::InvalidMask(format!(
                        "Label {value} at ({x}, {y}) is not a valid region id"
                    ))
                })?;
                labels[[y, x]] = label;
            }
        }

        Self::from_array(labels)
    }

    /// Build a matrix from a 16-bit label image, as written by most segmentation tools
    pub fn from_luma16(image: &ImageBuffer<Luma<u16>, Vec<u16>>) -> Result<Self> {
        let (width, height) = image.dimensions();
        let labels = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            u32::from(image.get_pixel(x as u32, y as u32)[0])
        });
        Self::from_array(labels)
    }

    /// Build a matrix from a 32-bit label image
    pub fn from_luma32(image: &ImageBuffer<Luma<u32>, Vec<u32>>) -> Result<Self> {
        let (width, height) = image.dimensions();
        let labels = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            image.get_pixel(x as u32, y as u32)[0]
        });
        Self::from_array(labels)
    }

    /// Export the matrix as a 32-bit label image
    pub fn to_luma32(&self) -> ImageBuffer<Luma<u32>, Vec<u32>> {
        let (width, height) = self.dimensions();
        ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
            Luma([self.labels[[y as usize, x as usize]]])
        })
    }

    /// `(width, height)` in pixels
    pub fn dimensions(&self) -> (usize, usize) {
        let (height, width) = self.labels.dim();
        (width, height)
    }

    pub fn width(&self) -> usize {
        self.labels.ncols()
    }

    pub fn height(&self) -> usize {
        self.labels.nrows()
    }

    /// Total number of pixels
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label at `(x, y)`, or `None` outside the grid
    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        self.labels.get([y as usize, x as usize]).copied()
    }

    /// Label at a pixel inside the grid
    pub fn label_at(&self, pixel: Pixel) -> u32 {
        self.labels[[pixel.y as usize, pixel.x as usize]]
    }

    /// Check whether signed coordinates fall inside the grid
    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width() && (y as usize) < self.height()
    }

    /// Raw `[[row, col]]` view of the labels
    pub fn labels(&self) -> &Array2<u32> {
        &self.labels
    }

    /// Highest label present, 0 for an all-background matrix
    pub fn max_label(&self) -> u32 {
        self.labels.iter().copied().max().unwrap_or(0)
    }

    /// Check whether a positive label occurs anywhere in the matrix
    pub fn contains_label(&self, id: u32) -> bool {
        id != 0 && self.labels.iter().any(|&label| label == id)
    }

    /// Distinct positive labels in ascending order
    pub fn label_set(&self) -> BTreeSet<u32> {
        self.labels.iter().copied().filter(|&label| label != 0).collect()
    }

    /// Number of pixels carrying `id`
    pub fn pixel_count(&self, id: u32) -> usize {
        self.labels.iter().filter(|&&label| label == id).count()
    }

    /// Copy of this matrix with the given pixels relabelled
    pub(crate) fn with_assignments<I>(&self, assignments: I) -> Self
    where
        I: IntoIterator<Item = (Pixel, u32)>,
    {
        let mut labels = self.labels.clone();
        for (pixel, label) in assignments {
            labels[[pixel.y as usize, pixel.x as usize]] = label;
        }
        Self { labels }
    }
}

/// One region: an id and the pixels that carry it, in row-major order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub id: u32,
    pub pixels: Vec<Pixel>,
}

impl Region {
    /// Pixel count
    pub fn area(&self) -> usize {
        self.pixels.len()
    }

    /// Inclusive bounding box, `None` for an empty pixel set
    pub fn bounds(&self) -> Option<PixelBounds> {
        let first = self.pixels.first()?;
        let mut bounds = PixelBounds {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        for pixel in &self.pixels[1..] {
            bounds.min_x = bounds.min_x.min(pixel.x);
            bounds.min_y = bounds.min_y.min(pixel.y);
            bounds.max_x = bounds.max_x.max(pixel.x);
            bounds.max_y = bounds.max_y.max(pixel.y);
        }
        Some(bounds)
    }

    /// Dense boolean mask of the region over its bounding box, indexed `[[row, col]]`
    pub fn local_mask(&self) -> Option<(PixelBounds, Array2<bool>)> {
        let bounds = self.bounds()?;
        let mut mask = Array2::from_elem(
            (bounds.height() as usize, bounds.width() as usize),
            false,
        );
        for pixel in &self.pixels {
            mask[[
                (pixel.y - bounds.min_y) as usize,
                (pixel.x - bounds.min_x) as usize,
            ]] = true;
        }
        Some((bounds, mask))
    }
}

/// Regions of a label matrix keyed by ascending id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionIndex {
    regions: BTreeMap<u32, Region>,
}

impl RegionIndex {
    /// Index every positive label of `matrix` in a single pass
    pub fn build(matrix: &LabelMatrix) -> Self {
        let mut regions: BTreeMap<u32, Region> = BTreeMap::new();
        for ((y, x), &label) in matrix.labels().indexed_iter() {
            if label == 0 {
                continue;
            }
            regions
                .entry(label)
                .or_insert_with(|| Region {
                    id: label,
                    pixels: Vec::new(),
                })
                .pixels
                .push(Pixel::new(x as u32, y as u32));
        }
        Self { regions }
    }

    pub fn get(&self, id: u32) -> Option<&Region> {
        self.regions.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.regions.contains_key(&id)
    }

    /// Region ids in ascending order
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.regions.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn into_regions(self) -> Vec<Region> {
        self.regions.into_values().collect()
    }
}

/// Map every region id of `matrix` to its pixels
pub fn regions(matrix: &LabelMatrix) -> BTreeMap<u32, Region> {
    RegionIndex::build(matrix).regions
}
