//! Per-region morphology and intensity measurements.
//!
//! Shape descriptors follow the scikit-image `regionprops` definitions, so the
//! exported columns match tables measured with it.

use std::collections::BTreeMap;
use std::f64::consts::{FRAC_1_SQRT_2, PI, SQRT_2};

use image::{DynamicImage, ImageBuffer, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{CellMaskError, Result};
use crate::geometry::{convex_hull, in_convex_polygon};
use crate::label::{Pixel, PixelBounds, Region};
use crate::MAX_PIXEL_TO_MICRON;

/// One raw intensity channel, indexed `[[row, col]]`
#[derive(Debug, Clone, PartialEq)]
pub struct IntensityChannel {
    name: String,
    values: Array2<f32>,
}

impl IntensityChannel {
    pub fn new(name: impl Into<String>, values: Array2<f32>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn from_luma8(name: impl Into<String>, image: &ImageBuffer<Luma<u8>, Vec<u8>>) -> Self {
        let (width, height) = image.dimensions();
        let values = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            f32::from(image.get_pixel(x as u32, y as u32)[0])
        });
        Self::new(name, values)
    }

    pub fn from_luma16(name: impl Into<String>, image: &ImageBuffer<Luma<u16>, Vec<u16>>) -> Self {
        let (width, height) = image.dimensions();
        let values = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            f32::from(image.get_pixel(x as u32, y as u32)[0])
        });
        Self::new(name, values)
    }

    /// Keep the stored sample values of a decoded image. Colour images are
    /// reduced to luma at their native bit depth; nothing is rescaled.
    pub fn from_dynamic(name: impl Into<String>, image: &DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(buffer) => Self::from_luma8(name, buffer),
            DynamicImage::ImageLuma16(buffer) => Self::from_luma16(name, buffer),
            DynamicImage::ImageLumaA16(_)
            | DynamicImage::ImageRgb16(_)
            | DynamicImage::ImageRgba16(_) => Self::from_luma16(name, &image.to_luma16()),
            _ => Self::from_luma8(name, &image.to_luma8()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// `(width, height)` in pixels
    pub fn dimensions(&self) -> (usize, usize) {
        let (height, width) = self.values.dim();
        (width, height)
    }

    pub fn value_at(&self, pixel: Pixel) -> f32 {
        self.values[[pixel.y as usize, pixel.x as usize]]
    }
}

/// Co-registered raw channels of one image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntensityImage {
    channels: Vec<IntensityChannel>,
}

impl IntensityImage {
    /// Group channels, which must all share one size
    pub fn new(channels: Vec<IntensityChannel>) -> Result<Self> {
        if let Some(first) = channels.first() {
            let expected = first.dimensions();
            for channel in &channels[1..] {
                if channel.dimensions() != expected {
                    return Err(CellMaskError::DimensionMismatch {
                        expected,
                        actual: channel.dimensions(),
                    });
                }
            }
        }
        Ok(Self { channels })
    }

    pub fn single(channel: IntensityChannel) -> Self {
        Self {
            channels: vec![channel],
        }
    }

    /// Shared `(width, height)`, `None` without channels
    pub fn dimensions(&self) -> Option<(usize, usize)> {
        self.channels.first().map(IntensityChannel::dimensions)
    }

    pub fn channels(&self) -> &[IntensityChannel] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> Option<&IntensityChannel> {
        self.channels.get(index)
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(IntensityChannel::name).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Caller-supplied labels copied onto every record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub condition: String,
    pub replicate: u32,
}

/// Max, mean and min of one channel over one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelIntensity {
    pub channel: String,
    pub max: f64,
    pub mean: f64,
    pub min: f64,
}

/// Measurements of one retained region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub image_id: String,
    pub region_id: u32,
    pub roi_name: Option<String>,
    pub condition: String,
    pub replicate: u32,
    pub area: f64,
    pub bbox_area: f64,
    pub area_convex: f64,
    pub perimeter: f64,
    pub perimeter_crofton: f64,
    pub eccentricity: f64,
    pub extent: f64,
    pub major_axis_length: f64,
    pub minor_axis_length: f64,
    pub equivalent_diameter: f64,
    pub feret_diameter_max: f64,
    pub orientation: f64,
    pub solidity: f64,
    pub centroid_y: f64,
    pub centroid_x: f64,
    pub intensities: Vec<ChannelIntensity>,
}

/// Everything needed to measure the retained regions of one image
#[derive(Debug, Clone, Copy)]
pub struct ImageRegions<'a> {
    pub image_id: &'a str,
    pub regions: &'a [Region],
    pub channels: &'a IntensityImage,
    pub metadata: &'a RecordMetadata,
}

/// Reject pixel-to-micron ratios outside `[0, MAX_PIXEL_TO_MICRON]`
pub fn validate_ratio(ratio: f64) -> Result<()> {
    if (0.0..=MAX_PIXEL_TO_MICRON).contains(&ratio) {
        Ok(())
    } else {
        Err(CellMaskError::Configuration(format!(
            "pixel-to-micron ratio {ratio} outside [0, {MAX_PIXEL_TO_MICRON}]"
        )))
    }
}

/// Measure `regions`, returning one record per region in ascending id order
pub fn extract(
    image_id: &str,
    regions: &[Region],
    channels: &IntensityImage,
    ratio: f64,
    metadata: &RecordMetadata,
) -> Result<Vec<FeatureRecord>> {
    validate_ratio(ratio)?;

    let mut ordered: Vec<&Region> = regions.iter().filter(|r| !r.pixels.is_empty()).collect();
    ordered.sort_by_key(|r| r.id);

    ordered
        .into_iter()
        .map(|region| measure(image_id, region, channels, ratio, metadata))
        .collect()
}

/// Measure several images, keeping their order in the output
pub fn extract_batch(images: &[ImageRegions<'_>], ratio: f64) -> Result<Vec<FeatureRecord>> {
    validate_ratio(ratio)?;

    let run = |image: &ImageRegions<'_>| {
        extract(
            image.image_id,
            image.regions,
            image.channels,
            ratio,
            image.metadata,
        )
    };

    #[cfg(feature = "performance")]
    let per_image: Vec<Vec<FeatureRecord>> = {
        use rayon::prelude::*;
        images.par_iter().map(run).collect::<Result<_>>()?
    };
    #[cfg(not(feature = "performance"))]
    let per_image: Vec<Vec<FeatureRecord>> = images.iter().map(run).collect::<Result<_>>()?;

    Ok(per_image.into_iter().flatten().collect())
}

fn measure(
    image_id: &str,
    region: &Region,
    channels: &IntensityImage,
    ratio: f64,
    metadata: &RecordMetadata,
) -> Result<FeatureRecord> {
    let shape = Morphology::of(region)?;
    let intensities = channels
        .channels()
        .iter()
        .map(|channel| intensity(channel, region))
        .collect::<Result<Vec<_>>>()?;
    let area_scale = ratio * ratio;

    Ok(FeatureRecord {
        image_id: image_id.to_string(),
        region_id: region.id,
        roi_name: None,
        condition: metadata.condition.clone(),
        replicate: metadata.replicate,
        area: shape.area * area_scale,
        bbox_area: shape.bbox_area * area_scale,
        area_convex: shape.area_convex * area_scale,
        perimeter: shape.perimeter * ratio,
        perimeter_crofton: shape.perimeter_crofton * ratio,
        eccentricity: shape.eccentricity,
        extent: shape.extent,
        major_axis_length: shape.major_axis_length * ratio,
        minor_axis_length: shape.minor_axis_length * ratio,
        equivalent_diameter: shape.equivalent_diameter * ratio,
        feret_diameter_max: shape.feret_diameter_max * ratio,
        orientation: shape.orientation,
        solidity: shape.solidity,
        centroid_y: shape.centroid.1,
        centroid_x: shape.centroid.0,
        intensities,
    })
}

fn intensity(channel: &IntensityChannel, region: &Region) -> Result<ChannelIntensity> {
    let (width, height) = channel.dimensions();
    let mut max = f64::NEG_INFINITY;
    let mut min = f64::INFINITY;
    let mut sum = 0.0;

    for &pixel in &region.pixels {
        if pixel.x as usize >= width || pixel.y as usize >= height {
            return Err(CellMaskError::DimensionMismatch {
                expected: (width, height),
                actual: (pixel.x as usize + 1, pixel.y as usize + 1),
            });
        }
        let value = f64::from(channel.value_at(pixel));
        max = max.max(value);
        min = min.min(value);
        sum += value;
    }

    Ok(ChannelIntensity {
        channel: channel.name().to_string(),
        max,
        mean: sum / region.pixels.len() as f64,
        min,
    })
}

/// Unscaled shape descriptors in pixel units.
///
/// A region made of several 8-connected pieces, as left behind by a merge
/// or an erase, is measured piece by piece. Areas and perimeters are summed,
/// ratios, axes and the centroid are area-weighted means, and the Feret
/// diameter is the largest of the pieces.
#[derive(Debug, Clone, PartialEq)]
struct Morphology {
    area: f64,
    bbox_area: f64,
    area_convex: f64,
    perimeter: f64,
    perimeter_crofton: f64,
    eccentricity: f64,
    extent: f64,
    major_axis_length: f64,
    minor_axis_length: f64,
    equivalent_diameter: f64,
    feret_diameter_max: f64,
    orientation: f64,
    solidity: f64,
    /// `(x, y)`
    centroid: (f64, f64),
}

impl Morphology {
    fn of(region: &Region) -> Result<Self> {
        let (bounds, mask) = local_mask(region)?;
        let pieces = components(region, &bounds, &mask);
        if pieces.len() == 1 {
            return Ok(Self::connected(region, &bounds, &mask));
        }

        log::debug!(
            "Region {} has {} separate pieces, aggregating",
            region.id,
            pieces.len()
        );
        let shapes = pieces
            .iter()
            .map(|piece| {
                let (bounds, mask) = local_mask(piece)?;
                Ok(Self::connected(piece, &bounds, &mask))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::aggregate(&shapes))
    }

    fn connected(region: &Region, bounds: &PixelBounds, mask: &Array2<bool>) -> Self {
        let area = region.area() as f64;

        let n = area;
        let mean_x = region.pixels.iter().map(|p| f64::from(p.x)).sum::<f64>() / n;
        let mean_y = region.pixels.iter().map(|p| f64::from(p.y)).sum::<f64>() / n;
        let (mut mu_xx, mut mu_yy, mut mu_xy) = (0.0, 0.0, 0.0);
        for pixel in &region.pixels {
            let dx = f64::from(pixel.x) - mean_x;
            let dy = f64::from(pixel.y) - mean_y;
            mu_xx += dx * dx;
            mu_yy += dy * dy;
            mu_xy += dx * dy;
        }
        let inertia = InertiaTensor {
            a: mu_xx / n,
            b: -mu_xy / n,
            c: mu_yy / n,
        };
        let (l1, l2) = inertia.eigenvalues();

        let convex_pixels = convex_image(&region.pixels);
        let bbox_area = bounds.area() as f64;
        let area_convex = convex_pixels.len() as f64;

        Self {
            area,
            bbox_area,
            area_convex,
            perimeter: perimeter(mask),
            perimeter_crofton: perimeter_crofton(mask),
            eccentricity: if l1 == 0.0 { 0.0 } else { (1.0 - l2 / l1).sqrt() },
            extent: area / bbox_area,
            major_axis_length: 4.0 * l1.sqrt(),
            minor_axis_length: 4.0 * l2.sqrt(),
            equivalent_diameter: (4.0 * area / PI).sqrt(),
            feret_diameter_max: feret_diameter_max(&convex_pixels),
            orientation: inertia.orientation(),
            solidity: area / area_convex,
            centroid: (mean_x, mean_y),
        }
    }

    fn aggregate(shapes: &[Self]) -> Self {
        let area = total(shapes, |s| s.area);
        let weighted = |value: fn(&Self) -> f64| total(shapes, |s| s.area * value(s)) / area;

        Self {
            area,
            bbox_area: total(shapes, |s| s.bbox_area),
            area_convex: total(shapes, |s| s.area_convex),
            perimeter: total(shapes, |s| s.perimeter),
            perimeter_crofton: total(shapes, |s| s.perimeter_crofton),
            eccentricity: weighted(|s| s.eccentricity),
            extent: weighted(|s| s.extent),
            major_axis_length: weighted(|s| s.major_axis_length),
            minor_axis_length: weighted(|s| s.minor_axis_length),
            equivalent_diameter: weighted(|s| s.equivalent_diameter),
            feret_diameter_max: shapes
                .iter()
                .map(|s| s.feret_diameter_max)
                .fold(0.0, f64::max),
            orientation: weighted(|s| s.orientation),
            solidity: weighted(|s| s.solidity),
            centroid: (weighted(|s| s.centroid.0), weighted(|s| s.centroid.1)),
        }
    }
}

fn total(shapes: &[Morphology], value: impl Fn(&Morphology) -> f64) -> f64 {
    shapes.iter().map(value).sum()
}

fn local_mask(region: &Region) -> Result<(PixelBounds, Array2<bool>)> {
    region
        .local_mask()
        .ok_or_else(|| CellMaskError::InvalidMask(format!("Region {} has no pixels", region.id)))
}

/// 8-connected pieces of a region, each carrying the region id
fn components(region: &Region, bounds: &PixelBounds, mask: &Array2<bool>) -> Vec<Region> {
    let (rows, cols) = mask.dim();
    let foreground: ImageBuffer<Luma<u8>, Vec<u8>> =
        ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| {
            Luma([u8::from(mask[[y as usize, x as usize]])])
        });
    let labelled = connected_components(&foreground, Connectivity::Eight, Luma([0u8]));

    let mut pieces: BTreeMap<u32, Region> = BTreeMap::new();
    for &pixel in &region.pixels {
        let label = labelled.get_pixel(pixel.x - bounds.min_x, pixel.y - bounds.min_y)[0];
        pieces
            .entry(label)
            .or_insert_with(|| Region {
                id: region.id,
                pixels: Vec::new(),
            })
            .pixels
            .push(pixel);
    }
    pieces.into_values().collect()
}

/// Symmetric 2x2 inertia tensor `[[a, b], [b, c]]` in (row, col) order:
/// `a` is the column variance, `c` the row variance.
#[derive(Debug, Clone, Copy)]
struct InertiaTensor {
    a: f64,
    b: f64,
    c: f64,
}

impl InertiaTensor {
    /// Eigenvalues, largest first, clamped at zero
    fn eigenvalues(&self) -> (f64, f64) {
        let mid = (self.a + self.c) / 2.0;
        let radius = (((self.a - self.c) / 2.0).powi(2) + self.b * self.b).sqrt();
        ((mid + radius).max(0.0), (mid - radius).max(0.0))
    }

    /// Angle between the row axis and the major axis, in `[-pi/2, pi/2]`
    fn orientation(&self) -> f64 {
        if self.a - self.c == 0.0 {
            if self.b < 0.0 {
                -PI / 4.0
            } else {
                PI / 4.0
            }
        } else {
            0.5 * (-2.0 * self.b).atan2(self.c - self.a)
        }
    }
}

/// Edge midpoints of a pixel set
fn edge_midpoints(pixels: &[Pixel]) -> Vec<(f64, f64)> {
    pixels
        .iter()
        .flat_map(|p| {
            let (x, y) = (f64::from(p.x), f64::from(p.y));
            [(x - 0.5, y), (x + 0.5, y), (x, y - 0.5), (x, y + 0.5)]
        })
        .collect()
}

/// Pixels whose centres lie inside or on the convex hull of the region's
/// edge midpoints
fn convex_image(pixels: &[Pixel]) -> Vec<Pixel> {
    let hull = convex_hull(edge_midpoints(pixels));
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0, 0);
    for p in pixels {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }

    let mut inside = Vec::new();
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            if in_convex_polygon(&hull, (f64::from(x), f64::from(y))) {
                inside.push(Pixel::new(x, y));
            }
        }
    }
    inside
}

/// Longest distance between any two points of the contour of the convex image
fn feret_diameter_max(convex_pixels: &[Pixel]) -> f64 {
    let points = convex_hull(edge_midpoints(convex_pixels));
    let mut best = 0.0_f64;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            best = best.max(((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt());
        }
    }
    best
}

/// Weighted count of border pixels over a 4-connected neighbourhood.
///
/// Border pixels are the ones removed by a cross-shaped erosion; each
/// contributes according to how its 3x3 neighbourhood of border pixels is
/// arranged.
fn perimeter(mask: &Array2<bool>) -> f64 {
    let (rows, cols) = mask.dim();
    let at = |grid: &Array2<bool>, r: i64, c: i64| {
        r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols && grid[[r as usize, c as usize]]
    };

    let border = Array2::from_shape_fn((rows, cols), |(r, c)| {
        let (r, c) = (r as i64, c as i64);
        at(mask, r, c)
            && !(at(mask, r - 1, c) && at(mask, r + 1, c) && at(mask, r, c - 1) && at(mask, r, c + 1))
    });

    const KERNEL: [[u32; 3]; 3] = [[10, 2, 10], [2, 1, 2], [10, 2, 10]];
    let mut total = 0.0;
    for ((r, c), &is_border) in border.indexed_iter() {
        if !is_border {
            continue;
        }
        let mut code = 0;
        for (dr, row) in KERNEL.iter().enumerate() {
            for (dc, &weight) in row.iter().enumerate() {
                if at(&border, r as i64 + dr as i64 - 1, c as i64 + dc as i64 - 1) {
                    code += weight;
                }
            }
        }
        total += match code {
            5 | 7 | 15 | 17 | 25 | 27 => 1.0,
            21 | 33 => SQRT_2,
            13 | 23 => (1.0 + SQRT_2) / 2.0,
            _ => 0.0,
        };
    }
    total
}

/// Crofton perimeter estimate over 4 directions, from the histogram of 2x2
/// pixel configurations
fn perimeter_crofton(mask: &Array2<bool>) -> f64 {
    let quarter_diag = PI / (4.0 * SQRT_2);
    let coefs = [
        0.0,
        PI / 4.0 * (1.0 + FRAC_1_SQRT_2),
        quarter_diag,
        PI / (2.0 * SQRT_2),
        0.0,
        PI / 4.0 * (1.0 + FRAC_1_SQRT_2),
        0.0,
        quarter_diag,
        PI / 4.0,
        PI / 2.0,
        quarter_diag,
        quarter_diag,
        PI / 4.0,
        PI / 2.0,
        0.0,
        0.0,
    ];

    let (rows, cols) = mask.dim();
    let f = |r: i64, c: i64| -> usize {
        usize::from(
            r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols && mask[[r as usize, c as usize]],
        )
    };

    let mut total = 0.0;
    for r in 0..=rows as i64 {
        for c in 0..=cols as i64 {
            let code = f(r, c) + 2 * f(r - 1, c) + 4 * f(r, c - 1) + 8 * f(r - 1, c - 1);
            total += coefs[code];
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: u32) -> Region {
        let pixels = (0..size)
            .flat_map(|y| (0..size).map(move |x| Pixel::new(x, y)))
            .collect();
        Region { id: 1, pixels }
    }

    #[test]
    fn test_single_pixel_shape() {
        let shape = Morphology::of(&Region {
            id: 1,
            pixels: vec![Pixel::new(3, 4)],
        })
        .unwrap();
        assert_eq!(shape.area, 1.0);
        assert_eq!(shape.area_convex, 1.0);
        assert_eq!(shape.eccentricity, 0.0);
        assert_eq!(shape.major_axis_length, 0.0);
        assert!((shape.feret_diameter_max - 1.0).abs() < 1e-9);
        assert_eq!(shape.centroid, (3.0, 4.0));
    }

    #[test]
    fn test_square_perimeter() {
        // 3x3 block: 8 border pixels, corners and edges all weight 1
        let shape = Morphology::of(&square(3)).unwrap();
        assert!((shape.perimeter - 8.0).abs() < 1e-9);
        assert_eq!(shape.area_convex, 9.0);
    }

    #[test]
    fn test_inertia_orientation_of_row() {
        let row = Region {
            id: 1,
            pixels: (0..5).map(|x| Pixel::new(x, 0)).collect(),
        };
        let shape = Morphology::of(&row).unwrap();
        assert!((shape.eccentricity - 1.0).abs() < 1e-9);
        assert!((shape.orientation.abs() - PI / 2.0).abs() < 1e-9);
        assert!((shape.major_axis_length - 4.0 * 2.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_separate_pieces_are_aggregated() {
        let pair = Region {
            id: 1,
            pixels: vec![Pixel::new(1, 1), Pixel::new(5, 1)],
        };
        let shape = Morphology::of(&pair).unwrap();
        assert_eq!(shape.area, 2.0);
        assert_eq!(shape.bbox_area, 2.0);
        assert_eq!(shape.area_convex, 2.0);
        assert_eq!(shape.solidity, 1.0);
        assert_eq!(shape.extent, 1.0);
        assert_eq!(shape.major_axis_length, 0.0);
        assert!((shape.feret_diameter_max - 1.0).abs() < 1e-9);
        assert_eq!(shape.centroid, (3.0, 1.0));
    }

    #[test]
    fn test_weighted_means_follow_piece_area() {
        // a 3x3 block and a single pixel two columns to its right
        let mut pixels: Vec<Pixel> = square(3).pixels;
        pixels.push(Pixel::new(5, 1));
        pixels.sort_by_key(|p| (p.y, p.x));
        let shape = Morphology::of(&Region { id: 1, pixels }).unwrap();

        let block = Morphology::of(&square(3)).unwrap();
        assert_eq!(shape.area, 10.0);
        assert_eq!(shape.perimeter, block.perimeter);
        let expected_diameter = (9.0 * (36.0 / PI).sqrt() + (4.0 / PI).sqrt()) / 10.0;
        assert!((shape.equivalent_diameter - expected_diameter).abs() < 1e-9);
        assert!((shape.centroid.0 - (9.0 * 1.0 + 5.0) / 10.0).abs() < 1e-9);
        assert_eq!(shape.feret_diameter_max, block.feret_diameter_max);
    }

    #[test]
    fn test_diagonal_neighbours_form_one_piece() {
        let diagonal = Region {
            id: 1,
            pixels: vec![Pixel::new(0, 0), Pixel::new(1, 1)],
        };
        let (bounds, mask) = local_mask(&diagonal).unwrap();
        assert_eq!(components(&diagonal, &bounds, &mask).len(), 1);
    }

    #[test]
    fn test_ratio_bounds() {
        assert!(validate_ratio(0.0).is_ok());
        assert!(validate_ratio(2.0).is_ok());
        assert!(validate_ratio(2.01).is_err());
        assert!(validate_ratio(-0.1).is_err());
        assert!(validate_ratio(f64::NAN).is_err());
    }
}
