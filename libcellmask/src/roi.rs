//! ImageJ `.roi` encoding of region boundaries.
//!
//! Rings live on the corner lattice, so even-odd filling of the decoded
//! geometry at pixel centres gives back the exact region mask.

use std::io::{Read, Write};
use std::path::{Component, Path};

use crate::error::{CellMaskError, Result};
use crate::geometry::{fill_rings, trace_boundary};
use crate::label::{Pixel, Region};

/// Magic bytes at the start of every ImageJ ROI file
pub const ROI_MAGIC: &[u8; 4] = b"Iout";

/// ImageJ ROI format version written by the encoder
pub const ROI_VERSION: u16 = 228;

const HEADER_SIZE: usize = 64;
const TYPE_RECT: u8 = 1;
const TYPE_TRACED: u8 = 8;
const SHAPE_ROI_SIZE_OFFSET: usize = 36;

const SEG_MOVETO: f32 = 0.0;
const SEG_LINETO: f32 = 1.0;
const SEG_CLOSE: f32 = 4.0;

/// Boundary geometry of one retained region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiBoundary {
    pub image_id: String,
    pub region_id: u32,
    /// File name prefix, unique per image within one save
    pub stem: String,
    /// Closed rings of corner-lattice vertices, first vertex not repeated
    pub rings: Vec<Vec<(i64, i64)>>,
}

impl RoiBoundary {
    /// Trace the boundary of a region
    pub fn from_region(image_id: &str, region: &Region) -> Self {
        Self {
            image_id: image_id.to_string(),
            region_id: region.id,
            stem: roi_stem(image_id),
            rings: trace_boundary(region),
        }
    }

    /// File name used for this boundary inside an ROI folder
    pub fn file_name(&self) -> String {
        roi_file_name(&self.stem, self.region_id)
    }

    pub fn with_stem(mut self, stem: impl Into<String>) -> Self {
        self.stem = stem.into();
        self
    }

    /// Pixels enclosed by the rings under the even-odd rule, row-major
    pub fn to_pixels(&self) -> Vec<Pixel> {
        let rings: Vec<Vec<(f64, f64)>> = self
            .rings
            .iter()
            .map(|ring| ring.iter().map(|&(x, y)| (x as f64, y as f64)).collect())
            .collect();
        fill_rings(&rings)
    }

    fn is_composite(&self) -> bool {
        self.rings.len() != 1 || self.rings[0].len() > usize::from(u16::MAX)
    }

    /// Serialize as an ImageJ ROI.
    ///
    /// A single ring becomes a traced polygon; anything else becomes a
    /// composite shape ROI.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(buffer)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let vertices = self.rings.iter().flatten();
        let (Some(left), Some(top), Some(right), Some(bottom)) = (
            vertices.clone().map(|v| v.0).min(),
            vertices.clone().map(|v| v.1).min(),
            vertices.clone().map(|v| v.0).max(),
            vertices.map(|v| v.1).max(),
        ) else {
            return Err(CellMaskError::RoiFormat(format!(
                "region {} of '{}' has no boundary",
                self.region_id, self.image_id
            )));
        };

        let fits = |value: i64| i16::try_from(value).is_ok();
        if !(fits(left) && fits(top) && fits(right) && fits(bottom)) {
            return Err(CellMaskError::RoiFormat(format!(
                "region {} of '{}' lies outside the ROI coordinate range",
                self.region_id, self.image_id
            )));
        }

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(ROI_MAGIC);
        header[4..6].copy_from_slice(&ROI_VERSION.to_be_bytes());
        header[8..10].copy_from_slice(&(top as i16).to_be_bytes());
        header[10..12].copy_from_slice(&(left as i16).to_be_bytes());
        header[12..14].copy_from_slice(&(bottom as i16).to_be_bytes());
        header[14..16].copy_from_slice(&(right as i16).to_be_bytes());

        if self.is_composite() {
            let segments = self.segments();
            header[6] = TYPE_RECT;
            let size = i32::try_from(segments.len()).map_err(|_| {
                CellMaskError::RoiFormat("shape too large for a composite ROI".to_string())
            })?;
            header[SHAPE_ROI_SIZE_OFFSET..SHAPE_ROI_SIZE_OFFSET + 4]
                .copy_from_slice(&size.to_be_bytes());
            writer.write_all(&header)?;
            for value in segments {
                writer.write_all(&value.to_be_bytes())?;
            }
        } else {
            let ring = &self.rings[0];
            header[6] = TYPE_TRACED;
            header[16..18].copy_from_slice(&(ring.len() as u16).to_be_bytes());
            writer.write_all(&header)?;
            for &(x, _) in ring {
                writer.write_all(&((x - left) as i16).to_be_bytes())?;
            }
            for &(_, y) in ring {
                writer.write_all(&((y - top) as i16).to_be_bytes())?;
            }
        }
        Ok(())
    }

    /// Flattened MOVETO / LINETO / CLOSE path in absolute coordinates
    fn segments(&self) -> Vec<f32> {
        let mut path = Vec::new();
        for ring in &self.rings {
            for (i, &(x, y)) in ring.iter().enumerate() {
                path.push(if i == 0 { SEG_MOVETO } else { SEG_LINETO });
                path.push(x as f32);
                path.push(y as f32);
            }
            path.push(SEG_CLOSE);
        }
        path
    }

    /// Parse an ROI produced by [`RoiBoundary::encode`]
    pub fn decode(image_id: &str, region_id: u32, bytes: &[u8]) -> Result<Self> {
        Self::read_from(image_id, region_id, &mut &bytes[..])
    }

    pub fn read_from<R: Read>(image_id: &str, region_id: u32, reader: &mut R) -> Result<Self> {
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;
        if &header[0..4] != ROI_MAGIC {
            return Err(CellMaskError::RoiFormat(format!(
                "Invalid magic bytes: {:?}",
                &header[0..4]
            )));
        }

        let short = |offset: usize| i16::from_be_bytes([header[offset], header[offset + 1]]);
        let top = i64::from(short(8));
        let left = i64::from(short(10));
        let shape_size = i32::from_be_bytes([
            header[SHAPE_ROI_SIZE_OFFSET],
            header[SHAPE_ROI_SIZE_OFFSET + 1],
            header[SHAPE_ROI_SIZE_OFFSET + 2],
            header[SHAPE_ROI_SIZE_OFFSET + 3],
        ]);

        let rings = match header[6] {
            TYPE_RECT if shape_size > 0 => read_segments(reader, shape_size as usize)?,
            TYPE_TRACED => {
                let count = usize::from(u16::from_be_bytes([header[16], header[17]]));
                let mut raw = vec![0u8; count * 4];
                reader.read_exact(&mut raw)?;
                let coordinate =
                    |i: usize| i64::from(i16::from_be_bytes([raw[2 * i], raw[2 * i + 1]]));
                vec![(0..count)
                    .map(|i| (left + coordinate(i), top + coordinate(count + i)))
                    .collect()]
            }
            other => {
                return Err(CellMaskError::RoiFormat(format!(
                    "Unsupported ROI type {other}"
                )))
            }
        };

        Ok(Self {
            image_id: image_id.to_string(),
            region_id,
            stem: roi_stem(image_id),
            rings,
        })
    }
}

fn read_segments<R: Read>(reader: &mut R, count: usize) -> Result<Vec<Vec<(i64, i64)>>> {
    let mut raw = vec![0u8; count * 4];
    reader.read_exact(&mut raw)?;
    let values: Vec<f32> = raw
        .chunks_exact(4)
        .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    let mut rings = Vec::new();
    let mut ring: Vec<(i64, i64)> = Vec::new();
    let mut i = 0;
    while i < values.len() {
        let segment = values[i];
        if segment == SEG_CLOSE {
            if !ring.is_empty() {
                rings.push(std::mem::take(&mut ring));
            }
            i += 1;
            continue;
        }
        if segment != SEG_MOVETO && segment != SEG_LINETO {
            return Err(CellMaskError::RoiFormat(format!(
                "Unsupported path segment {segment}"
            )));
        }
        let (Some(&x), Some(&y)) = (values.get(i + 1), values.get(i + 2)) else {
            return Err(CellMaskError::RoiFormat("Truncated path segment".to_string()));
        };
        if segment == SEG_MOVETO && !ring.is_empty() {
            rings.push(std::mem::take(&mut ring));
        }
        ring.push((x.round() as i64, y.round() as i64));
        i += 3;
    }
    if !ring.is_empty() {
        rings.push(ring);
    }
    Ok(rings)
}

/// File name prefix derived from the whole image id.
///
/// Directory components are kept, joined by `_`, and only the extension of
/// the last one is dropped. Characters outside `[A-Za-z0-9._-]` become `_`.
/// Different ids can still map to the same stem (`a.tif` and `a.png`), so
/// callers writing several images must disambiguate.
pub fn roi_stem(image_id: &str) -> String {
    let path = Path::new(image_id);
    let mut parts: Vec<String> = path
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if let (Some(last), Some(stem)) = (parts.last_mut(), path.file_stem()) {
        *last = stem.to_string_lossy().into_owned();
    }

    let joined: String = parts
        .join("_")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if joined.is_empty() {
        "image".to_string()
    } else {
        joined
    }
}

/// `<stem>_label<region id>.roi`
pub fn roi_file_name(stem: &str, region_id: u32) -> String {
    format!("{stem}_label{region_id}.roi")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem_keeps_directories() {
        assert_eq!(roi_stem("plate1/img_03.tif"), "plate1_img_03");
        assert_eq!(roi_stem("sample"), "sample");
        assert_eq!(roi_stem("./run 2/a.b.tif"), "run_2_a.b");
        assert_eq!(roi_stem(""), "image");
        assert_ne!(roi_stem("plate1/a.tif"), roi_stem("plate2/a.tif"));
        assert_eq!(roi_file_name("plate1_img_03", 7), "plate1_img_03_label7.roi");
    }

    #[test]
    fn test_traced_header_layout() {
        let boundary = RoiBoundary {
            image_id: "a".to_string(),
            region_id: 1,
            stem: "a".to_string(),
            rings: vec![vec![(2, 3), (4, 3), (4, 5), (2, 5)]],
        };
        let bytes = boundary.encode().unwrap();
        assert_eq!(&bytes[0..4], b"Iout");
        assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), 228);
        assert_eq!(bytes[6], 8);
        assert_eq!(i16::from_be_bytes([bytes[8], bytes[9]]), 3);
        assert_eq!(i16::from_be_bytes([bytes[10], bytes[11]]), 2);
        assert_eq!(u16::from_be_bytes([bytes[16], bytes[17]]), 4);
        assert_eq!(bytes.len(), 64 + 4 * 4);
    }

    #[test]
    fn test_rejects_unknown_magic() {
        let bytes = [0u8; 64];
        assert!(matches!(
            RoiBoundary::decode("a", 1, &bytes),
            Err(CellMaskError::RoiFormat(_))
        ));
    }
}
