use std::collections::{BTreeMap, BTreeSet};

use crate::config::AnalysisConfig;
use crate::error::{CellMaskError, Result};
use crate::export::{ExportBatch, ExportOptions, ExportSummary, ExportWriter};
use crate::features::{extract_batch, FeatureRecord, ImageRegions};
use crate::label::Region;
use crate::roi::{roi_file_name, roi_stem, RoiBoundary};
use crate::session::SessionState;

/// Measure and write every image of the session in one transaction.
///
/// The configuration is checked before anything touches the disk, and the
/// session itself is only read.
pub fn save(
    session: &SessionState,
    config: &AnalysisConfig,
    options: &ExportOptions,
) -> Result<ExportSummary> {
    config.validate()?;
    let channel_names = shared_channel_names(session)?;
    let metadata = config.metadata();

    let mut retained: Vec<(usize, Vec<Region>)> = Vec::with_capacity(session.len());
    let mut excluded: Vec<(usize, Vec<Region>)> = Vec::new();
    for index in 0..session.len() {
        if options.excluded_table_path.is_some() {
            excluded.push((index, session.excluded(index)?));
        }
        retained.push((index, session.finalize(index)?));
    }

    let measure = |sets: &[(usize, Vec<Region>)]| -> Result<Vec<FeatureRecord>> {
        let images = sets
            .iter()
            .map(|(index, regions)| {
                let entry = session.image(*index)?;
                Ok(ImageRegions {
                    image_id: entry.state.image_id(),
                    regions: regions.as_slice(),
                    channels: &entry.channels,
                    metadata: &metadata,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        extract_batch(&images, config.pixel_to_micron)
    };

    let mut records = measure(&retained)?;
    let excluded_records = measure(&excluded)?;

    let boundaries: Vec<RoiBoundary> = if options.roi_dir.is_some() {
        let stems = unique_stems(session)?;
        for record in &mut records {
            if let Some(stem) = stems.get(record.image_id.as_str()) {
                record.roi_name = Some(roi_file_name(stem, record.region_id));
            }
        }
        let mut boundaries = Vec::with_capacity(records.len());
        for (index, regions) in &retained {
            let image_id = session.image(*index)?.state.image_id();
            let stem = stems.get(image_id).cloned().unwrap_or_else(|| roi_stem(image_id));
            boundaries.extend(regions.iter().map(|region| {
                RoiBoundary::from_region(image_id, region).with_stem(stem.clone())
            }));
        }
        boundaries
    } else {
        Vec::new()
    };

    log::info!(
        "Saving {} regions from {} images",
        records.len(),
        session.len()
    );
    ExportWriter::new(options.clone()).write(&ExportBatch {
        records: &records,
        channel_names: &channel_names,
        boundaries: &boundaries,
        excluded: &excluded_records,
    })
}

/// ROI file stem of every image, keyed by image id.
///
/// Images whose ids reduce to the same stem get their session index
/// appended, so no two images of one save share ROI file names.
fn unique_stems(session: &SessionState) -> Result<BTreeMap<&str, String>> {
    let ids = (0..session.len())
        .map(|index| Ok(session.image(index)?.state.image_id()))
        .collect::<Result<Vec<&str>>>()?;
    let bases: Vec<String> = ids.iter().map(|id| roi_stem(id)).collect();

    let mut taken = BTreeSet::new();
    let mut stems = BTreeMap::new();
    for (index, (id, base)) in ids.iter().zip(&bases).enumerate() {
        let shared = bases.iter().filter(|other| *other == base).count() > 1;
        let mut stem = if shared {
            format!("{base}_{index}")
        } else {
            base.clone()
        };
        let mut attempt = 1;
        while !taken.insert(stem.clone()) {
            stem = format!("{base}_{index}_{attempt}");
            attempt += 1;
        }
        if shared {
            log::warn!("Image '{id}' shares its ROI prefix '{base}', using '{stem}'");
        }
        stems.insert(*id, stem);
    }
    Ok(stems)
}

/// Channel names shared by every image of the session
fn shared_channel_names(session: &SessionState) -> Result<Vec<String>> {
    let mut names: Option<Vec<String>> = None;
    for entry in session.images() {
        let current: Vec<String> = entry
            .channels
            .channel_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        match &names {
            None => names = Some(current),
            Some(expected) if *expected != current => {
                return Err(CellMaskError::Configuration(format!(
                    "image '{}' has channels {:?}, expected {:?}",
                    entry.state.image_id(),
                    current,
                    expected
                )));
            }
            Some(_) => {}
        }
    }
    Ok(names.unwrap_or_default())
}
