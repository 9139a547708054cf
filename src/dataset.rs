use log::{info, warn};

use crate::error::{ExtractError, Result};
use crate::labels::ClassMap;
use crate::psez::PsezRemapper;
use crate::settings::{ConfigWarning, DatasetConfig};
use crate::source::group_into_images;
use crate::split::{Assignment, SplitAssigner};
use crate::types::{AnnotationRecord, AnnotationRow, ImageRecord, Split};

/// An image with its final split and rewritten annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedImage {
    pub record: ImageRecord,
    pub split: Split,
}

/// The complete placement decision for a run, computed before any file write.
#[derive(Debug, Clone, Default)]
pub struct DatasetPlan {
    pub images: Vec<PlannedImage>,
    pub excluded_images: usize,
    pub psez_dropped: usize,
    pub unknown_dropped: usize,
    pub incomplete_rows: usize,
    pub warnings: Vec<ConfigWarning>,
}

impl DatasetPlan {
    pub fn images_in(&self, split: Split) -> impl Iterator<Item = &PlannedImage> {
        self.images.iter().filter(move |image| image.split == split)
    }

    pub fn count(&self, split: Split) -> usize {
        self.images_in(split).count()
    }

    pub fn split_of(&self, image_id: i64) -> Option<Split> {
        self.images
            .iter()
            .find(|image| image.record.image_id == image_id)
            .map(|image| image.split)
    }

    pub fn log_summary(&self) {
        info!("Planned {} images", self.images.len());
        for split in Split::ALL {
            let annotations: usize = self
                .images_in(split)
                .map(|image| image.record.annotations.len())
                .sum();
            info!(
                "  {}: {} images, {} annotations",
                split,
                self.count(split),
                annotations
            );
        }
        info!("Held back images excluded: {}", self.excluded_images);
        info!("PSEZ annotations dropped: {}", self.psez_dropped);
        if self.unknown_dropped > 0 {
            warn!(
                "Annotations dropped for unknown EPPO codes: {}",
                self.unknown_dropped
            );
        }
        if self.incomplete_rows > 0 {
            warn!(
                "Rows without EPPO code or bounding box: {}",
                self.incomplete_rows
            );
        }
    }
}

/// Rewrite raw EPPO codes to configured classes.
///
/// Returns the number of dropped annotations; fails on the first unknown code
/// unless `drop_unknown` is set.
pub fn resolve_eppo_codes(
    image: &mut ImageRecord,
    class_map: &ClassMap,
    drop_unknown: bool,
) -> Result<usize> {
    let mut resolved: Vec<AnnotationRecord> = Vec::with_capacity(image.annotations.len());
    let mut dropped = 0;

    for annotation in image.annotations.drain(..) {
        match class_map.resolve(&annotation.eppo_code, annotation.cotyledon) {
            Some(code) => resolved.push(AnnotationRecord {
                eppo_code: code.to_string(),
                ..annotation
            }),
            None if drop_unknown => {
                warn!(
                    "Dropping annotation {:?} on image {}: EPPO code '{}' is not a configured class",
                    annotation.annotation_id, image.image_id, annotation.eppo_code
                );
                dropped += 1;
            }
            None => {
                return Err(ExtractError::DataIntegrity(format!(
                    "annotation {:?} on image {} references EPPO code '{}', which is not in eppo_codes",
                    annotation.annotation_id, image.image_id, annotation.eppo_code
                )))
            }
        }
    }

    image.annotations = resolved;
    Ok(dropped)
}

/// Decide split and labels for every image in `records`.
///
/// `records` are processed in the given order, which fixes the order of
/// random draws.
pub fn plan_images(
    records: Vec<ImageRecord>,
    config: &DatasetConfig,
    seed: u64,
) -> Result<DatasetPlan> {
    let warnings = config.validate()?;
    for warning in &warnings {
        warn!("{}", warning);
    }

    let class_map = ClassMap::new(&config.eppo_codes)?;
    let remapper = PsezRemapper::new(&config.psez_crops, &config.eppo_codes, config.psez_policy)?;
    let mut assigner = SplitAssigner::new(config, seed);

    let mut plan = DatasetPlan {
        warnings,
        ..DatasetPlan::default()
    };

    for mut record in records {
        let split = match assigner.assign(&record) {
            Assignment::Excluded => {
                plan.excluded_images += 1;
                continue;
            }
            Assignment::Split(split) => split,
        };

        plan.unknown_dropped +=
            resolve_eppo_codes(&mut record, &class_map, config.drop_unknown_eppo)?;

        let before = record.annotations.len();
        record.annotations = remapper.remap(&record.annotations);
        plan.psez_dropped += before - record.annotations.len();

        plan.images.push(PlannedImage { record, split });
    }

    Ok(plan)
}

/// Build the plan straight from fetched rows.
pub fn plan_dataset(rows: &[AnnotationRow], config: &DatasetConfig, seed: u64) -> Result<DatasetPlan> {
    let grouped = group_into_images(rows);
    info!("Dataset contains {} unique images", grouped.images.len());
    let mut plan = plan_images(grouped.images, config, seed)?;
    plan.incomplete_rows = grouped.incomplete_rows;
    Ok(plan)
}
