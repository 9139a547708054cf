//! PSEZ annotation filtering.
//!
//! PSEZ boxes keep their own class but are only valid next to a crop that PSEZ
//! can be associated with (`psez_crops`). Invalid PSEZ boxes are dropped; all
//! other annotations pass through untouched and in their original order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{ExtractError, Result};
use crate::types::AnnotationRecord;

pub const PSEZ_CODE: &str = "PSEZ";

/// Rule deciding whether a PSEZ annotation is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsezPolicy {
    /// Keep PSEZ when the image has any annotation of an eligible crop
    #[default]
    CoOccurrence,
    /// Keep PSEZ only when its center lies strictly inside an eligible crop box
    CenterEnclosed,
}

#[derive(Debug, Clone)]
pub struct PsezRemapper {
    crops: BTreeSet<String>,
    policy: PsezPolicy,
}

impl PsezRemapper {
    /// Build a remapper, rejecting crops that are not configured classes.
    pub fn new(crops: &BTreeSet<String>, eppo_codes: &[String], policy: PsezPolicy) -> Result<Self> {
        if let Some(unknown) = crops.iter().find(|crop| !eppo_codes.contains(crop)) {
            return Err(ExtractError::Configuration(format!(
                "psez_crops references '{}', which is not in eppo_codes",
                unknown
            )));
        }
        Ok(Self {
            crops: crops.clone(),
            policy,
        })
    }

    pub fn policy(&self) -> PsezPolicy {
        self.policy
    }

    /// Filter one image's annotations.
    pub fn remap(&self, annotations: &[AnnotationRecord]) -> Vec<AnnotationRecord> {
        let crops: Vec<&AnnotationRecord> = annotations
            .iter()
            .filter(|a| self.crops.contains(&a.eppo_code))
            .collect();

        annotations
            .iter()
            .filter(|annotation| {
                if annotation.eppo_code != PSEZ_CODE {
                    return true;
                }
                let keep = match self.policy {
                    PsezPolicy::CoOccurrence => !crops.is_empty(),
                    PsezPolicy::CenterEnclosed => crops
                        .iter()
                        .any(|crop| annotation.bbox.center_enclosed_by(&crop.bbox)),
                };
                if !keep {
                    log::debug!(
                        "Dropping PSEZ annotation {:?} without an eligible crop",
                        annotation.annotation_id
                    );
                }
                keep
            })
            .cloned()
            .collect()
    }
}

/// Drop PSEZ annotations from images that contain no eligible crop.
pub fn remap_psez(
    annotations: &[AnnotationRecord],
    psez_crops: &BTreeSet<String>,
) -> Vec<AnnotationRecord> {
    PsezRemapper {
        crops: psez_crops.clone(),
        policy: PsezPolicy::CoOccurrence,
    }
    .remap(annotations)
}
