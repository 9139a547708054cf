//! Train/val/test assignment.
//!
//! Checks run in a fixed order: held-back exclusion, then test, val and train
//! overrides (image id or upload id), then an optional grown-weed rule, and
//! finally one weighted random draw. Only the last step consumes randomness,
//! so the sequence of draws depends solely on the seed and on which images
//! reach it.

use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::settings::DatasetConfig;
use crate::types::{ImageRecord, Split};

/// Outcome of assigning one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    Split(Split),
    Excluded,
}

impl Assignment {
    pub fn split(&self) -> Option<Split> {
        match self {
            Assignment::Split(split) => Some(*split),
            Assignment::Excluded => None,
        }
    }
}

/// Assign a single image. Consumes one draw from `rng` only when no rule
/// fixes the split.
pub fn assign<R: Rng>(image: &ImageRecord, config: &DatasetConfig, rng: &mut R) -> Assignment {
    if config.held_back_images.contains(&image.image_id) {
        return Assignment::Excluded;
    }

    let fixed = &config.fixed_sets;
    let by_image = fixed.split_for_image(image.image_id);
    let by_upload = fixed.split_for_upload(image.upload_id);
    if let (Some(a), Some(b)) = (by_image, by_upload) {
        if a != b {
            warn!(
                "Image {} is fixed to {} by image id but upload {} is fixed to {}",
                image.image_id, a, image.upload_id, b
            );
        }
    }

    for split in Split::OVERRIDE_PRIORITY {
        if by_image == Some(split) || by_upload == Some(split) {
            return Assignment::Split(split);
        }
    }

    if config.grown_weed_to_train && image.grown_weed {
        return Assignment::Split(Split::Train);
    }

    let probs = &config.split_probabilities;
    let r: f64 = rng.gen();
    let split = if r < probs.train {
        Split::Train
    } else if r < probs.train + probs.val {
        Split::Val
    } else {
        Split::Test
    };
    Assignment::Split(split)
}

/// Seeded assigner threading one generator through a whole run.
pub struct SplitAssigner<'a> {
    config: &'a DatasetConfig,
    rng: StdRng,
}

impl<'a> SplitAssigner<'a> {
    pub fn new(config: &'a DatasetConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn assign(&mut self, image: &ImageRecord) -> Assignment {
        assign(image, self.config, &mut self.rng)
    }
}
