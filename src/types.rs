use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

// Supported image formats
pub const IMG_FORMATS: &[&str] = &[
    "bmp", "dng", "jpeg", "jpg", "mpo", "png", "tif", "tiff", "webp", "pfm",
];

// Precomputed HashSet of image extensions for fast lookup
pub static IMAGE_EXTENSIONS_SET: OnceLock<HashSet<String>> = OnceLock::new();

/// Get the image extensions set
pub fn get_image_extensions_set() -> &'static HashSet<String> {
    IMAGE_EXTENSIONS_SET.get_or_init(|| IMG_FORMATS.iter().map(|ext| ext.to_lowercase()).collect())
}

/// The dataset partition an image is materialized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    /// Order in which fixed-set overrides are consulted.
    pub const OVERRIDE_PRIORITY: [Split; 3] = [Split::Test, Split::Val, Split::Train];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the training-annotation query, as exported from the database.
///
/// Images without annotation data still produce a row (the query left-joins
/// annotation data), in which case the EPPO code and box corners are null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AnnotationRow {
    #[serde(default)]
    pub id: Option<i64>,
    pub upload_id: i64,
    pub file_name: String,
    pub image_id: i64,
    #[serde(default)]
    pub plant_id: Option<i64>,
    #[serde(rename = "EPPOCode", default)]
    pub eppo_code: Option<String>,
    /// Image width in pixels
    #[serde(default)]
    pub width: f64,
    /// Image height in pixels
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub min_x: Option<f64>,
    #[serde(default)]
    pub min_y: Option<f64>,
    #[serde(default)]
    pub max_x: Option<f64>,
    #[serde(default)]
    pub max_y: Option<f64>,
    #[serde(default)]
    pub use_for_training: Option<bool>,
    #[serde(default)]
    pub grown_weed: Option<bool>,
    #[serde(rename = "cotyledon", default)]
    pub cotyledon: Option<i64>,
}

impl AnnotationRow {
    /// Pixel-space box corners, if all four are present.
    pub fn pixel_box(&self) -> Option<(f64, f64, f64, f64)> {
        Some((self.min_x?, self.min_y?, self.max_x?, self.max_y?))
    }
}

/// A bounding box in normalized YOLO coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

impl BBox {
    pub fn new(x_center: f64, y_center: f64, width: f64, height: f64) -> Self {
        Self {
            x_center,
            y_center,
            width,
            height,
        }
    }

    /// Normalize a pixel-space `(min_x, min_y, max_x, max_y)` box by the image size.
    ///
    /// Corners are clamped to the image first. Returns `None` when the image
    /// dimensions are not positive or the clamped box has no area.
    pub fn from_pixels(
        (min_x, min_y, max_x, max_y): (f64, f64, f64, f64),
        image_width: f64,
        image_height: f64,
    ) -> Option<Self> {
        if !(image_width > 0.0 && image_height > 0.0) {
            return None;
        }
        let min_x = min_x.clamp(0.0, image_width);
        let max_x = max_x.clamp(0.0, image_width);
        let min_y = min_y.clamp(0.0, image_height);
        let max_y = max_y.clamp(0.0, image_height);
        // NaN corners fail this check as well
        if !(max_x > min_x && max_y > min_y) {
            return None;
        }
        let box_width = max_x - min_x;
        let box_height = max_y - min_y;
        Some(Self {
            x_center: (min_x + box_width / 2.0) / image_width,
            y_center: (min_y + box_height / 2.0) / image_height,
            width: box_width / image_width,
            height: box_height / image_height,
        })
    }

    /// Normalized `(min_x, min_y, max_x, max_y)` corners
    pub fn corners(&self) -> (f64, f64, f64, f64) {
        let half_w = self.width / 2.0;
        let half_h = self.height / 2.0;
        (
            self.x_center - half_w,
            self.y_center - half_h,
            self.x_center + half_w,
            self.y_center + half_h,
        )
    }

    /// Whether `self`'s center lies strictly inside `outer`.
    pub fn center_enclosed_by(&self, outer: &BBox) -> bool {
        let (x1, y1, x2, y2) = outer.corners();
        self.x_center > x1 && self.y_center > y1 && self.x_center < x2 && self.y_center < y2
    }
}

/// A single labelled box on an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub eppo_code: String,
    pub bbox: BBox,
    /// Row id in the annotation data table, kept for log messages
    #[serde(default)]
    pub annotation_id: Option<i64>,
    /// Monocot/dicot marker used when the EPPO code is not a configured class
    #[serde(default)]
    pub cotyledon: Option<i64>,
}

impl AnnotationRecord {
    pub fn new(eppo_code: impl Into<String>, bbox: BBox) -> Self {
        Self {
            eppo_code: eppo_code.into(),
            bbox,
            annotation_id: None,
            cotyledon: None,
        }
    }
}

/// An image and its annotations, as fetched once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_id: i64,
    pub upload_id: i64,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub grown_weed: bool,
    pub annotations: Vec<AnnotationRecord>,
}

impl ImageRecord {
    pub fn new(image_id: i64, upload_id: i64, annotations: Vec<AnnotationRecord>) -> Self {
        Self {
            image_id,
            upload_id,
            file_name: format!("{}.jpg", image_id),
            grown_weed: false,
            annotations,
        }
    }
}

// Struct to hold extraction statistics
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_images: usize,
    pub train_images: usize,
    pub val_images: usize,
    pub test_images: usize,
    pub total_annotations: usize,
    pub train_annotations: usize,
    pub val_annotations: usize,
    pub test_annotations: usize,
    pub skipped_images: usize,
    pub errors: usize,
}

impl ExtractionStats {
    pub fn new(total_images: usize) -> Self {
        Self {
            total_images,
            ..Self::default()
        }
    }

    pub fn record_image(&mut self, split: Split, annotations: usize) {
        match split {
            Split::Train => {
                self.train_images += 1;
                self.train_annotations += annotations;
            }
            Split::Val => {
                self.val_images += 1;
                self.val_annotations += annotations;
            }
            Split::Test => {
                self.test_images += 1;
                self.test_annotations += annotations;
            }
        }
        self.total_annotations += annotations;
    }

    pub fn increment_skipped(&mut self) {
        self.skipped_images += 1;
    }

    pub fn increment_errors(&mut self) {
        self.errors += 1;
    }

    pub fn images_in(&self, split: Split) -> usize {
        match split {
            Split::Train => self.train_images,
            Split::Val => self.val_images,
            Split::Test => self.test_images,
        }
    }

    pub fn annotations_in(&self, split: Split) -> usize {
        match split {
            Split::Train => self.train_annotations,
            Split::Val => self.val_annotations,
            Split::Test => self.test_annotations,
        }
    }

    /// Fold another partial result into this one.
    pub fn merge(&mut self, other: &ExtractionStats) {
        self.train_images += other.train_images;
        self.val_images += other.val_images;
        self.test_images += other.test_images;
        self.train_annotations += other.train_annotations;
        self.val_annotations += other.val_annotations;
        self.test_annotations += other.test_annotations;
        self.total_annotations += other.total_annotations;
        self.skipped_images += other.skipped_images;
        self.errors += other.errors;
    }

    pub fn print_summary(&self) {
        log::info!("=== Dataset Extraction Summary ===");
        log::info!("Total images processed: {}", self.total_images);
        log::info!(
            "Training set:   {} images, {} annotations",
            self.train_images,
            self.train_annotations
        );
        log::info!(
            "Validation set: {} images, {} annotations",
            self.val_images,
            self.val_annotations
        );
        log::info!(
            "Test set:       {} images, {} annotations",
            self.test_images,
            self.test_annotations
        );
        log::info!("Total annotations: {}", self.total_annotations);

        if self.skipped_images > 0 {
            log::warn!(
                "Skipped images: {} (source files not found)",
                self.skipped_images
            );
        }
        if self.errors > 0 {
            log::warn!("Errors encountered: {}", self.errors);
        }

        if self.total_images > 0 {
            let total = self.total_images as f64;
            log::info!(
                "Average annotations per image: {:.2}",
                self.total_annotations as f64 / total
            );
            log::info!(
                "Split percentages: Train {:.1}% / Val {:.1}% / Test {:.1}%",
                self.train_images as f64 / total * 100.0,
                self.val_images as f64 / total * 100.0,
                self.test_images as f64 / total * 100.0
            );
        }
    }
}
