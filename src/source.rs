//! Record source: the single database round trip of a run.
//!
//! The database itself is reached by whatever client exports the result of
//! [`DatabaseSettings::annotation_query`](crate::settings::DatabaseSettings::annotation_query);
//! this module reads that export and turns rows into [`ImageRecord`]s.

use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::{ExtractError, Result};
use crate::types::{AnnotationRecord, AnnotationRow, BBox, ImageRecord};

/// A provider of training-annotation rows.
pub trait RecordSource {
    fn fetch(&self) -> Result<Vec<AnnotationRow>>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

/// Reads an exported query result: a JSON array (`.json`) or JSON Lines
/// (`.jsonl`) of rows.
#[derive(Debug, Clone)]
pub struct ExportSource {
    path: PathBuf,
}

impl ExportSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_json_lines(&self) -> bool {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"))
    }
}

impl RecordSource for ExportSource {
    fn fetch(&self) -> Result<Vec<AnnotationRow>> {
        let file = File::open(&self.path).map_err(|e| {
            ExtractError::Source(format!(
                "failed to open annotation export ({}): {}",
                self.path.display(),
                e
            ))
        })?;
        let reader = BufReader::new(file);
        let start = Instant::now();

        let rows = if self.is_json_lines() {
            let mut rows = Vec::new();
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let row: AnnotationRow = serde_json::from_str(&line).map_err(|e| {
                    ExtractError::Source(format!(
                        "{}:{}: invalid row: {}",
                        self.path.display(),
                        line_no + 1,
                        e
                    ))
                })?;
                rows.push(row);
            }
            rows
        } else {
            serde_json::from_reader::<_, Vec<AnnotationRow>>(reader).map_err(|e| {
                ExtractError::Source(format!(
                    "failed to parse annotation export ({}): {}",
                    self.path.display(),
                    e
                ))
            })?
        };

        if rows.is_empty() {
            error!("Annotation export returned zero rows! Check the query and database content.");
        } else {
            info!(
                "Fetched {} annotation records in {:.2} seconds",
                rows.len(),
                start.elapsed().as_secs_f64()
            );
        }
        Ok(rows)
    }

    fn describe(&self) -> String {
        format!("annotation export {}", self.path.display())
    }
}

/// Images built from rows, plus the rows that carried no usable annotation.
#[derive(Debug, Clone, Default)]
pub struct GroupedRecords {
    pub images: Vec<ImageRecord>,
    pub incomplete_rows: usize,
}

/// Group rows by image id, normalizing pixel boxes.
///
/// Images come out in ascending id order. Boxes are clamped to the image.
/// Rows without an EPPO code, a full box, or any box area left after clamping
/// keep their image but contribute no annotation.
pub fn group_into_images(rows: &[AnnotationRow]) -> GroupedRecords {
    let mut by_image: BTreeMap<i64, ImageRecord> = BTreeMap::new();
    let mut incomplete_rows = 0;

    for row in rows {
        let image = by_image.entry(row.image_id).or_insert_with(|| ImageRecord {
            image_id: row.image_id,
            upload_id: row.upload_id,
            file_name: row.file_name.clone(),
            grown_weed: false,
            annotations: Vec::new(),
        });
        if image.upload_id != row.upload_id {
            warn!(
                "Image {} appears with upload ids {} and {}; keeping {}",
                row.image_id, image.upload_id, row.upload_id, image.upload_id
            );
        }
        image.grown_weed |= row.grown_weed.unwrap_or(false);

        let eppo_code = row
            .eppo_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty());
        let bbox = row
            .pixel_box()
            .and_then(|corners| BBox::from_pixels(corners, row.width, row.height));

        match (eppo_code, bbox) {
            (Some(code), Some(bbox)) => image.annotations.push(AnnotationRecord {
                eppo_code: code.to_string(),
                bbox,
                annotation_id: row.id,
                cotyledon: row.cotyledon,
            }),
            _ => {
                debug!(
                    "Row {:?} of image {} has no usable EPPO code or box",
                    row.id, row.image_id
                );
                incomplete_rows += 1;
            }
        }
    }

    GroupedRecords {
        images: by_image.into_values().collect(),
        incomplete_rows,
    }
}

/// Summary statistics of a fetched record set, logged by `--debug-db`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceReport {
    pub total_rows: usize,
    pub unique_images: usize,
    pub unique_uploads: usize,
    pub missing_bbox: usize,
    pub missing_eppo: usize,
    /// `(UseForTraining value, count)`; `None` for rows without the column
    pub use_for_training: Vec<(Option<bool>, usize)>,
    /// Most frequent EPPO codes, descending
    pub top_eppo_codes: Vec<(String, usize)>,
}

impl SourceReport {
    pub fn from_rows(rows: &[AnnotationRow]) -> Self {
        let mut images = BTreeSet::new();
        let mut uploads = BTreeSet::new();
        let mut eppo_counts: HashMap<&str, usize> = HashMap::new();
        let mut training_flags: BTreeMap<Option<bool>, usize> = BTreeMap::new();
        let mut missing_bbox = 0;
        let mut missing_eppo = 0;

        for row in rows {
            images.insert(row.image_id);
            uploads.insert(row.upload_id);
            *training_flags.entry(row.use_for_training).or_default() += 1;
            if row.pixel_box().is_none() {
                missing_bbox += 1;
            }
            match row.eppo_code.as_deref().map(str::trim) {
                Some(code) if !code.is_empty() => *eppo_counts.entry(code).or_default() += 1,
                _ => missing_eppo += 1,
            }
        }

        let mut top_eppo_codes: Vec<(String, usize)> = eppo_counts
            .into_iter()
            .map(|(code, count)| (code.to_string(), count))
            .collect();
        top_eppo_codes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_eppo_codes.truncate(10);

        Self {
            total_rows: rows.len(),
            unique_images: images.len(),
            unique_uploads: uploads.len(),
            missing_bbox,
            missing_eppo,
            use_for_training: training_flags.into_iter().collect(),
            top_eppo_codes,
        }
    }

    pub fn log(&self) {
        info!("=== Record Source Report ===");
        info!("Rows: {}", self.total_rows);
        info!(
            "Unique images: {}, unique uploads: {}",
            self.unique_images, self.unique_uploads
        );
        info!("UseForTraining flag distribution:");
        for (flag, count) in &self.use_for_training {
            match flag {
                Some(flag) => info!("  UseForTraining = {}: {} rows", u8::from(*flag), count),
                None => info!("  UseForTraining missing: {} rows", count),
            }
        }
        info!(
            "Rows with missing bounding box coordinates: {}",
            self.missing_bbox
        );
        info!("Rows with NULL EPPO codes: {}", self.missing_eppo);
        info!("Most common EPPO codes:");
        for (code, count) in &self.top_eppo_codes {
            info!("  {}: {} annotations", code, count);
        }
    }
}
