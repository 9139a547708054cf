use dashmap::DashMap;
use indicatif::ProgressBar;
use log::{debug, error, warn};
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::dataset::PlannedImage;
use crate::labels::ClassMap;
use crate::settings::PathSettings;
use crate::types::{AnnotationRecord, ExtractionStats, Split};

/// Where one split's files go.
#[derive(Debug, Clone)]
pub struct SplitDirs {
    pub images_dir: PathBuf,
    pub labels_dir: PathBuf,
}

/// How an image ends up in `images/<split>/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePlacement {
    Symlink,
    Copy,
}

/// Result of materializing a single image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOutcome {
    Written { annotations: usize },
    MissingSource,
}

/// Materialize a batch of planned images in parallel, accumulating per-split
/// statistics.
pub fn process_images_in_parallel(
    images: &[&PlannedImage],
    dirs: &SplitDirs,
    paths: &PathSettings,
    class_map: &ClassMap,
    placement: ImagePlacement,
    stats: &DashMap<Split, ExtractionStats>,
    pb: &ProgressBar,
) {
    images.par_iter().for_each(|planned| {
        let outcome = process_image(planned, dirs, paths, class_map, placement);
        let mut entry = stats.entry(planned.split).or_default();
        match outcome {
            Ok(ImageOutcome::Written { annotations }) => {
                entry.record_image(planned.split, annotations);
            }
            Ok(ImageOutcome::MissingSource) => entry.increment_skipped(),
            Err(e) => {
                error!(
                    "Failed to create files for image {}: {}",
                    planned.record.image_id, e
                );
                entry.increment_errors();
            }
        }
        drop(entry);
        pb.inc(1);
    });
}

/// Place one image and write its label file.
pub fn process_image(
    planned: &PlannedImage,
    dirs: &SplitDirs,
    paths: &PathSettings,
    class_map: &ClassMap,
    placement: ImagePlacement,
) -> std::io::Result<ImageOutcome> {
    let record = &planned.record;
    let source_path = paths.image_path(record.upload_id, &record.file_name);
    if !source_path.exists() {
        warn!(
            "Image not found: {} (UploadId: {}, ImageId: {})",
            source_path.display(),
            record.upload_id,
            record.image_id
        );
        return Ok(ImageOutcome::MissingSource);
    }

    let mut image_output_path = dirs.images_dir.join(record.image_id.to_string());
    if let Some(extension) = source_path.extension() {
        image_output_path.set_extension(extension);
    }
    place_image(&source_path, &image_output_path, placement)?;

    let label_output_path = dirs
        .labels_dir
        .join(record.image_id.to_string())
        .with_extension("txt");
    let mut writer = BufWriter::new(File::create(&label_output_path)?);
    let yolo_data = convert_to_yolo_format(&record.annotations, class_map);
    writer.write_all(yolo_data.as_bytes())?;
    writer.flush()?;

    if record.image_id % 100 == 0 {
        debug!(
            "Processed image {} ({} annotations, split: {})",
            record.image_id,
            record.annotations.len(),
            planned.split
        );
    }

    Ok(ImageOutcome::Written {
        annotations: record.annotations.len(),
    })
}

/// Symlink (absolute target) or copy `source` to `destination`, replacing
/// anything already there.
pub fn place_image(
    source: &Path,
    destination: &Path,
    placement: ImagePlacement,
) -> std::io::Result<()> {
    if destination.symlink_metadata().is_ok() {
        fs::remove_file(destination)?;
    }
    match placement {
        ImagePlacement::Copy => {
            fs::copy(source, destination)?;
        }
        ImagePlacement::Symlink => {
            let target = fs::canonicalize(source)?;
            create_symlink(&target, destination)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Render annotations as YOLO label lines
/// (`<class_id> <x_center> <y_center> <width> <height>`).
pub fn convert_to_yolo_format(annotations: &[AnnotationRecord], class_map: &ClassMap) -> String {
    let mut yolo_data = String::with_capacity(annotations.len() * 48);

    for annotation in annotations {
        let class_id = match class_map.class_id(&annotation.eppo_code) {
            Some(class_id) => class_id,
            None => continue,
        };
        let bbox = &annotation.bbox;
        yolo_data.push_str(&format!(
            "{} {:.6} {:.6} {:.6} {:.6}\n",
            class_id, bbox.x_center, bbox.y_center, bbox.width, bbox.height
        ));
    }

    yolo_data
}
