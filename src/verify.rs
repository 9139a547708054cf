//! Sanity checks on a materialized dataset before handing it to a trainer.

use glob::glob;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ExtractError, Result};
use crate::io::DatasetYaml;
use crate::types::{get_image_extensions_set, Split};

/// Findings for one split directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitReport {
    pub images: usize,
    pub labels: usize,
    pub annotations: usize,
    pub missing_labels: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifyReport {
    pub classes: usize,
    pub train: SplitReport,
    pub val: SplitReport,
    pub test: Option<SplitReport>,
    /// Human-readable descriptions of every problem found
    pub problems: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn log(&self) {
        info!("Dataset has {} classes", self.classes);
        let splits = [
            ("train", Some(&self.train)),
            ("val", Some(&self.val)),
            ("test", self.test.as_ref()),
        ];
        for (name, report) in splits {
            if let Some(report) = report {
                info!(
                    "  {}: {} images, {} label files, {} annotations",
                    name, report.images, report.labels, report.annotations
                );
            }
        }
        for problem in &self.problems {
            warn!("{}", problem);
        }
    }
}

/// Label directory name Ultralytics derives from `images/`.
pub const DEFAULT_LABELS_DIR: &str = "labels";

/// Load `dataset.yaml` and check every split it points at, with labels under
/// the default `labels/` directory.
pub fn verify_dataset(dataset_yaml: &Path) -> Result<VerifyReport> {
    verify_dataset_with_labels(dataset_yaml, DEFAULT_LABELS_DIR)
}

/// Like [`verify_dataset`], for datasets written with a custom
/// `structure.labels_dir`.
pub fn verify_dataset_with_labels(dataset_yaml: &Path, labels_dir: &str) -> Result<VerifyReport> {
    if !dataset_yaml.exists() {
        return Err(ExtractError::Verification(format!(
            "dataset YAML file not found: {}",
            dataset_yaml.display()
        )));
    }
    let yaml = DatasetYaml::load(dataset_yaml)?;
    let mut report = VerifyReport {
        classes: yaml.names.len(),
        ..VerifyReport::default()
    };

    if let Some(nc) = yaml.nc {
        if nc != yaml.names.len() {
            report.problems.push(format!(
                "nc is {} but {} class names are listed",
                nc,
                yaml.names.len()
            ));
        }
    }

    for split in Split::ALL {
        let Some(images_dir) = yaml.split_path(split) else {
            continue;
        };
        let split_report = verify_split(
            &images_dir,
            labels_dir,
            yaml.names.len(),
            &mut report.problems,
        )?;
        match split {
            Split::Train => report.train = split_report,
            Split::Val => report.val = split_report,
            Split::Test => report.test = Some(split_report),
        }
    }

    if report.train.images == 0 {
        report
            .problems
            .push("training split contains no images".to_string());
    }

    Ok(report)
}

/// `<root>/<images>/<split>/x.jpg` pairs with `<root>/<labels_dir>/<split>/x.txt`.
pub fn label_path_for(image_path: &Path, labels_dir: &str) -> Option<PathBuf> {
    let split_dir = image_path.parent()?;
    let images_dir = split_dir.parent()?;
    let root = images_dir.parent()?;
    let split_labels = root.join(labels_dir).join(split_dir.file_name()?);
    Some(split_labels.join(image_path.file_stem()?).with_extension("txt"))
}

fn verify_split(
    images_dir: &Path,
    labels_dir: &str,
    classes: usize,
    problems: &mut Vec<String>,
) -> Result<SplitReport> {
    let mut report = SplitReport::default();
    if !images_dir.is_dir() {
        problems.push(format!(
            "split directory does not exist: {}",
            images_dir.display()
        ));
        return Ok(report);
    }

    let pattern = format!("{}/*", images_dir.display());
    let entries = glob(&pattern)
        .map_err(|e| ExtractError::Verification(format!("bad glob pattern {}: {}", pattern, e)))?;
    let extensions = get_image_extensions_set();

    for image_path in entries.filter_map(|entry| entry.ok()) {
        let is_image = image_path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.contains(&ext.to_lowercase()));
        if !is_image {
            continue;
        }
        report.images += 1;

        let Some(label_path) = label_path_for(&image_path, labels_dir) else {
            continue;
        };
        if !label_path.exists() {
            report.missing_labels.push(image_path.clone());
            problems.push(format!("missing label file for {}", image_path.display()));
            continue;
        }
        report.labels += 1;

        let content = fs::read_to_string(&label_path)?;
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match check_label_line(line, classes) {
                Ok(()) => report.annotations += 1,
                Err(reason) => problems.push(format!(
                    "{}:{}: {}",
                    label_path.display(),
                    line_no + 1,
                    reason
                )),
            }
        }
    }

    Ok(report)
}

/// Validate one `<class_id> <x_center> <y_center> <width> <height>` line.
pub fn check_label_line(line: &str, classes: usize) -> std::result::Result<(), String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!("expected 5 fields, found {}", fields.len()));
    }
    let class_id: usize = fields[0]
        .parse()
        .map_err(|_| format!("invalid class id '{}'", fields[0]))?;
    if class_id >= classes {
        return Err(format!(
            "class id {} out of range for {} classes",
            class_id, classes
        ));
    }
    for field in &fields[1..] {
        let value: f64 = field
            .parse()
            .map_err(|_| format!("invalid coordinate '{}'", field))?;
        if !(0.0..=1.0).contains(&value) {
            return Err(format!("coordinate {} outside [0, 1]", value));
        }
    }
    Ok(())
}
