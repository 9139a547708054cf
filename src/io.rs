use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::conversion::SplitDirs;
use crate::error::Result;
use crate::labels::ClassMap;
use crate::settings::DatasetConfig;
use crate::types::{ExtractionStats, Split};
use crate::utils::create_output_directory;

pub const MANIFEST_FILENAME: &str = "extraction_manifest.json";

// Struct to hold the paths to the output directories for train/val/test splits
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub root: PathBuf,
    splits: BTreeMap<Split, SplitDirs>,
}

impl OutputDirs {
    pub fn split(&self, split: Split) -> &SplitDirs {
        // every split is created in setup_output_directories
        &self.splits[&split]
    }
}

/// Set up the directory structure for YOLO dataset output
///
/// Split directories from earlier runs are cleared so stale files cannot leak
/// into the new partition.
pub fn setup_output_directories(config: &DatasetConfig) -> std::io::Result<OutputDirs> {
    fs::create_dir_all(&config.output_dir)?;
    let mut splits = BTreeMap::new();
    for split in Split::ALL {
        let images_dir = create_output_directory(&config.split_images_dir(split))?;
        let labels_dir = create_output_directory(&config.split_labels_dir(split))?;
        splits.insert(
            split,
            SplitDirs {
                images_dir,
                labels_dir,
            },
        );
    }
    Ok(OutputDirs {
        root: config.output_dir.clone(),
        splits,
    })
}

/// Ultralytics dataset description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetYaml {
    pub path: PathBuf,
    pub train: String,
    pub val: String,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub nc: Option<usize>,
    pub names: Vec<String>,
}

impl DatasetYaml {
    pub fn new(config: &DatasetConfig, class_map: &ClassMap, root: PathBuf) -> Self {
        let split_path = |split: Split| {
            format!(
                "{}/{}",
                config.structure.images_dir,
                config.structure.split_dir(split)
            )
        };
        Self {
            path: root,
            train: split_path(Split::Train),
            val: split_path(Split::Val),
            test: Some(split_path(Split::Test)),
            nc: Some(class_map.len()),
            names: class_map.names().to_vec(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn split_path(&self, split: Split) -> Option<PathBuf> {
        let relative = match split {
            Split::Train => Some(&self.train),
            Split::Val => Some(&self.val),
            Split::Test => self.test.as_ref(),
        }?;
        Some(self.path.join(relative))
    }
}

/// Create the dataset.yaml file for YOLO training
pub fn create_dataset_yaml(config: &DatasetConfig, class_map: &ClassMap) -> Result<PathBuf> {
    let dataset_yaml_path = config.output_dir.join(&config.yaml_filename);
    let absolute_path = fs::canonicalize(&config.output_dir)?;
    let content = DatasetYaml::new(config, class_map, absolute_path);

    let mut writer = BufWriter::new(File::create(&dataset_yaml_path)?);
    serde_yaml::to_writer(&mut writer, &content)?;
    writer.flush()?;
    Ok(dataset_yaml_path)
}

/// Record of an extraction run, written next to dataset.yaml.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionManifest {
    pub created_at: DateTime<Utc>,
    pub format: String,
    pub seed: u64,
    pub source: String,
    pub dataset_yaml: PathBuf,
    pub image_size: u32,
    pub excluded_images: usize,
    pub psez_dropped: usize,
    pub unknown_dropped: usize,
    pub incomplete_rows: usize,
    pub stats: ExtractionStats,
}

pub fn write_manifest(output_dir: &Path, manifest: &ExtractionManifest) -> Result<PathBuf> {
    let path = output_dir.join(MANIFEST_FILENAME);
    let mut writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(&mut writer, manifest)?;
    writer.flush()?;
    Ok(path)
}
