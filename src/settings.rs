//! YAML run configuration.
//!
//! A config file has `database`, `dataset` and `paths` blocks and may pull in
//! a base file with `inherit: <path>`. The loaded [`Settings`] value is built
//! once at startup and passed explicitly to every stage.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ExtractError, Result};
use crate::psez::PsezPolicy;
use crate::types::Split;

const PROBABILITY_TOLERANCE: f64 = 1e-6;
const INHERIT_KEY: &str = "inherit";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub paths: PathSettings,
}

impl Settings {
    /// Load a config file, resolving `inherit` chains.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading configuration from {}", path.display());
        let value = load_yaml_value(path, &mut Vec::new())?;
        Ok(serde_yaml::from_value(value)?)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

fn load_yaml_value(path: &Path, chain: &mut Vec<PathBuf>) -> Result<Value> {
    let read_error = |source: std::io::Error| ExtractError::ConfigRead {
        path: path.to_path_buf(),
        source,
    };
    let canonical = fs::canonicalize(path).map_err(read_error)?;
    if chain.contains(&canonical) {
        return Err(ExtractError::Configuration(format!(
            "circular inherit chain at {}",
            path.display()
        )));
    }
    chain.push(canonical);

    let content = fs::read_to_string(path).map_err(read_error)?;
    let mut value: Value = serde_yaml::from_str(&content)?;

    let inherit = match &mut value {
        Value::Mapping(mapping) => mapping.remove(INHERIT_KEY),
        _ => None,
    };

    match inherit {
        Some(Value::String(inherit_path)) => {
            let mut base_path = PathBuf::from(&inherit_path);
            if base_path.is_relative() {
                if let Some(dir) = path.parent() {
                    base_path = dir.join(base_path);
                }
            }
            debug!("{} inherits {}", path.display(), base_path.display());
            let base = load_yaml_value(&base_path, chain)?;
            Ok(merge_values(base, value))
        }
        Some(other) => Err(ExtractError::Configuration(format!(
            "'inherit' must be a path, got {:?}",
            other
        ))),
        None => Ok(value),
    }
}

/// Deep-merge two YAML documents; `overlay` wins on conflicts.
pub fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}

fn default_blacklist_plant_ids() -> Vec<i64> {
    vec![-12, -7, 0, 148, 150, 151, 994]
}

/// Connection parameters of the annotation database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Plant ids whose annotations never enter a training set
    #[serde(default = "default_blacklist_plant_ids")]
    pub blacklist_plant_ids: Vec<i64>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            driver: String::new(),
            server: String::new(),
            name: String::new(),
            user: String::new(),
            password: String::new(),
            blacklist_plant_ids: default_blacklist_plant_ids(),
        }
    }
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "DRIVER={{{}}};SERVER={};DATABASE={};UID={};PWD={};",
            self.driver, self.server, self.name, self.user, self.password
        )
    }

    /// Connection string safe for logs.
    pub fn redacted_connection_string(&self) -> String {
        format!(
            "DRIVER={{{}}};SERVER={};DATABASE={};UID={};PWD=********;",
            self.driver, self.server, self.name, self.user
        )
    }

    /// SQL that produces the rows consumed by the export record source.
    pub fn annotation_query(&self) -> String {
        let blacklist = self
            .blacklist_plant_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let blacklist_clause = if blacklist.is_empty() {
            String::new()
        } else {
            format!("\n    AND [data].[AnnotationData].[PlantId] NOT IN ({})", blacklist)
        };

        format!(
            "SELECT
    [data].[AnnotationData].[Id],
    [UploadId],
    [FileName],
    [ImageId],
    [PlantId],
    TRIM([data].[PlantInfo].[EPPOCode]) AS EPPOCode,
    [Width],
    [Height],
    [MinX],
    [MinY],
    [MaxX],
    [MaxY],
    [UseForTraining],
    [GrownWeed],
    [cotyledon]
FROM
    [data].[Images]
    INNER JOIN [data].[Annotations] ON ([data].[Annotations].[ImageId] = [data].[Images].[Id])
    LEFT JOIN [data].[AnnotationData] ON ([data].[AnnotationData].[AnnotationId] = [data].[Images].[Id])
    LEFT JOIN [data].[PlantInfo] ON ([AnnotationData].[PlantId] = [data].[PlantInfo].[Id])
    LEFT JOIN [data].[Uploads] ON ([data].[Images].[UploadId] = [data].[Uploads].[Id])
WHERE
    [data].[Images].[IsDeleted] = 0
    AND [data].[Uploads].[IsDeleted] = 0
    AND ([data].[AnnotationData].IsTemporary = 0 OR [data].[AnnotationData].IsTemporary IS NULL)
    AND [data].[Annotations].[UseForTraining] = 1{}",
            blacklist_clause
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathSettings {
    /// Root of the image store; images live at `<rwm_data>/<upload_id>/<file_name>`
    #[serde(default)]
    pub rwm_data: PathBuf,
    /// Exported result of [`DatabaseSettings::annotation_query`]
    #[serde(default)]
    pub annotation_export: PathBuf,
}

impl PathSettings {
    pub fn image_path(&self, upload_id: i64, file_name: &str) -> PathBuf {
        self.rwm_data.join(upload_id.to_string()).join(file_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitProbabilities {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl Default for SplitProbabilities {
    fn default() -> Self {
        Self {
            train: 0.8,
            val: 0.1,
            test: 0.1,
        }
    }
}

impl SplitProbabilities {
    pub fn validate(&self) -> Result<()> {
        for (split, p) in [
            (Split::Train, self.train),
            (Split::Val, self.val),
            (Split::Test, self.test),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ExtractError::Configuration(format!(
                    "split probability for {} must be between 0.0 and 1.0, got {}",
                    split, p
                )));
            }
        }
        let sum = self.train + self.val + self.test;
        if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(ExtractError::Configuration(format!(
                "split probabilities must sum to 1.0, got {}",
                sum
            )));
        }
        Ok(())
    }
}

/// Explicit split overrides by upload id and by image id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixedSets {
    #[serde(default)]
    pub train_uploads: BTreeSet<i64>,
    #[serde(default)]
    pub val_uploads: BTreeSet<i64>,
    #[serde(default)]
    pub test_uploads: BTreeSet<i64>,
    #[serde(default)]
    pub train_images: BTreeSet<i64>,
    #[serde(default)]
    pub val_images: BTreeSet<i64>,
    #[serde(default)]
    pub test_images: BTreeSet<i64>,
}

impl FixedSets {
    pub fn images(&self, split: Split) -> &BTreeSet<i64> {
        match split {
            Split::Train => &self.train_images,
            Split::Val => &self.val_images,
            Split::Test => &self.test_images,
        }
    }

    pub fn uploads(&self, split: Split) -> &BTreeSet<i64> {
        match split {
            Split::Train => &self.train_uploads,
            Split::Val => &self.val_uploads,
            Split::Test => &self.test_uploads,
        }
    }

    /// Highest-priority split whose image list names `image_id`.
    pub fn split_for_image(&self, image_id: i64) -> Option<Split> {
        Split::OVERRIDE_PRIORITY
            .into_iter()
            .find(|split| self.images(*split).contains(&image_id))
    }

    /// Highest-priority split whose upload list names `upload_id`.
    pub fn split_for_upload(&self, upload_id: i64) -> Option<Split> {
        Split::OVERRIDE_PRIORITY
            .into_iter()
            .find(|split| self.uploads(*split).contains(&upload_id))
    }

    /// Fail when an id appears under two splits of the same kind.
    pub fn check_disjoint(
        &self,
        kind: &str,
        sets: fn(&FixedSets, Split) -> &BTreeSet<i64>,
    ) -> Result<()> {
        for (i, a) in Split::ALL.iter().enumerate() {
            for b in &Split::ALL[i + 1..] {
                let overlap: Vec<_> = sets(self, *a)
                    .intersection(sets(self, *b))
                    .copied()
                    .collect();
                if !overlap.is_empty() {
                    return Err(ExtractError::Configuration(format!(
                        "{} ids {:?} are listed in both {}_{} and {}_{}",
                        kind, overlap, a, kind, b, kind
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryStructure {
    #[serde(default = "default_images_dir")]
    pub images_dir: String,
    #[serde(default = "default_labels_dir")]
    pub labels_dir: String,
    #[serde(default = "default_train_dir")]
    pub train_dir: String,
    #[serde(default = "default_val_dir")]
    pub val_dir: String,
    #[serde(default = "default_test_dir")]
    pub test_dir: String,
}

fn default_images_dir() -> String {
    "images".to_string()
}
fn default_labels_dir() -> String {
    "labels".to_string()
}
fn default_train_dir() -> String {
    "train".to_string()
}
fn default_val_dir() -> String {
    "val".to_string()
}
fn default_test_dir() -> String {
    "test".to_string()
}

impl Default for DirectoryStructure {
    fn default() -> Self {
        Self {
            images_dir: default_images_dir(),
            labels_dir: default_labels_dir(),
            train_dir: default_train_dir(),
            val_dir: default_val_dir(),
            test_dir: default_test_dir(),
        }
    }
}

impl DirectoryStructure {
    pub fn split_dir(&self, split: Split) -> &str {
        match split {
            Split::Train => &self.train_dir,
            Split::Val => &self.val_dir,
            Split::Test => &self.test_dir,
        }
    }
}

fn default_yaml_filename() -> String {
    "dataset.yaml".to_string()
}

fn default_image_size() -> u32 {
    1280
}

/// Everything the planning stage needs to decide splits and labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub copy_images: bool,
    #[serde(default = "default_yaml_filename")]
    pub yaml_filename: String,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    #[serde(default)]
    pub split_probabilities: SplitProbabilities,
    #[serde(default)]
    pub fixed_sets: FixedSets,
    #[serde(default)]
    pub held_back_images: BTreeSet<i64>,
    /// Ordered class list; a class id is the position of its code here
    pub eppo_codes: Vec<String>,
    #[serde(default)]
    pub psez_crops: BTreeSet<String>,
    #[serde(default)]
    pub psez_policy: PsezPolicy,
    /// Send grown-weed images without a fixed split to train
    #[serde(default)]
    pub grown_weed_to_train: bool,
    /// Drop annotations with unknown EPPO codes instead of failing
    #[serde(default)]
    pub drop_unknown_eppo: bool,
    #[serde(default)]
    pub structure: DirectoryStructure,
}

/// Non-fatal configuration findings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A held-back image is also listed in a fixed set; exclusion wins
    ExclusionConflict { image_id: i64, split: Split },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::ExclusionConflict { image_id, split } => write!(
                f,
                "image {} is held back but also listed in {}_images; it will be excluded",
                image_id, split
            ),
        }
    }
}

impl DatasetConfig {
    /// Check the configuration before any record is touched.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>> {
        self.split_probabilities.validate()?;

        if self.eppo_codes.is_empty() {
            return Err(ExtractError::Configuration(
                "eppo_codes must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for code in &self.eppo_codes {
            if !seen.insert(code.as_str()) {
                return Err(ExtractError::Configuration(format!(
                    "duplicate EPPO code '{}' in eppo_codes",
                    code
                )));
            }
        }
        for crop in &self.psez_crops {
            if !seen.contains(crop.as_str()) {
                return Err(ExtractError::Configuration(format!(
                    "psez_crops references '{}', which is not in eppo_codes",
                    crop
                )));
            }
        }

        self.fixed_sets.check_disjoint("images", FixedSets::images)?;
        self.fixed_sets.check_disjoint("uploads", FixedSets::uploads)?;

        let mut warnings = Vec::new();
        for &image_id in &self.held_back_images {
            if let Some(split) = self.fixed_sets.split_for_image(image_id) {
                warnings.push(ConfigWarning::ExclusionConflict { image_id, split });
            }
        }
        Ok(warnings)
    }

    pub fn split_images_dir(&self, split: Split) -> PathBuf {
        self.output_dir
            .join(&self.structure.images_dir)
            .join(self.structure.split_dir(split))
    }

    pub fn split_labels_dir(&self, split: Split) -> PathBuf {
        self.output_dir
            .join(&self.structure.labels_dir)
            .join(self.structure.split_dir(split))
    }
}
