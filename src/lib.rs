//! RoboWeedMaps dataset tools
//!
//! This library turns training annotations exported from the RoboWeedMaps
//! database into a YOLO dataset (`images/` and `labels/` split into train, val
//! and test) and launches training on the result.

pub mod config;
pub mod conversion;
pub mod dataset;
pub mod error;
pub mod io;
pub mod labels;
pub mod psez;
pub mod settings;
pub mod source;
pub mod split;
pub mod train;
pub mod types;
pub mod utils;
pub mod verify;
pub mod yolo_dataset;

// Re-export commonly used types and functions
pub use config::{Args, Format};
pub use dataset::{plan_dataset, plan_images, DatasetPlan, PlannedImage};
pub use error::{ExtractError, Result};
pub use labels::ClassMap;
pub use psez::{remap_psez, PsezPolicy, PsezRemapper};
pub use settings::{DatasetConfig, Settings};
pub use source::{ExportSource, RecordSource};
pub use split::{assign, Assignment, SplitAssigner};
pub use types::{AnnotationRecord, AnnotationRow, BBox, ExtractionStats, ImageRecord, Split};
pub use yolo_dataset::{process_dataset, RunInfo};
