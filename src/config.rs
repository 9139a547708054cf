use clap::{Parser, ValueEnum};
use log::LevelFilter;
use std::fmt;
use std::path::PathBuf;

/// Extract RoboWeedMaps annotations into a YOLO dataset.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config/models/yolov11.yaml")]
    pub config: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "yolov11")]
    pub format: Format,

    /// Output directory (overrides config)
    #[arg(long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Base directory for the default output directory
    #[arg(long = "output-base-dir", default_value = "/fast_data")]
    pub output_base_dir: PathBuf,

    /// Copy images instead of creating symlinks
    #[arg(long = "copy-images")]
    pub copy_images: bool,

    /// Seed for the split assignment
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Logging level (overrides RUST_LOG)
    #[arg(long = "log-level", value_parser = parse_level)]
    pub log_level: Option<LevelFilter>,

    /// Append log output to this file instead of stderr
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Report on the fetched records before extraction
    #[arg(long = "debug-db")]
    pub debug_db: bool,

    /// Build and report the split plan, then exit without writing files
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Print the SQL query whose export feeds the extraction, then exit
    #[arg(long = "print-query")]
    pub print_query: bool,
}

impl Args {
    /// Output directory for this run: the explicit override, else
    /// `<output_base_dir>/rwm_dataset_<format>`.
    pub fn resolve_output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => self
                .output_base_dir
                .join(format!("rwm_dataset_{}", self.format)),
        }
    }
}

// Enumeration for the YOLO dataset flavour
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum Format {
    Yolov5,
    Yolov11,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Yolov5 => "yolov5",
            Format::Yolov11 => "yolov11",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Accept DEBUG/INFO/WARNING/ERROR/CRITICAL as well as the log crate's names
fn parse_level(s: &str) -> Result<LevelFilter, String> {
    match s.to_ascii_uppercase().as_str() {
        "TRACE" => Ok(LevelFilter::Trace),
        "DEBUG" => Ok(LevelFilter::Debug),
        "INFO" => Ok(LevelFilter::Info),
        "WARN" | "WARNING" => Ok(LevelFilter::Warn),
        "ERROR" | "CRITICAL" => Ok(LevelFilter::Error),
        "OFF" => Ok(LevelFilter::Off),
        _ => Err(format!(
            "invalid log level '{}': expected DEBUG, INFO, WARNING, ERROR or CRITICAL",
            s
        )),
    }
}
