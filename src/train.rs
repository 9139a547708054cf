//! Launching the Ultralytics trainer on an extracted dataset.

use clap::Args as ClapArgs;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

/// Training run options; defaults follow the production YOLOv11 recipe.
#[derive(ClapArgs, Debug, Clone)]
pub struct TrainOptions {
    /// Path to the dataset YAML produced by rwm-extract
    #[arg(long, default_value = "/fast_data/rwm_dataset_yolov11/dataset.yaml")]
    pub data: PathBuf,

    /// Model weights to start from
    #[arg(long, default_value = "/fast_data/rwm_dataset_yolov11/models/yolo11x.pt")]
    pub model: PathBuf,

    /// Number of training epochs
    #[arg(long, default_value_t = 300)]
    pub epochs: u32,

    /// Batch size
    #[arg(long = "batch-size", default_value_t = 6)]
    pub batch_size: u32,

    /// Training image size
    #[arg(long = "img-size", default_value_t = 1280)]
    pub img_size: u32,

    /// Device(s) to train on, comma-separated
    #[arg(long, default_value = "0")]
    pub device: String,

    /// Number of dataloader workers
    #[arg(long, default_value_t = 8)]
    pub workers: u32,

    /// Name of the training run
    #[arg(long, default_value = "yolov11_rwm")]
    pub name: String,

    /// Directory the trainer writes runs into
    #[arg(long, default_value = "runs/detection/")]
    pub project: PathBuf,

    /// Trainer executable
    #[arg(long = "yolo-bin", default_value = "yolo")]
    pub yolo_bin: PathBuf,
}

/// Fixed hyperparameters and augmentations of the production recipe.
const RECIPE: &[(&str, &str)] = &[
    ("verbose", "True"),
    ("augment", "True"),
    ("val", "True"),
    ("save_period", "50"),
    ("close_mosaic", "0"),
    ("patience", "0"),
    ("cache", "False"),
    ("rect", "True"),
    ("max_det", "1500"),
    ("cls", "1.0"),
    ("optimizer", "auto"),
    ("hsv_h", "0.1"),
    ("hsv_s", "0.3"),
    ("hsv_v", "0.3"),
    ("degrees", "5.0"),
    ("translate", "0.1"),
    ("scale", "0.15"),
    ("flipud", "0.5"),
    ("fliplr", "0.5"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl TrainCommand {
    /// Shell-style rendering for logs and `--dry-run`.
    pub fn display(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }

    pub fn run(&self) -> std::io::Result<ExitStatus> {
        Command::new(&self.program).args(&self.args).status()
    }
}

/// Render `yolo detect train key=value ...` for the given options.
pub fn build_train_command(opts: &TrainOptions) -> TrainCommand {
    let device = if opts.device.contains(',') {
        format!("[{}]", opts.device)
    } else {
        opts.device.clone()
    };

    let mut args = vec!["detect".to_string(), "train".to_string()];
    let mut push = |key: &str, value: String| args.push(format!("{}={}", key, value));
    push("data", opts.data.display().to_string());
    push("model", opts.model.display().to_string());
    push("epochs", opts.epochs.to_string());
    push("workers", opts.workers.to_string());
    push("imgsz", opts.img_size.to_string());
    push("batch", opts.batch_size.to_string());
    push("device", device);
    push("project", opts.project.display().to_string());
    push("name", opts.name.clone());
    for (key, value) in RECIPE {
        push(key, value.to_string());
    }

    TrainCommand {
        program: opts.yolo_bin.clone(),
        args,
    }
}
