use clap::Parser;
use log::{error, info};
use std::process::ExitCode;

use rwm_dataset_tools::train::{build_train_command, TrainOptions};
use rwm_dataset_tools::verify::{verify_dataset_with_labels, DEFAULT_LABELS_DIR};
use rwm_dataset_tools::ExtractError;

/// Train a YOLO detector on an extracted RWM dataset.
#[derive(Parser, Debug)]
#[command(version, long_about = None)]
struct Cli {
    #[command(flatten)]
    train: TrainOptions,

    /// Label directory name used when the dataset was extracted
    #[arg(long = "labels-dir", default_value = DEFAULT_LABELS_DIR)]
    labels_dir: String,

    /// Launch without checking the dataset first
    #[arg(long = "skip-verify")]
    skip_verify: bool,

    /// Print the trainer command and exit
    #[arg(long = "dry-run")]
    dry_run: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> rwm_dataset_tools::Result<ExitCode> {
    if !cli.skip_verify {
        info!("Verifying dataset {}", cli.train.data.display());
        let report = verify_dataset_with_labels(&cli.train.data, &cli.labels_dir)?;
        report.log();
        if !report.is_ok() {
            return Err(ExtractError::Verification(format!(
                "{} problem(s) found in {}",
                report.problems.len(),
                cli.train.data.display()
            )));
        }
    }

    let command = build_train_command(&cli.train);
    if cli.dry_run {
        println!("{}", command.display());
        return Ok(ExitCode::SUCCESS);
    }

    info!("Launching: {}", command.display());
    let status = command.run()?;
    if status.success() {
        info!("Training completed. Results saved under {}", cli.train.project.display());
        Ok(ExitCode::SUCCESS)
    } else {
        error!("Trainer exited with {}", status);
        Ok(ExitCode::FAILURE)
    }
}
