use clap::Parser;
use log::{error, info};
use std::process::ExitCode;

use rwm_dataset_tools::source::SourceReport;
use rwm_dataset_tools::{
    plan_dataset, process_dataset, utils, Args, ExportSource, RecordSource, RunInfo, Settings,
};

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = utils::init_logging(args.log_level, args.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Dataset extraction failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> rwm_dataset_tools::Result<()> {
    info!("RWM Dataset Extraction Tool - Starting");
    info!("Config file: {}", args.config.display());
    info!("Output format: {}", args.format);
    info!("Random seed: {}", args.seed);

    let mut settings = Settings::load(&args.config)?;

    if args.print_query {
        println!("{}", settings.database.annotation_query());
        return Ok(());
    }

    settings.dataset.output_dir = args.resolve_output_dir();
    settings.dataset.copy_images |= args.copy_images;
    info!("Output directory: {}", settings.dataset.output_dir.display());
    if settings.dataset.copy_images {
        info!("Images will be copied instead of symlinked");
    }
    if !settings.database.server.is_empty() {
        info!(
            "Database: {}",
            settings.database.redacted_connection_string()
        );
    }

    let source = ExportSource::new(&settings.paths.annotation_export);
    info!("Fetching annotation data from {}...", source.describe());
    let rows = source.fetch()?;
    if rows.is_empty() {
        return Err(rwm_dataset_tools::ExtractError::Source(
            "no annotations found; ensure UseForTraining is set for images in the database"
                .to_string(),
        ));
    }

    if args.debug_db || args.dry_run {
        SourceReport::from_rows(&rows).log();
    }

    let plan = plan_dataset(&rows, &settings.dataset, args.seed)?;
    plan.log_summary();

    if args.dry_run {
        info!("Dry run completed. Exiting without creating dataset.");
        return Ok(());
    }

    let run_info = RunInfo {
        format: args.format.to_string(),
        seed: args.seed,
        source: source.describe(),
    };
    let stats = process_dataset(&plan, &settings, &run_info)?;
    stats.print_summary();
    info!(
        "Dataset created in: {}",
        settings.dataset.output_dir.display()
    );
    Ok(())
}
