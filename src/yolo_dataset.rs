use chrono::Utc;
use dashmap::DashMap;
use log::info;

use crate::conversion::{process_images_in_parallel, ImagePlacement};
use crate::dataset::{DatasetPlan, PlannedImage};
use crate::error::Result;
use crate::io::{create_dataset_yaml, setup_output_directories, write_manifest, ExtractionManifest};
use crate::labels::ClassMap;
use crate::settings::Settings;
use crate::types::{ExtractionStats, Split};
use crate::utils::create_progress_bar;

/// Run metadata recorded in the manifest.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub format: String,
    pub seed: u64,
    pub source: String,
}

/// Write a planned dataset to disk: split directories, images, label files,
/// dataset.yaml and the extraction manifest.
pub fn process_dataset(
    plan: &DatasetPlan,
    settings: &Settings,
    run: &RunInfo,
) -> Result<ExtractionStats> {
    let config = &settings.dataset;
    let class_map = ClassMap::new(&config.eppo_codes)?;
    let placement = if config.copy_images {
        ImagePlacement::Copy
    } else {
        ImagePlacement::Symlink
    };

    info!(
        "Creating dataset files for {} images in {}",
        plan.images.len(),
        config.output_dir.display()
    );
    let output_dirs = setup_output_directories(config)?;
    let split_stats: DashMap<Split, ExtractionStats> = DashMap::new();

    for split in Split::ALL {
        let images: Vec<&PlannedImage> = plan.images_in(split).collect();
        if images.is_empty() {
            continue;
        }
        let label = match split {
            Split::Train => "Train",
            Split::Val => "Val",
            Split::Test => "Test",
        };
        let pb = create_progress_bar(images.len() as u64, label);
        process_images_in_parallel(
            &images,
            output_dirs.split(split),
            &settings.paths,
            &class_map,
            placement,
            &split_stats,
            &pb,
        );
        pb.finish_with_message(format!("{} processing complete", label));
    }

    let mut stats = ExtractionStats::new(plan.images.len());
    for split in Split::ALL {
        if let Some(partial) = split_stats.get(&split) {
            stats.merge(&partial);
        }
    }

    info!("Creating dataset YAML file...");
    let dataset_yaml = create_dataset_yaml(config, &class_map)?;
    info!(
        "Created dataset YAML file: {} (image size {})",
        dataset_yaml.display(),
        config.image_size
    );

    let manifest = ExtractionManifest {
        created_at: Utc::now(),
        format: run.format.clone(),
        seed: run.seed,
        source: run.source.clone(),
        dataset_yaml,
        image_size: config.image_size,
        excluded_images: plan.excluded_images,
        psez_dropped: plan.psez_dropped,
        unknown_dropped: plan.unknown_dropped,
        incomplete_rows: plan.incomplete_rows,
        stats: stats.clone(),
    };
    let manifest_path = write_manifest(&output_dirs.root, &manifest)?;
    info!("Wrote extraction manifest: {}", manifest_path.display());

    Ok(stats)
}
