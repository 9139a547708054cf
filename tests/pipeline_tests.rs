use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

use rwm_dataset_tools::io::{DatasetYaml, ExtractionManifest, MANIFEST_FILENAME};
use rwm_dataset_tools::verify::{verify_dataset, verify_dataset_with_labels};
use rwm_dataset_tools::*;

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _temp_dir: tempfile::TempDir,
        root: PathBuf,
        settings: Settings,
    }

    fn annotation_row(
        image_id: i64,
        upload_id: i64,
        file_name: &str,
        eppo: Option<&str>,
        pixels: Option<[f64; 4]>,
    ) -> Value {
        let [min_x, min_y, max_x, max_y] = match pixels {
            Some(p) => p.map(Value::from),
            None => [Value::Null, Value::Null, Value::Null, Value::Null],
        };
        json!({
            "Id": image_id * 100,
            "UploadId": upload_id,
            "FileName": file_name,
            "ImageId": image_id,
            "PlantId": 1,
            "EPPOCode": eppo,
            "Width": 1000,
            "Height": 1000,
            "MinX": min_x,
            "MinY": min_y,
            "MaxX": max_x,
            "MaxY": max_y,
            "UseForTraining": true,
            "GrownWeed": false,
            "cotyledon": null
        })
    }

    fn write_image(rwm_data: &Path, upload_id: i64, file_name: &str) {
        let dir = rwm_data.join(upload_id.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file_name), format!("image bytes {}", file_name)).unwrap();
    }

    /// Six images exercising every split rule; image 5 has no file on disk.
    fn fixture(copy_images: bool) -> Fixture {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().to_path_buf();
        let rwm_data = root.join("rwm_data");

        let rows = json!([
            annotation_row(3, 999, "img_3.jpg", Some("PSEZ"), Some([400.0, 400.0, 500.0, 500.0])),
            annotation_row(3, 999, "img_3.jpg", Some("ZEAMX"), Some([300.0, 300.0, 700.0, 700.0])),
            annotation_row(1, 10, "img_1.jpg", Some("CHEAL"), Some([0.0, 0.0, 500.0, 250.0])),
            annotation_row(4, 10, "img_4.png", Some("SOLTU1"), Some([100.0, 100.0, 300.0, 300.0])),
            annotation_row(4, 10, "img_4.png", Some("PSEZ"), Some([150.0, 150.0, 200.0, 200.0])),
            annotation_row(5, 11, "img_5.jpg", Some("CHEAL"), Some([0.0, 0.0, 100.0, 100.0])),
            annotation_row(6, 13, "img_6.jpg", Some("CHEAL"), Some([0.0, 0.0, 100.0, 100.0])),
            annotation_row(7, 12, "img_7.jpg", None, None),
        ]);
        let export = root.join("export.json");
        fs::write(&export, serde_json::to_string_pretty(&rows).unwrap()).unwrap();

        write_image(&rwm_data, 999, "img_3.jpg");
        write_image(&rwm_data, 10, "img_1.jpg");
        write_image(&rwm_data, 10, "img_4.png");
        write_image(&rwm_data, 13, "img_6.jpg");
        write_image(&rwm_data, 12, "img_7.jpg");

        let config_path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/models/yolov11.yaml");
        let mut settings = Settings::load(&config_path).unwrap();
        settings.paths.rwm_data = rwm_data;
        settings.paths.annotation_export = export;
        settings.dataset.output_dir = root.join("dataset");
        settings.dataset.copy_images = copy_images;
        let fixed = &mut settings.dataset.fixed_sets;
        fixed.train_images.insert(1);
        fixed.test_images.insert(3);
        fixed.val_images.insert(4);
        fixed.val_uploads.insert(11);
        fixed.train_uploads.insert(12);
        settings.dataset.held_back_images.insert(6);

        Fixture {
            _temp_dir: temp_dir,
            root,
            settings,
        }
    }

    fn run_info() -> RunInfo {
        RunInfo {
            format: Format::Yolov11.to_string(),
            seed: 42,
            source: "test export".to_string(),
        }
    }

    fn extract(fixture: &Fixture) -> (DatasetPlan, ExtractionStats) {
        let rows = ExportSource::new(&fixture.settings.paths.annotation_export)
            .fetch()
            .unwrap();
        let plan = plan_dataset(&rows, &fixture.settings.dataset, 42).unwrap();
        let stats = process_dataset(&plan, &fixture.settings, &run_info()).unwrap();
        (plan, stats)
    }

    fn label_line(class_map: &ClassMap, code: &str, rest: &str) -> String {
        format!("{} {}\n", class_map.class_id(code).unwrap(), rest)
    }

    #[test]
    fn test_plan_follows_split_rules() {
        let fixture = fixture(true);
        let rows = ExportSource::new(&fixture.settings.paths.annotation_export)
            .fetch()
            .unwrap();
        let plan = plan_dataset(&rows, &fixture.settings.dataset, 42).unwrap();

        assert_eq!(plan.split_of(1), Some(Split::Train));
        assert_eq!(plan.split_of(3), Some(Split::Test));
        assert_eq!(plan.split_of(4), Some(Split::Val));
        assert_eq!(plan.split_of(5), Some(Split::Val));
        assert_eq!(plan.split_of(6), None);
        assert_eq!(plan.split_of(7), Some(Split::Train));
        assert_eq!(plan.excluded_images, 1);
        assert_eq!(plan.psez_dropped, 1);
        assert_eq!(plan.incomplete_rows, 1);
        assert_eq!(plan.unknown_dropped, 0);

        // PSEZ next to maize survives untouched
        let test_image = plan.images_in(Split::Test).next().unwrap();
        let codes: Vec<&str> = test_image
            .record
            .annotations
            .iter()
            .map(|a| a.eppo_code.as_str())
            .collect();
        assert_eq!(codes, vec!["PSEZ", "ZEAMX"]);
    }

    #[test]
    fn test_extraction_writes_yolo_dataset() {
        let fixture = fixture(true);
        let (_, stats) = extract(&fixture);
        let output = &fixture.settings.dataset.output_dir;
        let class_map = ClassMap::new(&fixture.settings.dataset.eppo_codes).unwrap();

        assert_eq!(stats.total_images, 5);
        assert_eq!(stats.train_images, 2);
        assert_eq!(stats.val_images, 1);
        assert_eq!(stats.test_images, 1);
        assert_eq!(stats.skipped_images, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.test_annotations, 2);
        assert_eq!(stats.total_annotations, 4);

        let test_label = fs::read_to_string(output.join("labels/test/3.txt")).unwrap();
        let expected = label_line(&class_map, "PSEZ", "0.450000 0.450000 0.100000 0.100000")
            + &label_line(&class_map, "ZEAMX", "0.500000 0.500000 0.400000 0.400000");
        assert_eq!(test_label, expected);

        let val_label = fs::read_to_string(output.join("labels/val/4.txt")).unwrap();
        assert_eq!(
            val_label,
            label_line(&class_map, "SOLTU", "0.200000 0.200000 0.200000 0.200000")
        );

        let empty_label = fs::read_to_string(output.join("labels/train/7.txt")).unwrap();
        assert!(empty_label.is_empty());

        assert!(output.join("images/val/4.png").exists());
        assert!(!output.join("images/val/5.jpg").exists());
        assert!(!output.join("images/train/6.jpg").exists());
        assert_eq!(
            fs::read_to_string(output.join("images/train/1.jpg")).unwrap(),
            "image bytes img_1.jpg"
        );
    }

    #[test]
    fn test_dataset_yaml_and_manifest() {
        let fixture = fixture(true);
        let (plan, stats) = extract(&fixture);
        let output = &fixture.settings.dataset.output_dir;

        let dataset_yaml = DatasetYaml::load(&output.join("dataset.yaml")).unwrap();
        assert_eq!(dataset_yaml.path, fs::canonicalize(output).unwrap());
        assert_eq!(dataset_yaml.train, "images/train");
        assert_eq!(dataset_yaml.val, "images/val");
        assert_eq!(dataset_yaml.test.as_deref(), Some("images/test"));
        assert_eq!(dataset_yaml.nc, Some(fixture.settings.dataset.eppo_codes.len()));
        assert_eq!(dataset_yaml.names, fixture.settings.dataset.eppo_codes);

        let manifest_file = fs::File::open(output.join(MANIFEST_FILENAME)).unwrap();
        let manifest: ExtractionManifest = serde_json::from_reader(manifest_file).unwrap();
        assert_eq!(manifest.seed, 42);
        assert_eq!(manifest.format, "yolov11");
        assert_eq!(manifest.image_size, 1280);
        assert_eq!(manifest.excluded_images, plan.excluded_images);
        assert_eq!(manifest.psez_dropped, 1);
        assert_eq!(manifest.stats, stats);
    }

    #[test]
    fn test_extracted_dataset_verifies() {
        let fixture = fixture(true);
        extract(&fixture);

        let report = verify_dataset(&fixture.settings.dataset.output_dir.join("dataset.yaml")).unwrap();
        assert!(report.is_ok(), "problems: {:?}", report.problems);
        assert_eq!(report.classes, fixture.settings.dataset.eppo_codes.len());
        assert_eq!(report.train.images, 2);
        assert_eq!(report.train.labels, 2);
        assert_eq!(report.val.annotations, 1);
        assert_eq!(report.test.map(|t| t.annotations), Some(2));
    }

    #[test]
    fn test_verify_reports_missing_label() {
        let fixture = fixture(true);
        extract(&fixture);
        let output = &fixture.settings.dataset.output_dir;
        fs::remove_file(output.join("labels/test/3.txt")).unwrap();

        let report = verify_dataset(&output.join("dataset.yaml")).unwrap();
        assert!(!report.is_ok());
        assert_eq!(
            report.test.unwrap().missing_labels,
            vec![fs::canonicalize(output).unwrap().join("images/test/3.jpg")]
        );
    }

    #[test]
    fn test_verify_custom_labels_dir() {
        let mut fixture = fixture(true);
        fixture.settings.dataset.structure.labels_dir = "annotations".to_string();
        extract(&fixture);
        let output = &fixture.settings.dataset.output_dir;
        assert!(output.join("annotations/test/3.txt").exists());

        let report = verify_dataset_with_labels(&output.join("dataset.yaml"), "annotations").unwrap();
        assert!(report.is_ok(), "problems: {:?}", report.problems);
        assert_eq!(report.train.labels, 2);

        let report = verify_dataset(&output.join("dataset.yaml")).unwrap();
        assert!(!report.is_ok());
    }

    #[test]
    fn test_verify_missing_yaml() {
        let fixture = fixture(true);
        let err = verify_dataset(&fixture.root.join("nope/dataset.yaml")).unwrap_err();
        assert!(matches!(err, ExtractError::Verification(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_point_at_source_images() {
        let fixture = fixture(false);
        extract(&fixture);
        let link = fixture.settings.dataset.output_dir.join("images/test/3.jpg");

        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
        let target = fs::read_link(&link).unwrap();
        assert!(target.is_absolute());
        assert_eq!(
            target,
            fs::canonicalize(fixture.root.join("rwm_data/999/img_3.jpg")).unwrap()
        );
    }

    #[test]
    fn test_rerun_replaces_previous_output() {
        let fixture = fixture(true);
        extract(&fixture);
        let output = fixture.settings.dataset.output_dir.clone();
        let first = fs::read_to_string(output.join("labels/test/3.txt")).unwrap();

        // a stale file from an older partition must not survive a rerun
        fs::write(output.join("labels/val/3.txt"), "0 0.5 0.5 0.1 0.1\n").unwrap();
        let (_, stats) = extract(&fixture);

        assert_eq!(stats.errors, 0);
        assert!(!output.join("labels/val/3.txt").exists());
        assert_eq!(fs::read_to_string(output.join("labels/test/3.txt")).unwrap(), first);
    }

    #[test]
    fn test_unknown_eppo_fails_extraction() {
        let mut fixture = fixture(true);
        let mut rows = ExportSource::new(&fixture.settings.paths.annotation_export)
            .fetch()
            .unwrap();
        rows[0].eppo_code = Some("AVESA".to_string());

        let err = plan_dataset(&rows, &fixture.settings.dataset, 42).unwrap_err();
        assert!(matches!(err, ExtractError::DataIntegrity(_)));

        fixture.settings.dataset.drop_unknown_eppo = true;
        let plan = plan_dataset(&rows, &fixture.settings.dataset, 42).unwrap();
        assert_eq!(plan.unknown_dropped, 1);
    }
}
