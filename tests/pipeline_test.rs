//! End-to-end runs over a synthetic sensor tree.

use colocation_features::config::Config;
use colocation_features::orchestrator::{self, Modality, WorkerPool};
use colocation_features::MetadataBuilder;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;

const WIFI_01: &str = "\
aa -60dBm 2017-08-16T12:00:01.000000
bb -70dBm 2017-08-16T12:00:01.000000
aa -61dBm 2017-08-16T12:00:12.000000
Interface doesn't support scanning : Device or resource busy
wlan0     Interface doesn't support scanning.
2017-08-16T12:00:22.000000
aa -62dBm 2017-08-16T12:00:45.000000
";

const WIFI_02: &str = "\
aa -65dBm 2017-08-16T12:00:02.000000
cc -80dBm 2017-08-16T12:00:02.000000
bb -75dBm 2017-08-16T12:00:13.000000
aa -66dBm 2017-08-16T12:00:23.000000
";

const TEMP_01: &str = "\
21.5 2017-08-16T12:00:00.200000
21.6 2017-08-16T12:00:01.200000
21.7 2017-08-16T12:00:02.200000
";

const TEMP_02: &str = "\
21.0 2017-08-16T12:00:00.250000
21.6 2017-08-16T12:00:01.300000
22.7 2017-08-16T12:00:02.100000
";

// Recorded days later, never overlapping the others
const TEMP_03: &str = "\
20.0 2017-08-20T09:00:00.000000
20.1 2017-08-20T09:00:01.000000
";

const LUX_01: &str = "\
100.0 2017-08-16T12:00:00.000000
100.0 2017-08-16T12:00:06.000000
300.0 2017-08-16T12:00:11.000000
305.0 2017-08-16T12:00:16.000000
20.0 2017-08-16T12:00:21.000000
";

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn sensor_tree(root: &Path) {
    write(root, "Sensor-01/wifi/wifi.txt.blinded", WIFI_01);
    write(root, "Sensor-02/wifi/wifi.txt.blinded", WIFI_02);
    write(root, "Sensor-01/sensors/tmpData", TEMP_01);
    write(root, "Sensor-02/sensors/tmpData", TEMP_02);
    write(root, "Sensor-03/sensors/tmpData", TEMP_03);
    write(root, "Sensor-01/sensors/luxData", LUX_01);
}

fn config_for(root: &Path) -> Config {
    let mut config = Config {
        input_root: root.join("input"),
        output_root: root.join("results"),
        workers: 2,
        ..Config::default()
    };
    config.modalities.select_csv("wifi,temp,lux").unwrap();
    config
}

fn read_json(path: &Path) -> Value {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("{} not readable: {}", path.display(), e));
    serde_json::from_str(&content).unwrap()
}

#[tokio::test]
async fn test_full_run_writes_every_artifact() {
    let dir = tempfile::tempdir().unwrap();
    sensor_tree(&dir.path().join("input"));
    let config = config_for(dir.path());
    config.validate().unwrap();

    let tasks = orchestrator::plan(&config).unwrap();
    // wifi: one pair at two slot sizes, temp: three pairs, lux: one sensor at six slot sizes
    assert_eq!(tasks.len(), 2 + 3 + 6);
    assert!(tasks.iter().all(|t| t.modality != Modality::Ble));

    let pool = WorkerPool::with_metadata(
        Arc::new(config.clone()),
        MetadataBuilder::new().with_generator_version("git+0123abc"),
    );
    let report = pool.run(tasks).await;

    assert_eq!(report.tasks_planned, 11);
    assert_eq!(report.tasks_dispatched, 11);
    assert_eq!(report.artifacts_produced(), 11);
    // Sensor-03 never overlaps the others
    assert_eq!(report.error_artifacts, 2);
    assert_eq!(report.failures.len(), 2);
    // The Sensor-01 wifi log is read once per slot size
    assert_eq!(report.scan_errors, 2);
    assert!(report.is_success());

    let results = dir.path().join("results");

    let wifi = read_json(
        &results.join("Sensor-01/wifi/ble_wifi_truong/chunk_len-10/Sensor-02.json"),
    );
    let metadata = &wifi["metadata"];
    assert_eq!(metadata["generator_script"], "ble_wifi_truong");
    assert_eq!(metadata["generator_version"], "git+0123abc");
    assert_eq!(metadata["run_id"], report.run_id.to_string());
    assert_eq!(metadata["parameters"]["chunk_len"], 10);
    assert_eq!(metadata["source_files"].as_object().unwrap().len(), 2);
    assert!(metadata["processing_end"].is_string());

    let slots = wifi["results"].as_object().unwrap();
    assert!(slots["2017-08-16 12:00:00"].is_object());
    assert!(slots["2017-08-16 12:00:10"].is_object());
    assert_eq!(
        slots["2017-08-16 12:00:20"]["error"],
        "Scan error in sample, no feature computed"
    );
    // Nothing from Sensor-02 in this slot
    assert_eq!(slots["2017-08-16 12:00:40"], serde_json::json!({}));

    // Pair artifacts are not mirrored for set modalities
    assert!(!results
        .join("Sensor-02/wifi/ble_wifi_truong/chunk_len-10/Sensor-01.json")
        .exists());

    let temp = read_json(&results.join("Sensor-01/temp/temp_hum_press_shrestha/Sensor-02.json"));
    assert_eq!(temp["results"].as_object().unwrap().len(), 3);
    let mirrored =
        read_json(&results.join("Sensor-02/temp/temp_hum_press_shrestha/Sensor-01.json"));
    assert_eq!(mirrored["results"], temp["results"]);

    let failed = read_json(&results.join("Sensor-01/temp/temp_hum_press_shrestha/Sensor-03.json"));
    assert_eq!(failed["results"], serde_json::json!({ "error": "No sync possible" }));
    assert_eq!(failed["metadata"]["generator_script"], "temp_hum_press_shrestha");

    let lux = read_json(&results.join(
        "Sensor-01/lux/lux_miettinen/chunk_len-5/delta_abs-10.0/delta_rel-0.1/fp_len-128/\
         result.json",
    ));
    let fingerprint = lux["results"].as_object().unwrap();
    assert_eq!(fingerprint.len(), 1);
    let bits = fingerprint.values().next().unwrap().as_str().unwrap();
    assert!(bits.chars().all(|c| c == '0' || c == '1'));
}

#[tokio::test]
async fn test_explicit_pairs_limit_the_run() {
    let dir = tempfile::tempdir().unwrap();
    sensor_tree(&dir.path().join("input"));
    let mut config = config_for(dir.path());
    config.modalities.select_csv("temp").unwrap();
    config.pairs = vec![("Sensor-02".to_string(), "Sensor-01".to_string())];

    let tasks = orchestrator::plan(&config).unwrap();
    assert_eq!(tasks.len(), 1);

    let report = WorkerPool::new(Arc::new(config)).run(tasks).await;
    assert_eq!(report.artifacts_written, 1);

    let results = dir.path().join("results");
    assert!(results
        .join("Sensor-02/temp/temp_hum_press_shrestha/Sensor-01.json")
        .is_file());
    assert!(!results
        .join("Sensor-01/temp/temp_hum_press_shrestha/Sensor-03.json")
        .exists());
}

#[tokio::test]
async fn test_rerun_overwrites_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    sensor_tree(&dir.path().join("input"));
    let mut config = config_for(dir.path());
    config.modalities.select_csv("temp").unwrap();
    let config = Arc::new(config);

    let first = WorkerPool::new(config.clone())
        .run(orchestrator::plan(&config).unwrap())
        .await;
    let second = WorkerPool::new(config.clone())
        .run(orchestrator::plan(&config).unwrap())
        .await;
    assert_ne!(first.run_id, second.run_id);

    let artifact = read_json(
        &dir.path()
            .join("results/Sensor-01/temp/temp_hum_press_shrestha/Sensor-02.json"),
    );
    assert_eq!(artifact["metadata"]["run_id"], second.run_id.to_string());
}
