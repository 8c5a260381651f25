use std::sync::Mutex;

use tempfile::Builder;

use occlusion_overlay::config::OverlayConfig;
use occlusion_overlay::{DepthMode, Executor, InferenceOrdering, TrackingPolicy};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in OverlayConfig::env_keys() {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = r#"{
        "target": {
            "label": "person",
            "rank_threshold": 5,
            "roi_inset": 0.01
        },
        "render": {
            "reverse_z": false,
            "z_near": 0.05,
            "z_far": 50.0,
            "overlay_color": [255, 0, 0, 200]
        },
        "pipeline": {
            "executor": "inline"
        },
        "camera": {
            "url": "stub://garage",
            "target_fps": 15,
            "width": 320,
            "height": 240
        },
        "viewport": {
            "width": 1170,
            "height": 2532
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("OVERLAY_CONFIG", file.path());
    std::env::set_var("OVERLAY_TARGET_LABEL", "bus");
    std::env::set_var("OVERLAY_TRACKING_POLICY", "clear");
    std::env::set_var("OVERLAY_ORDERING", "parallel");

    let cfg = OverlayConfig::load().expect("load config");

    assert_eq!(cfg.reconciler.target_label, "bus");
    assert_eq!(cfg.class_index, 6);
    assert_eq!(cfg.reconciler.rank_threshold, 5);
    assert!((cfg.reconciler.roi_inset - 0.01).abs() < 1e-6);
    assert_eq!(cfg.reconciler.policy, TrackingPolicy::Clear);
    assert!(!cfg.render.projection.reverse_z);
    assert_eq!(cfg.render.projection.planes.z_near, 0.05);
    assert_eq!(cfg.render.overlay_color, [255, 0, 0, 200]);
    assert_eq!(cfg.ordering, InferenceOrdering::Parallel);
    assert_eq!(cfg.executor, Executor::Inline);
    assert_eq!(cfg.camera.url, "stub://garage");
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!(cfg.viewport.width, 1170.0);

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        [target]
        label = "person"

        [render]
        depth_mode = "mask_only"

        [camera]
        quarter_turn = true
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("OVERLAY_CONFIG", file.path());
    std::env::set_var("OVERLAY_DEPTH_MODE", "occlusion");

    let cfg = OverlayConfig::load().expect("load config");
    assert_eq!(cfg.class_index, 15);
    assert_eq!(cfg.render.depth_mode, DepthMode::Occlusion);
    assert!(cfg.camera.quarter_turn);

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = OverlayConfig::load().expect("load defaults");
    assert_eq!(cfg.reconciler.target_label, "car");
    assert_eq!(cfg.camera.url, "stub://camera");
    assert_eq!((cfg.camera.width, cfg.camera.height), (640, 480));
    assert_eq!(cfg.render.projection.planes.z_far, 100.0);

    clear_env();
}

#[test]
fn invalid_env_override_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("OVERLAY_RANK_THRESHOLD", "three");
    assert!(OverlayConfig::load().is_err());
    clear_env();

    std::env::set_var("OVERLAY_TARGET_LABEL", "submarine");
    let err = OverlayConfig::load().unwrap_err();
    assert!(err.to_string().contains("segmentation vocabulary"));
    clear_env();

    std::env::set_var("OVERLAY_ORDERING", "sideways");
    assert!(OverlayConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("temp dir");
    std::env::set_var("OVERLAY_CONFIG", dir.path().join("absent.json"));
    let err = OverlayConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
