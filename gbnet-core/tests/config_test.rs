//! Config files: shipped samples load and validate; files written to disk
//! round-trip and build a cascade.

use std::io::Write;
use std::path::PathBuf;

use gbnet_core::learners::ConstantLearner;
use gbnet_core::{BaseLearner, Cascade, CascadeConfig, CombinationMode, ConfigError};

fn sample(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("configs")
        .join(name)
}

#[test]
fn shipped_residual_config_is_valid() {
    let config = CascadeConfig::from_file(&sample("residual.toml")).unwrap();
    assert_eq!(config.validate().unwrap(), CombinationMode::Residual);
    assert_eq!(config.num_classes, 4);
    assert_eq!(config.init_seed, 2018);
}

#[test]
fn shipped_adaboost_config_is_valid() {
    let config = CascadeConfig::from_file(&sample("adaboost.toml")).unwrap();
    assert_eq!(config.validate().unwrap(), CombinationMode::AdaBoost);
    assert_eq!(config.boosting.stage_weight_scale, 1.5);
}

#[test]
fn written_config_builds_cascade() {
    let config = CascadeConfig {
        num_classes: 3,
        end_to_end: true,
        multi_output: true,
        residual_scale: 0.5,
        ..CascadeConfig::default()
    };
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();

    let loaded = CascadeConfig::from_file(file.path()).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.fingerprint(), config.fingerprint());

    let stages: Vec<Box<dyn BaseLearner>> = vec![
        Box::new(ConstantLearner::uniform("a", 3, 0.0)),
        Box::new(ConstantLearner::uniform("b", 3, 0.0)),
    ];
    let cascade = Cascade::new(stages, &loaded).unwrap();
    assert!(cascade.state().returns_per_stage());
    assert_eq!(cascade.fingerprint(), config.fingerprint());
}

#[test]
fn invalid_file_fails_before_any_cascade_exists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("both.toml");
    std::fs::write(&path, "residual = true\nadaboost = true\n").unwrap();

    let config = CascadeConfig::from_file(&path).unwrap();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::CombinationMode {
            residual: true,
            adaboost: true
        })
    ));
}
