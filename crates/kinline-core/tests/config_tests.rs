use kinline_core::config::{CacheCapacity, InlineConfig};
use kinline_core::InlineError;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_init_then_load_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kinline.json");
    InlineConfig::init_file(&path).unwrap();

    let written = fs::read_to_string(&path).unwrap();
    assert!(written.contains("\"generateSmap\": true"));
    assert_eq!(InlineConfig::from_file(&path).unwrap(), InlineConfig::default());
}

#[test]
fn test_load_partial_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kinline.json");
    fs::write(
        &path,
        r#"{ "generateAssertField": true, "methodNodeCache": { "protected": 4, "probationary": 2 }, "moduleName": "app" }"#,
    )
    .unwrap();

    let config = InlineConfig::from_file(&path).unwrap();
    assert!(config.generate_assert_field);
    assert_eq!(config.method_node_cache, CacheCapacity::new(4, 2));
    assert_eq!(config.module_name.as_deref(), Some("app"));
    assert!(config.generate_smap);
}

#[test]
fn test_missing_config_file() {
    let dir = TempDir::new().unwrap();
    let err = InlineConfig::from_file(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, InlineError::Io(_)));
}
