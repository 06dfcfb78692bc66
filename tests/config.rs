use assert_matches::assert_matches;

use climproj::config::{Config, ConfigLoader, Overrides, PointEntry};
use climproj::domain::{BoundingBox, Point, SpatialMode};
use climproj::error::ClimprojError;

fn env_with_credentials(key: &str) -> Option<String> {
    match key {
        "ESGF_USERNAME" => Some("envuser".to_string()),
        "ESGF_PASSWORD" => Some("envpass".to_string()),
        _ => None,
    }
}

#[test]
fn parse_config_file_with_points() {
    let json = r#"{
        "schema_version": 1,
        "experiments": ["ssp245", "ssp585"],
        "variables": ["PR", "T2M"],
        "points": [[12.0, 7.0], {"lon": -160.0, "lat": 11.0}],
        "start_year": 2020,
        "output": "data/cmip6",
        "workers": 8,
        "catalog": {"url": "https://esgf-node.example/esg-search", "timeout_secs": 60}
    }"#;
    let config: Config = serde_json::from_str(json).unwrap();
    let resolved = ConfigLoader::resolve_config_with_env(config, env_with_credentials).unwrap();

    let request = &resolved.request;
    assert_eq!(request.experiments, vec!["ssp245", "ssp585"]);
    assert_eq!(request.variables, vec!["PR", "T2M"]);
    assert_eq!(
        request.spatial_mode,
        SpatialMode::Points(vec![
            Point::new(12.0, 7.0).unwrap(),
            Point::new(-160.0, 11.0).unwrap()
        ])
    );
    assert_eq!(request.start_year, Some(2020));
    assert_eq!(request.output_root.as_str(), "data/cmip6");
    assert_eq!(request.workers, 8);
    assert_eq!(request.credentials.username, "envuser");
    assert_eq!(resolved.catalog.url, "https://esgf-node.example/esg-search");
    assert_eq!(resolved.catalog.data_node.as_deref(), Some("esgf3.dkrz.de"));
    assert_eq!(resolved.catalog.timeout.as_secs(), 60);
    assert_eq!(resolved.catalog.connect_timeout.as_secs(), 30);
}

#[test]
fn download_timeout_is_separate_from_search_timeout() {
    let config: Config = serde_json::from_str(
        r#"{"experiments": ["ssp585"], "variables": ["pr"], "output": "out",
            "catalog": {"timeout_secs": 20, "connect_timeout_secs": 5, "download_timeout_secs": 7200}}"#,
    )
    .unwrap();
    let resolved = ConfigLoader::resolve_config_with_env(config, env_with_credentials).unwrap();
    assert_eq!(resolved.catalog.timeout.as_secs(), 20);
    assert_eq!(resolved.catalog.connect_timeout.as_secs(), 5);
    assert_eq!(resolved.catalog.download_timeout.map(|t| t.as_secs()), Some(7200));

    let config: Config = serde_json::from_str(
        r#"{"experiments": ["ssp585"], "variables": ["pr"], "output": "out",
            "catalog": {"download_timeout_secs": 0}}"#,
    )
    .unwrap();
    let resolved = ConfigLoader::resolve_config_with_env(config, env_with_credentials).unwrap();
    assert_eq!(resolved.catalog.download_timeout, None);
}

#[test]
fn file_credentials_win_over_environment() {
    let config: Config = serde_json::from_str(
        r#"{"experiments": ["ssp585"], "variables": ["pr"], "output": "out",
            "username": "fileuser", "password": "filepass"}"#,
    )
    .unwrap();
    let resolved = ConfigLoader::resolve_config_with_env(config, env_with_credentials).unwrap();
    assert_eq!(resolved.request.credentials.username, "fileuser");
    assert_eq!(resolved.request.credentials.password, "filepass");
}

#[test]
fn missing_credentials_rejected() {
    let config: Config = serde_json::from_str(
        r#"{"experiments": ["ssp585"], "variables": ["pr"], "output": "out"}"#,
    )
    .unwrap();
    let err = ConfigLoader::resolve_config_with_env(config, |_| None).unwrap_err();
    assert_matches!(err, ClimprojError::MissingCredentials);
}

#[test]
fn null_data_node_searches_everywhere() {
    let config: Config = serde_json::from_str(
        r#"{"experiments": ["ssp585"], "variables": ["pr"], "output": "out",
            "catalog": {"data_node": null}}"#,
    )
    .unwrap();
    let resolved = ConfigLoader::resolve_config_with_env(config, env_with_credentials).unwrap();
    assert_eq!(resolved.catalog.data_node, None);
}

#[test]
fn overrides_replace_file_values() {
    let config = Config {
        experiments: vec!["ssp245".to_string()],
        variables: vec!["pr".to_string()],
        points: Some(vec![PointEntry::Pair([1.0, 2.0])]),
        output: Some("from-file".to_string()),
        ..Config::default()
    };
    let overrides = Overrides {
        experiments: Some(vec!["ssp585".to_string()]),
        variables: Some(vec!["tas".to_string(), "tas".to_string()]),
        output: Some("from-cli".to_string()),
        ..Overrides::default()
    };
    let merged = ConfigLoader::apply(config, overrides);
    let resolved = ConfigLoader::resolve_config_with_env(merged, env_with_credentials).unwrap();
    assert_eq!(resolved.request.experiments, vec!["ssp585"]);
    assert_eq!(resolved.request.variables, vec!["tas"]);
    assert_eq!(resolved.request.output_root.as_str(), "from-cli");
    assert!(resolved.request.spatial_mode.is_points());
}

#[test]
fn cli_bbox_conflicts_with_file_points() {
    let config = Config {
        experiments: vec!["ssp585".to_string()],
        variables: vec!["pr".to_string()],
        points: Some(vec![PointEntry::Detailed { lon: 1.0, lat: 2.0 }]),
        output: Some("out".to_string()),
        ..Config::default()
    };
    let overrides = Overrides {
        bbox: Some(BoundingBox::new(10.0, 5.0, 15.0, 10.0).unwrap()),
        ..Overrides::default()
    };
    let err = ConfigLoader::resolve_config_with_env(
        ConfigLoader::apply(config, overrides),
        env_with_credentials,
    )
    .unwrap_err();
    assert_matches!(err, ClimprojError::ConflictingSpatialMode);
}

#[test]
fn required_fields_reported() {
    let config: Config = serde_json::from_str(r#"{"variables": ["pr"], "output": "out"}"#).unwrap();
    let err = ConfigLoader::resolve_config_with_env(config, env_with_credentials).unwrap_err();
    assert_matches!(err, ClimprojError::MissingField(field) if field == "experiments");

    let config: Config =
        serde_json::from_str(r#"{"experiments": ["ssp585"], "variables": ["pr"]}"#).unwrap();
    let err = ConfigLoader::resolve_config_with_env(config, env_with_credentials).unwrap_err();
    assert_matches!(err, ClimprojError::MissingField(field) if field == "output");
}

#[test]
fn malformed_bbox_rejected() {
    let config: Config = serde_json::from_str(
        r#"{"experiments": ["ssp585"], "variables": ["pr"], "output": "out", "bbox": [1, 2, 3]}"#,
    )
    .unwrap();
    let err = ConfigLoader::resolve_config_with_env(config, env_with_credentials).unwrap_err();
    assert_matches!(err, ClimprojError::InvalidBbox(_));
}

#[test]
fn unreadable_config_path() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("missing.json");
    let err = ConfigLoader::resolve(path.to_str(), Overrides::default()).unwrap_err();
    assert_matches!(err, ClimprojError::ConfigRead(_));

    let broken = temp.path().join("broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    let err = ConfigLoader::resolve(broken.to_str(), Overrides::default()).unwrap_err();
    assert_matches!(err, ClimprojError::ConfigParse(_));
}
