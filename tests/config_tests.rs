use kubecost_optima::config::{generate::generate_starter_config, load_config, Aggregation, ConfigError, Shard};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_generated_config_is_valid() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    let config_content =
        generate_starter_config().replace("# refresh_token: <refresh token>", "refresh_token: abc");
    fs::write(&config_path, config_content).unwrap();

    let config = load_config(&config_path).expect("Generated config should be valid");

    assert_eq!(config.kubecost.base_url, "http://localhost:9090/model/");
    assert_eq!(config.optima.shard, Shard::Nam);
    assert_eq!(config.optima.refresh_token(), Some("abc"));
    assert_eq!(config.optima.rate_limit_backoff, Duration::from_secs(120));
    assert_eq!(config.export.aggregation, Aggregation::Pod);
    assert_eq!(config.export.max_file_rows, 1_000_000);
    assert_eq!(config.http.request_timeout, Duration::from_secs(300));
}

#[test]
fn test_client_credentials_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    let config_yaml = r#"
optima:
  org_id: "12345"
  bill_connect_id: cbi-oi-optima-kubecost
  shard: AU
  client_id: svc
  client_secret: hunter2
export:
  output_dir: /tmp/kubecost-out
  aggregation: Namespace
  include_previous_month: true
"#;
    fs::write(&config_path, config_yaml).unwrap();

    let config = load_config(&config_path).unwrap();

    assert_eq!(config.optima.client_id.as_deref(), Some("svc"));
    assert_eq!(config.optima.token_url(), "https://login.flexera.au/oidc/token");
    assert_eq!(config.export.aggregation, Aggregation::Namespace);
    assert!(config.export.include_previous_month);
    assert_eq!(config.export.output_dir, std::path::Path::new("/tmp/kubecost-out"));
}

#[test]
fn test_missing_optima_section() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    fs::write(&config_path, "kubecost:\n  base_url: http://kubecost:9090/model/\n").unwrap();

    let err = load_config(&config_path).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("optima"), "unexpected error: {message}");
    assert!(message.contains(&config_path.display().to_string()));
}

#[test]
fn test_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let err = load_config(&temp_dir.path().join("absent.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}
