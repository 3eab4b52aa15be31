use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use crate::export::MIN_PAGE_SIZE;
use regex::Regex;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Environment variables that fill empty credential fields of the `optima` section.
pub const ENV_REFRESH_TOKEN: &str = "REFRESH_TOKEN";
pub const ENV_CLIENT_ID: &str = "SERVICE_APP_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "SERVICE_APP_CLIENT_SECRET";

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parses and validates a config from a YAML string.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut value: serde_yaml::Value = serde_yaml::from_str(&yaml_string)?;
    let mut errors = Vec::new();
    take_invalid_choices(&mut value, &mut errors);

    let mut config: Config = serde_yaml::from_value(value)?;

    config.export.output_dir = expand_tilde(&config.export.output_dir);
    apply_env_credentials(&mut config, |name| std::env::var(name).ok());

    validate_config(&config, errors)?;

    Ok(config)
}

/// Fills credentials left empty in the file from the process environment.
fn apply_env_credentials<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn fill<F: Fn(&str) -> Option<String>>(field: &mut Option<String>, var: &str, lookup: &F) {
        let empty = field.as_deref().map_or(true, str::is_empty);
        if empty {
            if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
                *field = Some(value);
            }
        }
    }

    let optima = &mut config.optima;
    fill(&mut optima.refresh_token, ENV_REFRESH_TOKEN, &lookup);
    fill(&mut optima.client_id, ENV_CLIENT_ID, &lookup);
    fill(&mut optima.client_secret, ENV_CLIENT_SECRET, &lookup);
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex");
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .map(|cap| cap[1].to_string())
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    Err(ConfigError::Validation(format!(
        "environment variables referenced by the config are not set: {}",
        unexpanded_vars.join(", ")
    )))
}

/// Checks the enumerated fields before typed deserialization. Invalid values
/// are reported and removed so the rest of the file is still validated.
fn take_invalid_choices(value: &mut serde_yaml::Value, errors: &mut Vec<String>) {
    type Check = fn(&str) -> Result<(), String>;
    let checks: [(&str, &str, Check); 2] = [
        ("optima", "shard", |s| s.parse::<Shard>().map(|_| ())),
        ("export", "aggregation", |s| s.parse::<Aggregation>().map(|_| ())),
    ];

    for (section, field, check) in checks {
        let Some(map) = value.get_mut(section).and_then(|v| v.as_mapping_mut()) else {
            continue;
        };
        let Some(raw) = map.get(field) else {
            continue;
        };

        let result = match raw.as_str() {
            Some(s) => check(s),
            None => Err(format!("expected a string, got {:?}", raw)),
        };
        if let Err(e) = result {
            errors.push(format!("{}.{}: {}", section, field, e));
            map.remove(field);
        }
    }
}

fn validate_config(config: &Config, mut errors: Vec<String>) -> Result<(), ConfigError> {

    validate_optima(&config.optima, &mut errors);
    validate_export(&config.export, &mut errors);

    if config.kubecost.base_url.is_empty() {
        errors.push("kubecost.base_url cannot be empty".to_string());
    }
    if config.http.request_timeout.is_zero() {
        errors.push("http.request_timeout must be greater than zero".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_optima(optima: &OptimaConfig, errors: &mut Vec<String>) {
    if optima.org_id.trim().is_empty() {
        errors.push("optima.org_id cannot be empty".to_string());
    }
    if optima.bill_connect_id.trim().is_empty() {
        errors.push("optima.bill_connect_id cannot be empty".to_string());
    }

    let has_client_credentials = optima.client_id.as_deref().is_some_and(|s| !s.is_empty())
        && optima.client_secret.as_deref().is_some_and(|s| !s.is_empty());
    if optima.refresh_token().is_none() && !has_client_credentials {
        errors.push(format!(
            "optima credentials missing: set optima.refresh_token ({}) or both optima.client_id ({}) and optima.client_secret ({})",
            ENV_REFRESH_TOKEN, ENV_CLIENT_ID, ENV_CLIENT_SECRET
        ));
    }
}

fn validate_export(export: &ExportConfig, errors: &mut Vec<String>) {
    if export.max_file_rows == 0 {
        errors.push("export.max_file_rows must be greater than zero".to_string());
    }
    if export.page_size < MIN_PAGE_SIZE {
        errors.push(format!(
            "export.page_size must be at least {}, got {}",
            MIN_PAGE_SIZE, export.page_size
        ));
    }
    if !export.multiplier.is_finite() {
        errors.push(format!(
            "export.multiplier must be a finite number, got {}",
            export.multiplier
        ));
    }
    if export.default_currency.trim().is_empty() {
        errors.push("export.default_currency cannot be empty".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
optima:
  org_id: "12345"
  bill_connect_id: cbi-oi-optima-kubecost
  refresh_token: secret
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.kubecost.base_url, "http://localhost:9090/model/");
        assert_eq!(config.export.page_size, 500);
        assert_eq!(config.export.aggregation, Aggregation::Pod);
        assert_eq!(config.optima.shard, Shard::Nam);
        assert_eq!(config.http.request_timeout, std::time::Duration::from_secs(300));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let yaml = r#"
optima:
  org_id: ""
  bill_connect_id: ""
export:
  max_file_rows: 0
  page_size: 0
"#;
        let err = parse_config(yaml).unwrap_err();
        match err {
            ConfigError::ValidationList(errors) => {
                assert!(errors.iter().any(|e| e.contains("org_id")));
                assert!(errors.iter().any(|e| e.contains("bill_connect_id")));
                assert!(errors.iter().any(|e| e.contains("credentials")));
                assert!(errors.iter().any(|e| e.contains("max_file_rows")));
                assert!(errors.iter().any(|e| e.contains("page_size")));
            }
            other => panic!("expected validation list, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_choices_reported_with_other_errors() {
        let yaml = r#"
optima:
  org_id: "1"
  bill_connect_id: x
  refresh_token: secret
  shard: MARS
export:
  aggregation: cluster
  page_size: 1
"#;
        match parse_config(yaml) {
            Err(ConfigError::ValidationList(errors)) => {
                assert_eq!(errors.len(), 3, "{errors:?}");
                assert!(errors.iter().any(|e| e.starts_with("optima.shard:") && e.contains("MARS")));
                assert!(errors.iter().any(|e| e.starts_with("export.aggregation:")));
                assert!(errors.iter().any(|e| e.contains("page_size must be at least 2")));
            }
            other => panic!("expected validation list, got {other:?}"),
        }
    }

    #[test]
    fn test_shard_parse_case_insensitive() {
        let yaml = MINIMAL.replace("refresh_token: secret", "refresh_token: secret\n  shard: eu");
        assert_eq!(parse_config(&yaml).unwrap().optima.shard, Shard::Eu);
    }

    #[test]
    fn test_invalid_shard_rejected() {
        let yaml = MINIMAL.replace("refresh_token: secret", "refresh_token: secret\n  shard: MARS");
        assert!(parse_config(&yaml).is_err());
    }

    #[test]
    fn test_unexpanded_env_var_reported() {
        let yaml = MINIMAL.replace("secret", "$env{KUBECOST_OPTIMA_UNSET_TOKEN_VAR}");
        match parse_config(&yaml) {
            Err(ConfigError::Validation(msg)) => {
                assert!(msg.contains("KUBECOST_OPTIMA_UNSET_TOKEN_VAR"))
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_env_credentials_fill_empty_fields() {
        let yaml = r#"
optima:
  org_id: "1"
  bill_connect_id: x
  client_secret: from-file
"#;
        let mut config: Config = serde_yaml::from_str(yaml).unwrap();
        apply_env_credentials(&mut config, |name| match name {
            ENV_CLIENT_ID => Some("id-from-env".to_string()),
            ENV_CLIENT_SECRET => Some("secret-from-env".to_string()),
            _ => None,
        });
        assert_eq!(config.optima.client_id.as_deref(), Some("id-from-env"));
        // Values present in the file are kept
        assert_eq!(config.optima.client_secret.as_deref(), Some("from-file"));
        assert!(config.optima.refresh_token.is_none());
    }

    #[test]
    fn test_humantime_durations() {
        let yaml = format!("{MINIMAL}  rate_limit_backoff: 2s\nhttp:\n  request_timeout: 30s\n");
        let config = parse_config(&yaml).unwrap();
        assert_eq!(
            config.optima.rate_limit_backoff,
            std::time::Duration::from_secs(2)
        );
        assert_eq!(
            config.http.request_timeout,
            std::time::Duration::from_secs(30)
        );
    }
}
