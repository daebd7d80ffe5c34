//! Tests for loading configuration from the process environment.

use std::time::Duration;

use health_forum_pipeline::config::{Config, ConfigError};
use serial_test::serial;

const VARS: &[&str] = &[
    "FORUM_EMAIL",
    "FORUM_PASSWORD",
    "CHADD_USERNAME",
    "CHADD_PASSWORD",
    "FORUM_BASE_URL",
    "FORUM_COMMUNITY",
    "HTTP_TIMEOUT_SECS",
    "START_DATE",
    "END_DATE",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_missing_credentials() {
    clear_env();
    match Config::from_env() {
        Err(ConfigError::MissingEnvVar(name)) => assert_eq!(name, "FORUM_EMAIL"),
        other => panic!("expected missing variable, got {other:?}"),
    }
}

#[test]
#[serial]
fn test_defaults_and_legacy_credential_names() {
    clear_env();
    std::env::set_var("CHADD_USERNAME", "legacy@example.com");
    std::env::set_var("CHADD_PASSWORD", "secret");

    let config = Config::from_env().expect("Failed to load config");
    assert_eq!(config.email, "legacy@example.com");
    assert_eq!(config.password, "secret");
    assert_eq!(config.base_url, "https://healthunlocked.com");
    assert_eq!(config.community, "adult-adhd");
    assert_eq!(config.http_timeout, Duration::from_secs(30));
    assert!(config.start_date.is_none());
    assert!(config.validate().is_ok());

    clear_env();
}

#[test]
#[serial]
fn test_overrides_and_bad_timeout() {
    clear_env();
    std::env::set_var("FORUM_EMAIL", "tester@example.com");
    std::env::set_var("FORUM_PASSWORD", "hunter2");
    std::env::set_var("FORUM_COMMUNITY", "anxiety-support");
    std::env::set_var("START_DATE", "2020-01");
    std::env::set_var("END_DATE", "2020-02");
    std::env::set_var("HTTP_TIMEOUT_SECS", "5");

    let config = Config::from_env().expect("Failed to load config");
    assert_eq!(config.community, "anxiety-support");
    assert_eq!(config.start_date.as_deref(), Some("2020-01"));
    assert_eq!(config.end_date.as_deref(), Some("2020-02"));
    assert_eq!(config.http_timeout, Duration::from_secs(5));

    std::env::set_var("HTTP_TIMEOUT_SECS", "soon");
    assert!(matches!(
        Config::from_env(),
        Err(ConfigError::ParseInt { .. })
    ));

    std::env::set_var("HTTP_TIMEOUT_SECS", "0");
    let config = Config::from_env().expect("Failed to load config");
    assert!(config.validate().is_err());

    clear_env();
}
