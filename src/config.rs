use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::constants::DEFAULT_BASE_URL;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Forum
    pub email: String,
    pub password: String,
    pub base_url: String,
    pub community: String,
    pub session_file: PathBuf,
    pub http_timeout: Duration,

    // Listing window for the post-id phase
    pub start_date: Option<String>,
    pub end_date: Option<String>,

    // Database
    pub database_path: PathBuf,

    // Enrichment
    pub ollama_url: String,
    pub enrichment_timeout: Duration,
    pub gender_model: String,
    pub sentiment_model: String,
    pub self_report_model: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Forum
            email: required_env_any(&["FORUM_EMAIL", "CHADD_USERNAME"])?,
            password: required_env_any(&["FORUM_PASSWORD", "CHADD_PASSWORD"])?,
            base_url: env_or_default("FORUM_BASE_URL", DEFAULT_BASE_URL),
            community: env_or_default("FORUM_COMMUNITY", "adult-adhd"),
            session_file: PathBuf::from(env_or_default("SESSION_FILE", "cookies.json")),
            http_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 30)?),

            start_date: optional_env("START_DATE"),
            end_date: optional_env("END_DATE"),

            // Database
            database_path: PathBuf::from(env_or_default(
                "DATABASE_PATH",
                "./data/pipeline.sqlite",
            )),

            // Enrichment
            ollama_url: env_or_default("OLLAMA_URL", "http://ollama:11434"),
            enrichment_timeout: Duration::from_secs(parse_env_u64(
                "ENRICHMENT_TIMEOUT_SECS",
                120,
            )?),
            gender_model: env_or_default("GENDER_MODEL", "genderizer"),
            sentiment_model: env_or_default("SENTIMENT_MODEL", "sentimentizer"),
            self_report_model: env_or_default("SELF_REPORT_MODEL", "selfdiagnosis-detectionizer"),
        })
    }

    /// Configuration with defaults and dummy credentials, for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            email: "tester@example.com".to_string(),
            password: "hunter2".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            community: "adult-adhd".to_string(),
            session_file: PathBuf::from("cookies.json"),
            http_timeout: Duration::from_secs(10),
            start_date: None,
            end_date: None,
            database_path: PathBuf::from("./data/test.sqlite"),
            ollama_url: "http://localhost:11434".to_string(),
            enrichment_timeout: Duration::from_secs(10),
            gender_model: "genderizer".to_string(),
            sentiment_model: "sentimentizer".to_string(),
            self_report_model: "selfdiagnosis-detectionizer".to_string(),
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "FORUM_BASE_URL".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if url::Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "FORUM_BASE_URL".to_string(),
                message: format!("not a valid URL: '{}'", self.base_url),
            });
        }
        if self.community.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "FORUM_COMMUNITY".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.http_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "HTTP_TIMEOUT_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.enrichment_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "ENRICHMENT_TIMEOUT_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// First non-empty variable among `names`; the error names the preferred one.
fn required_env_any(names: &[&str]) -> Result<String, ConfigError> {
    names
        .iter()
        .find_map(|name| optional_env(name))
        .ok_or_else(|| ConfigError::MissingEnvVar(names[0].to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_testing_is_valid() {
        assert!(Config::for_testing().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            community: String::new(),
            ..Config::for_testing()
        };
        assert!(config.validate().is_err());

        let config = Config {
            base_url: "not a url".to_string(),
            ..Config::for_testing()
        };
        assert!(config.validate().is_err());

        let config = Config {
            http_timeout: Duration::ZERO,
            ..Config::for_testing()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_u64_default() {
        assert_eq!(parse_env_u64("NONEXISTENT_VAR_FOR_TEST", 42).unwrap(), 42);
    }
}
