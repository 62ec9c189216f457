use std::path::PathBuf;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "daana-ingest";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_INFERENCE_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_INFERENCE_MODEL: &str = "gpt-4";
pub const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_BATCH_SIZE: usize = 25;

const ENV_API_KEY: &str = "OPENAI_API_KEY";
const ENV_BASE_URL: &str = "DAANA_INFERENCE_BASE_URL";
const ENV_MODEL: &str = "DAANA_INFERENCE_MODEL";
const ENV_TIMEOUT: &str = "DAANA_INFERENCE_TIMEOUT_SECS";
const ENV_DATABASE_PATH: &str = "DAANA_DATABASE_PATH";
const ENV_BATCH_SIZE: &str = "DAANA_BATCH_SIZE";
const ENV_DEBUG: &str = "DAANA_DEBUG";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings, read once at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Only required once an inference client is built.
    pub openai_api_key: Option<String>,
    pub inference_base_url: String,
    pub inference_model: String,
    pub inference_timeout_secs: u64,
    pub database_path: PathBuf,
    pub batch_size: usize,
    pub debug: bool,
}

impl Settings {
    /// Load from the process environment, after a best-effort `.env` read.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Some(path) = load_dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_path = match get(ENV_DATABASE_PATH) {
            Some(path) => PathBuf::from(path),
            None => default_database_path().ok_or(ConfigError::Missing(ENV_DATABASE_PATH))?,
        };

        Ok(Self {
            openai_api_key: get(ENV_API_KEY),
            inference_base_url: get(ENV_BASE_URL)
                .unwrap_or_else(|| DEFAULT_INFERENCE_BASE_URL.to_string()),
            inference_model: get(ENV_MODEL).unwrap_or_else(|| DEFAULT_INFERENCE_MODEL.to_string()),
            inference_timeout_secs: parse_number(ENV_TIMEOUT, get(ENV_TIMEOUT))?
                .unwrap_or(DEFAULT_INFERENCE_TIMEOUT_SECS),
            database_path,
            batch_size: match parse_number::<usize>(ENV_BATCH_SIZE, get(ENV_BATCH_SIZE))? {
                Some(0) => {
                    return Err(ConfigError::Invalid {
                        key: ENV_BATCH_SIZE,
                        value: "0".into(),
                        reason: "must be at least 1".into(),
                    })
                }
                Some(n) => n,
                None => DEFAULT_BATCH_SIZE,
            },
            debug: match get(ENV_DEBUG) {
                Some(v) => parse_bool(ENV_DEBUG, &v)?,
                None => false,
            },
        })
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.openai_api_key
            .as_deref()
            .ok_or(ConfigError::Missing(ENV_API_KEY))
    }

    pub fn log_filter(&self) -> &'static str {
        log_filter_for(self.debug)
    }
}

/// Merge a `.env` file into the process environment. Variables already set
/// are kept. Returns the file read, if any.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Default database location: `<data_dir>/daana-ingest/daana.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_NAME).join("daana.db"))
}

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    let debug = std::env::var(ENV_DEBUG)
        .ok()
        .and_then(|v| parse_bool(ENV_DEBUG, &v).ok())
        .unwrap_or(false);
    log_filter_for(debug)
}

fn log_filter_for(debug: bool) -> &'static str {
    if debug {
        "daana_ingest=debug"
    } else {
        "daana_ingest=info"
    }
}

fn parse_number<T>(key: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                value: v.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected true or false".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let s = settings(&[(ENV_DATABASE_PATH, "/tmp/daana.db")]).unwrap();
        assert_eq!(s.inference_base_url, DEFAULT_INFERENCE_BASE_URL);
        assert_eq!(s.inference_model, "gpt-4");
        assert_eq!(s.inference_timeout_secs, 120);
        assert_eq!(s.batch_size, 25);
        assert!(!s.debug);
        assert_eq!(s.openai_api_key, None);
        assert_eq!(s.log_filter(), "daana_ingest=info");
    }

    #[test]
    fn overrides_apply() {
        let s = settings(&[
            (ENV_API_KEY, "sk-test"),
            (ENV_MODEL, "gpt-4o-mini"),
            (ENV_TIMEOUT, "30"),
            (ENV_BATCH_SIZE, "10"),
            (ENV_DEBUG, "true"),
            (ENV_DATABASE_PATH, "/var/lib/daana.db"),
        ])
        .unwrap();
        assert_eq!(s.require_api_key().unwrap(), "sk-test");
        assert_eq!(s.inference_model, "gpt-4o-mini");
        assert_eq!(s.inference_timeout_secs, 30);
        assert_eq!(s.batch_size, 10);
        assert_eq!(s.database_path, PathBuf::from("/var/lib/daana.db"));
        assert_eq!(s.log_filter(), "daana_ingest=debug");
    }

    #[test]
    fn missing_key_is_reported_on_use() {
        let s = settings(&[(ENV_API_KEY, "  "), (ENV_DATABASE_PATH, "x.db")]).unwrap();
        assert_eq!(s.require_api_key(), Err(ConfigError::Missing(ENV_API_KEY)));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = settings(&[(ENV_TIMEOUT, "soon"), (ENV_DATABASE_PATH, "x.db")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_TIMEOUT, .. }));

        let err = settings(&[(ENV_BATCH_SIZE, "0"), (ENV_DATABASE_PATH, "x.db")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_BATCH_SIZE, .. }));

        let err = settings(&[(ENV_DEBUG, "maybe"), (ENV_DATABASE_PATH, "x.db")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_DEBUG, .. }));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }
}
