//! Application-level configuration loading: store selection and runtime limits.

use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the observer looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZROOM_CONFIG_PATH";
const STORE_URL_ENV: &str = "QUIZROOM_STORE_URL";
const REALTIME_URL_ENV: &str = "QUIZROOM_REALTIME_URL";
const API_KEY_ENV: &str = "QUIZROOM_API_KEY";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_NOTIFICATION_CAPACITY: usize = 64;
const DEFAULT_IMPORT_DELIMITER: &str = ";";

/// Which backend holds the rooms.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StoreConfig {
    /// In-process store, lost on exit.
    #[default]
    Memory,
    /// PostgREST endpoint plus its realtime websocket.
    Postgrest {
        base_url: String,
        realtime_url: String,
        api_key: String,
    },
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    store: StoreConfig,
    request_timeout: Duration,
    notification_capacity: usize,
    import_delimiter: String,
}

impl AppConfig {
    /// Load the configuration from disk and the environment, falling back to built-in defaults.
    pub fn load() -> Self {
        Self::load_from(&resolve_config_path()).with_env_overrides(|var| env::var(var).ok())
    }

    /// Load the configuration file at `path`; any failure yields the defaults.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        store = app_config.store.kind(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse the JSON representation. Missing fields take their defaults.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Apply `QUIZROOM_STORE_URL`, `QUIZROOM_REALTIME_URL` and `QUIZROOM_API_KEY`.
    ///
    /// A store URL switches a memory configuration over to PostgREST.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let store_url = lookup(STORE_URL_ENV).filter(|value| !value.is_empty());
        let realtime_url = lookup(REALTIME_URL_ENV).filter(|value| !value.is_empty());
        let api_key = lookup(API_KEY_ENV).filter(|value| !value.is_empty());

        self.store = match self.store {
            StoreConfig::Postgrest {
                base_url,
                realtime_url: configured_realtime,
                api_key: configured_key,
            } => StoreConfig::Postgrest {
                base_url: store_url.unwrap_or(base_url),
                realtime_url: realtime_url.unwrap_or(configured_realtime),
                api_key: api_key.unwrap_or(configured_key),
            },
            StoreConfig::Memory => match store_url {
                Some(base_url) => StoreConfig::Postgrest {
                    base_url,
                    realtime_url: realtime_url.unwrap_or_default(),
                    api_key: api_key.unwrap_or_default(),
                },
                None => StoreConfig::Memory,
            },
        };
        self
    }

    /// Selected storage backend.
    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    /// Upper bound for a single store round trip.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Buffered notifications per room handle before slow observers lag.
    pub fn notification_capacity(&self) -> usize {
        self.notification_capacity
    }

    /// Separator used by batch imports when the caller does not pass one.
    pub fn import_delimiter(&self) -> &str {
        &self.import_delimiter
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::Memory,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            import_delimiter: DEFAULT_IMPORT_DELIMITER.into(),
        }
    }
}

impl StoreConfig {
    fn kind(&self) -> &'static str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::Postgrest { .. } => "postgrest",
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    store: RawStore,
    request_timeout_ms: Option<u64>,
    notification_capacity: Option<usize>,
    import_delimiter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
/// JSON representation of the `store` section.
enum RawStore {
    #[default]
    Memory,
    Postgrest {
        base_url: String,
        #[serde(default)]
        realtime_url: String,
        #[serde(default)]
        api_key: String,
    },
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let store = match value.store {
            RawStore::Memory => StoreConfig::Memory,
            RawStore::Postgrest {
                base_url,
                realtime_url,
                api_key,
            } => StoreConfig::Postgrest {
                base_url,
                realtime_url,
                api_key,
            },
        };

        Self {
            store,
            request_timeout: Duration::from_millis(
                value
                    .request_timeout_ms
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            ),
            notification_capacity: value
                .notification_capacity
                .unwrap_or(DEFAULT_NOTIFICATION_CAPACITY),
            import_delimiter: value
                .import_delimiter
                .filter(|delimiter| !delimiter.is_empty())
                .unwrap_or_else(|| DEFAULT_IMPORT_DELIMITER.into()),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from(Path::new("/definitely/not/here/app.json"));
        assert_eq!(config.store(), &StoreConfig::Memory);
        assert_eq!(config.request_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.notification_capacity(), 64);
        assert_eq!(config.import_delimiter(), ";");
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let config = AppConfig::from_json(r#"{"import_delimiter": "|"}"#).unwrap();
        assert_eq!(config.import_delimiter(), "|");
        assert_eq!(config.notification_capacity(), 64);
    }

    #[test]
    fn postgrest_section_is_parsed() {
        let config = AppConfig::from_json(
            r#"{
                "store": {
                    "kind": "postgrest",
                    "base_url": "http://localhost:3000",
                    "realtime_url": "ws://localhost:4000/socket/websocket",
                    "api_key": "anon"
                },
                "request_timeout_ms": 250
            }"#,
        )
        .unwrap();

        assert!(matches!(config.store(), StoreConfig::Postgrest { api_key, .. } if api_key == "anon"));
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(AppConfig::from_json("{ not json").is_err());
    }

    #[test]
    fn store_url_switches_memory_to_postgrest() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("QUIZROOM_STORE_URL", "http://db:3000"),
            ("QUIZROOM_API_KEY", "secret"),
        ]);
        let config = AppConfig::default()
            .with_env_overrides(|var| env.get(var).map(|value| value.to_string()));

        assert_eq!(
            config.store(),
            &StoreConfig::Postgrest {
                base_url: "http://db:3000".into(),
                realtime_url: String::new(),
                api_key: "secret".into(),
            }
        );
    }

    #[test]
    fn env_overrides_single_postgrest_fields() {
        let config = AppConfig::from_json(
            r#"{"store": {"kind": "postgrest", "base_url": "http://a", "api_key": "k1"}}"#,
        )
        .unwrap()
        .with_env_overrides(|var| (var == "QUIZROOM_API_KEY").then(|| "k2".to_string()));

        match config.store() {
            StoreConfig::Postgrest {
                base_url, api_key, ..
            } => {
                assert_eq!(base_url, "http://a");
                assert_eq!(api_key, "k2");
            }
            other => panic!("unexpected store {other:?}"),
        }
    }
}
