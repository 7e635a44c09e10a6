use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [api]
//                    base_url = "https://care.example.com/api"
//
//   env var:         TELECARE_API__BASE_URL=https://care.example.com/api
//
//   (double underscore = nesting; single underscore stays within field names)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub api: ApiFileConfig,
    #[serde(default)]
    pub live: LiveFileConfig,
}

/// REST collaborator tunables (lives under `[api]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiFileConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Request timeout; 0 leaves reqwest's default (none).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Real-time collaborator tunables (lives under `[live]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LiveFileConfig {
    #[serde(default = "default_live_url")]
    pub url: String,
    /// Number of entries kept in the dashboard activity feed.
    #[serde(default = "default_activity_feed_cap")]
    pub activity_feed_cap: usize,
}

impl Default for LiveFileConfig {
    fn default() -> Self {
        Self {
            url: default_live_url(),
            activity_feed_cap: default_activity_feed_cap(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:5000/api".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_live_url() -> String {
    "ws://127.0.0.1:5000/ws".to_string()
}
fn default_activity_feed_cap() -> usize {
    5
}

/// Build a figment that layers: defaults → config.toml → TELECARE_* env vars.
///
///   `TELECARE_API__TIMEOUT_SECS=5`  →  `api.timeout_secs = 5`
///   `TELECARE_LIVE__URL=wss://...`  →  `live.url = "wss://..."`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("TELECARE_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

/// REST client configuration (runtime view).
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Option<Duration>,
}

impl ApiConfig {
    pub fn from_file(fc: &ApiFileConfig) -> Self {
        Self {
            base_url: fc.base_url.trim_end_matches('/').to_string(),
            timeout: if fc.timeout_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(fc.timeout_secs))
            },
        }
    }
}

/// Live update configuration (runtime view).
#[derive(Clone, Debug)]
pub struct LiveConfig {
    pub url: String,
    pub activity_feed_cap: usize,
}

impl LiveConfig {
    pub fn from_file(fc: &LiveFileConfig) -> Self {
        Self {
            url: fc.url.clone(),
            // A zero cap would drop every live activity.
            activity_feed_cap: fc.activity_feed_cap.max(1),
        }
    }
}

// =============================================================================
// Directory layout config (not tunable via figment: derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct TelecareConfig {
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl TelecareConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".telecare"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        let state_dir = data_dir.join("state");
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("Failed to create state directory: {:?}", state_dir))?;

        debug!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, logs_dir })
    }

    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    /// Where the single persisted bearer token lives.
    pub fn token_path(&self) -> PathBuf {
        self.state_dir().join("token")
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir.join("telecare.log")
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    /// Resolve the layered file config into runtime views.
    pub fn resolve(&self) -> Result<(ApiConfig, LiveConfig)> {
        let fc: FileConfig = load_config(&self.data_dir)
            .extract()
            .with_context(|| format!("Invalid config in {}", self.config_toml_path().display()))?;
        Ok((ApiConfig::from_file(&fc.api), LiveConfig::from_file(&fc.live)))
    }
}
