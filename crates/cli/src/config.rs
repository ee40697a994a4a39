//! Configuration loading.
//!
//! Settings come from a TOML file (default `flowdispatch.toml`) and are then
//! overridden by command-line flags or their environment variables:
//!
//! ```text
//! Config
//! ├── server: ServerSection        # bind address, CORS, body limit
//! ├── model: ModelSection          # Gemini key, model, endpoint, timeout
//! ├── store: Option<StoreSection>  # PostgREST/GoTrue; absent → in-memory
//! ├── quota: QuotaSection          # tier → monthly limit overrides
//! ├── dispatch: DispatchSection    # article fetching and content budget
//! └── telemetry: TelemetrySection  # log format, OTLP export
//! ```
//!
//! A missing file is not an error: every section has defaults.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use pipeline::{ExecutionLimit, QuotaPolicy, SubscriptionTier, DEFAULT_CONTENT_BUDGET};

use crate::TRACING_TARGET_CONFIG;

/// Failure to produce a usable [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// Command-line flags. Each one overrides the matching file setting.
#[derive(Debug, Clone, Parser)]
#[command(name = "flowdispatch")]
#[command(about = "Executes workflow graphs against a generative model")]
#[command(version)]
pub struct Cli {
    /// Path of the TOML configuration file.
    #[arg(short, long, env = "FLOWDISPATCH_CONFIG", default_value = "flowdispatch.toml")]
    pub config: PathBuf,

    /// Address to bind.
    #[arg(long, env = "FLOWDISPATCH_HOST")]
    pub host: Option<IpAddr>,

    /// Port to listen on.
    #[arg(short, long, env = "FLOWDISPATCH_PORT")]
    pub port: Option<u16>,

    /// Gemini API key. Without one the execute endpoint answers 503.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Gemini model name.
    #[arg(long, env = "GEMINI_MODEL")]
    pub model: Option<String>,

    /// Root URL of the PostgREST/GoTrue project.
    #[arg(long, env = "FLOWDISPATCH_STORE_URL")]
    pub store_url: Option<String>,

    /// Service key for the datastore.
    #[arg(long, env = "FLOWDISPATCH_STORE_KEY", hide_env_values = true)]
    pub store_key: Option<String>,

    /// Public key sent to the identity service. Defaults to the service key.
    #[arg(long, env = "FLOWDISPATCH_STORE_ANON_KEY", hide_env_values = true)]
    pub store_anon_key: Option<String>,

    /// OTLP collector endpoint, e.g. `http://localhost:4317`.
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

// ---------------------------------------------------------------------------
// File sections
// ---------------------------------------------------------------------------

/// The complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerSection,
    pub model: ModelSection,
    pub store: Option<StoreSection>,
    pub quota: QuotaSection,
    pub dispatch: DispatchSection,
    pub telemetry: TelemetrySection,
}

/// `[server]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub host: IpAddr,
    pub port: u16,
    /// Empty allows any origin.
    pub cors_allowed_origins: Vec<String>,
    pub max_body_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3000,
            cors_allowed_origins: Vec::new(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl ServerSection {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// `[model]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSection {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            api_key: None,
            model: llm::DEFAULT_GEMINI_MODEL.to_owned(),
            base_url: llm::DEFAULT_GEMINI_BASE_URL.to_owned(),
            timeout_secs: 120,
        }
    }
}

impl ModelSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The API key, if one is set and not blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// `[store]`. Leaving the section out selects the in-memory store.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    pub url: String,
    pub service_key: String,
    #[serde(default)]
    pub anon_key: Option<String>,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_store_timeout_secs() -> u64 {
    10
}

impl StoreSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Key presented to the identity service.
    pub fn anon_key(&self) -> &str {
        self.anon_key.as_deref().unwrap_or(&self.service_key)
    }
}

/// `[quota]`. Limits given here replace the built-in value for that tier;
/// `-1` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaSection {
    pub limits: BTreeMap<SubscriptionTier, ExecutionLimit>,
}

impl QuotaSection {
    /// Built-in limits overlaid with the configured ones.
    pub fn policy(&self) -> QuotaPolicy {
        let mut policy = QuotaPolicy::default();
        policy.limits.extend(self.limits.iter().map(|(tier, limit)| (*tier, *limit)));
        policy
    }
}

/// `[dispatch]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchSection {
    /// Characters of fetched article text embedded in a prompt.
    pub content_budget: usize,
    /// Fetch article URLs for content-impact and media-bias graphs.
    pub fetch_content: bool,
    pub fetch_timeout_secs: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            content_budget: DEFAULT_CONTENT_BUDGET,
            fetch_content: true,
            fetch_timeout_secs: 15,
        }
    }
}

/// `[telemetry]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetrySection {
    pub json: bool,
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            json: false,
            otlp_endpoint: None,
            service_name: "flowdispatch".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text).map_err(|source| ConfigError::Parse {
                path: path.to_owned(),
                source,
            }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_owned(),
                source,
            }),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Applies command-line and environment overrides.
    pub fn apply(&mut self, cli: &Cli) -> Result<(), ConfigError> {
        if let Some(host) = cli.host {
            self.server.host = host;
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(key) = &cli.gemini_api_key {
            self.model.api_key = Some(key.clone());
        }
        if let Some(model) = &cli.model {
            self.model.model = model.clone();
        }
        if let Some(endpoint) = &cli.otlp_endpoint {
            self.telemetry.otlp_endpoint = Some(endpoint.clone());
        }
        if cli.json_logs {
            self.telemetry.json = true;
        }

        if let Some(store) = self.store.as_mut() {
            if let Some(url) = &cli.store_url {
                store.url = url.clone();
            }
            if let Some(key) = &cli.store_key {
                store.service_key = key.clone();
            }
        } else if let Some(url) = &cli.store_url {
            let service_key = cli.store_key.clone().ok_or_else(|| {
                ConfigError::Invalid("a store URL was given without a service key".into())
            })?;
            self.store = Some(StoreSection {
                url: url.clone(),
                service_key,
                anon_key: None,
                timeout_secs: default_store_timeout_secs(),
            });
        }
        if let (Some(store), Some(anon)) = (&mut self.store, &cli.store_anon_key) {
            store.anon_key = Some(anon.clone());
        }

        Ok(())
    }

    /// Rejects settings that cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.timeout_secs == 0 {
            return Err(ConfigError::Invalid("model.timeout_secs must be positive".into()));
        }
        if !self.model.base_url.starts_with("http") {
            return Err(ConfigError::Invalid(format!(
                "model.base_url must be an http(s) URL, got {:?}",
                self.model.base_url
            )));
        }
        if let Some(store) = &self.store {
            if !store.url.starts_with("http") {
                return Err(ConfigError::Invalid(format!(
                    "store.url must be an http(s) URL, got {:?}",
                    store.url
                )));
            }
            if store.service_key.trim().is_empty() {
                return Err(ConfigError::Invalid("store.service_key is empty".into()));
            }
        }
        if self.dispatch.content_budget == 0 {
            return Err(ConfigError::Invalid("dispatch.content_budget must be positive".into()));
        }
        Ok(())
    }

    /// Logs the effective configuration without secrets.
    pub fn log(&self) {
        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            address = %self.server.socket_addr(),
            cors_origins = ?self.server.cors_allowed_origins,
            model = %self.model.model,
            backend_configured = self.model.api_key().is_some(),
            store = self.store.as_ref().map_or("memory", |_| "rest"),
            fetch_content = self.dispatch.fetch_content,
            otlp = self.telemetry.otlp_endpoint.is_some(),
            "configuration loaded"
        );
    }
}
