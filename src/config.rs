use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// A single entry in the service directory.
///
/// `extension` need not be unique; `name` must be, which is enforced at
/// config-load time rather than left as a runtime invariant to check.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub extension: String,
    pub name: String,
}

/// Root application configuration, loaded once from the environment.
///
/// Field names match the lowercased environment variable names
/// (`ARI_HOST` -> `ari_host`) so that `config::Environment::default()` (no
/// separator, case-insensitive) maps them automatically.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub ari_host: String,
    pub ari_port: u16,
    pub ari_user: String,
    pub ari_password: String,
    pub ari_app: String,

    pub openai_api_key: String,

    pub company_name: String,
    pub greeting_message: String,
    pub ring_timeout: u64,

    /// Raw `ext:name,ext:name,...` string; parsed into `services()` below.
    pub services: String,

    #[serde(default)]
    pub n8n_webhook_url: Option<String>,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: String,
}

fn default_cache_dir() -> String {
    "cache".to_string()
}

fn default_recordings_dir() -> String {
    "/var/spool/asterisk/recording".to_string()
}

impl AppConfig {
    /// Load configuration from the environment (and `.env` if present).
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate_services()?;
        Ok(app)
    }

    /// Initialize the global config singleton.
    pub fn init() -> Result<&'static Self, ConfigError> {
        let config = Self::load()?;
        Ok(CONFIG.get_or_init(|| config))
    }

    /// Get a reference to the global config.
    pub fn get() -> &'static Self {
        CONFIG
            .get()
            .expect("AppConfig not initialized; call AppConfig::init() first")
    }

    /// Parse the `SERVICES` env var into the ordered service directory.
    ///
    /// Format: comma-separated `ext:name` pairs, e.g. `101:Ventes,102:Support`.
    pub fn services(&self) -> Vec<ServiceEntry> {
        parse_services(&self.services).expect("services were validated at load time")
    }

    fn validate_services(&self) -> Result<(), ConfigError> {
        let entries = parse_services(&self.services)
            .map_err(|e| ConfigError::Message(format!("invalid SERVICES value: {e}")))?;

        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.name.to_lowercase()) {
                return Err(ConfigError::Message(format!(
                    "duplicate service name in SERVICES: {}",
                    entry.name
                )));
            }
        }
        Ok(())
    }
}

fn parse_services(raw: &str) -> Result<Vec<ServiceEntry>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, ':');
            let extension = parts
                .next()
                .ok_or_else(|| format!("missing extension in '{pair}'"))?
                .trim()
                .to_string();
            let name = parts
                .next()
                .ok_or_else(|| format!("missing name in '{pair}'"))?
                .trim()
                .to_string();
            if extension.is_empty() || name.is_empty() {
                return Err(format!("malformed service entry '{pair}'"));
            }
            Ok(ServiceEntry { extension, name })
        })
        .collect()
}
