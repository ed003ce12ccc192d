//! Configuration for fieldsync.
//!
//! Settings are read from `.fieldsync/fieldsync.toml` and layered
//! file → environment → CLI:
//!
//! ```toml
//! [store]
//! path = ".fieldsync/queue.db"
//!
//! [delivery]
//! base_url = "https://api.example.com/v1"
//! timeout_ms = 30000
//! api_token = "..."
//!
//! [endpoints]
//! timesheets = "https://api.example.com/v1/timesheets"
//! expenses = "https://api.example.com/v1/expenses"
//! location = "https://api.example.com/v1/location"
//!
//! [server]
//! bind = "127.0.0.1:4318"
//! ```
//!
//! Environment overrides: `FIELDSYNC_API_URL`, `FIELDSYNC_API_TOKEN`,
//! `FIELDSYNC_DB_PATH`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::queue::QueueName;

pub const CONFIG_DIR: &str = ".fieldsync";
pub const CONFIG_FILE: &str = "fieldsync.toml";

pub const ENV_API_URL: &str = "FIELDSYNC_API_URL";
pub const ENV_API_TOKEN: &str = "FIELDSYNC_API_TOKEN";
pub const ENV_DB_PATH: &str = "FIELDSYNC_DB_PATH";

/// Persistent store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSection {
    /// SQLite file; relative paths resolve against the project directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Remote API delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySection {
    /// Base URL used to derive the timesheets endpoint when none is set.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Per-request timeout; an elapsed request counts as a delivery failure.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Bearer token sent with every delivery.
    #[serde(default)]
    pub api_token: Option<String>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_timeout_ms(),
            api_token: None,
        }
    }
}

/// One delivery URL per queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointsSection {
    #[serde(default)]
    pub timesheets: Option<String>,
    #[serde(default)]
    pub expenses: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl EndpointsSection {
    pub fn get(&self, queue: QueueName) -> Option<&str> {
        match queue {
            QueueName::Timesheets => self.timesheets.as_deref(),
            QueueName::Expenses => self.expenses.as_deref(),
            QueueName::Location => self.location.as_deref(),
        }
    }
}

/// Trigger server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:4318".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// The complete fieldsync.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldsyncToml {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub delivery: DeliverySection,
    #[serde(default)]
    pub endpoints: EndpointsSection,
    #[serde(default)]
    pub server: ServerSection,
}

impl FieldsyncToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse fieldsync.toml")
    }

    /// Load configuration from `<config_dir>/fieldsync.toml`.
    /// Returns default configuration if the file doesn't exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize fieldsync.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Human-readable warnings for settings that will leave records stuck.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.delivery.timeout_ms == 0 {
            warnings.push("delivery.timeout_ms is 0; every delivery will time out".to_string());
        }
        for queue in QueueName::ALL {
            match self.endpoint(queue) {
                None => warnings.push(format!(
                    "No endpoint for queue '{}'; its records will stay queued",
                    queue
                )),
                Some(url) if !is_http_url(&url) => warnings.push(format!(
                    "Endpoint for queue '{}' is not an http(s) URL: {}",
                    queue, url
                )),
                Some(_) => {}
            }
        }
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            warnings.push(format!(
                "server.bind '{}' is not a socket address",
                self.server.bind
            ));
        }

        warnings
    }

    /// Delivery URL for a queue. Only `timesheets` falls back to
    /// `<base_url>/timesheets`; the other queues must be configured.
    pub fn endpoint(&self, queue: QueueName) -> Option<String> {
        if let Some(url) = self.endpoints.get(queue) {
            return Some(url.to_string());
        }
        match (queue, &self.delivery.base_url) {
            (QueueName::Timesheets, Some(base)) => {
                Some(format!("{}/{}", base.trim_end_matches('/'), queue.as_str()))
            }
            _ => None,
        }
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Runtime configuration: the parsed file plus environment and CLI overrides.
#[derive(Debug, Clone)]
pub struct FieldsyncConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: FieldsyncToml,
    /// CLI override for the store path
    pub cli_db_path: Option<PathBuf>,
}

impl FieldsyncConfig {
    /// Load the config file (if any) and apply environment overrides.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = FieldsyncToml::load_or_default(&config_dir)?;
        apply_env(&mut toml, |key| std::env::var(key).ok());

        Ok(Self {
            project_dir,
            config_dir,
            toml,
            cli_db_path: None,
        })
    }

    /// Create a FieldsyncConfig with CLI overrides.
    pub fn with_cli_args(project_dir: PathBuf, db_path: Option<PathBuf>) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.cli_db_path = db_path;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Store path (CLI → env/file → default), resolved against the project dir.
    pub fn db_path(&self) -> PathBuf {
        let path = self
            .cli_db_path
            .clone()
            .or_else(|| self.toml.store.path.clone())
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("queue.db"));
        if path.is_absolute() {
            path
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn endpoint(&self, queue: QueueName) -> Option<String> {
        self.toml.endpoint(queue)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

/// Environment values win over the file; empty values are ignored.
fn apply_env<F>(toml: &mut FieldsyncToml, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = get(ENV_API_URL) {
        toml.delivery.base_url = Some(url);
    }
    if let Some(token) = get(ENV_API_TOKEN) {
        toml.delivery.api_token = Some(token);
    }
    if let Some(path) = get(ENV_DB_PATH) {
        toml.store.path = Some(PathBuf::from(path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let toml = FieldsyncToml::parse("").unwrap();
        assert_eq!(toml.delivery.timeout_ms, 30_000);
        assert_eq!(toml.server.bind, "127.0.0.1:4318");
        assert!(toml.store.path.is_none());
        assert!(toml.delivery.api_token.is_none());
    }

    #[test]
    fn test_parse_full_file() {
        let content = r#"
[store]
path = "/var/lib/fieldsync/queue.db"

[delivery]
base_url = "https://api.example.com/v1"
timeout_ms = 5000
api_token = "secret"

[endpoints]
expenses = "https://api.example.com/v1/expense-claims"

[server]
bind = "0.0.0.0:9000"
"#;
        let toml = FieldsyncToml::parse(content).unwrap();
        assert_eq!(
            toml.store.path.as_deref(),
            Some(Path::new("/var/lib/fieldsync/queue.db"))
        );
        assert_eq!(toml.delivery.timeout_ms, 5000);
        assert_eq!(toml.delivery.api_token.as_deref(), Some("secret"));
        assert_eq!(toml.server.bind, "0.0.0.0:9000");
        assert_eq!(
            toml.endpoint(QueueName::Expenses).as_deref(),
            Some("https://api.example.com/v1/expense-claims")
        );
    }

    #[test]
    fn test_parse_invalid_toml_fails() {
        assert!(FieldsyncToml::parse("[delivery\ntimeout_ms = ").is_err());
    }

    #[test]
    fn test_timesheets_endpoint_derives_from_base_url() {
        let mut toml = FieldsyncToml::default();
        toml.delivery.base_url = Some("https://api.example.com/v1/".to_string());
        assert_eq!(
            toml.endpoint(QueueName::Timesheets).as_deref(),
            Some("https://api.example.com/v1/timesheets")
        );
        assert_eq!(toml.endpoint(QueueName::Expenses), None);
        assert_eq!(toml.endpoint(QueueName::Location), None);
    }

    #[test]
    fn test_explicit_endpoint_wins_over_base_url() {
        let mut toml = FieldsyncToml::default();
        toml.delivery.base_url = Some("https://api.example.com".to_string());
        toml.endpoints.timesheets = Some("https://other.example.com/ts".to_string());
        assert_eq!(
            toml.endpoint(QueueName::Timesheets).as_deref(),
            Some("https://other.example.com/ts")
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let mut toml = FieldsyncToml::parse(
            r#"
[delivery]
base_url = "https://file.example.com"
api_token = "from-file"
"#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_URL, "https://env.example.com"),
            (ENV_API_TOKEN, ""),
            (ENV_DB_PATH, "/tmp/q.db"),
        ]);
        apply_env(&mut toml, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(
            toml.delivery.base_url.as_deref(),
            Some("https://env.example.com")
        );
        // Empty env values don't clobber the file.
        assert_eq!(toml.delivery.api_token.as_deref(), Some("from-file"));
        assert_eq!(toml.store.path.as_deref(), Some(Path::new("/tmp/q.db")));
    }

    #[test]
    fn test_validate_flags_missing_endpoints() {
        let toml = FieldsyncToml::default();
        let warnings = toml.validate();
        assert_eq!(
            warnings
                .iter()
                .filter(|w| w.starts_with("No endpoint"))
                .count(),
            3
        );
    }

    #[test]
    fn test_validate_clean_config() {
        let mut toml = FieldsyncToml::default();
        toml.delivery.base_url = Some("https://api.example.com".to_string());
        toml.endpoints.expenses = Some("https://api.example.com/expenses".to_string());
        toml.endpoints.location = Some("https://api.example.com/location".to_string());
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_validate_flags_bad_values() {
        let mut toml = FieldsyncToml::default();
        toml.delivery.timeout_ms = 0;
        toml.endpoints.timesheets = Some("ftp://example.com".to_string());
        toml.server.bind = "not-an-addr".to_string();
        let warnings = toml.validate();
        assert!(warnings.iter().any(|w| w.contains("timeout_ms")));
        assert!(warnings.iter().any(|w| w.contains("ftp://example.com")));
        assert!(warnings.iter().any(|w| w.contains("not-an-addr")));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = FieldsyncToml::default();
        toml.endpoints.location = Some("https://api.example.com/pings".to_string());
        toml.save(&path).unwrap();

        let loaded = FieldsyncToml::load(&path).unwrap();
        assert_eq!(
            loaded.endpoints.location.as_deref(),
            Some("https://api.example.com/pings")
        );
    }

    #[test]
    fn test_db_path_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FieldsyncConfig {
            project_dir: dir.path().to_path_buf(),
            config_dir: dir.path().join(CONFIG_DIR),
            toml: FieldsyncToml::default(),
            cli_db_path: None,
        };
        assert_eq!(config.db_path(), dir.path().join(".fieldsync/queue.db"));

        config.toml.store.path = Some(PathBuf::from("data/q.db"));
        assert_eq!(config.db_path(), dir.path().join("data/q.db"));

        config.cli_db_path = Some(PathBuf::from("/abs/cli.db"));
        assert_eq!(config.db_path(), PathBuf::from("/abs/cli.db"));
    }
}
