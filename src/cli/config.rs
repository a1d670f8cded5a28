//! Welcomer configuration file handling
//!
//! Provides default configuration generation and loading for the bot.
//! Configuration files are TOML and live in the data directory next to the
//! credential store and the ledger.
//!
//! Every section is optional; a missing section falls back to its defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use welcomer::address::AddressNormalizer;
use welcomer::dispatch::{DedupPolicy, DispatchConfig, GreetingTemplate, Pacing};
use welcomer::session::{BackoffConfig, LifecycleConfig};
use welcomer::transport::{BridgeConfig, GroupId};

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_ENDPOINT: &str = "127.0.0.1:7390";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_LEDGER_FAILURES: u32 = 3;

const CREDENTIALS_FILE: &str = "credentials.bin";
const LEDGER_FILE: &str = "db.json";

/// Operator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WelcomerConfig {
    #[serde(default)]
    pub transport: TransportSection,

    #[serde(default)]
    pub session: SessionSection,

    #[serde(default)]
    pub reconnect: BackoffConfig,

    #[serde(default)]
    pub dispatch: DispatchSection,

    #[serde(default)]
    pub addresses: AddressNormalizer,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Gateway connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSection {
    /// `host:port` of the gateway sidecar
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

/// Session / credential settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Credential file (default: `<data dir>/credentials.bin`)
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,

    #[serde(with = "humantime_serde", default = "default_handshake_timeout")]
    pub handshake_timeout: Duration,
}

/// Greeting dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSection {
    /// Ledger file (default: `<data dir>/db.json`)
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,

    #[serde(default)]
    pub dedup_policy: DedupPolicy,

    #[serde(default)]
    pub template: GreetingTemplate,

    #[serde(default = "default_max_ledger_failures")]
    pub max_ledger_failures: u32,

    #[serde(default)]
    pub reconcile_groups: Vec<GroupId>,

    #[serde(default)]
    pub pacing: Option<Pacing>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_handshake_timeout() -> Duration {
    DEFAULT_HANDSHAKE_TIMEOUT
}

fn default_max_ledger_failures() -> u32 {
    DEFAULT_MAX_LEDGER_FAILURES
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            credentials_path: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            ledger_path: None,
            dedup_policy: DedupPolicy::default(),
            template: GreetingTemplate::default(),
            max_ledger_failures: DEFAULT_MAX_LEDGER_FAILURES,
            reconcile_groups: Vec::new(),
            pacing: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

impl WelcomerConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: WelcomerConfig = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        config
            .validate()
            .map_err(|e| format!("Invalid config file '{}': {}", path.display(), e))?;

        Ok(config)
    }

    /// Load `path`, generating a commented default first when it is missing
    pub fn load_or_create(
        path: &Path,
        data_dir: &Path,
    ) -> Result<(Self, bool), Box<dyn std::error::Error>> {
        if path.exists() {
            return Ok((Self::load(path)?, false));
        }
        Self::create_default(path, data_dir)?;
        Ok((Self::load(path)?, true))
    }

    /// Cross-field checks serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.transport.endpoint.trim().is_empty() {
            return Err("transport.endpoint must not be empty".to_string());
        }
        self.reconnect.validate()?;
        self.dispatch.template.validate()?;
        if let Some(pacing) = &self.dispatch.pacing {
            pacing.validate()?;
        }
        if self.dispatch.max_ledger_failures == 0 {
            return Err("dispatch.max_ledger_failures must be at least 1".to_string());
        }
        self.addresses.validate().map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn credentials_path(&self, data_dir: &Path) -> PathBuf {
        self.session
            .credentials_path
            .clone()
            .unwrap_or_else(|| data_dir.join(CREDENTIALS_FILE))
    }

    pub fn ledger_path(&self, data_dir: &Path) -> PathBuf {
        self.dispatch
            .ledger_path
            .clone()
            .unwrap_or_else(|| data_dir.join(LEDGER_FILE))
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            endpoint: self.transport.endpoint.clone(),
            connect_timeout: self.transport.connect_timeout,
            request_timeout: self.transport.request_timeout,
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            connect_timeout: self.transport.connect_timeout,
            handshake_timeout: self.session.handshake_timeout,
            backoff: self.reconnect.clone(),
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            policy: self.dispatch.dedup_policy,
            template: self.dispatch.template.clone(),
            pacing: self.dispatch.pacing,
            max_ledger_failures: self.dispatch.max_ledger_failures,
            reconcile_groups: self.dispatch.reconcile_groups.clone(),
        }
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml(data_dir: &Path) -> String {
        format!(
            r#"# Welcomer Bot Configuration (Operator Settings)
#
# Every section is optional. Durations use humantime syntax ("5s", "2m 30s").

[transport]
# Gateway sidecar speaking the JSON-lines bridge protocol
endpoint = "{endpoint}"
connect_timeout = "30s"
request_timeout = "20s"

[session]
# Session credentials; delete with `welcomer reset-session` to pair again
credentials_path = "{credentials}"
handshake_timeout = "60s"

[reconnect]
# "capped" gives up after max_attempts consecutive failures,
# "unbounded" retries forever once a session has opened
policy = "capped"
floor = "5s"
cap = "5m"
growth_factor = 2.0
max_attempts = 10
# Bound on retries before the first successful open
startup_attempts = 5

[dispatch]
# Who has already been greeted
ledger_path = "{ledger}"
# "per_group": greet once per group; "global": greet once ever
dedup_policy = "per_group"
# Placeholders: {{date}} {{time}} {{timestamp}} {{group}}
# template = "Welcome to {{group}}!"
# Consecutive ledger write failures before the bot stops
max_ledger_failures = 3
# Groups re-scanned after every (re)connect
reconcile_groups = []

# Random spacing between consecutive greetings (optional)
# [dispatch.pacing]
# min = "2s"
# max = "8s"

[addresses]
# Domain appended to addresses that have none (optional)
# default_domain = "s.example.net"

# Legacy domain -> canonical domain (optional)
# [addresses.domain_aliases]
# "c.example.net" = "s.example.net"

[logging]
# Log level: trace, debug, info, warn, error (RUST_LOG overrides)
level = "info"

# Log file path (optional, logs to stderr if not specified)
# file = "/var/log/welcomer/welcomer.log"
"#,
            endpoint = DEFAULT_ENDPOINT,
            credentials = data_dir.join(CREDENTIALS_FILE).display(),
            ledger = data_dir.join(LEDGER_FILE).display(),
        )
    }

    /// Create and save a default configuration file
    pub fn create_default(
        config_path: &Path,
        data_dir: &Path,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let contents = Self::generate_default_toml(data_dir);

        // Create parent directory if needed
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(config_path, contents).map_err(|e| {
            format!(
                "Failed to write config file '{}': {}",
                config_path.display(),
                e
            )
        })?;

        Ok(())
    }
}

/// Get the default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("welcomer")
}

/// Get the default config file path inside the data directory
pub fn default_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// Resolve `--config` / `--data-dir` into (config path, data dir)
pub fn resolve_paths(config: Option<String>, data_dir: Option<String>) -> (PathBuf, PathBuf) {
    let data_dir = data_dir.map(PathBuf::from).unwrap_or_else(default_data_dir);
    let config_path = config
        .map(PathBuf::from)
        .unwrap_or_else(|| default_config_path(&data_dir));
    (config_path, data_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use welcomer::session::ReconnectPolicy;

    #[test]
    fn test_default_config() {
        let config = WelcomerConfig::default();
        let data_dir = PathBuf::from("/data/welcomer");

        assert_eq!(config.transport.endpoint, "127.0.0.1:7390");
        assert_eq!(config.dispatch.dedup_policy, DedupPolicy::PerGroup);
        assert_eq!(config.reconnect.policy, ReconnectPolicy::Capped);
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.credentials_path(&data_dir),
            PathBuf::from("/data/welcomer/credentials.bin")
        );
        assert_eq!(
            config.ledger_path(&data_dir),
            PathBuf::from("/data/welcomer/db.json")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_create_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let data_dir = temp_dir.path().join("data");

        WelcomerConfig::create_default(&config_path, &data_dir).unwrap();
        assert!(config_path.exists());

        // Verify it can be loaded
        let config = WelcomerConfig::load(&config_path).unwrap();
        assert_eq!(
            config.session.credentials_path,
            Some(data_dir.join("credentials.bin"))
        );
        assert_eq!(config.dispatch.ledger_path, Some(data_dir.join("db.json")));
        assert_eq!(config.reconnect, BackoffConfig::default());
        assert_eq!(config.dispatch.template, GreetingTemplate::default());
        assert!(config.dispatch.pacing.is_none());
    }

    #[test]
    fn test_load_or_create() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let (_, created) = WelcomerConfig::load_or_create(&config_path, temp_dir.path()).unwrap();
        assert!(created);
        let (_, created) = WelcomerConfig::load_or_create(&config_path, temp_dir.path()).unwrap();
        assert!(!created);
    }

    #[test]
    fn test_load_config_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        fs::write(&config_path, "[transport]\nendpoint = \"10.0.0.2:9000\"\n").unwrap();
        let config = WelcomerConfig::load(&config_path).unwrap();

        assert_eq!(config.transport.endpoint, "10.0.0.2:9000");
        assert_eq!(config.transport.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.session.handshake_timeout, Duration::from_secs(60));
        assert_eq!(config.dispatch.max_ledger_failures, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_full_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[reconnect]
policy = "unbounded"
floor = "1s"
cap = "1m"

[dispatch]
dedup_policy = "global"
template = "Hi {group}, it is {time}"
reconcile_groups = ["g1@g.us"]

[dispatch.pacing]
min = "2s"
max = "8s"

[addresses]
default_domain = "s.example.net"

[addresses.domain_aliases]
"c.example.net" = "s.example.net"
"#,
        )
        .unwrap();

        let config = WelcomerConfig::load(&config_path).unwrap();
        assert_eq!(config.reconnect.policy, ReconnectPolicy::Unbounded);
        assert_eq!(config.reconnect.cap, Duration::from_secs(60));

        let dispatch = config.dispatch_config();
        assert_eq!(dispatch.policy, DedupPolicy::Global);
        assert_eq!(dispatch.reconcile_groups, vec![GroupId::new("g1@g.us")]);
        assert_eq!(
            dispatch.pacing,
            Some(Pacing {
                min: Duration::from_secs(2),
                max: Duration::from_secs(8)
            })
        );
        assert_eq!(
            config.addresses.domain_aliases.get("c.example.net"),
            Some(&"s.example.net".to_string())
        );

        let lifecycle = config.lifecycle_config();
        assert_eq!(lifecycle.backoff.floor, Duration::from_secs(1));
    }

    #[test]
    fn test_unknown_policy_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[dispatch]\ndedup_policy = \"sometimes\"\n").unwrap();

        assert!(WelcomerConfig::load(&config_path).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        fs::write(&config_path, "[dispatch]\ntemplate = \"Hi {name}\"\n").unwrap();
        assert!(WelcomerConfig::load(&config_path).is_err());

        fs::write(&config_path, "[reconnect]\ngrowth_factor = 0.5\n").unwrap();
        assert!(WelcomerConfig::load(&config_path).is_err());

        fs::write(
            &config_path,
            "[dispatch.pacing]\nmin = \"9s\"\nmax = \"1s\"\n",
        )
        .unwrap();
        assert!(WelcomerConfig::load(&config_path).is_err());
    }

    #[test]
    fn test_generate_default_toml() {
        let data_dir = PathBuf::from("/data/welcomer");
        let toml = WelcomerConfig::generate_default_toml(&data_dir);

        assert!(toml.contains("credentials_path = \"/data/welcomer/credentials.bin\""));
        assert!(toml.contains("ledger_path = \"/data/welcomer/db.json\""));
        assert!(toml.contains("dedup_policy = \"per_group\""));
        assert!(toml.contains("{group}"));
    }

    #[test]
    fn test_resolve_paths() {
        let (config, data) = resolve_paths(None, Some("/srv/welcomer".to_string()));
        assert_eq!(data, PathBuf::from("/srv/welcomer"));
        assert_eq!(config, PathBuf::from("/srv/welcomer/config.toml"));

        let (config, _) = resolve_paths(Some("/etc/welcomer.toml".to_string()), None);
        assert_eq!(config, PathBuf::from("/etc/welcomer.toml"));
    }
}
