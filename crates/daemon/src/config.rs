//! Configuration management for the Termbridge daemon.
//!
//! Settings live in a TOML file, `~/.config/termbridge/config.toml` by
//! default. Every key is optional and a few can be overridden from the
//! environment.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("bind_address is not a valid socket address: {0}")]
    InvalidBindAddress(String),

    #[error("client_buffer must be greater than 0, got {0}")]
    InvalidClientBuffer(usize),

    #[error("shell does not exist: {0}")]
    InvalidShell(String),

    #[error("poll_interval_ms must be between 10 and 1000, got {0}")]
    InvalidPollInterval(u64),

    #[error("read_chunk_size must be greater than 0, got {0}")]
    InvalidChunkSize(usize),

    #[error("search_depth must be between 1 and 16, got {0}")]
    InvalidSearchDepth(usize),

    #[error("terminal size must be between 1 and 1000, got {0}x{1}")]
    InvalidTerminalSize(u16, u16),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Termbridge daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// WebSocket server configuration.
    pub server: ServerConfig,

    /// Shell and pseudo-terminal settings.
    pub terminal: TerminalConfig,

    /// Runtime environment detection.
    pub environment: EnvironmentConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the server listens on.
    pub bind_address: String,

    /// Number of output events a client may have waiting before further
    /// output is dropped. Control events are never dropped.
    pub client_buffer: usize,
}

/// Shell and pseudo-terminal settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminalConfig {
    /// Directory sessions start in when none (or an invalid one) is requested.
    pub default_root: PathBuf,

    /// Shell spawned for each session.
    pub shell: String,

    /// Value of `TERM` in the shell's environment.
    pub term: String,

    /// Initial terminal width.
    pub cols: u16,

    /// Initial terminal height.
    pub rows: u16,

    /// Upper bound on how long the read loop waits for output before yielding.
    pub poll_interval_ms: u64,

    /// Bytes read from the terminal per iteration.
    pub read_chunk_size: usize,

    /// Settle delay before the activation command is typed into a new shell.
    pub activation_delay_ms: u64,

    /// How long a terminated shell gets to exit before it is killed.
    pub terminate_timeout_ms: u64,
}

/// Runtime environment detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Whether sessions look for an environment to activate at all.
    pub enabled: bool,

    /// Explicit environment that wins over every other candidate when valid.
    pub preferred: Option<PathBuf>,

    /// Environment shipped alongside the daemon.
    pub bundled_dir: Option<PathBuf>,

    /// Directory names checked at each level of the upward search.
    pub directory_names: Vec<String>,

    /// Number of directory levels searched, starting with the session's own.
    pub search_depth: usize,

    /// Path, relative to an environment, of its activation script.
    pub activation_script: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5002".to_string(),
            client_buffer: 1024,
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            default_root: default_root(),
            shell: default_shell(),
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 24,
            poll_interval_ms: 100,
            read_chunk_size: 1024,
            activation_delay_ms: 300,
            terminate_timeout_ms: 2000,
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            preferred: None,
            bundled_dir: default_bundled_dir(),
            directory_names: ["venv", ".venv", "env", ".env", "virtualenv"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
            search_depth: 4,
            activation_script: PathBuf::from("bin").join("activate"),
        }
    }
}

impl TerminalConfig {
    /// Read loop readiness timeout.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Delay before deferred environment activation.
    pub fn activation_delay(&self) -> Duration {
        Duration::from_millis(self.activation_delay_ms)
    }

    /// Grace period between the terminate signal and a forced kill.
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termbridge")
        .join("config.toml")
}

/// Returns the default session root: `~/workspace` when it exists, else home.
fn default_root() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
    let workspace = home.join("workspace");
    if workspace.is_dir() {
        workspace
    } else {
        home
    }
}

/// Returns the default shell: bash when installed, else `$SHELL`, else sh.
fn default_shell() -> String {
    if Path::new("/bin/bash").exists() {
        return "/bin/bash".to_string();
    }
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

/// Returns the environment bundled next to the daemon executable.
fn default_bundled_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("venv")))
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - TERMBRIDGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - TERMBRIDGE_BIND: Override the server bind address
    /// - TERMBRIDGE_ROOT: Override the default session root
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("TERMBRIDGE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(bind) = std::env::var("TERMBRIDGE_BIND") {
            if !bind.is_empty() {
                tracing::info!("Overriding bind_address from environment: {}", bind);
                self.server.bind_address = bind;
            }
        }

        if let Ok(root) = std::env::var("TERMBRIDGE_ROOT") {
            if !root.is_empty() {
                tracing::info!("Overriding default_root from environment: {}", root);
                self.terminal.default_root = PathBuf::from(root);
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddress(
                self.server.bind_address.clone(),
            ));
        }

        if self.server.client_buffer == 0 {
            return Err(ConfigError::InvalidClientBuffer(self.server.client_buffer));
        }

        let shell_path = Path::new(&self.terminal.shell);
        let shell_found = if shell_path.is_absolute() {
            shell_path.exists()
        } else {
            which::which(&self.terminal.shell).is_ok()
        };
        if !shell_found {
            return Err(ConfigError::InvalidShell(self.terminal.shell.clone()));
        }

        if !(10..=1000).contains(&self.terminal.poll_interval_ms) {
            return Err(ConfigError::InvalidPollInterval(
                self.terminal.poll_interval_ms,
            ));
        }

        if self.terminal.read_chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(self.terminal.read_chunk_size));
        }

        if !(1..=16).contains(&self.environment.search_depth) {
            return Err(ConfigError::InvalidSearchDepth(
                self.environment.search_depth,
            ));
        }

        let (cols, rows) = (self.terminal.cols, self.terminal.rows);
        if !(1..=1000).contains(&cols) || !(1..=1000).contains(&rows) {
            return Err(ConfigError::InvalidTerminalSize(cols, rows));
        }

        Ok(())
    }

    /// Reads `path`, falling back to defaults when the file is absent.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Cannot read {}", path.display()));
            }
        };

        Self::from_toml(&contents).with_context(|| format!("Cannot parse {}", path.display()))
    }

    /// Reads the file at [`default_config_path`].
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parses a TOML document; missing tables and keys take their defaults.
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| anyhow::anyhow!(format_toml_error(&e, source)))
    }

    /// Writes the configuration, creating parent directories as needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create directory {}", dir.display()))?;
        }

        fs::write(path, self.to_toml()?)
            .with_context(|| format!("Cannot write {}", path.display()))?;

        tracing::debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Renders the configuration as pretty-printed TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Cannot render configuration as TOML")
    }
}

/// Turns a TOML error into `invalid configuration: <msg> (line L, column C)`.
fn format_toml_error(error: &toml::de::Error, source: &str) -> String {
    let message = error.message();
    match error.span() {
        Some(span) => {
            let before = &source[..span.start.min(source.len())];
            let line = before.matches('\n').count() + 1;
            let column = before.len() - before.rfind('\n').map_or(0, |i| i + 1) + 1;
            format!(
                "invalid configuration: {} (line {}, column {})",
                message, line, column
            )
        }
        None => format!("invalid configuration: {}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        std::env::remove_var("TERMBRIDGE_LOG_LEVEL");
        std::env::remove_var("TERMBRIDGE_BIND");
        std::env::remove_var("TERMBRIDGE_ROOT");
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.server.bind_address, "0.0.0.0:5002");
        assert_eq!(config.server.client_buffer, 1024);
        assert_eq!(config.terminal.term, "xterm-256color");
        assert_eq!((config.terminal.cols, config.terminal.rows), (80, 24));
        assert_eq!(config.terminal.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.terminal.read_chunk_size, 1024);
        assert_eq!(config.terminal.activation_delay(), Duration::from_millis(300));
        assert_eq!(config.terminal.terminate_timeout(), Duration::from_secs(2));
        assert!(config.environment.enabled);
        assert_eq!(config.environment.search_depth, 4);
        assert_eq!(
            config.environment.directory_names,
            vec!["venv", ".venv", "env", ".env", "virtualenv"]
        );
        assert_eq!(
            config.environment.activation_script,
            PathBuf::from("bin/activate")
        );
    }

    #[test]
    fn test_default_shell_is_not_empty() {
        let config = TerminalConfig::default();
        assert!(!config.shell.is_empty());
    }

    #[test]
    fn test_default_bundled_dir_is_named_venv() {
        let bundled = EnvironmentConfig::default().bundled_dir;
        if let Some(dir) = bundled {
            assert_eq!(dir.file_name().unwrap(), "venv");
        }
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[daemon]
log_level = "debug"

[terminal]
cols = 120
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.terminal.cols, 120);
        assert_eq!(config.terminal.rows, 24);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_from_toml_environment_section() {
        let toml = r#"
[environment]
enabled = false
preferred = "/opt/envs/main"
directory_names = [".venv"]
search_depth = 2
"#;
        let config = Config::from_toml(toml).unwrap();

        assert!(!config.environment.enabled);
        assert_eq!(
            config.environment.preferred,
            Some(PathBuf::from("/opt/envs/main"))
        );
        assert_eq!(config.environment.directory_names, vec![".venv"]);
        assert_eq!(config.environment.search_depth, 2);
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[daemon\nlog_level = ");
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .starts_with("invalid configuration:"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = "[terminal]\ncols = \"wide\"\n";
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("line 2"), "{}", err);
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut config = Config::default();
        config.server.bind_address = "127.0.0.1:9000".to_string();
        config.terminal.default_root = PathBuf::from("/srv/projects");
        config.environment.preferred = Some(PathBuf::from("/srv/env"));

        let toml = config.to_toml().unwrap();
        let parsed = Config::from_toml(&toml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.daemon.log_level = "warn".to_string();
        config.save(&path).unwrap();

        assert!(path.exists());
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "this is not = = toml").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Cannot parse"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("termbridge/config.toml"));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("TERMBRIDGE_LOG_LEVEL", "trace");
        std::env::set_var("TERMBRIDGE_BIND", "127.0.0.1:7000");
        std::env::set_var("TERMBRIDGE_ROOT", "/tmp/termbridge-root");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.daemon.log_level, "trace");
        assert_eq!(config.server.bind_address, "127.0.0.1:7000");
        assert_eq!(
            config.terminal.default_root,
            PathBuf::from("/tmp/termbridge-root")
        );

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        std::env::set_var("TERMBRIDGE_BIND", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.bind_address, "0.0.0.0:5002");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_unset_does_not_override() {
        clear_env();

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.daemon.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());

        config.daemon.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_validate_bind_address() {
        let mut config = Config::default();
        config.server.bind_address = "localhost".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBindAddress("localhost".to_string()))
        );
    }

    #[test]
    fn test_validate_client_buffer_zero() {
        let mut config = Config::default();
        config.server.client_buffer = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidClientBuffer(0)));
    }

    #[test]
    fn test_validate_shell_missing() {
        let mut config = Config::default();
        config.terminal.shell = "/nonexistent/shell/path".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidShell(_))
        ));

        config.terminal.shell = "definitely-not-a-real-shell-xyz".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidShell(_))
        ));
    }

    #[test]
    fn test_validate_shell_in_path() {
        let mut config = Config::default();
        config.terminal.shell = "sh".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_poll_interval_bounds() {
        let mut config = Config::default();
        config.terminal.poll_interval_ms = 9;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPollInterval(9)));

        config.terminal.poll_interval_ms = 10;
        assert!(config.validate().is_ok());

        config.terminal.poll_interval_ms = 1000;
        assert!(config.validate().is_ok());

        config.terminal.poll_interval_ms = 1001;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPollInterval(1001))
        );
    }

    #[test]
    fn test_validate_chunk_size_zero() {
        let mut config = Config::default();
        config.terminal.read_chunk_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidChunkSize(0)));
    }

    #[test]
    fn test_validate_search_depth() {
        let mut config = Config::default();
        config.environment.search_depth = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidSearchDepth(0)));

        config.environment.search_depth = 17;
        assert_eq!(config.validate(), Err(ConfigError::InvalidSearchDepth(17)));
    }

    #[test]
    fn test_validate_terminal_size() {
        let mut config = Config::default();
        config.terminal.rows = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidTerminalSize(80, 0))
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ConfigError::InvalidPollInterval(5).to_string(),
            "poll_interval_ms must be between 10 and 1000, got 5"
        );
        assert_eq!(
            ConfigError::InvalidTerminalSize(0, 24).to_string(),
            "terminal size must be between 1 and 1000, got 0x24"
        );
    }
}
