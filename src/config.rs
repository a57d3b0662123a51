//! Configuration module for tally-server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over built-in defaults.

use clap::Parser;
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the tally server
#[derive(Parser, Debug)]
#[command(name = "tally-server")]
#[command(author = "tally-server authors")]
#[command(version = "0.1.0")]
#[command(about = "A thread-pool TCP server that counts the last character of each message", long_about = None)]
pub struct CliArgs {
    /// Number of worker threads (default 4)
    #[arg(value_name = "WORKERS")]
    pub workers_pos: Option<usize>,

    /// Number of worker threads, same as the positional argument
    #[arg(short = 'w', long, conflicts_with = "workers_pos")]
    pub workers: Option<usize>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:5050)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Maximum queued connections; unbounded when unset
    #[arg(short = 'q', long)]
    pub queue_capacity: Option<usize>,

    /// Read buffer size in bytes; messages longer than this minus one are truncated
    #[arg(long)]
    pub read_buffer_size: Option<usize>,

    /// Per-connection read/write timeout in seconds (0 = no timeout)
    #[arg(long)]
    pub io_timeout_secs: Option<u64>,

    /// Path of the request log file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogFileConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum queued connections
    pub queue_capacity: Option<usize>,
    /// Read buffer size in bytes
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Per-connection I/O timeout in seconds
    #[serde(default)]
    pub io_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            workers: None,
            queue_capacity: None,
            read_buffer_size: default_read_buffer_size(),
            io_timeout_secs: 0,
        }
    }
}

/// Request log configuration
#[derive(Debug, Deserialize)]
pub struct LogFileConfig {
    /// Path of the append-only request log
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
}

impl Default for LogFileConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:5050".to_string()
}

fn default_backlog() -> i32 {
    50
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_log_path() -> PathBuf {
    PathBuf::from("requests_log.txt")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Worker count used when neither the CLI nor the config file sets one.
pub const DEFAULT_WORKERS: usize = 4;

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub backlog: i32,
    pub workers: usize,
    pub queue_capacity: Option<usize>,
    pub read_buffer_size: usize,
    pub io_timeout: Option<Duration>,
    pub log_file: PathBuf,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve configuration from already-parsed CLI arguments.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence) and validate.
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen_str = cli.listen.unwrap_or(toml_config.server.listen);
        let listen: SocketAddr = listen_str
            .parse()
            .map_err(|e| ConfigError::InvalidListen(listen_str.clone(), e))?;

        let workers = cli
            .workers_pos
            .or(cli.workers)
            .or(toml_config.server.workers)
            .unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }

        let backlog = cli.backlog.unwrap_or(toml_config.server.backlog);
        if backlog <= 0 {
            return Err(ConfigError::InvalidBacklog(backlog));
        }

        let read_buffer_size = cli
            .read_buffer_size
            .unwrap_or(toml_config.server.read_buffer_size);
        if read_buffer_size < 2 {
            return Err(ConfigError::BufferTooSmall(read_buffer_size));
        }

        let io_timeout_secs = cli
            .io_timeout_secs
            .unwrap_or(toml_config.server.io_timeout_secs);

        Ok(Config {
            listen,
            backlog,
            workers,
            queue_capacity: cli.queue_capacity.or(toml_config.server.queue_capacity),
            read_buffer_size,
            io_timeout: (io_timeout_secs > 0).then(|| Duration::from_secs(io_timeout_secs)),
            log_file: cli.log_file.unwrap_or(toml_config.log.path),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    /// Most bytes read from a single connection.
    pub fn max_message_len(&self) -> usize {
        self.read_buffer_size - 1
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidListen(String, AddrParseError),
    ZeroWorkers,
    InvalidBacklog(i32),
    BufferTooSmall(usize),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidListen(addr, e) => {
                write!(f, "Invalid listen address '{}': {}", addr, e)
            }
            ConfigError::ZeroWorkers => write!(f, "Thread count must be > 0"),
            ConfigError::InvalidBacklog(n) => write!(f, "Backlog must be > 0, got {}", n),
            ConfigError::BufferTooSmall(n) => {
                write!(f, "Read buffer size must be at least 2 bytes, got {}", n)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        let mut argv = vec!["tally-server"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::merge(parse(&[]), TomlConfig::default()).unwrap();
        assert_eq!(config.listen, "0.0.0.0:5050".parse::<SocketAddr>().unwrap());
        assert_eq!(config.backlog, 50);
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.queue_capacity, None);
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.max_message_len(), 1023);
        assert_eq!(config.io_timeout, None);
        assert_eq!(config.log_file, PathBuf::from("requests_log.txt"));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:6060"
            backlog = 128
            workers = 8
            queue_capacity = 64
            read_buffer_size = 4096
            io_timeout_secs = 30

            [log]
            path = "/var/log/tally.log"

            [logging]
            level = "debug"
        "#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(toml_config.server.workers, Some(8));

        let config = Config::merge(parse(&[]), toml_config).unwrap();
        assert_eq!(config.listen, "127.0.0.1:6060".parse::<SocketAddr>().unwrap());
        assert_eq!(config.backlog, 128);
        assert_eq!(config.workers, 8);
        assert_eq!(config.queue_capacity, Some(64));
        assert_eq!(config.read_buffer_size, 4096);
        assert_eq!(config.io_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.log_file, PathBuf::from("/var/log/tally.log"));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            workers = 8
            listen = "127.0.0.1:6060"
            "#,
        )
        .unwrap();

        let cli = parse(&["2", "--listen", "127.0.0.1:7070", "--log-level", "warn"]);
        let config = Config::merge(cli, toml_config).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.listen, "127.0.0.1:7070".parse::<SocketAddr>().unwrap());
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_workers_flag() {
        let config = Config::merge(parse(&["-w", "6"]), TomlConfig::default()).unwrap();
        assert_eq!(config.workers, 6);
    }

    #[test]
    fn test_workers_flag_conflicts_with_positional() {
        assert!(CliArgs::try_parse_from(["tally-server", "2", "-w", "3"]).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Config::merge(parse(&["0"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroWorkers));

        let toml_config: TomlConfig = toml::from_str("[server]\nworkers = 0").unwrap();
        let err = Config::merge(parse(&[]), toml_config).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroWorkers));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Config::merge(parse(&["--listen", "nowhere"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListen(..)));

        let err = Config::merge(parse(&["--backlog", "0"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBacklog(0)));

        let err = Config::merge(parse(&["--read-buffer-size", "1"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::BufferTooSmall(1)));
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::from_args(parse(&["--config", "/nonexistent/tally.toml"])).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
    }
}
