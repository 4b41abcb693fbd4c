//! Server configuration
//!
//! Defaults can be overridden from a TOML file and then from command-line
//! flags; flags take precedence.

use crate::security::ResourceLimits;
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the echo server
///
/// # Examples
///
/// ```
/// use echo_service::config::ServerConfig;
///
/// let config = ServerConfig {
///     bind_addr: "127.0.0.1:0".parse().unwrap(),
///     log_requests: true,
///     ..Default::default()
/// };
/// assert_eq!(config.buffer_size, 8192);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Response bytes buffered before switching to chunked transfer coding
    pub buffer_size: usize,
    /// Value of the `Server` response header (optional)
    pub server_name: Option<String>,
    /// Request size, connection and timeout limits
    pub limits: ResourceLimits,
    /// WebSocket transport limits
    pub websocket: WebSocketSettings,
    /// Log one line per request through `tracing`
    pub log_requests: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            buffer_size: 8192,
            server_name: Some("EchoService/1.0".to_string()),
            limits: ResourceLimits::default(),
            websocket: WebSocketSettings::default(),
            log_requests: false,
        }
    }
}

/// Limits handed to the WebSocket transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketSettings {
    /// Maximum size of a reassembled message (`None` = unlimited)
    pub max_message_size: Option<usize>,
    /// Maximum size of a single frame (`None` = unlimited)
    pub max_frame_size: Option<usize>,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            max_message_size: Some(64 << 20), // 64MB
            max_frame_size: Some(16 << 20),   // 16MB
        }
    }
}

/// Command-line arguments for the echo server
#[derive(Parser, Debug, Default)]
#[command(name = "echo-service")]
#[command(version)]
#[command(about = "HTTP and WebSocket echo server for tests", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<SocketAddr>,

    /// Maximum number of concurrent connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log every incoming request
    #[arg(long)]
    pub log_requests: bool,
}

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: ServerSection,
    pub limits: LimitsSection,
    pub websocket: WebSocketSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub listen: Option<SocketAddr>,
    pub buffer_size: Option<usize>,
    /// An empty string disables the `Server` header
    pub server_name: Option<String>,
    pub log_requests: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsSection {
    pub max_connections: Option<usize>,
    pub max_head_size: Option<usize>,
    pub max_headers: Option<usize>,
    pub max_body_size: Option<usize>,
    pub read_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebSocketSection {
    pub max_message_size: Option<usize>,
    pub max_frame_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: Option<String>,
}

impl FileConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&contents).map_err(|source| ConfigError::TomlParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlays the values present in the file onto `config`
    pub fn apply(&self, config: &mut ServerConfig) {
        let server = &self.server;
        if let Some(listen) = server.listen {
            config.bind_addr = listen;
        }
        if let Some(buffer_size) = server.buffer_size {
            config.buffer_size = buffer_size;
        }
        if let Some(name) = &server.server_name {
            config.server_name = (!name.is_empty()).then(|| name.clone());
        }
        if let Some(log_requests) = server.log_requests {
            config.log_requests = log_requests;
        }

        let limits = &self.limits;
        if let Some(n) = limits.max_connections {
            config.limits.max_concurrent_connections = n;
        }
        if let Some(n) = limits.max_head_size {
            config.limits.max_head_size = n;
        }
        if let Some(n) = limits.max_headers {
            config.limits.max_headers = n;
        }
        if let Some(n) = limits.max_body_size {
            config.limits.max_body_size = n;
        }
        if let Some(secs) = limits.read_timeout_secs {
            config.limits.read_timeout = Duration::from_secs(secs);
        }

        if let Some(n) = self.websocket.max_message_size {
            config.websocket.max_message_size = Some(n);
        }
        if let Some(n) = self.websocket.max_frame_size {
            config.websocket.max_frame_size = Some(n);
        }
    }
}

/// Fully resolved configuration for the binary
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub log_level: String,
}

impl AppConfig {
    /// Resolves defaults, the optional TOML file and CLI flags, in that order
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::from_path(path)?,
            None => FileConfig::default(),
        };

        let mut server = ServerConfig::default();
        file.apply(&mut server);

        if let Some(listen) = cli.listen {
            server.bind_addr = listen;
        }
        if let Some(n) = cli.max_connections {
            server.limits.max_concurrent_connections = n;
        }
        if cli.log_requests {
            server.log_requests = true;
        }
        if server.limits.max_concurrent_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1".to_string()));
        }

        let log_level = cli
            .log_level
            .clone()
            .or_else(|| file.logging.level.clone())
            .unwrap_or_else(|| "info".to_string());

        Ok(Self { server, log_level })
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .path.display(), .source)]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {}", .path.display(), .source)]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.server_name.as_deref(), Some("EchoService/1.0"));
        assert_eq!(config.limits.max_concurrent_connections, 1000);
        assert!(!config.log_requests);
    }

    #[test]
    fn test_file_config_overrides_defaults() {
        let file = FileConfig::from_toml_str(
            r#"
            [server]
            listen = "0.0.0.0:9000"
            server_name = ""

            [limits]
            max_connections = 5
            read_timeout_secs = 2

            [websocket]
            max_message_size = 1024

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        let mut config = ServerConfig::default();
        file.apply(&mut config);

        assert_eq!(config.bind_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.server_name, None);
        assert_eq!(config.limits.max_concurrent_connections, 5);
        assert_eq!(config.limits.read_timeout, Duration::from_secs(2));
        assert_eq!(config.websocket.max_message_size, Some(1024));
        assert_eq!(config.websocket.max_frame_size, WebSocketSettings::default().max_frame_size);
        assert_eq!(file.logging.level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_file_config_rejects_unknown_fields() {
        assert!(FileConfig::from_toml_str("[server]\nlisten_on = \"x\"\n").is_err());
    }

    #[test]
    fn test_cli_takes_precedence_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nlisten = \"127.0.0.1:7000\"\n[logging]\nlevel = \"warn\"").unwrap();

        let cli = CliArgs {
            config: Some(file.path().to_path_buf()),
            listen: Some("127.0.0.1:7001".parse().unwrap()),
            log_requests: true,
            ..Default::default()
        };
        let app = AppConfig::load(&cli).unwrap();

        assert_eq!(app.server.bind_addr, "127.0.0.1:7001".parse().unwrap());
        assert!(app.server.log_requests);
        assert_eq!(app.log_level, "warn");
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs {
            config: Some(PathBuf::from("/nonexistent/echo-service.toml")),
            ..Default::default()
        };
        assert!(matches!(AppConfig::load(&cli), Err(ConfigError::FileRead { .. })));
    }

    #[test]
    fn test_zero_connections_rejected() {
        let cli = CliArgs {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(matches!(AppConfig::load(&cli), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_cli_parse() {
        let cli = CliArgs::parse_from(["echo-service", "--listen", "127.0.0.1:9999", "--log-requests"]);
        assert_eq!(cli.listen, Some("127.0.0.1:9999".parse().unwrap()));
        assert!(cli.log_requests);
        assert!(cli.config.is_none());
    }
}
