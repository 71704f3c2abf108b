//! Server configuration: defaults plus optional loading from a TOML file
//! with a single `[server]` section of recognized keys.

use serde::Deserialize;

use crate::protocol::frame::ByteOrder;

/// Server configuration. All fields have sane defaults and can be
/// overridden from a `[server]` table in a config file.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub port: u16,
    /// Read chunk size in bytes.
    pub buf: usize,
    pub logging_level: tracing::Level,
    pub console_format: String,
    pub datefmt: String,
    /// Connection-lifetime deadline, in seconds.
    pub timeout: u64,
    /// Width in bytes (`H`) of the `content_length` header field.
    pub header_size: usize,
    pub byteorder: ByteOrder,
    /// Server-default encoding, used before any message has been received
    /// on a connection.
    pub default_encoding: crate::codec::Encoding,
    /// Maximum concurrent sessions per address; 0 disables the limit.
    pub session_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: "127.0.0.1".to_string(),
            port: 9520,
            buf: 4096,
            logging_level: tracing::Level::INFO,
            console_format: "%(asctime)s - %(levelname)s - %(message)s".to_string(),
            datefmt: "%Y-%m-%d %H:%M:%S".to_string(),
            timeout: 60,
            header_size: 4,
            byteorder: ByteOrder::Big,
            default_encoding: crate::codec::Encoding::Text,
            session_limit: 0,
        }
    }
}

/// Raw shape of the `[server]` table in a configuration file. Every field
/// is optional; absent fields fall back to [`ServerConfig::default`].
#[derive(Debug, Deserialize, Default)]
struct RawFileConfig {
    server: RawServerSection,
}

#[derive(Debug, Deserialize, Default)]
struct RawServerSection {
    addr: Option<String>,
    port: Option<u16>,
    buf: Option<usize>,
    logging_level: Option<String>,
    console_format: Option<String>,
    datefmt: Option<String>,
    timeout: Option<u64>,
    header_size: Option<usize>,
    byteorder: Option<String>,
    encoding: Option<String>,
    session_limit: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid byteorder {0:?}, expected \"big\" or \"little\"")]
    InvalidByteOrder(String),

    #[error("invalid encoding {0:?}, expected \"json\" or \"compact\"")]
    InvalidEncoding(String),

    #[error("invalid logging_level {0:?}")]
    InvalidLoggingLevel(String),
}

impl ServerConfig {
    /// Loads a `[server]` table from `path`, overriding [`ServerConfig::default`]
    /// field by field. Keys absent from the file keep their default value.
    pub fn load_from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let raw: RawFileConfig = toml::from_str(&text)?;
        let mut config = ServerConfig::default();
        let section = raw.server;

        if let Some(addr) = section.addr {
            config.addr = addr;
        }
        if let Some(port) = section.port {
            config.port = port;
        }
        if let Some(buf) = section.buf {
            config.buf = buf;
        }
        if let Some(level) = section.logging_level {
            config.logging_level = level
                .parse()
                .map_err(|_| ConfigError::InvalidLoggingLevel(level))?;
        }
        if let Some(fmt) = section.console_format {
            config.console_format = fmt;
        }
        if let Some(datefmt) = section.datefmt {
            config.datefmt = datefmt;
        }
        if let Some(timeout) = section.timeout {
            config.timeout = timeout;
        }
        if let Some(header_size) = section.header_size {
            config.header_size = header_size;
        }
        if let Some(byteorder) = section.byteorder {
            config.byteorder = ByteOrder::parse(&byteorder)
                .ok_or(ConfigError::InvalidByteOrder(byteorder))?;
        }
        if let Some(encoding) = section.encoding {
            config.default_encoding = match encoding.as_str() {
                "json" => crate::codec::Encoding::Text,
                "compact" => crate::codec::Encoding::Compact,
                other => return Err(ConfigError::InvalidEncoding(other.to_string())),
            };
        }
        if let Some(session_limit) = section.session_limit {
            config.session_limit = session_limit;
        }

        Ok(config)
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}
