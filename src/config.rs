//! Relay configuration: defaults, TOML file, environment overrides.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Prefix for environment overrides, e.g. `ROOMCAST_SERVER__PORT=9000`.
const ENV_PREFIX: &str = "ROOMCAST";

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
}

/// Listener and boundary settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Origins admitted by the WebSocket upgrade and CORS checks.
    /// Empty means any origin is admitted (development posture).
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: Vec::new(),
        }
    }
}

/// Load configuration from an optional TOML file plus `ROOMCAST__*`
/// environment overrides. CLI flags are applied on top by the caller.
pub fn load(path: Option<&Path>) -> Result<RelayConfig> {
    let mut builder = Config::builder()
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080_i64)?;

    if let Some(path) = path {
        builder = builder.add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(true),
        );
    }

    let built = builder
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .context("loading configuration")?;

    built
        .try_deserialize()
        .context("deserializing configuration")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_when_no_file() {
        let config = load(None).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert!(config.server.allowed_origins.is_empty());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
host = "127.0.0.1"
port = 9000
allowed_origins = ["http://localhost:5173", "http://localhost:5174"]
"#
        )
        .unwrap();

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.allowed_origins.len(), 2);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load(Some(Path::new("/nonexistent/roomcast.toml"))).is_err());
    }
}
