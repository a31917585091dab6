use anyhow::{Context, Result, bail};
use chatrelay::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_PORT};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub max_frame_bytes: usize,
    /// Responses queued per connection before deliveries to it are dropped.
    pub outbound_queue: usize,
    pub inactivity_threshold: Duration,
    pub sweep_interval: Duration,
    pub shutdown_grace: Duration,
}

/// On-disk TOML form. Every key is optional and overrides the default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub max_frame_bytes: Option<usize>,
    pub outbound_queue: Option<usize>,
    pub inactivity_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
}

impl ServerConfig {
    pub fn new(bind_address: impl Into<String>, port: u16) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
            ..Self::default()
        }
    }

    /// Load a TOML config file layered over the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(contents)?;
        let mut config = Self::default();
        config.apply(file);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, file: FileConfig) {
        if let Some(v) = file.bind_address {
            self.bind_address = v;
        }
        if let Some(v) = file.port {
            self.port = v;
        }
        if let Some(v) = file.max_frame_bytes {
            self.max_frame_bytes = v;
        }
        if let Some(v) = file.outbound_queue {
            self.outbound_queue = v;
        }
        if let Some(v) = file.inactivity_secs {
            self.inactivity_threshold = Duration::from_secs(v);
        }
        if let Some(v) = file.sweep_interval_secs {
            self.sweep_interval = Duration::from_secs(v);
        }
        if let Some(v) = file.shutdown_grace_secs {
            self.shutdown_grace = Duration::from_secs(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_frame_bytes == 0 || self.max_frame_bytes > u32::MAX as usize {
            bail!(
                "max_frame_bytes must be between 1 and {} (got {})",
                u32::MAX,
                self.max_frame_bytes
            );
        }
        if self.outbound_queue == 0 {
            bail!("outbound_queue must be at least 1");
        }
        if self.inactivity_threshold.is_zero() {
            bail!("inactivity threshold must be non-zero");
        }
        if self.sweep_interval.is_zero() {
            bail!("sweep interval must be non-zero");
        }
        Ok(())
    }

    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        if self.bind_address.contains(':') {
            format!("[{}]:{}", self.bind_address, self.port)
        } else {
            format!("{}:{}", self.bind_address, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            outbound_queue: 256,
            inactivity_threshold: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn ipv6_listen_addr() {
        let config = ServerConfig::new("::1", 9000);
        assert_eq!(config.listen_addr(), "[::1]:9000");
    }

    #[test]
    fn file_overrides_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            port = 9100
            inactivity_secs = 30
            outbound_queue = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.inactivity_threshold, Duration::from_secs(30));
        assert_eq!(config.outbound_queue, 16);
        assert_eq!(config.bind_address, "0.0.0.0");
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(ServerConfig::from_toml_str("colour = true").is_err());
    }

    #[test]
    fn zero_values_rejected() {
        assert!(ServerConfig::from_toml_str("max_frame_bytes = 0").is_err());
        assert!(ServerConfig::from_toml_str("outbound_queue = 0").is_err());
        assert!(ServerConfig::from_toml_str("sweep_interval_secs = 0").is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind_address = \"127.0.0.1\"\nport = 7000").unwrap();
        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:7000");

        let missing = file.path().with_extension("missing");
        assert!(ServerConfig::load(&missing).is_err());
    }
}
