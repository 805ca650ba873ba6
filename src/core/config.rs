use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level application configuration.
///
/// Defaults are the build-time constants; `config/default.toml`, when
/// present, overrides them wholesale. The core consults no environment
/// variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ingest: IngestConfig,
    pub storage: StorageConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// PEM server certificate chain.
    pub cert_path: PathBuf,
    /// PEM private key.
    pub key_path: PathBuf,
    /// Local-domain socket used as the single-instance lock.
    pub lock_socket_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Hard cap on the upload request body, in MiB.
    pub max_body_mib: u64,
}

impl IngestConfig {
    pub fn max_body_bytes(&self) -> u64 {
        self.max_body_mib * 1024 * 1024
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Permanent tree: `<storage_root>/<publisher>/<audio_id>/...`.
    pub storage_root: PathBuf,
    /// Per-upload archives and staging directories.
    /// Must share a parent with `storage_root`; promotion relies on
    /// same-filesystem renames.
    pub temp_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
}

impl AppConfig {
    /// Load configuration: `config/default.toml` if it exists, otherwise the
    /// built-in defaults.
    pub fn load() -> anyhow::Result<Self> {
        let default_path = Path::new("config/default.toml");
        let config = if default_path.exists() {
            let content = std::fs::read_to_string(default_path).map_err(|e| {
                anyhow::anyhow!("failed to read {}: {}", default_path.display(), e)
            })?;
            toml::from_str(&content).map_err(|e| {
                anyhow::anyhow!("failed to parse {}: {}", default_path.display(), e)
            })?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would break promotion atomicity.
    fn validate(&self) -> anyhow::Result<()> {
        let storage_parent = self.storage.storage_root.parent();
        let temp_parent = self.storage.temp_root.parent();
        if storage_parent != temp_parent {
            anyhow::bail!(
                "storage_root ({}) and temp_root ({}) must be siblings; \
                 promotion uses same-filesystem renames",
                self.storage.storage_root.display(),
                self.storage.temp_root.display()
            );
        }
        if self.ingest.max_body_mib == 0 {
            anyhow::bail!("max_body_mib must be nonzero");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8443,
                cert_path: PathBuf::from("certs/server.crt"),
                key_path: PathBuf::from("certs/server.key"),
                lock_socket_path: PathBuf::from("/tmp/wavecast-server.lock"),
            },
            ingest: IngestConfig { max_body_mib: 200 },
            storage: StorageConfig {
                storage_root: PathBuf::from("hls_storage"),
                temp_root: PathBuf::from("hls_temp"),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: "compact".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn default_cap_is_200_mib() {
        let config = AppConfig::default();
        assert_eq!(config.ingest.max_body_bytes(), 200 * 1024 * 1024);
    }

    #[test]
    fn rejects_split_roots() {
        let mut config = AppConfig::default();
        config.storage.temp_root = PathBuf::from("/var/tmp/wavecast");
        assert!(config.validate().is_err());
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = AppConfig::default();
        let text = toml::to_string(&config).unwrap();
        let back: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.server.port, config.server.port);
        assert_eq!(back.storage.storage_root, config.storage.storage_root);
    }
}
