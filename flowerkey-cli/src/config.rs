//! CLI configuration file.

use flowerkey_core::sync::WebDavConfig;
use flowerkey_core::SyncSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "flowerkey";

/// Where the remote side of sync lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// A local folder, typically mirrored by a cloud drive client
    Dir { path: PathBuf },
    /// A WebDAV share
    WebDav(WebDavConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub vault_path: PathBuf,
    pub backend: BackendConfig,
    pub sync: SyncSettings,
}

impl Default for CliConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        Self {
            vault_path: data_dir.join("vault.db"),
            backend: BackendConfig::Dir {
                path: data_dir.join("remote"),
            },
            sync: SyncSettings::default(),
        }
    }
}

impl CliConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_webdav_backend() {
        let config: CliConfig = toml::from_str(
            r#"
vault_path = "/tmp/vault.db"

[backend]
kind = "webdav"
url = "https://dav.example.com/remote.php/dav"
username = "alice"
password = "app-password"

[sync]
lock_ttl = 30
compact_threshold = 50
"#,
        )
        .unwrap();

        assert_eq!(config.vault_path, PathBuf::from("/tmp/vault.db"));
        match &config.backend {
            BackendConfig::WebDav(dav) => {
                assert_eq!(dav.username, "alice");
                assert_eq!(dav.base_path, "/FlowerKey");
            }
            other => panic!("expected webdav backend, got {:?}", other),
        }
        assert_eq!(config.sync.lock_ttl.as_secs(), 30);
        assert_eq!(config.sync.compact_threshold, 50);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: CliConfig = toml::from_str(
            r#"
[backend]
kind = "dir"
path = "/mnt/drive/FlowerKey"
"#,
        )
        .unwrap();

        assert_eq!(
            config.backend,
            BackendConfig::Dir {
                path: PathBuf::from("/mnt/drive/FlowerKey")
            }
        );
        assert_eq!(config.sync, SyncSettings::default());
        assert!(config.vault_path.ends_with("vault.db"));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "vault_path = \"v.db\"\n").unwrap();

        let config = CliConfig::load(&path).unwrap();
        assert_eq!(config.vault_path, PathBuf::from("v.db"));
        assert!(CliConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
