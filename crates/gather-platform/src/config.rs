use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub platform: PlatformConfig,
    pub storage: StorageConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Relative to the platform root.
    pub db: String,
}

impl Config {
    pub fn default_for(name: &str) -> Self {
        Self {
            platform: PlatformConfig {
                name: name.to_string(),
            },
            storage: StorageConfig {
                db: ".gather/gather.db".to_string(),
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| "parse gather.toml")?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(".gather").join("gather.toml")
    }

    pub fn db_path(&self, root: &Path) -> PathBuf {
        root.join(&self.storage.db)
    }
}
