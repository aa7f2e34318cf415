use crate::volume::Granularity;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to access settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no worker nodes configured")]
    EmptyWorkerPool,

    #[error("block size {0:?} has a zero dimension")]
    ZeroBlockSize([usize; 3]),

    #[error("no config directory available on this platform")]
    NoConfigDir,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    pub workers: Vec<WorkerConfig>,
    #[serde(default = "default_block_size")]
    pub block_size: [usize; 3],
    #[serde(default)]
    pub granularity: Granularity,
}

fn default_block_size() -> [usize; 3] {
    [64, 64, 64]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: Vec::new(),
            block_size: default_block_size(),
            granularity: Granularity::default(),
        }
    }
}

impl Settings {
    pub fn with_workers<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            workers: urls
                .into_iter()
                .map(|url| WorkerConfig { url: url.into() })
                .collect(),
            ..Self::default()
        }
    }

    pub fn worker_urls(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.url.clone()).collect()
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.workers.is_empty() {
            return Err(SettingsError::EmptyWorkerPool);
        }
        if self.block_size.contains(&0) {
            return Err(SettingsError::ZeroBlockSize(self.block_size));
        }
        Ok(())
    }
}

/// `<config dir>/neuromesh/workers.json`
pub fn get_settings_path() -> Result<PathBuf, SettingsError> {
    let config_dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
    Ok(config_dir.join("neuromesh").join("workers.json"))
}

pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let settings: Settings = serde_json::from_str(&content)?;
    settings.validate()?;

    info!(
        "loaded {} workers from {}",
        settings.workers.len(),
        path.display()
    );
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let content = serde_json::to_string_pretty(settings)?;
    fs::write(path, content).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("saved settings to {}", path.display());
    Ok(())
}
