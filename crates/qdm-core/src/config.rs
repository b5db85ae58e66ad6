use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::job::DuplicateAction;
use crate::retry::RetryPolicy;
use crate::url_model::extension_of;

/// A save-directory category, picked by file extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    /// Lowercase extensions without the dot.
    pub extensions: Vec<String>,
    /// Directory for this category; defaults to `<download_dir>/<name>`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Category {
    fn new(name: &str, extensions: &[&str]) -> Self {
        Category {
            name: name.to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            dir: None,
        }
    }
}

/// Global configuration loaded from `~/.config/qdm/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdmConfig {
    /// Default save directory; `$HOME/Downloads` when unset.
    pub download_dir: Option<PathBuf>,
    /// Upper bound on parallel range requests per job.
    pub max_chunks: usize,
    /// Chunks are never planned smaller than this.
    pub min_chunk_bytes: u64,
    /// Default per-job bandwidth cap in bytes per second (None = unlimited).
    pub job_bytes_per_sec: Option<u64>,
    /// Cap shared by all transfers (None = unlimited).
    pub global_bytes_per_sec: Option<u64>,
    /// Cap shared by all jobs while assembling chunk files (None = unlimited).
    pub merge_bytes_per_sec: Option<u64>,
    pub connect_timeout_secs: u64,
    /// Minimum spacing of progress events per job.
    pub progress_interval_ms: u64,
    /// Non-interactive answer when a URL is added twice.
    pub duplicate_action: DuplicateAction,
    pub default_queue_title: String,
    /// Chunk-level retry and backoff.
    pub retry: RetryPolicy,
    pub categories: Vec<Category>,
}

impl Default for QdmConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            max_chunks: 8,
            min_chunk_bytes: 1024 * 1024,
            job_bytes_per_sec: None,
            global_bytes_per_sec: None,
            merge_bytes_per_sec: None,
            connect_timeout_secs: 15,
            progress_interval_ms: 500,
            duplicate_action: DuplicateAction::KeepBoth,
            default_queue_title: "Main queue".to_string(),
            retry: RetryPolicy::default(),
            categories: vec![
                Category::new("Compressed", &["zip", "rar", "7z", "gz", "xz", "bz2", "tar", "zst"]),
                Category::new("Documents", &["pdf", "doc", "docx", "odt", "txt", "epub"]),
                Category::new("Music", &["mp3", "flac", "ogg", "wav", "m4a"]),
                Category::new("Video", &["mp4", "mkv", "webm", "avi", "mov"]),
                Category::new("Programs", &["deb", "rpm", "appimage", "iso", "exe", "msi"]),
            ],
        }
    }
}

impl QdmConfig {
    pub fn resolved_download_dir(&self) -> PathBuf {
        match &self.download_dir {
            Some(d) => d.clone(),
            None => std::env::var_os("HOME")
                .map(|h| PathBuf::from(h).join("Downloads"))
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    /// Category whose extension list contains the extension of `file_name`.
    pub fn category_for(&self, file_name: &str) -> Option<&Category> {
        let ext = extension_of(file_name)?;
        self.categories.iter().find(|c| c.extensions.contains(&ext))
    }

    pub fn category_by_name(&self, name: &str) -> Option<&Category> {
        self.categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn category_dir(&self, category: &Category) -> PathBuf {
        category
            .dir
            .clone()
            .unwrap_or_else(|| self.resolved_download_dir().join(&category.name))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("qdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<QdmConfig> {
    load_or_init_at(&config_path()?)
}

pub fn load_or_init_at(path: &Path) -> Result<QdmConfig> {
    if !path.exists() {
        let default_cfg = QdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml).with_context(|| format!("write {}", path.display()))?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: QdmConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
