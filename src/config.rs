use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

/// Window lengths offered by the UI; any positive value is accepted.
pub const WINDOW_PRESETS_SECS: [u64; 3] = [120, 300, 600];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplayConfig {
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_recordings_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_extension")]
    pub extension: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RetentionConfig {
    pub keep_last: Option<usize>,
    pub max_age_days: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Pattern,
    File,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub loop_file: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub replay: ReplayConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    pub source: SourceConfig,
}

fn default_recordings_dir() -> PathBuf {
    dirs::video_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ScreenRecorder")
}

fn default_prefix() -> String {
    "rec_".to_string()
}

fn default_extension() -> String {
    "webm".to_string()
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_chunk_bytes() -> usize {
    4096
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parse config {}", path))?;
        config.validate().context("config validation failed")?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.replay.window_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.replay.window_seconds == 0 {
            bail!("replay.window_seconds must be > 0");
        }

        if self.storage.prefix.contains(['/', '\\']) {
            bail!("storage.prefix must not contain path separators");
        }
        let ext = self.storage.extension.trim();
        if ext.is_empty() {
            bail!("storage.extension must not be empty");
        }
        if ext.contains(['.', '/', '\\']) {
            bail!("storage.extension must be a bare extension like \"webm\"");
        }

        if self.retention.keep_last == Some(0) {
            bail!("retention.keep_last must be > 0 when set");
        }
        if self.retention.max_age_days == Some(0) {
            bail!("retention.max_age_days must be > 0 when set");
        }

        if self.source.interval_ms == 0 {
            bail!("source.interval_ms must be > 0");
        }
        if self.source.chunk_bytes == 0 {
            bail!("source.chunk_bytes must be > 0");
        }
        if self.source.kind == SourceKind::File && self.source.path.is_none() {
            bail!("source.path is required for type = \"file\"");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            replay: ReplayConfig { window_seconds: 300 },
            storage: StorageConfig {
                dir: default_recordings_dir(),
                prefix: default_prefix(),
                extension: default_extension(),
            },
            retention: RetentionConfig::default(),
            source: SourceConfig {
                kind: SourceKind::Pattern,
                interval_ms: default_interval_ms(),
                chunk_bytes: default_chunk_bytes(),
                path: None,
                loop_file: false,
            },
        }
    }
}
