use crate::collector::CollectorConfig;
use crate::error::{HarvestError, Result};
use crate::orchestrator::OrchestratorConfig;
use media_harvest_common::{DEFAULT_HISTORY_CAPACITY, DEFAULT_SESSION_ROOT};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 保存先ルートを上書きする環境変数
pub const DEST_ENV_VAR: &str = "MEDIA_HARVEST_DEST";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// ダウンロード先ルート（未設定時はOSのダウンロードフォルダ）
    pub destination_root: Option<PathBuf>,
    pub session_root: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub download_delay_ms: u64,
    pub download_timeout_ms: u64,
    pub max_scroll_passes: usize,
    pub max_pagination_cycles: usize,
    pub max_history: usize,
    /// 通常モードで「Downloading i of n」を出す間隔
    pub progress_every: usize,
    /// 対象ページ判定に使うURL断片（空なら全ページ許可）
    pub target_marker: String,
    pub viewport_height: u32,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination_root: None,
            session_root: DEFAULT_SESSION_ROOT.into(),
            max_retries: 3,
            retry_delay_ms: 1000,
            download_delay_ms: 350,
            download_timeout_ms: 30_000,
            max_scroll_passes: 1500,
            max_pagination_cycles: 100,
            max_history: DEFAULT_HISTORY_CAPACITY,
            progress_every: 10,
            target_marker: "/imagine".into(),
            viewport_height: 900,
            user_agent: concat!("media-harvest/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| HarvestError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("media-harvest").join("config.json"))
    }

    /// 保存先ルートを解決（環境変数 > 設定ファイル > ダウンロードフォルダ > カレント）
    pub fn resolve_destination(&self) -> PathBuf {
        if let Ok(dest) = std::env::var(DEST_ENV_VAR) {
            if !dest.trim().is_empty() {
                return PathBuf::from(dest);
            }
        }

        self.destination_root
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn set_destination(&mut self, path: PathBuf) -> Result<()> {
        self.destination_root = Some(path);
        self.save()
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            download_delay: Duration::from_millis(self.download_delay_ms),
            download_timeout: Duration::from_millis(self.download_timeout_ms),
            max_history: self.max_history,
            progress_every: self.progress_every.max(1),
            session_root: self.session_root.clone(),
            ..OrchestratorConfig::default()
        }
    }

    pub fn collector(&self) -> CollectorConfig {
        let target_marker = match self.target_marker.trim() {
            "" => None,
            marker => Some(marker.to_string()),
        };
        CollectorConfig {
            max_scroll_passes: self.max_scroll_passes,
            max_pagination_cycles: self.max_pagination_cycles,
            target_marker,
            ..CollectorConfig::default()
        }
    }
}
