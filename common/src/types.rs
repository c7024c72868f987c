//! 収集・ダウンロードで共有される型定義
//!
//! - CollectedItem: Collectorがページ上で発見した生のメディア参照
//! - GalleryItem: グループ番号付与後のメディア参照（Collectorの出力）
//! - QueueItem: ダウンロードキューの1エントリ
//! - StatusEvent: 外部リスナーへ配信されるステータス

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// メディア種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Other => "other",
        }
    }

    /// URLに拡張子がない場合の既定拡張子
    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Image => ".png",
            MediaKind::Video => ".mp4",
            MediaKind::Other => ".bin",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 収集対象のメディア種別フィルタ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFilter {
    #[default]
    All,
    Image,
    Video,
}

impl MediaFilter {
    /// 不明な値は `All` として扱う
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "image" => MediaFilter::Image,
            "video" => MediaFilter::Video,
            _ => MediaFilter::All,
        }
    }

    pub fn matches(&self, kind: MediaKind) -> bool {
        match self {
            MediaFilter::All => true,
            MediaFilter::Image => kind == MediaKind::Image,
            MediaFilter::Video => kind == MediaKind::Video,
        }
    }

    /// ステータス文言用の複数形ラベル
    pub fn plural_label(&self) -> &'static str {
        match self {
            MediaFilter::All => "files",
            MediaFilter::Image => "images",
            MediaFilter::Video => "videos",
        }
    }
}

impl fmt::Display for MediaFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaFilter::All => f.write_str("all"),
            MediaFilter::Image => f.write_str("image"),
            MediaFilter::Video => f.write_str("video"),
        }
    }
}

/// ページ上で発見したメディア参照（発見時点のプレビューURL）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedItem {
    pub url: String,
    pub kind: MediaKind,
    #[serde(default)]
    pub poster_url: Option<String>,
    /// 1回の収集内で初出順に振られるコンテナID
    pub container_id: u32,
}

/// グループ番号付きのメディア参照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryItem {
    pub url: String,
    pub kind: MediaKind,
    #[serde(default)]
    pub poster_url: Option<String>,
    /// 1始まりのグループ番号（ページ上の並び順）
    pub group_id: u32,
}

/// 収集結果をJSONファイルに保存
pub fn save_items(path: &Path, items: &[GalleryItem]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(items)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// JSONファイルから収集結果を読み込み
pub fn load_items(path: &Path) -> Result<Vec<GalleryItem>> {
    let content = std::fs::read_to_string(path)?;
    let items = serde_json::from_str(&content)?;
    Ok(items)
}

/// ダウンロードキューのエントリ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// オリジナル解像度に変換済みのURL
    pub url: String,
    pub kind: MediaKind,
    /// `セッションフォルダ/ファイル名`
    pub filename: String,
    pub label: String,
    pub group_id: u32,
}

impl QueueItem {
    /// リトライ回数・結果の照合キー（ファイル名は1回の実行内で一意）
    pub fn key(&self) -> &str {
        &self.filename
    }

    /// ステータス表示用の名前
    pub fn display_name(&self) -> &str {
        if !self.label.is_empty() {
            &self.label
        } else if !self.filename.is_empty() {
            &self.filename
        } else {
            &self.url
        }
    }
}

/// ステータスの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Running,
    Idle,
    Error,
    Debug,
}

/// 進捗
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
}

impl Progress {
    pub fn new(total: usize, completed: usize) -> Self {
        Self { total, completed }
    }

    pub fn is_zero(&self) -> bool {
        self.total == 0 && self.completed == 0
    }
}

/// リスナーへ配信されるステータスイベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub text: String,
    pub state: StatusState,
    /// UNIXエポックからのミリ秒
    pub timestamp: i64,
    #[serde(default)]
    pub progress: Option<Progress>,
}

impl StatusEvent {
    pub fn new(text: impl Into<String>, state: StatusState, progress: Option<Progress>) -> Self {
        Self {
            text: text.into(),
            state,
            timestamp: chrono::Utc::now().timestamp_millis(),
            progress,
        }
    }

    /// 外部リスナー向けのワイヤ形式 `{type: "STATUS", ...}`
    pub fn to_message(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "STATUS",
            "text": self.text,
            "state": self.state,
            "timestamp": self.timestamp,
            "progress": self.progress,
        })
    }
}
