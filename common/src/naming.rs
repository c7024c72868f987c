//! ファイル命名ユーティリティ
//!
//! 1回の実行内で衝突しないファイル名を決定的に割り当てる。

use crate::types::MediaKind;
use chrono::{DateTime, TimeZone};
use std::collections::HashSet;
use url::Url;

/// 既定のセッションルートフォルダ
pub const DEFAULT_SESSION_ROOT: &str = "harvest-session";

/// URLのパス末尾から拡張子を取り出す（なければ種別の既定値）
///
/// 拡張子は英数字2〜5文字のみ有効で、小文字化して返す。
pub fn derive_extension(kind: MediaKind, raw_url: &str) -> String {
    if let Ok(url) = Url::parse(raw_url) {
        let last_segment = url
            .path()
            .split('/')
            .filter(|s| !s.is_empty())
            .last()
            .unwrap_or("");
        if let Some(ext) = extension_of(last_segment) {
            return ext;
        }
    }
    kind.default_extension().to_string()
}

fn extension_of(segment: &str) -> Option<String> {
    let dot = segment.rfind('.')?;
    let ext = &segment[dot + 1..];
    let valid = (2..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Some(format!(".{}", ext.to_ascii_lowercase()))
    } else {
        None
    }
}

/// 大文字小文字を区別しない使用済みファイル名の集合
#[derive(Debug, Clone, Default)]
pub struct UsedNames {
    names: HashSet<String>,
}

impl UsedNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.names.contains(&filename.to_lowercase())
    }

    /// 衝突しない名前を決めて登録する
    ///
    /// 衝突時は拡張子の前に `-2`, `-3`, ... を付ける。
    pub fn claim(&mut self, filename: &str) -> String {
        let unique = ensure_unique(filename, self);
        self.names.insert(unique.to_lowercase());
        unique
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// 使用済み集合と衝突しない候補名を返す（登録はしない）
pub fn ensure_unique(filename: &str, used: &UsedNames) -> String {
    if !used.contains(filename) {
        return filename.to_string();
    }

    let (stem, extension) = match filename.rfind('.') {
        Some(dot) if dot > 0 => (&filename[..dot], &filename[dot..]),
        _ => (filename, ""),
    };

    let mut counter = 2;
    loop {
        let candidate = format!("{}-{}{}", stem, counter, extension);
        if !used.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// 開始時刻からセッションフォルダ名を作る（`root/YYYY-MM-DD_HH-MM-SS`）
pub fn session_folder_name<Tz: TimeZone>(root: &str, started_at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let stamp = started_at.format("%Y-%m-%d_%H-%M-%S");
    let root = root.trim_matches('/');
    if root.is_empty() {
        stamp.to_string()
    } else {
        format!("{}/{}", root, stamp)
    }
}

/// 表示用に文字列を切り詰める（末尾 `...`）
pub fn truncate_label(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let head: String = text.chars().take(keep).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_derive_extension_from_path() {
        assert_eq!(
            derive_extension(MediaKind::Image, "https://a.example/x/Photo.JPG?x=1"),
            ".jpg"
        );
        assert_eq!(
            derive_extension(MediaKind::Video, "https://a.example/v/clip.webm"),
            ".webm"
        );
    }

    #[test]
    fn test_derive_extension_defaults() {
        assert_eq!(derive_extension(MediaKind::Video, "https://a.example/v/clip"), ".mp4");
        assert_eq!(derive_extension(MediaKind::Image, "https://a.example/"), ".png");
        assert_eq!(derive_extension(MediaKind::Other, "not a url"), ".bin");
        // 6文字以上は拡張子とみなさない
        assert_eq!(
            derive_extension(MediaKind::Image, "https://a.example/file.toolong"),
            ".png"
        );
    }

    #[test]
    fn test_claim_appends_suffix_before_extension() {
        let mut used = UsedNames::new();
        assert_eq!(used.claim("3-image.png"), "3-image.png");
        assert_eq!(used.claim("3-image.png"), "3-image-2.png");
        assert_eq!(used.claim("3-image.png"), "3-image-3.png");
    }

    #[test]
    fn test_claim_is_case_insensitive() {
        let mut used = UsedNames::new();
        used.claim("1-Video.MP4");
        assert_eq!(used.claim("1-video.mp4"), "1-video-2.mp4");
    }

    #[test]
    fn test_claim_without_extension() {
        let mut used = UsedNames::new();
        used.claim("README");
        assert_eq!(used.claim("README"), "README-2");
        used.claim(".hidden");
        assert_eq!(used.claim(".hidden"), ".hidden-2");
    }

    #[test]
    fn test_session_folder_name_format() {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 7, 8, 9).unwrap();
        assert_eq!(
            session_folder_name("harvest-session", &at),
            "harvest-session/2026-01-05_07-08-09"
        );
        assert_eq!(session_folder_name("", &at), "2026-01-05_07-08-09");
    }

    #[test]
    fn test_truncate_label() {
        assert_eq!(truncate_label("short", 64), "short");
        let long = "a".repeat(70);
        let truncated = truncate_label(&long, 64);
        assert_eq!(truncated.chars().count(), 64);
        assert!(truncated.ends_with("..."));
    }
}
