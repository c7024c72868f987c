//! ギャラリーページ操作の抽象化
//!
//! セレクタや祖先要素の走査などページ固有のヒューリスティクスはここに閉じ込め、
//! Collector は観測値と操作だけを使ってスクロール・収束判定を行う。

mod html;

pub use html::{HtmlGallery, HtmlGalleryOptions, PageSource};

use crate::error::Result;
use async_trait::async_trait;
use media_harvest_common::{MediaFilter, MediaKind};

/// ページ内要素の識別子（同一ページ読み込み中は安定）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub u64);

/// 準備確認の結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Probe {
    /// フィルタに一致するメディア要素が存在する
    pub media_present: bool,
    /// 既知のギャラリーコンテナが存在する
    pub gallery_present: bool,
}

/// スクロールコンテナ候補
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollCandidate {
    pub key: NodeKey,
    /// overflow が明示的に scroll
    pub overflow_scroll: bool,
    pub scroll_height: u32,
    pub client_height: u32,
}

/// スクロール位置のスナップショット
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrollGeometry {
    pub scroll_height: u32,
    pub client_height: u32,
    pub scroll_top: u32,
}

impl ScrollGeometry {
    pub fn max_scroll_top(&self) -> u32 {
        self.scroll_height.saturating_sub(self.client_height)
    }
}

/// 祖先要素の情報（親から順）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ancestor {
    pub key: NodeKey,
    /// 配下に「保存解除」ボタンを持つ（お気に入り1件分のコンテナ）
    pub has_remove_affordance: bool,
}

/// 描画中のメディア要素
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaNode {
    pub kind: MediaKind,
    /// 実際に描画されているソース（レスポンシブ・遅延読み込み後）
    pub current_src: Option<String>,
    /// 静的な src 属性
    pub src: Option<String>,
    pub poster: Option<String>,
    /// 直近の親から body 直下までの祖先
    pub ancestors: Vec<Ancestor>,
}

impl MediaNode {
    /// 描画中のソースを静的属性より優先する
    pub fn resolved_url(&self) -> Option<&str> {
        self.src.as_ref()?;
        self.current_src
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.src.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Collector が依存するページ操作の戦略インターフェース
#[async_trait]
pub trait GallerySurface: Send {
    /// ページの現在位置（URL）
    fn location(&self) -> String;

    /// ローカルに保存したページ（URLによる対象ページ判定を行わない）
    fn is_saved_copy(&self) -> bool {
        false
    }

    /// メディア要素・ギャラリーコンテナの有無
    async fn probe(&mut self, filter: MediaFilter) -> Result<Probe>;

    /// スクロール可能性のあるコンテナ候補（文書順）
    async fn scroll_candidates(&mut self) -> Result<Vec<ScrollCandidate>>;

    async fn geometry(&mut self, container: NodeKey) -> Result<ScrollGeometry>;

    /// スクロール位置を設定（範囲外は表面側でクランプ）
    async fn scroll_to(&mut self, container: NodeKey, top: u32) -> Result<()>;

    /// ウィンドウの表示高さ
    fn viewport_height(&self) -> u32;

    /// 現在描画されている一致要素の数
    async fn media_count(&mut self, filter: MediaFilter) -> Result<usize>;

    /// 現在描画されている一致要素
    async fn visible_media(&mut self, filter: MediaFilter) -> Result<Vec<MediaNode>>;

    /// ページ送りを1回試みる。成功時は使ったコントロールの説明を返す
    async fn advance_page(&mut self) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(current: Option<&str>, src: Option<&str>) -> MediaNode {
        MediaNode {
            kind: MediaKind::Image,
            current_src: current.map(String::from),
            src: src.map(String::from),
            poster: None,
            ancestors: Vec::new(),
        }
    }

    #[test]
    fn test_resolved_url_prefers_current_src() {
        let n = node(Some("https://a/large.png"), Some("https://a/small.png"));
        assert_eq!(n.resolved_url(), Some("https://a/large.png"));
    }

    #[test]
    fn test_resolved_url_falls_back_to_src() {
        let n = node(Some(""), Some("https://a/small.png"));
        assert_eq!(n.resolved_url(), Some("https://a/small.png"));
        let n = node(None, Some("https://a/small.png"));
        assert_eq!(n.resolved_url(), Some("https://a/small.png"));
    }

    #[test]
    fn test_resolved_url_requires_src_attribute() {
        let n = node(Some("https://a/large.png"), None);
        assert_eq!(n.resolved_url(), None);
    }

    #[test]
    fn test_max_scroll_top() {
        let g = ScrollGeometry {
            scroll_height: 3000,
            client_height: 900,
            scroll_top: 0,
        };
        assert_eq!(g.max_scroll_top(), 2100);
    }
}
