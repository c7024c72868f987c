//! 保存済み・配信中のHTMLギャラリーページを仮想スクロールグリッドとして扱う
//!
//! ページは読み込み時に一度だけ解析し、所有データのスナップショットとして保持する。
//! 行単位で固定高さのグリッドを想定し、表示領域付近の行だけを「描画中」とみなす。
//! 無限スクロールの読み込み用センチネルとして末尾に1画面分の余白を持つ。

use super::{Ancestor, GallerySurface, MediaNode, NodeKey, Probe, ScrollCandidate, ScrollGeometry};
use crate::error::{HarvestError, Result};
use async_trait::async_trait;
use media_harvest_common::{MediaFilter, MediaKind};
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use url::Url;

/// 仮想スクロール領域のキー（ページ送り後も同じ要素として扱う）
const VIEWPORT_KEY: NodeKey = NodeKey(0);

const GALLERY_MARKERS: &str =
    r#"[data-testid="drop-container"], [data-testid="favorites-scroll"], [data-radix-scroll-area-viewport]"#;

/// ページの取得元
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSource {
    File(PathBuf),
    Remote(Url),
}

impl PageSource {
    /// `http(s)://` / `file://` URL またはローカルパス
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(HarvestError::InvalidUrl("ページが指定されていません".into()));
        }

        if let Ok(url) = Url::parse(trimmed) {
            match url.scheme() {
                "http" | "https" => return Ok(PageSource::Remote(url)),
                "file" => {
                    let path = url
                        .to_file_path()
                        .map_err(|_| HarvestError::InvalidUrl(trimmed.to_string()))?;
                    return Ok(PageSource::File(path));
                }
                // Windowsのドライブレター（C:\...）はパスとして扱う
                scheme if scheme.len() == 1 => {}
                _ => return Err(HarvestError::InvalidUrl(trimmed.to_string())),
            }
        }

        Ok(PageSource::File(PathBuf::from(trimmed)))
    }

    /// 相対リンク解決の基準URL
    pub fn base_url(&self) -> Result<Url> {
        match self {
            PageSource::Remote(url) => Ok(url.clone()),
            PageSource::File(path) => {
                let absolute = std::path::absolute(path)?;
                Url::from_file_path(&absolute)
                    .map_err(|_| HarvestError::InvalidUrl(absolute.display().to_string()))
            }
        }
    }

    fn from_url(url: Url) -> Result<Self> {
        match url.scheme() {
            "http" | "https" => Ok(PageSource::Remote(url)),
            "file" => url
                .to_file_path()
                .map(PageSource::File)
                .map_err(|_| HarvestError::InvalidUrl(url.to_string())),
            _ => Err(HarvestError::InvalidUrl(url.to_string())),
        }
    }

    async fn fetch(&self, client: &reqwest::Client) -> Result<String> {
        match self {
            PageSource::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| HarvestError::PageLoad(format!("{}: {}", path.display(), e))),
            PageSource::Remote(url) => {
                let response = client.get(url.clone()).send().await?.error_for_status()?;
                Ok(response.text().await?)
            }
        }
    }
}

/// HTMLギャラリーのレイアウト・抽出設定
#[derive(Debug, Clone)]
pub struct HtmlGalleryOptions {
    pub viewport_height: u32,
    pub row_height: u32,
    pub columns: usize,
    /// 表示領域の上下に追加で描画する行数（1未満は1として扱う）
    pub overscan_rows: u32,
    /// 画像として収集するホスト
    pub image_hosts: Vec<String>,
    /// 「保存解除」ボタンの aria-label
    pub remove_label: String,
    pub user_agent: String,
}

impl Default for HtmlGalleryOptions {
    fn default() -> Self {
        Self {
            viewport_height: 900,
            row_height: 320,
            columns: 4,
            overscan_rows: 1,
            image_hosts: vec![
                "assets.grok.com".into(),
                "imagine-public.x.ai".into(),
                "x.ai".into(),
            ],
            remove_label: "Unsave".into(),
            user_agent: concat!("media-harvest/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

#[derive(Debug, Clone)]
struct ParsedMedia {
    node: MediaNode,
    /// 全メディア要素中の文書順
    ordinal: usize,
}

#[derive(Debug, Clone, Default)]
struct PageSnapshot {
    media: Vec<ParsedMedia>,
    gallery_present: bool,
    /// (説明, href)
    next_links: Vec<(String, String)>,
    canonical: Option<String>,
    /// `<base href>` が http(s) の場合の基準URL
    base_href: Option<String>,
}

pub struct HtmlGallery {
    client: reqwest::Client,
    options: HtmlGalleryOptions,
    source: PageSource,
    page: PageSnapshot,
    page_index: u32,
    visited: HashSet<String>,
    scroll_top: u32,
}

impl HtmlGallery {
    /// ページを読み込んで解析する
    pub async fn open(input: &str, options: HtmlGalleryOptions) -> Result<Self> {
        let source = PageSource::parse(input)?;
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent.clone())
            .build()?;

        let html = source.fetch(&client).await?;
        let base = source.base_url()?;
        let page = parse_page(&html, &base, 0, &options)?;

        let mut visited = HashSet::new();
        visited.insert(base.to_string());

        tracing::debug!(
            location = %base,
            media = page.media.len(),
            "gallery page loaded"
        );

        Ok(Self {
            client,
            options,
            source,
            page,
            page_index: 0,
            visited,
            scroll_top: 0,
        })
    }

    /// 既に取得済みのHTMLから作る
    pub fn from_html(html: &str, location: &str, options: HtmlGalleryOptions) -> Result<Self> {
        let source = PageSource::parse(location)?;
        let base = source.base_url()?;
        let page = parse_page(html, &base, 0, &options)?;
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent.clone())
            .build()?;

        let mut visited = HashSet::new();
        visited.insert(base.to_string());

        Ok(Self {
            client,
            options,
            source,
            page,
            page_index: 0,
            visited,
            scroll_top: 0,
        })
    }

    /// 読み込み済みページ数
    pub fn pages_loaded(&self) -> u32 {
        self.page_index + 1
    }

    fn rows(&self) -> u32 {
        let columns = self.options.columns.max(1);
        self.page.media.len().div_ceil(columns) as u32
    }

    fn current_geometry(&self) -> ScrollGeometry {
        let viewport = self.options.viewport_height;
        let content = self.rows() * self.options.row_height;
        ScrollGeometry {
            scroll_height: content + viewport,
            client_height: viewport,
            scroll_top: self.scroll_top,
        }
    }

    fn is_rendered(&self, ordinal: usize) -> bool {
        let columns = self.options.columns.max(1);
        let row_height = self.options.row_height;
        // 末尾の余白までスクロールしても最終行が描画されるよう最低1行
        let overscan = self.options.overscan_rows.max(1) * row_height;

        let row_top = (ordinal / columns) as u32 * row_height;
        let row_bottom = row_top + row_height;
        let window_top = self.scroll_top.saturating_sub(overscan);
        let window_bottom = self.scroll_top + self.options.viewport_height + overscan;

        row_bottom > window_top && row_top < window_bottom
    }

    fn matches(&self, node: &MediaNode, filter: MediaFilter) -> bool {
        if !filter.matches(node.kind) {
            return false;
        }
        match node.kind {
            MediaKind::Image => node.src.as_deref().is_some_and(|src| {
                self.options.image_hosts.iter().any(|host| src.contains(host.as_str()))
            }),
            MediaKind::Video => node.src.is_some(),
            MediaKind::Other => false,
        }
    }

    fn rendered(&self, filter: MediaFilter) -> impl Iterator<Item = &MediaNode> + '_ {
        self.page
            .media
            .iter()
            .filter(move |m| self.is_rendered(m.ordinal) && self.matches(&m.node, filter))
            .map(|m| &m.node)
    }

    fn check_container(&self, container: NodeKey) -> Result<()> {
        if container == VIEWPORT_KEY {
            Ok(())
        } else {
            Err(HarvestError::Surface(format!("unknown scroll container {:?}", container)))
        }
    }
}

#[async_trait]
impl GallerySurface for HtmlGallery {
    fn location(&self) -> String {
        if let Some(location) = self.page.canonical.as_ref().or(self.page.base_href.as_ref()) {
            return location.clone();
        }
        match &self.source {
            PageSource::Remote(url) => url.to_string(),
            PageSource::File(path) => self
                .source
                .base_url()
                .map(|u| u.to_string())
                .unwrap_or_else(|_| path.display().to_string()),
        }
    }

    fn is_saved_copy(&self) -> bool {
        matches!(self.source, PageSource::File(_))
    }

    async fn probe(&mut self, filter: MediaFilter) -> Result<Probe> {
        Ok(Probe {
            media_present: self.rendered(filter).next().is_some(),
            gallery_present: self.page.gallery_present,
        })
    }

    async fn scroll_candidates(&mut self) -> Result<Vec<ScrollCandidate>> {
        let geometry = self.current_geometry();
        Ok(vec![ScrollCandidate {
            key: VIEWPORT_KEY,
            overflow_scroll: true,
            scroll_height: geometry.scroll_height,
            client_height: geometry.client_height,
        }])
    }

    async fn geometry(&mut self, container: NodeKey) -> Result<ScrollGeometry> {
        self.check_container(container)?;
        Ok(self.current_geometry())
    }

    async fn scroll_to(&mut self, container: NodeKey, top: u32) -> Result<()> {
        self.check_container(container)?;
        let max_top = self.current_geometry().max_scroll_top();
        self.scroll_top = top.min(max_top);
        Ok(())
    }

    fn viewport_height(&self) -> u32 {
        self.options.viewport_height
    }

    async fn media_count(&mut self, filter: MediaFilter) -> Result<usize> {
        Ok(self.rendered(filter).count())
    }

    async fn visible_media(&mut self, filter: MediaFilter) -> Result<Vec<MediaNode>> {
        Ok(self.rendered(filter).cloned().collect())
    }

    async fn advance_page(&mut self) -> Result<Option<String>> {
        let base = self.source.base_url()?;

        for (description, href) in self.page.next_links.clone() {
            let Ok(next_url) = base.join(&href) else {
                continue;
            };
            if !self.visited.insert(next_url.to_string()) {
                tracing::debug!(url = %next_url, "pagination target already visited");
                continue;
            }

            let next_source = match PageSource::from_url(next_url.clone()) {
                Ok(source) => source,
                Err(e) => {
                    tracing::warn!("skipping pagination link {}: {}", next_url, e);
                    continue;
                }
            };

            let html = match next_source.fetch(&self.client).await {
                Ok(html) => html,
                Err(e) => {
                    tracing::warn!("failed to load next page {}: {}", next_url, e);
                    return Ok(None);
                }
            };

            self.page = parse_page(&html, &next_url, self.page_index + 1, &self.options)?;
            self.page_index += 1;
            self.source = next_source;
            self.scroll_top = 0;
            return Ok(Some(description));
        }

        Ok(None)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| HarvestError::Surface(format!("invalid selector {}: {}", css, e)))
}

fn parse_page(
    html: &str,
    base: &Url,
    page_index: u32,
    options: &HtmlGalleryOptions,
) -> Result<PageSnapshot> {
    let document = Html::parse_document(html);

    let base_selector = Selector::parse("base[href]").expect("base selector");
    let base_href = document
        .select(&base_selector)
        .next()
        .and_then(|b| b.value().attr("href"))
        .and_then(|href| base.join(href).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"));
    let base = base_href.as_ref().unwrap_or(base);

    let media_selector = Selector::parse("img, video").expect("media selector");
    let source_selector = Selector::parse("source[src]").expect("source selector");
    let canonical_selector = Selector::parse(r#"link[rel="canonical"][href]"#).expect("canonical selector");
    let marker_selector = Selector::parse(GALLERY_MARKERS).expect("gallery marker selector");
    let remove_selector = selector(&format!(
        r#"button[aria-label="{}"]"#,
        options.remove_label.replace('"', "\\\"")
    ))?;

    // 「保存解除」ボタンを子孫に持つ要素
    let mut with_remove = HashSet::new();
    for button in document.select(&remove_selector) {
        for ancestor in button.ancestors() {
            with_remove.insert(ancestor.id());
        }
    }

    let key_base = (u64::from(page_index) + 1) << 32;
    let mut keys = HashMap::new();

    let mut media = Vec::new();
    for (ordinal, element) in document.select(&media_selector).enumerate() {
        let is_video = element.value().name() == "video";
        let kind = if is_video { MediaKind::Video } else { MediaKind::Image };

        let absolute = |raw: &str| {
            base.join(raw)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| raw.to_string())
        };

        let src = element.value().attr("src").map(absolute);
        let current_src = if is_video {
            element
                .select(&source_selector)
                .next()
                .and_then(|s| s.value().attr("src"))
                .map(absolute)
        } else {
            element.value().attr("srcset").and_then(last_srcset_candidate).map(|s| absolute(&s))
        };
        let poster = if is_video {
            element.value().attr("poster").map(absolute)
        } else {
            None
        };

        let mut ancestors = Vec::new();
        for ancestor in element.ancestors().filter_map(ElementRef::wrap) {
            if matches!(ancestor.value().name(), "body" | "html") {
                break;
            }
            let next = key_base + keys.len() as u64 + 1;
            let key = *keys.entry(ancestor.id()).or_insert(next);
            ancestors.push(Ancestor {
                key: NodeKey(key),
                has_remove_affordance: with_remove.contains(&ancestor.id()),
            });
        }

        media.push(ParsedMedia {
            node: MediaNode {
                kind,
                current_src,
                src,
                poster,
                ancestors,
            },
            ordinal,
        });
    }

    let canonical = document
        .select(&canonical_selector)
        .next()
        .and_then(|l| l.value().attr("href"))
        .and_then(|href| base.join(href).ok())
        .map(|u| u.to_string());

    Ok(PageSnapshot {
        media,
        gallery_present: document.select(&marker_selector).next().is_some(),
        next_links: find_next_links(&document),
        canonical,
        base_href: base_href.map(|u| u.to_string()),
    })
}

/// srcset の最後の候補（最大解像度）
fn last_srcset_candidate(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .filter_map(|candidate| candidate.split_whitespace().next())
        .filter(|url| !url.is_empty())
        .last()
        .map(String::from)
}

fn find_next_links(document: &Html) -> Vec<(String, String)> {
    let rel_next = Selector::parse(r#"a[rel~="next"][href]"#).expect("rel next selector");
    let anchors = Selector::parse("a[href]").expect("anchor selector");

    let mut links = Vec::new();
    for a in document.select(&rel_next) {
        if let Some(href) = a.value().attr("href") {
            links.push(("a[rel=\"next\"]".to_string(), href.to_string()));
        }
    }

    for a in document.select(&anchors) {
        if a.value().attr("aria-disabled") == Some("true") {
            continue;
        }
        let label = a.value().attr("aria-label").unwrap_or("").trim().to_string();
        let text = a.text().collect::<String>().trim().to_string();
        if looks_like_next(&label, &text) {
            if let Some(href) = a.value().attr("href") {
                links.push(("fallback control".to_string(), href.to_string()));
            }
        }
    }

    links
}

/// next / older / more、または `>` `›` `»` だけのリンク
fn looks_like_next(label: &str, text: &str) -> bool {
    let primary = if label.is_empty() { text } else { label };
    let word = primary.to_lowercase();
    if matches!(word.as_str(), "next" | "older" | "more") {
        return true;
    }
    !text.is_empty() && text.chars().all(|c| matches!(c, '>' | '›' | '»'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head><link rel="canonical" href="https://grok.com/imagine/favorites"></head>
        <body>
          <div data-testid="favorites-scroll">
            <div class="card">
              <img src="https://assets.grok.com/users/u/generated/a/preview_image.jpg"
                   srcset="https://assets.grok.com/a-small.jpg 1x, https://assets.grok.com/a-large.jpg 2x">
              <video src="https://assets.grok.com/users/u/generated/a/generated_video.mp4"
                     poster="https://assets.grok.com/a-poster.jpg"></video>
              <button aria-label="Unsave">x</button>
            </div>
            <div class="card">
              <img src="https://imagine-public.x.ai/imagine-public/images/b.png">
              <button aria-label="Unsave">x</button>
            </div>
            <img src="https://cdn.other.example/profile.png">
          </div>
          <a href="/imagine/favorites?page=2" aria-label="Next">Next</a>
        </body></html>
    "#;

    fn gallery() -> HtmlGallery {
        HtmlGallery::from_html(PAGE, "https://grok.com/imagine/favorites", HtmlGalleryOptions::default())
            .unwrap()
    }

    #[test]
    fn test_page_source_parse() {
        assert!(matches!(
            PageSource::parse("https://grok.com/imagine").unwrap(),
            PageSource::Remote(_)
        ));
        assert!(matches!(PageSource::parse("saved/page.html").unwrap(), PageSource::File(_)));
        assert!(PageSource::parse("ftp://example.com/x").is_err());
        assert!(PageSource::parse("  ").is_err());
    }

    #[test]
    fn test_last_srcset_candidate() {
        assert_eq!(
            last_srcset_candidate("a.jpg 1x, b.jpg 2x").as_deref(),
            Some("b.jpg")
        );
        assert_eq!(last_srcset_candidate("").as_deref(), None);
    }

    #[test]
    fn test_looks_like_next() {
        assert!(looks_like_next("Next", ""));
        assert!(looks_like_next("", "older"));
        assert!(looks_like_next("", "»"));
        assert!(!looks_like_next("Previous", "<"));
        assert!(!looks_like_next("", "Next page"));
    }

    #[tokio::test]
    async fn test_filters_by_host_and_kind() {
        let mut g = gallery();
        assert_eq!(g.media_count(MediaFilter::All).await.unwrap(), 3);
        assert_eq!(g.media_count(MediaFilter::Image).await.unwrap(), 2);
        assert_eq!(g.media_count(MediaFilter::Video).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_media_nodes_carry_card_ancestor() {
        let mut g = gallery();
        let nodes = g.visible_media(MediaFilter::All).await.unwrap();
        let image = &nodes[0];
        let video = &nodes[1];

        assert_eq!(image.current_src.as_deref(), Some("https://assets.grok.com/a-large.jpg"));
        assert_eq!(video.poster.as_deref(), Some("https://assets.grok.com/a-poster.jpg"));

        let image_card = image.ancestors.iter().find(|a| a.has_remove_affordance).unwrap();
        let video_card = video.ancestors.iter().find(|a| a.has_remove_affordance).unwrap();
        assert_eq!(image_card.key, video_card.key);
    }

    #[tokio::test]
    async fn test_location_prefers_canonical() {
        let g = gallery();
        assert_eq!(g.location(), "https://grok.com/imagine/favorites");
    }

    #[tokio::test]
    async fn test_virtual_rows_limit_rendered_media() {
        let cards: String = (0..40)
            .map(|i| format!(r#"<div><img src="https://assets.grok.com/generated/{i}.png"></div>"#))
            .collect();
        let html = format!("<html><body>{}</body></html>", cards);
        let options = HtmlGalleryOptions {
            viewport_height: 600,
            row_height: 300,
            columns: 2,
            overscan_rows: 1,
            ..HtmlGalleryOptions::default()
        };
        let mut g = HtmlGallery::from_html(&html, "https://grok.com/imagine", options).unwrap();

        // 表示2行 + 下側1行 x 2列
        assert_eq!(g.media_count(MediaFilter::All).await.unwrap(), 6);

        let geometry = g.geometry(VIEWPORT_KEY).await.unwrap();
        assert_eq!(geometry.scroll_height, 20 * 300 + 600);

        g.scroll_to(VIEWPORT_KEY, 5400).await.unwrap();
        let last = g.visible_media(MediaFilter::All).await.unwrap();
        assert!(last
            .iter()
            .any(|n| n.src.as_deref() == Some("https://assets.grok.com/generated/39.png")));
    }

    #[tokio::test]
    async fn test_last_row_stays_rendered_at_sentinel() {
        let cards: String = (0..40)
            .map(|i| format!(r#"<div><img src="https://assets.grok.com/generated/{i}.png"></div>"#))
            .collect();
        let html = format!("<html><body>{}</body></html>", cards);
        let options = HtmlGalleryOptions {
            viewport_height: 600,
            row_height: 300,
            columns: 2,
            overscan_rows: 0,
            ..HtmlGalleryOptions::default()
        };
        let mut g = HtmlGallery::from_html(&html, "https://grok.com/imagine", options).unwrap();

        g.scroll_to(VIEWPORT_KEY, 100_000).await.unwrap();
        let geometry = g.geometry(VIEWPORT_KEY).await.unwrap();
        assert_eq!(geometry.scroll_top, geometry.max_scroll_top());

        let nodes = g.visible_media(MediaFilter::All).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes
            .iter()
            .any(|n| n.src.as_deref() == Some("https://assets.grok.com/generated/39.png")));
    }

    #[tokio::test]
    async fn test_base_href_sets_location_and_resolves_media() {
        let html = r#"<html><head><base href="https://grok.com/imagine/favorites"></head>
            <body><img src="/generated/a.png"><img src="https://assets.grok.com/generated/b.png"></body></html>"#;
        let mut g = HtmlGallery::from_html(html, "saved/favorites.html", HtmlGalleryOptions::default()).unwrap();

        assert_eq!(g.location(), "https://grok.com/imagine/favorites");
        assert!(g.is_saved_copy());
        let nodes = g.visible_media(MediaFilter::All).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].src.as_deref(), Some("https://assets.grok.com/generated/b.png"));

        let first = g.page.media[0].node.src.as_deref();
        assert_eq!(first, Some("https://grok.com/generated/a.png"));
    }

    #[tokio::test]
    async fn test_remote_page_is_not_saved_copy() {
        assert!(!gallery().is_saved_copy());
    }

    #[tokio::test]
    async fn test_advance_page_follows_file_links() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("page1.html");
        let second = dir.path().join("page2.html");
        std::fs::write(
            &first,
            r#"<html><body><img src="https://assets.grok.com/generated/1.png"><a rel="next" href="page2.html">2</a></body></html>"#,
        )
        .unwrap();
        std::fs::write(
            &second,
            r#"<html><body><img src="https://assets.grok.com/generated/2.png"><a rel="next" href="page1.html">1</a></body></html>"#,
        )
        .unwrap();

        let mut g = HtmlGallery::open(first.to_str().unwrap(), HtmlGalleryOptions::default())
            .await
            .unwrap();
        assert!(g.advance_page().await.unwrap().is_some());
        assert_eq!(g.pages_loaded(), 2);
        let nodes = g.visible_media(MediaFilter::All).await.unwrap();
        assert_eq!(nodes[0].src.as_deref(), Some("https://assets.grok.com/generated/2.png"));

        // page1 は訪問済みなので進まない
        assert!(g.advance_page().await.unwrap().is_none());
    }
}
