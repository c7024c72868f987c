//! ギャラリー収集モジュール
//!
//! 仮想スクロールされたギャラリーを少しずつスクロールしながら、
//! 描画されたメディア要素を重複なく集める。
//!
//! ## 処理フロー
//! 1. 準備確認（メディア要素またはギャラリーコンテナの出現待ち）
//! 2. スクロールコンテナの特定
//! 3. スクロール・収集ループ（スクロール位置と要素数が安定したら収束、ページ送りがあれば継続）
//! 4. コンテナ単位のグループ化と番号付け
//!
//! 失敗はすべて `NotReady` に縮退し、エラーとして返さない。

pub mod grouping;

use crate::error::Result;
use crate::surface::{GallerySurface, MediaNode, NodeKey};
use media_harvest_common::{CollectedItem, GalleryItem, MediaFilter, MediaKind};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// 待機時間（基本値 + 0〜spread のランダム幅）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    pub base: Duration,
    pub spread: Duration,
}

impl Jitter {
    pub const fn ms(base: u64, spread: u64) -> Self {
        Self {
            base: Duration::from_millis(base),
            spread: Duration::from_millis(spread),
        }
    }

    pub const ZERO: Jitter = Jitter::ms(0, 0);

    pub fn sample(&self) -> Duration {
        let spread = self.spread.as_millis() as u64;
        if spread == 0 {
            return self.base;
        }
        self.base + Duration::from_millis(rand::rng().random_range(0..=spread))
    }
}

/// 各段階の待機時間
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// 何も見つからない時の再確認
    pub probe_retry: Jitter,
    /// コンテナだけある時のスクロール後
    pub gallery_scroll: Jitter,
    /// 先頭へ戻した後
    pub top_settle: Jitter,
    /// スクロール1回ごと
    pub scroll_settle: Jitter,
    /// ページ送りクリック後
    pub page_settle: Jitter,
    /// ページ送り後の再計測前
    pub after_page: Jitter,
}

impl Pacing {
    /// 待機なし（テスト・オフラインページ用）
    pub fn immediate() -> Self {
        Self {
            probe_retry: Jitter::ZERO,
            gallery_scroll: Jitter::ZERO,
            top_settle: Jitter::ZERO,
            scroll_settle: Jitter::ZERO,
            page_settle: Jitter::ZERO,
            after_page: Jitter::ZERO,
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            probe_retry: Jitter::ms(250, 200),
            gallery_scroll: Jitter::ms(400, 200),
            top_settle: Jitter::ms(300, 0),
            scroll_settle: Jitter::ms(520, 320),
            page_settle: Jitter::ms(900, 400),
            after_page: Jitter::ms(600, 300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// スクロールループの上限（暴走防止）
    pub max_scroll_passes: usize,
    pub max_pagination_cycles: usize,
    /// 収束とみなす連続安定回数
    pub stable_passes: u32,
    pub readiness_attempts: usize,
    /// 1回のスクロール量（表示高さに対する割合）
    pub scroll_fraction: f64,
    pub min_scroll_step: u32,
    /// スクロールコンテナとみなす内容高さの余裕
    pub container_margin: u32,
    /// 対象ページのURLに含まれるべき断片
    pub target_marker: Option<String>,
    pub pacing: Pacing,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_scroll_passes: 1500,
            max_pagination_cycles: 100,
            stable_passes: 3,
            readiness_attempts: 60,
            scroll_fraction: 0.9,
            min_scroll_step: 280,
            container_margin: 100,
            target_marker: Some("/imagine".into()),
            pacing: Pacing::default(),
        }
    }
}

/// 収集リクエスト
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectRequest {
    /// 0 = 無制限
    pub limit: usize,
    pub filter: MediaFilter,
    pub debug: bool,
}

/// 収集結果
#[derive(Debug, Clone)]
pub enum CollectOutcome {
    Ready {
        items: Vec<GalleryItem>,
        trace: Vec<String>,
    },
    NotReady {
        message: String,
        trace: Vec<String>,
    },
}

impl CollectOutcome {
    pub fn trace(&self) -> &[String] {
        match self {
            CollectOutcome::Ready { trace, .. } | CollectOutcome::NotReady { trace, .. } => trace,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, CollectOutcome::Ready { .. })
    }
}

/// NotReady 時の既定メッセージ
pub const GRID_NOT_DETECTED: &str =
    "Gallery grid not detected. Solve verification prompts, reload the page, then try again.";

/// デバッグ用の判断トレース（無効時は tracing にだけ流す）
struct Trace {
    lines: Option<Vec<String>>,
}

impl Trace {
    fn new(enabled: bool) -> Self {
        Self {
            lines: enabled.then(Vec::new),
        }
    }

    fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(target: "media_harvest::collector", "{}", message);
        if let Some(lines) = self.lines.as_mut() {
            lines.push(message);
        }
    }

    fn into_lines(self) -> Vec<String> {
        self.lines.unwrap_or_default()
    }
}

enum Scan {
    Collected(Vec<GalleryItem>),
    NotReady(String),
}

/// スクロール中に集めた状態
#[derive(Default)]
struct ScanState {
    seen_urls: HashSet<String>,
    items: Vec<CollectedItem>,
    container_ids: HashMap<NodeKey, u32>,
    next_container_id: u32,
}

impl ScanState {
    fn container_id(&mut self, key: Option<NodeKey>) -> u32 {
        let fresh = self.next_container_id;
        let id = match key {
            Some(key) => *self.container_ids.entry(key).or_insert(fresh),
            None => fresh,
        };
        if id == fresh {
            self.next_container_id += 1;
        }
        id
    }

    fn absorb(&mut self, node: &MediaNode, filter: MediaFilter) {
        let Some(url) = node.resolved_url() else {
            return;
        };
        if self.seen_urls.contains(url) || !is_generated_asset(url) || !filter.matches(node.kind) {
            return;
        }
        self.seen_urls.insert(url.to_string());

        let poster_url = match node.kind {
            MediaKind::Video => node.poster.clone().filter(|p| !p.is_empty()),
            _ => None,
        };

        // 保存解除ボタンを持つ祖先 = お気に入り1件分、なければ直近の親
        let container = node
            .ancestors
            .iter()
            .find(|a| a.has_remove_affordance)
            .or_else(|| node.ancestors.first())
            .map(|a| a.key);
        let container_id = self.container_id(container);

        self.items.push(CollectedItem {
            url: url.to_string(),
            kind: node.kind,
            poster_url,
            container_id,
        });
    }
}

/// 生成コンテンツ以外（プロフィール画像など）を除外
pub fn is_generated_asset(url: &str) -> bool {
    if url.contains("profile-picture") || url.contains("avatar") {
        return false;
    }
    url.contains("/generated/") || url.contains("/images/") || url.contains("generated_video")
}

pub struct Collector {
    config: CollectorConfig,
}

impl Collector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// ページを走査してメディア一覧を作る（エラーは NotReady に縮退）
    pub async fn collect<S>(&self, surface: &mut S, request: &CollectRequest) -> CollectOutcome
    where
        S: GallerySurface + ?Sized,
    {
        let mut trace = Trace::new(request.debug);
        match self.scan(surface, request, &mut trace).await {
            Ok(Scan::Collected(items)) => CollectOutcome::Ready {
                items,
                trace: trace.into_lines(),
            },
            Ok(Scan::NotReady(message)) => CollectOutcome::NotReady {
                message,
                trace: trace.into_lines(),
            },
            Err(e) => {
                tracing::warn!("collection aborted: {}", e);
                trace.log(format!("Collection aborted: {}", e));
                CollectOutcome::NotReady {
                    message: GRID_NOT_DETECTED.to_string(),
                    trace: trace.into_lines(),
                }
            }
        }
    }

    async fn scan<S>(&self, surface: &mut S, request: &CollectRequest, trace: &mut Trace) -> Result<Scan>
    where
        S: GallerySurface + ?Sized,
    {
        let filter = request.filter;
        let limit = request.limit;
        let pacing = self.config.pacing;
        trace.log(format!("Media filter: {}", filter));

        if let Some(marker) = &self.config.target_marker {
            let location = surface.location();
            if !location.contains(marker.as_str()) {
                if !surface.is_saved_copy() {
                    trace.log(format!("URL missing {} segment; aborting scrape.", marker));
                    return Ok(Scan::NotReady(GRID_NOT_DETECTED.to_string()));
                }
                trace.log(format!("Saved page {} has no {} segment; skipping URL check.", location, marker));
            }
        }

        if !self.ensure_ready(surface, filter, trace).await? {
            return Ok(Scan::NotReady(GRID_NOT_DETECTED.to_string()));
        }

        let Some(container) = self.resolve_container(surface).await? else {
            trace.log("Could not find scrollable container");
            return Ok(Scan::NotReady(GRID_NOT_DETECTED.to_string()));
        };

        let geometry = surface.geometry(container).await?;
        trace.log(format!(
            "Found scroll container: scrollHeight={}, clientHeight={}, scrollTop={}",
            geometry.scroll_height, geometry.client_height, geometry.scroll_top
        ));

        surface.scroll_to(container, 0).await?;
        tokio::time::sleep(pacing.top_settle.sample()).await;

        let mut state = ScanState::default();
        let mut stable_height = 0;
        let mut stable_media = 0;
        let mut pagination_cycles = 0;
        let mut last_geometry = surface.geometry(container).await?;
        let mut last_count = surface.media_count(filter).await?;

        for pass in 0..self.config.max_scroll_passes {
            self.collect_visible(surface, filter, &mut state).await?;

            if limit > 0 && state.items.len() >= limit {
                trace.log(format!("Reached limit of {} items, stopping scan early.", limit));
                break;
            }

            self.scroll_step(surface, container).await?;
            tokio::time::sleep(pacing.scroll_settle.sample()).await;

            let current = surface.geometry(container).await?;
            let count = surface.media_count(filter).await?;
            trace.log(format!(
                "scroll pass {}: media={}, height={}, scrollTop={}, collected={}, stableHeight={}, stableMedia={}",
                pass + 1,
                count,
                current.scroll_height,
                current.scroll_top,
                state.items.len(),
                stable_height,
                stable_media
            ));

            if current.scroll_height == last_geometry.scroll_height
                && current.scroll_top == last_geometry.scroll_top
            {
                stable_height += 1;
            } else {
                stable_height = 0;
            }

            if count == last_count {
                stable_media += 1;
            } else {
                stable_media = 0;
            }

            last_geometry = current;
            last_count = count;

            if count == 0 {
                continue;
            }

            if stable_height >= self.config.stable_passes && stable_media >= self.config.stable_passes {
                if pagination_cycles < self.config.max_pagination_cycles {
                    if let Some(control) = surface.advance_page().await? {
                        trace.log(format!("Advancing pagination via {}", control));
                        tokio::time::sleep(pacing.page_settle.sample()).await;
                        pagination_cycles += 1;
                        stable_height = 0;
                        stable_media = 0;
                        last_geometry = surface.geometry(container).await?;
                        last_count = surface.media_count(filter).await?;
                        tokio::time::sleep(pacing.after_page.sample()).await;
                        continue;
                    }
                }
                break;
            }
        }

        self.collect_visible(surface, filter, &mut state).await?;
        trace.log(format!(
            "Final collection: {} total unique media items",
            state.items.len()
        ));

        if state.items.is_empty() {
            trace.log("No media items were collected during scrolling.");
            return Ok(Scan::NotReady(GRID_NOT_DETECTED.to_string()));
        }

        let items = grouping::group_items(&state.items);
        trace.log(format!(
            "Processed {} media items into {} groups.",
            items.len(),
            grouping::group_count(&state.items)
        ));

        if request.debug {
            let distribution = grouping::group_size_distribution(&state.items)
                .into_iter()
                .map(|(size, count)| format!("{} groups with {} items", count, size))
                .collect::<Vec<_>>()
                .join(", ");
            trace.log(format!("Group size distribution: {}", distribution));
        }

        Ok(Scan::Collected(items))
    }

    /// メディア要素かギャラリーコンテナが現れるまで待つ
    async fn ensure_ready<S>(&self, surface: &mut S, filter: MediaFilter, trace: &mut Trace) -> Result<bool>
    where
        S: GallerySurface + ?Sized,
    {
        let pacing = self.config.pacing;
        for attempt in 0..self.config.readiness_attempts {
            let probe = surface.probe(filter).await?;
            trace.log(format!(
                "ensureGrid attempt {}: media={}, gallery={}",
                attempt + 1,
                if probe.media_present { "yes" } else { "no" },
                if probe.gallery_present { "yes" } else { "no" }
            ));

            if probe.media_present {
                trace.log("Media element detected; grid ready for scraping.");
                return Ok(true);
            }

            if probe.gallery_present {
                trace.log("Gallery container present but media missing; performing additional scroll.");
                if let Some(container) = self.resolve_container(surface).await? {
                    self.scroll_step(surface, container).await?;
                }
                tokio::time::sleep(pacing.gallery_scroll.sample()).await;
                continue;
            }

            tokio::time::sleep(pacing.probe_retry.sample()).await;
        }

        trace.log("Failed to detect gallery grid after repeated attempts.");
        Ok(false)
    }

    /// 内容が表示高さを十分に超え、overflow が scroll の最初の要素
    async fn resolve_container<S>(&self, surface: &mut S) -> Result<Option<NodeKey>>
    where
        S: GallerySurface + ?Sized,
    {
        let margin = self.config.container_margin;
        Ok(surface
            .scroll_candidates()
            .await?
            .into_iter()
            .find(|c| c.overflow_scroll && c.scroll_height > c.client_height.saturating_add(margin))
            .map(|c| c.key))
    }

    /// 表示高さの一部だけ進める（仮想行の取りこぼし防止）
    async fn scroll_step<S>(&self, surface: &mut S, container: NodeKey) -> Result<()>
    where
        S: GallerySurface + ?Sized,
    {
        let viewport = surface.viewport_height();
        let step = ((viewport as f64 * self.config.scroll_fraction).floor() as u32)
            .max(self.config.min_scroll_step);
        let geometry = surface.geometry(container).await?;
        let top = geometry
            .scroll_top
            .saturating_add(step)
            .min(geometry.max_scroll_top());
        surface.scroll_to(container, top).await
    }

    async fn collect_visible<S>(&self, surface: &mut S, filter: MediaFilter, state: &mut ScanState) -> Result<()>
    where
        S: GallerySurface + ?Sized,
    {
        for node in surface.visible_media(filter).await? {
            state.absorb(&node, filter);
        }
        Ok(())
    }
}
