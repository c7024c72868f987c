//! ダウンロードオーケストレーター
//!
//! 収集 → キュー構築 → 逐次転送 → リトライ → 集計 の実行を1つだけ管理する。
//! 実行状態は `Orchestrator` が所有し、非同期処理の再開点ではすべて実行世代（run_id）を
//! 照合して、リセット済みの実行からの更新を捨てる。

mod drain;
pub mod events;
pub mod state;

pub use events::{FnObserver, StatusObserver};
pub use state::{RunPhase, RunSummary, TransferResult};

use crate::collector::{CollectOutcome, CollectRequest, Collector};
use crate::queue::prepare_queue;
use crate::surface::GallerySurface;
use crate::transfer::TransferBackend;
use media_harvest_common::{
    session_folder_name, truncate_label, GalleryItem, MediaFilter, Progress, StatusEvent, StatusState,
    DEFAULT_HISTORY_CAPACITY, DEFAULT_SESSION_ROOT,
};
use serde::Serialize;
use state::{PendingEvent, RunState};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// ステータス表示でのラベル最大長
pub const LABEL_MAX_CHARS: usize = 64;

/// リスナー未接続時に使うブロードキャストの容量
const BROADCAST_CAPACITY: usize = 256;

/// 外部ページとして扱わない URL
const RESTRICTED_PREFIXES: [&str; 4] = ["chrome://", "chrome-extension://", "about:", "edge://"];

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 1ファイルあたりのリトライ上限
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// 転送と転送の間隔
    pub download_delay: Duration,
    pub download_timeout: Duration,
    pub max_history: usize,
    /// 通常モードで進捗を通知する間隔
    pub progress_every: usize,
    pub session_root: String,
    pub label_max_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            download_delay: Duration::from_millis(350),
            download_timeout: Duration::from_secs(30),
            max_history: DEFAULT_HISTORY_CAPACITY,
            progress_every: 10,
            session_root: DEFAULT_SESSION_ROOT.into(),
            label_max_chars: LABEL_MAX_CHARS,
        }
    }
}

/// start の入力（文字列・数値は寛容に解釈する）
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    pub debug: bool,
    /// 0 = 無制限
    pub limit: usize,
    pub media: MediaFilter,
}

impl StartOptions {
    /// 負の上限は 0、不明な種類は `all` として扱う
    pub fn lenient(debug: bool, limit: i64, media: &str) -> Self {
        Self {
            debug,
            limit: usize::try_from(limit).unwrap_or(0),
            media: MediaFilter::parse_lenient(media),
        }
    }
}

/// start の応答
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StartResponse {
    Started { total: usize },
    Busy,
    NeedTarget,
    Empty,
    Error { message: String },
}

impl StartResponse {
    pub fn is_started(&self) -> bool {
        matches!(self, StartResponse::Started { .. })
    }
}

/// 新しく接続したリスナー向けのスナップショット
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub history: Vec<StatusEvent>,
    pub progress: Progress,
    pub active: bool,
    pub total: usize,
    pub completed: usize,
    /// 最後に紐付いたページ
    pub surface_id: Option<String>,
}

/// 実行中の収集がリセットされた時のメッセージ
pub const SUPERSEDED: &str = "Run was reset before collection finished.";

struct Inner {
    config: OrchestratorConfig,
    collector: Collector,
    transfer: Arc<dyn TransferBackend>,
    state: Mutex<RunState>,
    broadcast: broadcast::Sender<StatusEvent>,
    /// (通し番号, フェーズ)
    phase_tx: watch::Sender<(u64, RunPhase)>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, collector: Collector, transfer: Arc<dyn TransferBackend>) -> Self {
        let (phase_tx, _) = watch::channel((0, RunPhase::Idle));
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        let state = RunState::new(config.max_history);
        Self {
            inner: Arc::new(Inner {
                config,
                collector,
                transfer,
                state: Mutex::new(state),
                broadcast,
                phase_tx,
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// ページを収集してダウンロードを開始する
    ///
    /// キューができた時点で `Started` を返し、転送はバックグラウンドで進む。
    pub async fn start<S>(
        &self,
        surface: Option<&mut S>,
        options: StartOptions,
        observer: Option<Arc<dyn StatusObserver>>,
    ) -> StartResponse
    where
        S: GallerySurface + ?Sized,
    {
        if self.is_active() {
            return StartResponse::Busy;
        }

        let Some(surface) = surface else {
            return StartResponse::NeedTarget;
        };
        let location = surface.location();
        if !is_valid_target(&location) {
            return StartResponse::NeedTarget;
        }

        let run_id = {
            let mut state = self.inner.lock();
            if state.is_active() {
                return StartResponse::Busy;
            }
            if observer.is_some() {
                state.observer = observer;
            }
            state.surface_id = Some(location.clone());
            let run_id = state.begin(options.debug);

            let text = if options.limit > 0 {
                format!(
                    "Scanning favorites page (will limit to {} {})…",
                    options.limit,
                    options.media.plural_label()
                )
            } else {
                format!("Scanning favorites page for {}…", options.media.plural_label())
            };
            self.inner.emit(&mut state, text, StatusState::Running, Some(Progress::default()));
            run_id
        };

        tracing::info!(run_id, %location, media = %options.media, limit = options.limit, "run started");

        let request = CollectRequest {
            limit: options.limit,
            filter: options.media,
            debug: options.debug,
        };
        let outcome = self.inner.collector.collect(surface, &request).await;

        let mut state = self.inner.lock();
        if !state.is_current(run_id) {
            tracing::info!(run_id, "collection finished after reset; discarded");
            return StartResponse::Error {
                message: SUPERSEDED.to_string(),
            };
        }

        self.inner.emit_trace(&mut state, outcome.trace());

        match outcome {
            CollectOutcome::NotReady { message, .. } => {
                self.inner.emit(&mut state, message.clone(), StatusState::Error, None);
                state.abort();
                StartResponse::Error { message }
            }
            CollectOutcome::Ready { items, .. } => self.launch(&mut state, run_id, items, options.limit),
        }
    }

    /// 収集済みの一覧からダウンロードを開始する（収集を省略）
    pub fn start_with_items(
        &self,
        items: Vec<GalleryItem>,
        options: StartOptions,
        observer: Option<Arc<dyn StatusObserver>>,
    ) -> StartResponse {
        let mut state = self.inner.lock();
        if state.is_active() {
            return StartResponse::Busy;
        }
        if observer.is_some() {
            state.observer = observer;
        }
        let run_id = state.begin(options.debug);
        let filtered: Vec<GalleryItem> = items
            .into_iter()
            .filter(|item| options.media.matches(item.kind))
            .collect();
        self.launch(&mut state, run_id, filtered, options.limit)
    }

    /// キューを構築して転送タスクを起動する
    fn launch(&self, state: &mut RunState, run_id: u64, mut items: Vec<GalleryItem>, limit: usize) -> StartResponse {
        if items.is_empty() {
            self.inner
                .emit(state, "Could not locate any downloadable media on this page.", StatusState::Error, None);
            state.abort();
            return StartResponse::Empty;
        }

        self.inner.emit(
            state,
            format!("✓ Found {} media items. Preparing download queue…", items.len()),
            StatusState::Running,
            None,
        );

        if limit > 0 && items.len() > limit {
            items.truncate(limit);
            self.inner.emit(
                state,
                format!("Limited to first {} items for testing.", limit),
                StatusState::Running,
                None,
            );
        }

        let session_folder = session_folder_name(&self.inner.config.session_root, &chrono::Local::now());
        let queue = prepare_queue(&items, &session_folder);
        if queue.is_empty() {
            self.inner.emit(
                state,
                "Collected media but failed to prepare download queue.",
                StatusState::Error,
                None,
            );
            state.abort();
            return StartResponse::Empty;
        }
        let total = queue.len();

        state.queue = queue;
        state.index = 0;
        state.results.clear();
        state.retry_queue.clear();
        state.retry_attempts.clear();
        state.session_folder = session_folder.clone();
        state.total = total;
        state.completed = 0;
        state.set_phase(RunPhase::DrainingPrimary);

        self.inner.emit(
            state,
            format!("Starting download of {} files to {}/", total, session_folder),
            StatusState::Running,
            Some(Progress::new(total, 0)),
        );
        tracing::info!(run_id, total, session = %session_folder, "download queue ready");

        tokio::spawn(self.inner.clone().drain(run_id));
        StartResponse::Started { total }
    }

    /// 現在の状態を返し、リスナーを実行に紐付ける
    pub fn request_state(&self, observer: Option<Arc<dyn StatusObserver>>) -> StateSnapshot {
        let mut state = self.inner.lock();
        if observer.is_some() {
            state.observer = observer;
        }
        StateSnapshot {
            history: state.history.snapshot(),
            progress: state.progress,
            active: state.is_active(),
            total: state.total,
            completed: state.completed,
            surface_id: state.surface_id.clone(),
        }
    }

    /// ページ文脈が変わった時に呼ぶ。進行中の実行は以後何も通知・更新しない
    pub fn reset_for_surface(&self, surface_id: Option<String>) {
        let mut state = self.inner.lock();
        let was_active = state.is_active();
        state.reset(surface_id);
        tracing::info!(run_id = state.run_id, was_active, "run state reset");
    }

    /// リスナー未接続時のイベントを受け取る
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.broadcast.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().is_active()
    }

    pub fn phase(&self) -> RunPhase {
        self.inner.lock().phase
    }

    pub fn run_id(&self) -> u64 {
        self.inner.lock().run_id
    }

    pub fn last_summary(&self) -> Option<RunSummary> {
        self.inner.lock().last_summary.clone()
    }

    /// 実行が idle に戻るまで待つ
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.phase_tx.subscribe();
        // 送信側は Inner が保持しているので閉じない
        let _ = rx.wait_for(|(_, phase)| *phase == RunPhase::Idle).await;
    }
}

impl Inner {
    fn lock(&self) -> StateGuard<'_> {
        StateGuard {
            state: self.state.lock().unwrap_or_else(PoisonError::into_inner),
            outbox: Outbox {
                inner: self,
                events: Vec::new(),
                // 解放時に実際の値で上書きされる
                phase: (0, RunPhase::Idle),
            },
        }
    }

    fn label(&self, name: &str) -> String {
        truncate_label(name, self.config.label_max_chars)
    }

    /// 状態を記録して配信待ちに積む（ロック解放時に配信）
    fn emit(&self, state: &mut RunState, text: impl Into<String>, level: StatusState, progress: Option<Progress>) {
        let progress = state.snapshot_progress(progress);
        self.deliver(state, StatusEvent::new(text, level, progress));
    }

    /// 収集トレースを debug イベントとして流す
    fn emit_trace(&self, state: &mut RunState, lines: &[String]) {
        if !state.debug {
            return;
        }
        let progress = state.snapshot_progress(None);
        for line in lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
            self.deliver(state, StatusEvent::new(line, StatusState::Debug, progress));
        }
    }

    fn deliver(&self, state: &mut RunState, event: StatusEvent) {
        match event.state {
            StatusState::Error => tracing::warn!(target: "media_harvest::status", "{}", event.text),
            StatusState::Debug => tracing::debug!(target: "media_harvest::status", "{}", event.text),
            _ => tracing::info!(target: "media_harvest::status", "{}", event.text),
        }

        state.history.push(event.clone());
        let observer = state.observer.clone();
        state.pending.push((observer, event));
    }
}

/// 実行状態のロック
///
/// 解放時はロックを手放してからイベント配信とフェーズ通知を行うため、
/// リスナーの中から `request_state` などを呼んでもよい。
struct StateGuard<'a> {
    // フィールドは宣言順に破棄される（ロック解放 → 配信）
    state: MutexGuard<'a, RunState>,
    outbox: Outbox<'a>,
}

impl Deref for StateGuard<'_> {
    type Target = RunState;

    fn deref(&self) -> &RunState {
        &self.state
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut RunState {
        &mut self.state
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.outbox.events = std::mem::take(&mut self.state.pending);
        self.outbox.phase = (self.state.phase_seq, self.state.phase);
    }
}

struct Outbox<'a> {
    inner: &'a Inner,
    events: Vec<PendingEvent>,
    phase: (u64, RunPhase),
}

impl Drop for Outbox<'_> {
    fn drop(&mut self) {
        for (observer, event) in self.events.drain(..) {
            match observer {
                Some(observer) => observer.on_status(&event),
                None => {
                    // 受信者がいなければ履歴にだけ残る
                    let _ = self.inner.broadcast.send(event);
                }
            }
        }

        // 後から解放された古いフェーズで上書きしない
        let (seq, phase) = self.phase;
        self.inner.phase_tx.send_if_modified(|current| {
            if seq > current.0 {
                *current = (seq, phase);
                true
            } else {
                false
            }
        });
    }
}

/// 収集対象として扱えるページか
pub fn is_valid_target(location: &str) -> bool {
    let location = location.trim();
    !location.is_empty() && !RESTRICTED_PREFIXES.iter().any(|p| location.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_target() {
        assert!(is_valid_target("https://grok.com/imagine/favorites"));
        assert!(is_valid_target("file:///tmp/page.html"));
        assert!(!is_valid_target(""));
        assert!(!is_valid_target("chrome://extensions"));
        assert!(!is_valid_target("about:blank"));
    }

    #[test]
    fn test_lenient_options() {
        let options = StartOptions::lenient(true, -5, "gifs");
        assert_eq!(options.limit, 0);
        assert_eq!(options.media, MediaFilter::All);

        let options = StartOptions::lenient(false, 12, "video");
        assert_eq!(options.limit, 12);
        assert_eq!(options.media, MediaFilter::Video);
    }

    #[test]
    fn test_start_response_wire_format() {
        let json = serde_json::to_value(StartResponse::Started { total: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "started", "total": 4}));
        let json = serde_json::to_value(StartResponse::NeedTarget).unwrap();
        assert_eq!(json, serde_json::json!({"status": "needTarget"}));
    }

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.download_delay, Duration::from_millis(350));
        assert_eq!(config.download_timeout, Duration::from_secs(30));
        assert_eq!(config.label_max_chars, 64);
    }
}
