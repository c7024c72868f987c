//! 1回の実行に属する可変状態

use super::events::StatusObserver;
use media_harvest_common::{EventHistory, Progress, QueueItem, StatusEvent};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// 実行フェーズ（idle → active → draining-primary → draining-retries → idle）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunPhase {
    Idle,
    /// 収集・キュー構築中
    Active,
    DrainingPrimary,
    DrainingRetries,
}

/// 1ファイル分の転送結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub filename: String,
    pub url: String,
    pub success: bool,
    pub message: String,
    /// リトライ上限に達して諦めた
    pub permanent: bool,
}

/// 終了した実行の集計
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: u64,
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub session_folder: String,
    pub permanent_failures: Vec<String>,
}

/// ロック解放後に配信するイベント（配信先はイベント発生時のリスナー）
pub(crate) type PendingEvent = (Option<Arc<dyn StatusObserver>>, StatusEvent);

pub(crate) struct RunState {
    pub run_id: u64,
    pub phase: RunPhase,
    /// フェーズ変更ごとに増える通し番号
    pub phase_seq: u64,
    pub surface_id: Option<String>,
    pub debug: bool,
    pub queue: Vec<QueueItem>,
    pub index: usize,
    pub results: Vec<TransferResult>,
    pub retry_queue: Vec<QueueItem>,
    pub retry_attempts: HashMap<String, u32>,
    pub session_folder: String,
    pub total: usize,
    pub completed: usize,
    pub progress: Progress,
    pub history: EventHistory,
    pub observer: Option<Arc<dyn StatusObserver>>,
    pub pending: Vec<PendingEvent>,
    pub last_summary: Option<RunSummary>,
}

impl RunState {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            run_id: 0,
            phase: RunPhase::Idle,
            phase_seq: 0,
            surface_id: None,
            debug: false,
            queue: Vec::new(),
            index: 0,
            results: Vec::new(),
            retry_queue: Vec::new(),
            retry_attempts: HashMap::new(),
            session_folder: String::new(),
            total: 0,
            completed: 0,
            progress: Progress::default(),
            history: EventHistory::with_capacity(history_capacity),
            observer: None,
            pending: Vec::new(),
            last_summary: None,
        }
    }

    pub fn set_phase(&mut self, phase: RunPhase) {
        self.phase = phase;
        self.phase_seq += 1;
    }

    pub fn is_active(&self) -> bool {
        self.phase != RunPhase::Idle
    }

    /// 世代が一致し、まだ終了していない
    pub fn is_current(&self, run_id: u64) -> bool {
        self.run_id == run_id && self.is_active()
    }

    /// 新しい実行を開始して世代を返す
    pub fn begin(&mut self, debug: bool) -> u64 {
        self.run_id += 1;
        self.debug = debug;
        self.set_phase(RunPhase::Active);
        self.run_id
    }

    /// 収集前に中断した実行を idle に戻す（世代はそのまま）
    pub fn abort(&mut self) {
        self.debug = false;
        self.set_phase(RunPhase::Idle);
    }

    /// イベントに付ける進捗を決める
    ///
    /// 明示指定は正規化して保存、未指定なら保存済みの値を非ゼロの時だけ付ける。
    pub fn snapshot_progress(&mut self, progress: Option<Progress>) -> Option<Progress> {
        match progress {
            Some(p) => {
                let total = p.total;
                let normalized = Progress::new(total, p.completed.min(total));
                self.progress = normalized;
                Some(normalized)
            }
            None if !self.progress.is_zero() => Some(self.progress),
            None => None,
        }
    }

    pub fn current_progress(&self) -> Progress {
        Progress::new(self.total, self.completed)
    }

    /// 主キュー1件分の完了を記録する
    pub fn complete_primary(&mut self, result: TransferResult) {
        self.results.push(result);
        self.index += 1;
        self.completed = (self.completed + 1).min(self.total);
    }

    /// 同じキーの最初の失敗エントリを成功に置き換える（重複させない）
    pub fn upgrade_result(&mut self, key: &str, message: &str) -> bool {
        match self
            .results
            .iter_mut()
            .find(|r| r.filename == key && !r.success)
        {
            Some(entry) => {
                entry.success = true;
                entry.permanent = false;
                entry.message = message.to_string();
                true
            }
            None => false,
        }
    }

    pub fn mark_permanent(&mut self, key: &str, message: Option<&str>) {
        if let Some(entry) = self.results.iter_mut().find(|r| r.filename == key && !r.success) {
            entry.permanent = true;
            if let Some(message) = message {
                entry.message = message.to_string();
            }
        }
    }

    /// 成功数・失敗数を集計して per-run 状態を idle に戻す
    pub fn finalize(&mut self) -> RunSummary {
        let successes = self.results.iter().filter(|r| r.success).count();
        let summary = RunSummary {
            run_id: self.run_id,
            total: self.total,
            successes,
            failures: self.results.len() - successes,
            session_folder: self.session_folder.clone(),
            permanent_failures: self
                .results
                .iter()
                .filter(|r| r.permanent)
                .map(|r| r.filename.clone())
                .collect(),
        };

        self.queue.clear();
        self.index = 0;
        self.results.clear();
        self.retry_queue.clear();
        self.retry_attempts.clear();
        self.session_folder.clear();
        self.debug = false;
        self.last_summary = Some(summary.clone());
        self.set_phase(RunPhase::Idle);
        summary
    }

    /// 世代を進めてすべての実行状態を破棄する
    ///
    /// 新しい surface が指定されない場合はリスナーの紐付けを残す。
    pub fn reset(&mut self, surface_id: Option<String>) {
        self.run_id += 1;
        self.queue.clear();
        self.index = 0;
        self.results.clear();
        self.retry_queue.clear();
        self.retry_attempts.clear();
        self.session_folder.clear();
        self.total = 0;
        self.completed = 0;
        self.progress = Progress::default();
        self.history.clear();
        self.debug = false;
        if surface_id.is_some() {
            self.surface_id = surface_id;
            self.observer = None;
        }
        self.set_phase(RunPhase::Idle);
    }
}
