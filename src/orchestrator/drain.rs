//! 転送キューの消化とリトライ

use super::state::{RunPhase, TransferResult};
use super::Inner;
use crate::error::Result;
use crate::transfer::{initiate_with_timeout, TransferOutcome};
use media_harvest_common::{Progress, QueueItem, StatusState};
use std::sync::Arc;

impl Inner {
    /// 主キュー → リトライ → 集計 の順に進める
    pub(super) async fn drain(self: Arc<Self>, run_id: u64) {
        if !self.drain_primary(run_id).await {
            return;
        }
        if !self.drain_retries(run_id).await {
            return;
        }
        self.finish(run_id);
    }

    async fn dispatch(&self, item: &QueueItem) -> Result<TransferOutcome> {
        initiate_with_timeout(
            self.transfer.as_ref(),
            &item.url,
            &item.filename,
            self.config.download_timeout,
        )
        .await
    }

    fn is_current(&self, run_id: u64) -> bool {
        self.lock().is_current(run_id)
    }

    /// 1件ずつ転送する。実行が無効になったら false
    async fn drain_primary(&self, run_id: u64) -> bool {
        loop {
            let item = {
                let mut state = self.lock();
                if !state.is_current(run_id) {
                    return false;
                }
                if state.index >= state.queue.len() {
                    return true;
                }

                let item = state.queue[state.index].clone();
                if state.debug || state.index % self.config.progress_every.max(1) == 0 {
                    let text = format!("Downloading {} of {}…", state.index + 1, state.queue.len());
                    let progress = state.current_progress();
                    self.emit(&mut state, text, StatusState::Running, Some(progress));
                }
                item
            };

            let dispatched = self.dispatch(&item).await;

            {
                let mut state = self.lock();
                if !state.is_current(run_id) {
                    tracing::debug!(run_id, file = %item.filename, "transfer finished after reset; discarded");
                    return false;
                }

                let label = self.label(item.display_name());
                let (success, message) = match &dispatched {
                    Ok(outcome) => (outcome.success, outcome.message.clone()),
                    Err(e) => (false, e.to_string()),
                };
                state.complete_primary(TransferResult {
                    filename: item.filename.clone(),
                    url: item.url.clone(),
                    success,
                    message: message.clone(),
                    permanent: false,
                });
                let progress = Some(state.current_progress());

                if success {
                    if state.debug {
                        self.emit(
                            &mut state,
                            format!("✔ Download queued for {}", label),
                            StatusState::Running,
                            progress,
                        );
                    }
                } else {
                    state.retry_queue.push(item.clone());
                    let text = match (&dispatched, state.debug) {
                        (Err(_), _) => format!("✖ Error: {} - {} (will retry)", label, message),
                        (Ok(_), true) => {
                            let reason = if message.is_empty() { "unknown error" } else { message.as_str() };
                            format!("✖ Failed: {} - {} (will retry)", label, reason)
                        }
                        (Ok(_), false) => format!("✖ Failed: {} (will retry)", label),
                    };
                    self.emit(&mut state, text, StatusState::Running, progress);
                    tracing::warn!(run_id, file = %item.filename, %message, "transfer failed");
                }
            }

            tokio::time::sleep(self.config.download_delay).await;
        }
    }

    /// 失敗分を上限まで再試行する
    ///
    /// リトライがさらにリトライを生むため、再帰ではなくループで回す。
    async fn drain_retries(&self, run_id: u64) -> bool {
        let max_retries = self.config.max_retries;
        {
            let mut state = self.lock();
            if !state.is_current(run_id) {
                return false;
            }
            if state.retry_queue.is_empty() {
                return true;
            }
            state.set_phase(RunPhase::DrainingRetries);
            let text = format!("Retrying {} failed downloads...", state.retry_queue.len());
            self.emit(&mut state, text, StatusState::Running, None);
        }

        loop {
            let batch = {
                let mut state = self.lock();
                if !state.is_current(run_id) {
                    return false;
                }
                if state.retry_queue.is_empty() {
                    return true;
                }
                std::mem::take(&mut state.retry_queue)
            };

            for item in batch {
                let label = self.label(item.display_name());
                let attempt = {
                    let mut state = self.lock();
                    if !state.is_current(run_id) {
                        return false;
                    }

                    let attempts = state.retry_attempts.get(item.key()).copied().unwrap_or(0);
                    if attempts >= max_retries {
                        state.mark_permanent(item.key(), None);
                        self.emit(
                            &mut state,
                            format!("✖ Permanently failed: {} (max retries exceeded)", label),
                            StatusState::Running,
                            None,
                        );
                        continue;
                    }

                    let attempt = attempts + 1;
                    state.retry_attempts.insert(item.key().to_string(), attempt);
                    self.emit(
                        &mut state,
                        format!("Retry attempt {}/{} for {}", attempt, max_retries, label),
                        StatusState::Running,
                        None,
                    );
                    attempt
                };

                tokio::time::sleep(self.config.retry_delay).await;
                if !self.is_current(run_id) {
                    return false;
                }

                let dispatched = self.dispatch(&item).await;

                let mut state = self.lock();
                if !state.is_current(run_id) {
                    return false;
                }
                match dispatched {
                    Ok(outcome) if outcome.success => {
                        state.upgrade_result(item.key(), &outcome.message);
                        self.emit(
                            &mut state,
                            format!("✔ Retry successful for {}", label),
                            StatusState::Running,
                            None,
                        );
                    }
                    other => {
                        let message = match other {
                            Ok(outcome) => outcome.message,
                            Err(e) => e.to_string(),
                        };
                        tracing::warn!(run_id, file = %item.filename, attempt, %message, "retry failed");
                        if attempt < max_retries {
                            state.retry_queue.push(item);
                        } else {
                            state.mark_permanent(item.key(), Some(&message));
                            self.emit(
                                &mut state,
                                format!("✖ Permanently failed: {} (max retries exceeded)", label),
                                StatusState::Running,
                                None,
                            );
                        }
                    }
                }
            }
        }
    }

    /// 集計して終了イベントを出し、idle に戻す
    fn finish(&self, run_id: u64) {
        let mut state = self.lock();
        if !state.is_current(run_id) {
            return;
        }

        let successes = state.results.iter().filter(|r| r.success).count();
        let failures = state.results.len() - successes;
        let total = state.total;
        let text = if failures > 0 {
            format!("✓ Downloads complete. Success: {}, Failed: {}.", successes, failures)
        } else {
            format!("✓ All downloads complete! Success: {}.", successes)
        };
        self.emit(&mut state, text, StatusState::Idle, Some(Progress::new(total, total)));

        let summary = state.finalize();
        tracing::info!(
            run_id,
            total = summary.total,
            successes = summary.successes,
            failures = summary.failures,
            "run finished"
        );
    }
}
