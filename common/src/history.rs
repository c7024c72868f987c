//! ステータス履歴（固定容量リングバッファ）
//!
//! 後から接続したリスナーへ直近のイベントを渡すために保持する。
//! 容量を超えた場合は最も古いイベントから捨てる。

use crate::types::StatusEvent;
use std::collections::VecDeque;

/// 既定の履歴容量
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

#[derive(Debug, Clone)]
pub struct EventHistory {
    entries: VecDeque<StatusEvent>,
    capacity: usize,
}

impl EventHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: StatusEvent) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatusEvent> {
        self.entries.iter()
    }

    /// 古い順のコピー
    pub fn snapshot(&self) -> Vec<StatusEvent> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}
