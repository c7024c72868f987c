//! ファイル転送の抽象化
//!
//! 転送処理そのものは外部の非同期操作として扱い、成功・失敗・タイムアウトの
//! いずれかの結果だけを要求する。

mod http;

pub use http::HttpTransfer;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 1回の転送結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub success: bool,
    pub message: String,
}

impl TransferOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        Self::failed(format!("Download timed out after {}s", timeout.as_secs()))
    }
}

/// 転送プリミティブ
#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// `destination` は保存先ルートからの相対パス（`セッション/ファイル名`）
    async fn initiate(&self, url: &str, destination: &str) -> Result<TransferOutcome>;
}

/// タイムアウト付きで転送する
///
/// 期限切れは失敗扱い。`Err` はそのまま呼び出し側へ返す。
pub async fn initiate_with_timeout(
    backend: &dyn TransferBackend,
    url: &str,
    destination: &str,
    timeout: Duration,
) -> Result<TransferOutcome> {
    match tokio::time::timeout(timeout, backend.initiate(url, destination)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::warn!(url, destination, "transfer timed out");
            Ok(TransferOutcome::timed_out(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Never;

    #[async_trait]
    impl TransferBackend for Never {
        async fn initiate(&self, _url: &str, _destination: &str) -> Result<TransferOutcome> {
            std::future::pending().await
        }
    }

    struct Instant;

    #[async_trait]
    impl TransferBackend for Instant {
        async fn initiate(&self, url: &str, _destination: &str) -> Result<TransferOutcome> {
            Ok(TransferOutcome::ok(format!("saved {}", url)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_transfer_times_out() {
        let outcome = initiate_with_timeout(&Never, "u", "d", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Download timed out after 30s");
    }

    #[tokio::test]
    async fn test_completed_transfer_passes_through() {
        let outcome = initiate_with_timeout(&Instant, "u", "d", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.message, "saved u");
    }
}
