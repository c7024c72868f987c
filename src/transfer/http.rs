//! HTTP経由でファイルを保存する転送実装

use super::{TransferBackend, TransferOutcome};
use crate::error::{HarvestError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub struct HttpTransfer {
    client: reqwest::Client,
    destination_root: PathBuf,
}

impl HttpTransfer {
    pub fn new(destination_root: impl Into<PathBuf>, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            client,
            destination_root: destination_root.into(),
        })
    }

    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    /// 保存先ルート配下の絶対パスへ解決（`..` や絶対パスは拒否）
    pub fn resolve(&self, destination: &str) -> Result<PathBuf> {
        let relative = Path::new(destination);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if destination.trim().is_empty() || escapes {
            return Err(HarvestError::Transfer(format!(
                "保存先が不正です: {}",
                destination
            )));
        }
        Ok(self.destination_root.join(relative))
    }
}

#[async_trait]
impl TransferBackend for HttpTransfer {
    async fn initiate(&self, url: &str, destination: &str) -> Result<TransferOutcome> {
        let path = self.resolve(destination)?;

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return Ok(TransferOutcome::failed(e.to_string())),
        };
        let status = response.status();
        if !status.is_success() {
            return Ok(TransferOutcome::failed(format!("HTTP {}", status)));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part = PartFile::new(&path);
        let mut file = tokio::fs::File::create(&part.path).await?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return Ok(TransferOutcome::failed(e.to_string())),
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);
        part.commit(&path).await?;

        tracing::debug!(url, path = %path.display(), bytes = written, "transfer finished");
        Ok(TransferOutcome::ok(format!(
            "Saved {} bytes to {}",
            written,
            path.display()
        )))
    }
}

/// 書き込み途中の `.part` ファイル
///
/// 確定前に破棄（失敗・タイムアウトによる中断）されたら削除する。
struct PartFile {
    path: PathBuf,
    committed: bool,
}

impl PartFile {
    fn new(target: &Path) -> Self {
        let mut path = target.as_os_str().to_owned();
        path.push(".part");
        Self {
            path: PathBuf::from(path),
            committed: false,
        }
    }

    async fn commit(mut self, target: &Path) -> Result<()> {
        tokio::fs::rename(&self.path, target).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
