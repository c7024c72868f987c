//! ログ初期化
//!
//! stderr へ出力する tracing サブスクライバを1度だけ設定する。
//! `RUST_LOG` があればそれを優先する。

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// 既定のフィルタ（`--verbose` で debug）
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "media_harvest=debug,info"
    } else {
        "info"
    }
}

/// 2回目以降の呼び出しは何もしない
pub fn init(verbose: bool) -> Result<(), tracing_subscriber::util::TryInitError> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()?;

    let _ = INITIALIZED.set(());
    Ok(())
}
