//! 仮想スクロールギャラリーからメディアを収集し、逐次ダウンロードするライブラリ

pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod queue;
pub mod surface;
pub mod transfer;

pub use collector::{CollectOutcome, CollectRequest, Collector, CollectorConfig};
pub use error::{HarvestError, Result};
pub use orchestrator::{Orchestrator, OrchestratorConfig, StartOptions, StartResponse};
pub use surface::{GallerySurface, HtmlGallery, HtmlGalleryOptions};
pub use transfer::{HttpTransfer, TransferBackend, TransferOutcome};
