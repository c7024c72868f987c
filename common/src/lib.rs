//! Media Harvest Common Library
//!
//! CLIと各フロントエンドで共有される型とユーティリティ

pub mod error;
pub mod history;
pub mod naming;
pub mod types;

pub use error::{Error, Result};
pub use history::{EventHistory, DEFAULT_HISTORY_CAPACITY};
pub use naming::{
    derive_extension, ensure_unique, session_folder_name, truncate_label, UsedNames,
    DEFAULT_SESSION_ROOT,
};
pub use types::{
    load_items, save_items, CollectedItem, GalleryItem, MediaFilter, MediaKind, Progress, QueueItem, StatusEvent,
    StatusState,
};
