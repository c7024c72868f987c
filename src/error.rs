use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("ページ読み込みエラー: {0}")]
    PageLoad(String),

    #[error("ページ操作エラー: {0}")]
    Surface(String),

    #[error("不正なURL: {0}")]
    InvalidUrl(String),

    #[error("転送エラー: {0}")]
    Transfer(String),

    #[error("HTTPエラー: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("共通ライブラリエラー: {0}")]
    Common(#[from] media_harvest_common::Error),
}

pub type Result<T> = std::result::Result<T, HarvestError>;
