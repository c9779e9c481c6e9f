use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("input monitoring permission was not granted")]
    PermissionDenied,

    #[error("failed to install keyboard event listener: {0}")]
    ListenerCreationFailed(String),

    #[error("stats storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings file: {0}")]
    Config(#[from] serde_json::Error),

    #[error("could not resolve the application data directory")]
    NoDataDir,
}
