#[derive(Debug, thiserror::Error)]
pub enum UrlError {
    #[error("Invalid URL: {0}")]
    Parse(#[from] url::ParseError),

    #[error("Unsupported scheme `{0}`, expected http, https, ws or wss")]
    UnsupportedScheme(String),

    #[error("`{0}` can't be used as a base URL")]
    NotABase(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Neither SPECTATOR_WS_URL nor SPECTATOR_BASE_URL is set")]
    MissingBaseUrl,

    #[error("Bad base URL")]
    Url(#[from] UrlError),

    #[error("{var} must be a number, got `{value}`")]
    InvalidNumber { var: &'static str, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Socket is not open")]
    NotOpen,

    #[error("Socket task has gone away")]
    Closed,

    #[error("No async runtime to drive the socket")]
    NoRuntime,

    #[error("{0}")]
    Connect(String),

    #[error("Connection timed out after {0:?}")]
    Timeout(std::time::Duration),
}
