use thiserror::Error;

/// 單一端點擷取的失敗種類，從 driver 經 strategy 原樣傳回 dispatcher
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("HTTP {status} returned by {url}")]
    Http { status: u16, url: String },

    #[error("cannot connect: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unknown auth type '{0}'")]
    UnknownAuthType(String),

    #[error("unrecognized endpoint shape '{0}'")]
    UnrecognizedEndpointShape(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("page sink unavailable: {0}")]
    Storage(String),
}

impl ExtractionError {
    /// 寫入稽核紀錄時使用的穩定標籤
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::Http { .. } => "HTTPError",
            ExtractionError::Connection(_) => "ConnectionError",
            ExtractionError::Timeout(_) => "Timeout",
            ExtractionError::Request(_) => "RequestException",
            ExtractionError::UnknownAuthType(_) => "UnknownAuthType",
            ExtractionError::UnrecognizedEndpointShape(_) => "UnrecognizedEndpointShape",
            ExtractionError::MalformedResponse(_) => "MalformedResponse",
            ExtractionError::Storage(_) => "StorageError",
        }
    }
}

impl ExtractionError {
    /// Classify a transport error, reporting `url` instead of the request
    /// URL (which may carry a password for `pass` auth).
    pub fn from_reqwest(err: reqwest::Error, url: &str) -> Self {
        let err = err.without_url();

        // timeout 必須先判斷，連線逾時同時也是 connect error
        if err.is_timeout() {
            ExtractionError::Timeout(url.to_string())
        } else if err.is_connect() {
            ExtractionError::Connection(url.to_string())
        } else if let Some(status) = err.status() {
            ExtractionError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            }
        } else {
            ExtractionError::Request(format!("{}: {}", url, err))
        }
    }
}

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Secret '{name}' not found")]
    SecretNotFound { name: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Audit log error: {message}")]
    AuditError { message: String },

    #[error("Audit database error: {0}")]
    AuditDatabase(#[from] rusqlite::Error),
}

impl EtlError {
    /// 給使用者的處理建議
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            EtlError::Extraction(ExtractionError::Connection(_) | ExtractionError::Timeout(_)) => {
                "Check network access to the source and retry the batch"
            }
            EtlError::Extraction(_) => "Check the endpoint row and the source API's response",
            EtlError::CsvError(_) => "Check the header and columns of the endpoint configuration table",
            EtlError::ConfigError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::MissingConfigError { .. } => "Fix the settings file or the endpoint row",
            EtlError::SecretNotFound { .. } => "Set the secret's environment variable",
            EtlError::IoError(_) | EtlError::StorageError { .. } => {
                "Check that the storage root exists and is writable"
            }
            EtlError::SerializationError(_) => "Check the page body the source returned",
            EtlError::AuditError { .. } | EtlError::AuditDatabase(_) => {
                "Check that the audit database path is writable and not locked"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
