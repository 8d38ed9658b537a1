use std::path::PathBuf;

use reqwest::StatusCode;

/// Failure taxonomy for one pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("upstream unavailable for {url}: {reason}")]
    UpstreamUnavailable {
        url: String,
        status: Option<StatusCode>,
        reason: String,
    },

    #[error("credentials rejected: {reason}")]
    AuthExpired { reason: String },

    #[error("gave up on {url} after {attempts} attempts: {last_error}")]
    FetchExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("decryption error: {reason}")]
    Decryption { reason: String },

    #[error("no segments discovered for station {station_id}")]
    NothingToDownload { station_id: String },

    #[error("segment count mismatch: discovered {expected}, fetched {fetched} (missing indices {missing:?})")]
    SegmentCountMismatch {
        expected: usize,
        fetched: usize,
        missing: Vec<usize>,
    },

    #[error("encoder failed (exit code {}): {stderr}", exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    EncoderFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("upload failed: {reason}")]
    UploadFailure { reason: String },

    #[error("workspace error at {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn upstream(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            url: url.into(),
            status: None,
            reason: reason.into(),
        }
    }

    pub fn http_status(url: impl Into<String>, status: StatusCode) -> Self {
        Self::UpstreamUnavailable {
            url: url.into(),
            status: Some(status),
            reason: format!("HTTP {status}"),
        }
    }

    pub fn decryption(reason: impl Into<String>) -> Self {
        Self::Decryption {
            reason: reason.into(),
        }
    }

    pub fn encoder(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::EncoderFailure {
            exit_code,
            stderr: stderr.into(),
        }
    }

    pub fn upload(reason: impl Into<String>) -> Self {
        Self::UploadFailure {
            reason: reason.into(),
        }
    }

    pub fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }

    /// Stable identifier of the variant, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "InvalidRequest",
            Self::UpstreamUnavailable { .. } => "UpstreamUnavailable",
            Self::AuthExpired { .. } => "AuthExpired",
            Self::FetchExhausted { .. } => "FetchExhausted",
            Self::Decryption { .. } => "DecryptionError",
            Self::NothingToDownload { .. } => "NothingToDownload",
            Self::SegmentCountMismatch { .. } => "SegmentCountMismatch",
            Self::EncoderFailure { .. } => "EncoderFailure",
            Self::UploadFailure { .. } => "UploadFailure",
            Self::Workspace { .. } => "WorkspaceError",
            Self::Io { .. } => "IoError",
        }
    }

    /// Whether another attempt at the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            // Any status, including 4xx, and any transport failure.
            Self::UpstreamUnavailable { .. } | Self::Io { .. } => true,
            Self::InvalidRequest { .. }
            | Self::AuthExpired { .. }
            | Self::FetchExhausted { .. }
            | Self::Decryption { .. }
            | Self::NothingToDownload { .. }
            | Self::SegmentCountMismatch { .. }
            | Self::EncoderFailure { .. }
            | Self::UploadFailure { .. }
            | Self::Workspace { .. } => false,
        }
    }
}
