// =============================================================================
// error.rs — EVERYTHING THAT CAN GO WRONG, NAMED
// =============================================================================
//
// Fetch errors never escape the pipeline for secondary data: they are logged
// and collapse into "unknown" fields. They only reach the user when the
// announcement feed itself cannot be read.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("PDF text extraction failed for {url}: {reason}")]
    Pdf { url: String, reason: String },

    #[error("circuit breaker {0} is open")]
    CircuitOpen(String),
}

impl FetchError {
    /// HTTP statuses the exchange uses to say "go away, robot".
    pub fn is_rejection(&self) -> bool {
        matches!(self, FetchError::Status { status, .. } if matches!(status, 401 | 403 | 429))
    }

    /// Whether this error says something about the upstream as a whole.
    /// A 404 or an undecodable body is about one symbol or one file, and
    /// must not count against the others.
    pub fn is_upstream_failure(&self) -> bool {
        match self {
            FetchError::Http { .. } => true,
            FetchError::Status { status, .. } => *status >= 500 || matches!(status, 401 | 403 | 429),
            FetchError::Decode { .. } | FetchError::Pdf { .. } | FetchError::CircuitOpen(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login required: pass --user and --password")]
    MissingCredentials,

    #[error("invalid credentials for user {0}")]
    InvalidCredentials(String),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
