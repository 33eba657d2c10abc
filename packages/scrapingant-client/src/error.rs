use thiserror::Error;

pub type Result<T> = std::result::Result<T, FetchError>;

/// Classified failure for a single logical fetch.
///
/// Every non-success outcome of the cascade maps to one of these variants so
/// callers can decide whether to retry the whole crawl step or drop the URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Target detected and locked out the request (423).
    #[error("target blocked the request")]
    Blocked,

    /// Upstream concurrency limit reached (409), persisted after one retry.
    #[error("upstream concurrency limit reached")]
    Throttled,

    /// Target site unreachable through the upstream (404).
    #[error("target unreachable through upstream")]
    Unreachable,

    /// Upstream rejected the request parameters (422).
    #[error("upstream rejected request parameters: {0}")]
    Malformed(String),

    /// Any other non-success status from the upstream.
    #[error("upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Transport-level failure (connect, timeout, body read).
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// Every configuration in the cascade was tried and none succeeded.
    #[error("all {attempts} fetch configurations exhausted for {url}")]
    Exhausted { url: String, attempts: usize },
}
