use std::io;

/// Substrings that mark an error as an upstream rate-limit response.
///
/// Matched case-insensitively against every message in the error chain.
const RATE_LIMIT_MARKERS: [&str; 4] = ["rate limit", "too many requests", "quota exceeded", "429"];

/// How the limiter reacts to a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Upstream asked us to slow down: capped exponential backoff,
    /// wrapped in `RateLimitExceeded` on exhaustion.
    RateLimited,

    /// Network, timeout or socket failure: uncapped exponential backoff,
    /// original error returned on exhaustion.
    Transient,

    /// Anything else: returned immediately.
    Fatal,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        }
    }
}

/// Classifies an operation failure.
///
/// Rate-limit text wins over the error type: a 429 carried by a
/// `reqwest::Error` is still rate limited.
pub fn classify(err: &anyhow::Error) -> FailureClass {
    if is_rate_limited(err) {
        FailureClass::RateLimited
    } else if is_transient(err) {
        FailureClass::Transient
    } else {
        FailureClass::Fatal
    }
}

fn is_rate_limited(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        let text = cause.to_string().to_lowercase();
        RATE_LIMIT_MARKERS.iter().any(|marker| text.contains(marker))
    })
}

fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            return e.is_timeout() || e.is_connect() || e.is_request();
        }
        if let Some(e) = cause.downcast_ref::<io::Error>() {
            return is_transient_io(e.kind());
        }
        cause.is::<tokio::time::error::Elapsed>()
    })
}

fn is_transient_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::Interrupted
    )
}
