//! Error taxonomy shared by the sync layer and the startup sequence.

/// Errors surfaced by clients, streams and the startup orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with status {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("status server on {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("event stream for {origin} ended")]
    StreamEnded { origin: String },

    #[error("event stream for {origin} sent a line longer than {limit} bytes")]
    LineTooLong { origin: String, limit: usize },

    #[error("operation cancelled")]
    Cancelled,

    /// A polling budget ran out.
    #[error("{0}")]
    NotReady(String),

    /// The polled resource reported an error state of its own.
    #[error("{0}")]
    Remote(String),

    /// A remote operation failed; the message is passed through verbatim.
    #[error("{0}")]
    Operation(String),
}

impl Error {
    /// Transport failures are healed by reconnecting and never reach callers
    /// of the subscription layer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http { .. }
                | Error::Status { .. }
                | Error::StreamEnded { .. }
                | Error::LineTooLong { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
