use async_trait::async_trait;

/// Failure reported by a token source. Ends the turn as `Failed`.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed stream line: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("model reported an error: {0}")]
    Remote(String),

    #[error("token stream closed before the response finished")]
    Disconnected,
}

/// Pull-based producer of text fragments.
///
/// `next_fragment` is the only suspension point of a turn. It must be
/// cancel-safe: dropping the future before it resolves loses no fragment.
#[async_trait]
pub trait TokenSource: Send {
    /// `Ok(None)` is end of stream.
    async fn next_fragment(&mut self) -> Result<Option<String>, SourceError>;

    /// Stop production and wait until it has stopped. Idempotent.
    async fn cancel(&mut self);
}
