//! Error types for a digest run

use thiserror::Error;

/// Errors raised by the digest engine and its adapters.
///
/// Only `RetrievalFailure`, `Registry` and `Notify` abort a run. The other
/// variants are logged where they occur and the run degrades.
#[derive(Error, Debug)]
pub enum DigestError {
    /// A message could not be attributed to any registered client
    #[error("Unresolved client for message {message_id}: {subject}")]
    UnresolvedClient { message_id: String, subject: String },

    /// A group report block had no parsable totals
    #[error("Malformed report block for {client}: {reason}")]
    MalformedReportBlock { client: String, reason: String },

    /// An optional artifact (chart, archive row) could not be produced
    #[error("Missing secondary artifact {artifact}: {reason}")]
    MissingSecondaryArtifact { artifact: String, reason: String },

    /// The message source is unavailable
    #[error("Message retrieval failed: {0}")]
    RetrievalFailure(String),

    /// The client registry could not be loaded
    #[error("Registry error: {0}")]
    Registry(String),

    /// Audit sink write failure
    #[error("Report sink error: {0}")]
    Sink(String),

    /// Final notification could not be delivered
    #[error("Notification error: {0}")]
    Notify(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DigestError>;
