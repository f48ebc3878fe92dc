use thiserror::Error;

/// Failures while creating or configuring a broker client.
///
/// All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The client library rejected a configuration property.
    #[error("Problem setting config: {0}")]
    Config(String),

    /// The broker address could not be interpreted.
    #[error("Invalid broker address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The topic cannot be published to.
    #[error("Invalid topic '{0}'")]
    InvalidTopic(String),

    /// The client handle could not be created.
    #[error("Failed to create new producer: {0}")]
    Create(String),

    /// The transport was not compiled into this build.
    #[error("Transport '{0}' is not available in this build (enable the '{0}' feature)")]
    Unsupported(&'static str),
}

/// Outcome of a rejected enqueue request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    /// The client's outbound queue is saturated. Retry after serving reports.
    #[error("Local: Queue full")]
    QueueFull,

    /// Any other enqueue failure. Not retried.
    #[error("{0}")]
    Rejected(String),
}

impl EnqueueError {
    pub fn is_queue_full(&self) -> bool {
        matches!(self, EnqueueError::QueueFull)
    }
}
