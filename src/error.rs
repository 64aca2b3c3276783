//! Error types for the drydock client and queues.
//!
//! `NotFound` is a distinguishable kind because the build coordinator
//! branches on it; everything else is surfaced to the caller verbatim.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The caller asked for a build without supplying a commit sha.
    #[error("cannot build without sha")]
    MissingSha,

    /// The control plane reported that the resource does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The build reached the `failed` terminal state.
    #[error("build {0} failed")]
    BuildFailed(String),

    /// A panic recovered inside a queue consumer iteration.
    #[error("panic: {0}")]
    Panic(String),

    /// The remote service answered with a non-success status.
    #[error("unexpected status {status}: {message}")]
    Api { status: u16, message: String },

    /// A queue backend refused or dropped a message.
    #[error("queue unavailable: {0}")]
    Queue(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means "the resource does not exist" as opposed
    /// to a transport failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
