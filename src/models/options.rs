//! Build request payloads — what producers push and consumers dequeue.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The build request payload flowing through a queue. The serialized form
/// is the queue message body: a single JSON object with exactly these
/// fields, in this order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Opaque unique identifier, assigned by the producer.
    #[serde(rename = "ID", default)]
    pub id: String,
    /// Repository in `owner/name` form.
    #[serde(rename = "Repository", default)]
    pub repository: String,
    /// Full commit hash to build.
    #[serde(rename = "Sha", default)]
    pub sha: String,
    /// Human-readable ref the commit came from.
    #[serde(rename = "Branch", default)]
    pub branch: String,
    /// Hint to the builder to skip caches.
    #[serde(rename = "NoCache", default)]
    pub no_cache: bool,
}

impl BuildOptions {
    /// Build options with a fresh producer-assigned id.
    pub fn new(
        repository: impl Into<String>,
        sha: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            repository: repository.into(),
            sha: sha.into(),
            branch: branch.into(),
            no_cache: false,
        }
    }
}

/// A dequeued build request paired with its cancellation context.
///
/// Cancellation handles do not survive serialization, so the in-memory
/// queue forwards the producer's token while the remote consumer attaches
/// a fresh one per delivery. Lives from dequeue to ack.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub options: BuildOptions,
    pub ctx: CancellationToken,
}

/// Input to build creation. `sha` is required; its absence is a
/// client-side error and never reaches the wire.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildCreateOpts {
    #[serde(rename = "Repository")]
    pub repository: String,
    #[serde(rename = "Sha")]
    pub sha: Option<String>,
    #[serde(rename = "Branch")]
    pub branch: String,
    #[serde(rename = "NoCache")]
    pub no_cache: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_body_is_canonical_json() {
        let options = BuildOptions {
            id: "01234567-89ab-cdef-0123-456789abcdef".to_string(),
            repository: "remind101/acme-inc".to_string(),
            sha: "abcd".to_string(),
            branch: "master".to_string(),
            no_cache: false,
        };

        let body = serde_json::to_string(&options).unwrap();
        assert_eq!(
            body,
            r#"{"ID":"01234567-89ab-cdef-0123-456789abcdef","Repository":"remind101/acme-inc","Sha":"abcd","Branch":"master","NoCache":false}"#
        );
    }

    #[test]
    fn missing_fields_decode_as_defaults() {
        let body = r#"{"Repository":"remind101/acme-inc-1","Sha":"abcd","Branch":"master","NoCache":false}"#;
        let options: BuildOptions = serde_json::from_str(body).unwrap();

        assert_eq!(options.id, "");
        assert_eq!(options.repository, "remind101/acme-inc-1");
        assert_eq!(options.sha, "abcd");
        assert_eq!(options.branch, "master");
        assert!(!options.no_cache);
    }

    #[test]
    fn new_assigns_unique_ids() {
        let a = BuildOptions::new("r/a", "abcd", "master");
        let b = BuildOptions::new("r/a", "abcd", "master");
        assert_ne!(a.id, b.id);
        assert_eq!(a.repository, "r/a");
    }
}
