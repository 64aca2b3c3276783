//! Artifact — the immutable output of a successful build.

use serde::{Deserialize, Serialize};

/// An artifact record. Existence under a canonical key implies a
/// successful build for that commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(default)]
    pub id: String,
    /// Reference to the produced image in the artifact store.
    #[serde(default)]
    pub image: String,
}

/// The `"<repository>@<sha>"` key addressing artifacts and builds.
pub fn canonical_key(repository: &str, sha: &str) -> String {
    format!("{repository}@{sha}")
}
