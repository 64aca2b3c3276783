//! Build — the server-side record of an attempt to produce an artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Build states reported by the control plane.
pub mod state {
    pub const PENDING: &str = "pending";
    pub const BUILDING: &str = "building";
    pub const SUCCEEDED: &str = "succeeded";
    pub const FAILED: &str = "failed";
}

/// A build record. Only `state == "failed"` and the presence of
/// `completed_at` drive client control flow; once `completed_at` is set
/// the state is terminal and will not change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Build {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Build {
    pub fn is_failed(&self) -> bool {
        self.state == state::FAILED
    }

    /// Terminal iff the control plane stamped a completion time.
    pub fn is_terminal(&self) -> bool {
        self.completed_at.is_some()
    }
}
