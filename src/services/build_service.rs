//! Build coordinator — idempotent find-or-create with live log streaming.
//!
//! Turns a `(repository, sha)` request into either an existing artifact,
//! an in-flight build to attach to, or a newly created build, then streams
//! logs and polls until the build reaches a terminal state. The artifact
//! short-circuit is what makes concurrent callers for the same commit, and
//! duplicate queue deliveries, converge on a single build.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::client::BuildApi;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::artifact::{canonical_key, Artifact};
use crate::models::options::BuildCreateOpts;

/// Cadence of the terminal-state poll. Builds run for minutes; tighter
/// polling wastes request budget, looser polling harms latency-to-artifact.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// High-level build coordination over a [`BuildApi`].
pub struct BuildService<A> {
    api: A,
}

impl<A: BuildApi> BuildService<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    /// Ensure an artifact exists for `opts` and return a reference to it,
    /// streaming any build log output to `w` along the way.
    pub async fn build<W>(&self, w: &mut W, opts: BuildCreateOpts) -> Result<Artifact>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let sha = match opts.sha.as_deref() {
            Some(sha) if !sha.is_empty() => sha.to_string(),
            _ => return Err(Error::MissingSha),
        };

        let key = canonical_key(&opts.repository, &sha);
        let started = std::time::Instant::now();

        // A completed artifact short-circuits everything else.
        match self.api.artifact_info(&key).await {
            Ok(artifact) => {
                metrics::artifact_cache_hit();
                tracing::debug!(key = %key, "Artifact already built");
                return Ok(artifact);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        // Attach to an in-flight build, or create one.
        let build_id = match self.api.build_info(&key).await {
            Ok(build) => {
                metrics::build_requested("attached");
                tracing::info!(build_id = %build.id, key = %key, "Attaching to running build");
                build.id
            }
            Err(e) if e.is_not_found() => {
                let build = self.api.build_create(&opts).await?;
                metrics::build_requested("created");
                tracing::info!(build_id = %build.id, key = %key, "Build created");
                w.write_all(format!("Build: {}\n", build.id).as_bytes())
                    .await?;
                build.id
            }
            Err(e) => return Err(e),
        };

        // Log streaming is best-effort; the poll below decides the outcome.
        if let Err(e) = self.api.logs_stream(w, &build_id).await {
            tracing::error!(build_id = %build_id, "error streaming logs: {e}");
        }

        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            let build = self.api.build_info(&build_id).await?;

            if build.is_failed() {
                metrics::build_requested("failed");
                return Err(Error::BuildFailed(build_id));
            }

            if build.is_terminal() {
                break;
            }
        }

        metrics::build_duration(started.elapsed().as_millis() as u64);
        self.api.artifact_info(&key).await
    }
}
