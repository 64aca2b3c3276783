//! Drydock — build orchestration client and work queue.
//!
//! Given a `(repository, sha)` pair, drydock ensures exactly one build is
//! produced for that input, streams the build's live log output to a
//! caller-supplied writer, and ultimately returns a reference to the
//! resulting artifact.
//!
//! The crate has two halves:
//!
//! * the client side — [`BuildService`] turns a build request into either
//!   an existing artifact, an in-flight build to attach to, or a newly
//!   created build, over the typed [`BuildApi`] control-plane operations;
//! * the queue side — [`BuildQueue`] feeds builders, with a bounded
//!   in-process backend and an at-least-once SQS-compatible backend.
//!
//! Duplicate queue deliveries are expected and safe: the coordinator's
//! artifact lookup short-circuits requests whose commit already built.

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod services;
pub mod telemetry;

pub use client::{BuildApi, HttpBuildApi};
pub use config::Config;
pub use error::{Error, Result};
pub use models::artifact::{canonical_key, Artifact};
pub use models::build::Build;
pub use models::options::{BuildContext, BuildCreateOpts, BuildOptions};
pub use queue::{BuildQueue, ErrorHandler, MemoryBuildQueue, QueueConfig, SqsBuildQueue};
pub use services::build_service::BuildService;
