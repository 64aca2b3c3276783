//! Drydock data models — plain values exchanged with the control plane
//! and carried through the build queues.

pub mod artifact;
pub mod build;
pub mod options;
