//! Drydock services — the client-side build coordination logic.

pub mod build_service;
