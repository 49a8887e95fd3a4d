//! Observability for the room service.
//!
//! Metrics definitions and recording helpers. Tracing is configured in
//! `main.rs`; spans are attached where the work happens.

pub mod metrics;
