// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;

pub use crate::config::IngestConfig;
pub use crate::error::{IngestError, IngestResult};
pub use crate::ingest::{Orchestrator, Scheduler};
