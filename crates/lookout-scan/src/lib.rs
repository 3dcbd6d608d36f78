//! lookout-scan: Scan orchestration for the Lookout inventory console.
//!
//! Launches scan jobs against an external scanner process, supervises them
//! on a bounded worker pool, and answers status, result, and history
//! queries from the job record store.

pub mod cancel;
pub mod classify;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod nmap_xml;
pub mod pool;
pub mod process;
pub mod worker;

pub use config::ScanConfig;
pub use engine::ScanEngine;
pub use error::{EngineError, WorkerError};
