//! Pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (registry tables, stdout text, stderr text) and return deterministic
//! outputs suitable for tests.

pub mod classifier;
pub mod extractor;
pub mod registry;
pub mod types;
