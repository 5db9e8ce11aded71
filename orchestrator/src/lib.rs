//! Two-phase quality-check task orchestrator for course content.
//!
//! An operator first runs a task in analyze mode (a read-only worker
//! invocation proposing candidate actions), reviews the findings, and then
//! hands an approved subset back for an execute-mode invocation that
//! applies exactly those actions. Workers are external scripts; the
//! orchestrator owns spawning, timeouts, result extraction, failure
//! classification, and the staged-artifact lifecycle. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (registry, extraction,
//!   classification). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, process execution,
//!   batch staging). Isolated to enable scripted doubles in tests.
//!
//! [`service`] coordinates core logic with I/O to implement the two
//! caller-facing operations.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod service;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
