//! Side-effecting operations: configuration, process execution, staging.

pub mod config;
pub mod invoker;
pub mod process;
pub mod staging;
