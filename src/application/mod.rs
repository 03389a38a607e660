//! Startup wiring shared by the binary and its integration tests.

pub mod error;
pub mod runtime;
