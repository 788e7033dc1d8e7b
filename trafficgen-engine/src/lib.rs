//! Library crate exposing the engine's modules
//!
//! The `trafficgen` binary is a thin wrapper around these; integration tests
//! drive them directly.

pub mod config;
pub mod environment;
pub mod interrupt;
pub mod markers;
pub mod placeholder;
pub mod process;
pub mod profile_loader;
pub mod recorder;
pub mod scenario;
