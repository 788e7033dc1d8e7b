//! Shared types for the trafficgen scenario execution engine.
//!
//! This crate contains the data structures that describe a traffic generation
//! scenario and everything the engine persists or puts on the wire about it.
//! It performs document parsing only; process, socket and signal handling live
//! in `trafficgen-engine`.
//!
//! # Key Components
//!
//! * [`scenario::Scenario`] / [`scenario::Run`] - Immutable scenario model
//! * [`scenario_doc`] - Scenario documents (YAML or JSON5) with field-level validation
//! * [`profile::Profile`] - Tool-argument profiles
//! * [`marker::MarkerEvent`] - Ground-truth marker datagram
//! * [`metadata::RunMetadata`] / [`metadata::ScenarioMetadata`] - Persisted run records
//! * [`errors`] - Error taxonomy shared by loader and engine
//!
//! # Run Lifecycle
//!
//! ```text
//! Scenario ──► placeholders ──► profile + environment
//!                                     │
//!            START marker ◄───────────┘
//!                 │
//!            subprocess (Completed | TimedOut | Interrupted | Failed)
//!                 │
//!            END marker ──► run_metadata.json ──► scenario_metadata_<ts>.json
//! ```

pub mod document;
pub mod errors;
pub mod marker;
pub mod metadata;
pub mod profile;
pub mod scenario;
pub mod scenario_doc;
pub mod time;

pub use errors::{LaunchError, PlaceholderError, RecordError, ValidationError};
pub use marker::{MarkerEvent, MarkerEventKind};
pub use metadata::{RunMetadata, RunOutcome, RunState, ScenarioMetadata};
pub use profile::Profile;
pub use scenario::{MarkerSettings, OutputMode, Run, RunKind, Scenario};
