//! Subprocess lifecycle: launch target selection, supervision and output capture.
//!
//! Per-run state machine:
//!
//! ```text
//! Pending ──preflight──► Launching ──spawn──► Running ──► Completed
//!    │                       │                   ├──────► TimedOut
//!    └──────► Failed ◄───────┘                   ├──────► Interrupted
//!                                                └──────► Failed
//! ```

pub mod capture;
pub mod launchable;
pub mod supervisor;

pub use capture::{CapturePaths, OutputFilter};
pub use launchable::Launchable;
pub use supervisor::{
    DeadlinePolicy, ProcessReport, ProcessSpec, ProcessSupervisor, StopCause, SupervisorConfig,
    Verdict,
};
