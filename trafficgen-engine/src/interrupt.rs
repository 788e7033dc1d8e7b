//! Operator interruption.
//!
//! SIGINT and SIGTERM received by the engine are recorded once in a watch
//! channel. Everything that can wait (placeholder prompts, the process
//! supervisor, the runner between runs) holds an [`InterruptToken`] and either
//! polls it or races it against its own work.

use std::fmt;

use anyhow::Result;
use nix::sys::signal::Signal;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Exit code reported for an interrupted run or scenario
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Signal that interrupted the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSignal {
    Interrupt,
    Terminate,
}

impl InterruptSignal {
    /// Signal forwarded to the child's process group.
    pub fn as_signal(&self) -> Signal {
        match self {
            InterruptSignal::Interrupt => Signal::SIGINT,
            InterruptSignal::Terminate => Signal::SIGTERM,
        }
    }
}

impl fmt::Display for InterruptSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_signal().as_str())
    }
}

/// Owner side of the interruption state
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    sender: watch::Sender<Option<InterruptSignal>>,
}

impl Default for InterruptHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self {
            sender: watch::channel(None).0,
        }
    }

    /// Record an interruption. Only the first signal is kept.
    pub fn interrupt(&self, received: InterruptSignal) {
        self.sender.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(received);
                true
            } else {
                false
            }
        });
    }

    pub fn token(&self) -> InterruptToken {
        InterruptToken {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Listener side of the interruption state
#[derive(Debug, Clone)]
pub struct InterruptToken {
    receiver: watch::Receiver<Option<InterruptSignal>>,
}

impl InterruptToken {
    /// Point in time check.
    pub fn signal(&self) -> Option<InterruptSignal> {
        *self.receiver.borrow()
    }

    pub fn is_interrupted(&self) -> bool {
        self.signal().is_some()
    }

    /// Resolve once an interruption has been recorded. Safe to race against other work.
    pub async fn interrupted(&mut self) -> InterruptSignal {
        // Copy out of the watch guard before any further await
        let seen = self
            .receiver
            .wait_for(|value| value.is_some())
            .await
            .map(|value| *value);
        match seen {
            Ok(value) => value.unwrap_or(InterruptSignal::Interrupt),
            // Handle dropped: nothing can interrupt us anymore
            Err(_) => std::future::pending().await,
        }
    }
}

/// Install SIGINT/SIGTERM handlers that feed `handle`.
///
/// Must be called from within a tokio runtime. Once installed, the signals no
/// longer terminate the engine; the runner decides how to wind down.
pub fn start_signal_listener(handle: &InterruptHandle) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let handle = handle.clone();
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = sigint.recv() => InterruptSignal::Interrupt,
                Some(()) = sigterm.recv() => InterruptSignal::Terminate,
                else => break,
            };

            if handle.sender.borrow().is_some() {
                debug!("Ignoring repeated {} while already winding down", received);
                continue;
            }
            warn!("Received {}, stopping after the current run", received);
            handle.interrupt(received);
        }
    });

    Ok(())
}
