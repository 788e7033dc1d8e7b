//! Ground-truth marker event wire format.
//!
//! One marker is one UDP datagram holding a single JSON object:
//!
//! ```json
//! {
//!   "type": "GROUND_TRUTH",
//!   "event": "ATTACK_START",
//!   "attack_id": "mqtt-flood_run1_20240501_100000",
//!   "ts_iso_utc": "2024-05-01T10:00:00.123Z",
//!   "ts_unix": 1714557600,
//!   "target_ip": "192.168.1.10",
//!   "label": "mqtt-flood",
//!   "run_type": "attack"
//! }
//! ```
//!
//! END events additionally carry `exit_code` and `duration_s`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scenario::RunKind;
use crate::time::format_iso_millis;

/// Value of the `type` field of every marker
pub const GROUND_TRUTH: &str = "GROUND_TRUTH";

/// Marker event names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarkerEventKind {
    AttackStart,
    AttackEnd,
    BenignStart,
    BenignEnd,
}

impl MarkerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerEventKind::AttackStart => "ATTACK_START",
            MarkerEventKind::AttackEnd => "ATTACK_END",
            MarkerEventKind::BenignStart => "BENIGN_START",
            MarkerEventKind::BenignEnd => "BENIGN_END",
        }
    }
}

impl fmt::Display for MarkerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single ground-truth marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerEvent {
    #[serde(rename = "type")]
    pub marker_type: String,
    pub event: MarkerEventKind,
    /// The run id of the run being bracketed
    pub attack_id: String,
    pub ts_iso_utc: String,
    pub ts_unix: i64,
    /// Empty when the run environment names no target
    pub target_ip: String,
    pub label: String,
    pub run_type: RunKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
}

impl MarkerEvent {
    pub fn new(
        event: MarkerEventKind,
        run_id: &str,
        timestamp: DateTime<Utc>,
        target_ip: Option<&str>,
        label: &str,
        run_type: RunKind,
    ) -> Self {
        Self {
            marker_type: GROUND_TRUTH.to_string(),
            event,
            attack_id: run_id.to_string(),
            ts_iso_utc: format_iso_millis(&timestamp),
            ts_unix: timestamp.timestamp(),
            target_ip: target_ip.unwrap_or_default().to_string(),
            label: label.to_string(),
            run_type,
            exit_code: None,
            duration_s: None,
        }
    }

    /// Attach the run's result to an END marker.
    pub fn with_result(mut self, exit_code: Option<i32>, duration_s: f64) -> Self {
        self.exit_code = exit_code;
        self.duration_s = Some(duration_s);
        self
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
