use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, WorkoutError};

/// Phase of a workout session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    /// Exercise loaded, not started
    Idle,
    /// A set is in progress and reps are being counted
    InSet,
    /// Rest countdown between sets
    Resting,
    /// Terminal state
    Done,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::InSet => write!(f, "In Set"),
            Self::Resting => write!(f, "Resting"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// How reps are counted for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CountingMode {
    /// The paired sensor drives rep counting; Start connects the sensor
    #[default]
    Automated,
    /// Reps are tapped in, sets can be completed directly
    Manual,
}

/// Origin of a rep event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepSource {
    /// User tapped the rep control
    Manual,
    /// Decoded from a sensor notification
    Sensor,
}

impl fmt::Display for RepSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Sensor => write!(f, "sensor"),
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    /// Every set was worked through
    Normal,
    /// The user finished before the last set
    Early,
}

/// Named audio cue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cue {
    /// Rest countdown mark
    CountdownBeep,
    /// A set reached its target or was completed directly
    SetComplete,
    /// A rest period ran out and the next set begins
    RestComplete,
    /// The last set is done
    WorkoutComplete,
}

impl Cue {
    /// Cue identifier understood by the audio subsystem
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::CountdownBeep => "countdown-beep",
            Self::SetComplete => "set-complete",
            Self::RestComplete => "rest-complete",
            Self::WorkoutComplete => "workout-complete",
        }
    }
}

impl fmt::Display for Cue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// One prescribed set, as supplied by the exercise configuration provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetPrescription {
    /// Reps to reach before the set completes
    pub target_reps: u32,
    /// Suggested load
    pub target_weight: f64,
    /// Rest after the set, in seconds
    pub rest_seconds: u32,
}

/// Ordered set prescriptions for a single exercise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExercisePlan {
    /// Exercise name carried into the log entry
    pub name: String,
    /// Sets in execution order
    pub sets: Vec<SetPrescription>,
}

impl ExercisePlan {
    /// Plan with `sets` identical prescriptions
    #[must_use]
    pub fn uniform(
        name: impl Into<String>,
        sets: usize,
        target_reps: u32,
        target_weight: f64,
        rest_seconds: u32,
    ) -> Self {
        Self {
            name: name.into(),
            sets: vec![
                SetPrescription {
                    target_reps,
                    target_weight,
                    rest_seconds,
                };
                sets
            ],
        }
    }

    /// Check the plan can drive a session
    ///
    /// # Errors
    ///
    /// Returns [`WorkoutError::InvalidParameters`] if the plan has no sets, a set
    /// with zero target reps, or a negative or non-finite target weight.
    pub fn validate(&self) -> Result<()> {
        if self.sets.is_empty() {
            return Err(WorkoutError::InvalidParameters(format!(
                "exercise '{}' has no sets",
                self.name
            )));
        }

        for (i, set) in self.sets.iter().enumerate() {
            if set.target_reps == 0 {
                return Err(WorkoutError::InvalidParameters(format!(
                    "set {} of '{}' has zero target reps",
                    i + 1,
                    self.name
                )));
            }
            if !set.target_weight.is_finite() || set.target_weight < 0.0 {
                return Err(WorkoutError::InvalidParameters(format!(
                    "set {} of '{}' has invalid weight {}",
                    i + 1,
                    self.name,
                    set.target_weight
                )));
            }
        }

        Ok(())
    }

    /// Build the session's set records
    #[must_use]
    pub fn to_sets(&self) -> Vec<WorkoutSet> {
        (1..)
            .zip(&self.sets)
            .map(|(index, p)| WorkoutSet::new(index, p))
            .collect()
    }
}

/// A set being worked through in the current session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSet {
    /// 1-based position in the exercise
    pub index: u32,
    /// Reps to reach
    pub target_reps: u32,
    /// Prescribed load
    pub target_weight: f64,
    /// Rest after this set, in seconds
    pub rest_seconds: u32,
    /// Flips to true exactly once
    pub completed: bool,
    /// Reps recorded on completion
    pub actual_reps: u32,
    /// Load recorded on completion
    pub actual_weight: f64,
}

impl WorkoutSet {
    /// Create an open set from its prescription
    #[must_use]
    pub const fn new(index: u32, prescription: &SetPrescription) -> Self {
        Self {
            index,
            target_reps: prescription.target_reps,
            target_weight: prescription.target_weight,
            rest_seconds: prescription.rest_seconds,
            completed: false,
            actual_reps: 0,
            actual_weight: 0.0,
        }
    }

    /// Record results and freeze the set. Returns false if it was already completed.
    pub fn complete(&mut self, actual_reps: u32, actual_weight: f64) -> bool {
        if self.completed {
            return false;
        }
        self.completed = true;
        self.actual_reps = actual_reps;
        self.actual_weight = actual_weight;
        true
    }
}

/// Controller state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Current phase
    pub mode: SessionMode,
    /// Active set, defined while in a set or resting
    pub active_set_index: Option<u32>,
    /// Reps counted for the active set, never above its target
    pub current_rep_count: u32,
    /// Seconds left in the rest countdown
    pub rest_remaining_seconds: u32,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            mode: SessionMode::Idle,
            active_set_index: None,
            current_rep_count: 0,
            rest_remaining_seconds: 0,
        }
    }
}

/// Link status of the rep counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// No link and none being attempted
    #[default]
    Disconnected,
    /// Connecting or waiting for the next retry
    Connecting,
    /// Subscribed to rep notifications
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Rep counter link as seen by the session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorConnection {
    /// Identifier of the subscribed device
    pub device_id: Option<String>,
    /// Link status
    pub status: ConnectionStatus,
    /// The device's own running count at the last accepted frame
    pub last_absolute_count: u32,
}

/// Aggregate result handed to persistence when a session ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutLogEntry {
    /// Exercise name
    pub exercise_name: String,
    /// Number of completed sets
    pub sets_completed: u32,
    /// Sum of reps over completed sets
    pub reps_completed: u32,
    /// Load of the first completed set
    pub weight_used: Option<f64>,
}

/// Read model of a running session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Exercise name
    pub exercise_name: String,
    /// How reps are counted
    pub counting_mode: CountingMode,
    /// Controller state
    pub state: SessionState,
    /// All sets of the exercise
    pub sets: Vec<WorkoutSet>,
    /// Rep counter link
    pub sensor: SensorConnection,
    /// Weight that will be recorded for the active set
    pub current_weight: f64,
}

/// BLE connection parameters for the rep counter
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
    /// Scan timeout in milliseconds
    pub scan_timeout_ms: u64,
    /// Advertised name prefix accepted during discovery
    pub device_name_prefix: String,
    /// Paired device to prefer over signal strength
    pub preferred_device_id: Option<String>,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            scan_timeout_ms: 5_000,
            device_name_prefix: "RepCounter".to_string(),
            preferred_device_id: None,
        }
    }
}

impl ConnectionParams {
    /// Set the preferred device id
    #[must_use]
    pub fn with_preferred_device(mut self, device_id: impl Into<String>) -> Self {
        self.preferred_device_id = Some(device_id.into());
        self
    }

    /// Set the scan timeout
    #[must_use]
    pub const fn with_scan_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.scan_timeout_ms = timeout_ms;
        self
    }
}

/// Engine timing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay before the first reconnect attempt after a link loss
    pub initial_retry_delay_ms: u64,
    /// Delay between subsequent reconnect attempts
    pub retry_interval_ms: u64,
    /// How often the link worker polls the transport for a silent disconnect
    pub health_check_interval_ms: u64,
    /// Rest countdown tick period
    pub rest_tick_ms: u64,
    /// How long unmount waits for the link worker to disconnect
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_retry_delay_ms: 1_000,
            retry_interval_ms: 2_000,
            health_check_interval_ms: 500,
            rest_tick_ms: 1_000,
            shutdown_timeout_ms: 2_000,
        }
    }
}

impl EngineConfig {
    /// Set both reconnect delays
    #[must_use]
    pub const fn with_retry_delays(mut self, initial_ms: u64, interval_ms: u64) -> Self {
        self.initial_retry_delay_ms = initial_ms;
        self.retry_interval_ms = interval_ms;
        self
    }

    /// Set the transport health poll interval
    #[must_use]
    pub const fn with_health_check_interval_ms(mut self, interval_ms: u64) -> Self {
        self.health_check_interval_ms = interval_ms;
        self
    }
}
