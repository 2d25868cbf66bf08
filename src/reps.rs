use crate::{
    protocol::RepDelta,
    session::{RepEvent, SessionEffect, WorkoutSession},
    types::{RepSource, SessionMode},
};

/// Raw rep increment before normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepInput {
    /// One tap on the rep control for a set
    ManualTap {
        /// Set the tap was aimed at
        set_index: u32,
    },
    /// Reps decoded from one sensor payload
    SensorDelta {
        /// Set that was active when the payload was decoded
        set_index: u32,
        /// Reps carried by the payload
        delta: RepDelta,
    },
}

impl RepInput {
    /// Origin of the reps
    #[must_use]
    pub const fn source(&self) -> RepSource {
        match self {
            Self::ManualTap { .. } => RepSource::Manual,
            Self::SensorDelta { .. } => RepSource::Sensor,
        }
    }

    const fn set_index(&self) -> u32 {
        match self {
            Self::ManualTap { set_index } | Self::SensorDelta { set_index, .. } => *set_index,
        }
    }

    const fn reps(&self) -> u32 {
        match self {
            Self::ManualTap { .. } => 1,
            Self::SensorDelta { delta, .. } => delta.reps(),
        }
    }
}

/// Deliver an input to the session as individual rep events.
///
/// Stops as soon as the session leaves `InSet`: any remaining reps of a delta
/// would belong to a set that is already complete.
pub fn on_rep_event(session: &mut WorkoutSession, input: RepInput) -> Vec<SessionEffect> {
    let event = RepEvent {
        source: input.source(),
        set_index: input.set_index(),
    };

    let mut effects = Vec::new();
    for _ in 0..input.reps() {
        if session.state().mode != SessionMode::InSet {
            break;
        }
        effects.extend(session.on_rep_event(event));
    }
    effects
}
