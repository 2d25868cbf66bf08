use tracing::{debug, info};

use crate::{
    rest::RestScheduler,
    types::{
        CountingMode, Cue, ExercisePlan, FinishReason, RepSource, SessionMode, SessionState,
        WorkoutSet,
    },
};

/// A normalized "+1 rep" signal aimed at one set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepEvent {
    /// Where the rep came from
    pub source: RepSource,
    /// Set the rep belongs to
    pub set_index: u32,
}

/// Side effect requested by a state transition
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    /// Begin connecting the rep counter
    ConnectSensor,
    /// Play an audio cue
    PlayCue(Cue),
    /// The active set's count changed
    RepCounted {
        /// Active set
        set_index: u32,
        /// Count after the increment
        count: u32,
        /// Origin of the rep
        source: RepSource,
    },
    /// A set was completed and frozen
    SetCompleted(WorkoutSet),
    /// Zero the sensor baseline and the device's own counter
    ResetSensorCounter,
    /// Start the 1 Hz rest countdown
    RestStarted {
        /// Countdown length in seconds
        seconds: u32,
    },
    /// One countdown second elapsed
    RestTicked {
        /// Seconds left
        remaining: u32,
    },
    /// Stop the rest countdown timer
    RestEnded {
        /// The user skipped the rest
        skipped: bool,
    },
    /// A new set is active
    SetStarted {
        /// Newly active set
        set_index: u32,
    },
    /// Session reached `Done`; the log entry must be finalized
    Finished(FinishReason),
}

/// State machine for one exercise.
///
/// Performs no IO: each operation returns the effects the loop must carry out,
/// in order.
#[derive(Debug, Clone)]
pub struct WorkoutSession {
    exercise_name: String,
    counting_mode: CountingMode,
    sets: Vec<WorkoutSet>,
    state: SessionState,
    rest: RestScheduler,
    current_weight: f64,
}

impl WorkoutSession {
    /// Load an exercise. The plan should already be validated.
    #[must_use]
    pub fn new(plan: &ExercisePlan, counting_mode: CountingMode) -> Self {
        Self {
            exercise_name: plan.name.clone(),
            counting_mode,
            sets: plan.to_sets(),
            state: SessionState::default(),
            rest: RestScheduler::new(),
            current_weight: plan.sets.first().map_or(0.0, |s| s.target_weight),
        }
    }

    /// Exercise name
    #[must_use]
    pub fn exercise_name(&self) -> &str {
        &self.exercise_name
    }

    /// Counting mode
    #[must_use]
    pub const fn counting_mode(&self) -> CountingMode {
        self.counting_mode
    }

    /// Controller state
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// All sets
    #[must_use]
    pub fn sets(&self) -> &[WorkoutSet] {
        &self.sets
    }

    /// Weight that will be recorded for the active set
    #[must_use]
    pub const fn current_weight(&self) -> f64 {
        self.current_weight
    }

    /// Active set while in a set or resting
    #[must_use]
    pub fn active_set(&self) -> Option<&WorkoutSet> {
        self.state.active_set_index.and_then(|i| self.set(i))
    }

    fn set(&self, index: u32) -> Option<&WorkoutSet> {
        self.sets.get(usize::try_from(index).ok()?.checked_sub(1)?)
    }

    fn set_mut(&mut self, index: u32) -> Option<&mut WorkoutSet> {
        self.sets
            .get_mut(usize::try_from(index).ok()?.checked_sub(1)?)
    }

    /// Start command: `Idle` → `InSet` on set 1
    pub fn start(&mut self) -> Vec<SessionEffect> {
        if self.state.mode != SessionMode::Idle {
            debug!("Ignoring start in {} state", self.state.mode);
            return Vec::new();
        }

        info!(
            "Starting '{}' ({} sets, {:?} counting)",
            self.exercise_name,
            self.sets.len(),
            self.counting_mode
        );

        let mut effects = Vec::new();
        if self.counting_mode == CountingMode::Automated {
            effects.push(SessionEffect::ConnectSensor);
        }
        self.begin_set(1, &mut effects);
        effects
    }

    /// Single increment entry point shared by every rep source
    pub fn on_rep_event(&mut self, event: RepEvent) -> Vec<SessionEffect> {
        if self.state.mode != SessionMode::InSet
            || self.state.active_set_index != Some(event.set_index)
        {
            debug!(
                "Ignoring {} rep for set {} in {} state",
                event.source, event.set_index, self.state.mode
            );
            return Vec::new();
        }

        let Some(target) = self.active_set().map(|s| s.target_reps) else {
            return Vec::new();
        };

        let mut effects = Vec::new();
        self.state.current_rep_count = (self.state.current_rep_count + 1).min(target);
        effects.push(SessionEffect::RepCounted {
            set_index: event.set_index,
            count: self.state.current_rep_count,
            source: event.source,
        });

        if self.state.current_rep_count == target {
            self.complete_active_set(target, &mut effects);
        }

        effects
    }

    /// Direct "complete set" action available in manual mode.
    ///
    /// `reps` defaults to the set's target and is recorded as given.
    pub fn complete_set(&mut self, set_index: u32, reps: Option<u32>) -> Vec<SessionEffect> {
        if self.counting_mode != CountingMode::Manual {
            debug!("Ignoring direct completion outside manual mode");
            return Vec::new();
        }
        if self.state.mode != SessionMode::InSet
            || self.state.active_set_index != Some(set_index)
        {
            debug!(
                "Ignoring completion of set {} in {} state",
                set_index, self.state.mode
            );
            return Vec::new();
        }

        let Some(target) = self.active_set().map(|s| s.target_reps) else {
            return Vec::new();
        };
        let reps = reps.unwrap_or(target);
        self.state.current_rep_count = reps.min(target);

        let mut effects = Vec::new();
        self.complete_active_set(reps, &mut effects);
        effects
    }

    /// Update the weight input for the active set. Ignored outside a set.
    pub fn set_weight(&mut self, weight: f64) -> bool {
        if self.state.mode != SessionMode::InSet {
            return false;
        }
        self.current_weight = weight;
        true
    }

    /// One rest countdown second
    pub fn on_rest_tick(&mut self) -> Vec<SessionEffect> {
        if self.state.mode != SessionMode::Resting {
            return Vec::new();
        }
        let Some(tick) = self.rest.tick() else {
            return Vec::new();
        };

        self.state.rest_remaining_seconds = tick.remaining;

        let mut effects = vec![SessionEffect::RestTicked {
            remaining: tick.remaining,
        }];
        if let Some(cue) = tick.cue {
            effects.push(SessionEffect::PlayCue(cue));
        }
        if tick.expired {
            effects.push(SessionEffect::RestEnded { skipped: false });
            self.leave_rest(false, &mut effects);
        }
        effects
    }

    /// Skip the rest of the countdown and move on without waiting for cues
    pub fn skip_rest(&mut self) -> Vec<SessionEffect> {
        if self.state.mode != SessionMode::Resting {
            debug!("Ignoring skip in {} state", self.state.mode);
            return Vec::new();
        }

        self.rest.cancel();
        self.state.rest_remaining_seconds = 0;

        let mut effects = vec![SessionEffect::RestEnded { skipped: true }];
        self.leave_rest(true, &mut effects);
        effects
    }

    /// End the session before the last set
    pub fn finish_early(&mut self) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        match self.state.mode {
            SessionMode::Done => return effects,
            SessionMode::Resting => {
                self.rest.cancel();
                effects.push(SessionEffect::RestEnded { skipped: true });
            }
            SessionMode::Idle | SessionMode::InSet => {}
        }

        info!("Finishing '{}' early", self.exercise_name);
        self.state.mode = SessionMode::Done;
        self.state.rest_remaining_seconds = 0;
        effects.push(SessionEffect::Finished(FinishReason::Early));
        effects
    }

    fn begin_set(&mut self, index: u32, effects: &mut Vec<SessionEffect>) {
        self.state.mode = SessionMode::InSet;
        self.state.active_set_index = Some(index);
        self.state.current_rep_count = 0;
        self.state.rest_remaining_seconds = 0;
        if let Some(weight) = self.set(index).map(|s| s.target_weight) {
            self.current_weight = weight;
        }
        effects.push(SessionEffect::SetStarted { set_index: index });
    }

    fn complete_active_set(&mut self, actual_reps: u32, effects: &mut Vec<SessionEffect>) {
        let Some(index) = self.state.active_set_index else {
            return;
        };
        let weight = self.current_weight;
        let Some(set) = self.set_mut(index) else {
            return;
        };
        if !set.complete(actual_reps, weight) {
            return;
        }
        let completed = set.clone();
        let rest_seconds = completed.rest_seconds;

        info!(
            "Set {} complete: {} reps at {}",
            index, completed.actual_reps, completed.actual_weight
        );

        effects.push(SessionEffect::PlayCue(Cue::SetComplete));
        effects.push(SessionEffect::SetCompleted(completed));
        effects.push(SessionEffect::ResetSensorCounter);

        self.state.mode = SessionMode::Resting;
        self.state.rest_remaining_seconds = rest_seconds;

        if rest_seconds == 0 {
            self.leave_rest(false, effects);
            return;
        }

        self.rest.start(rest_seconds);
        effects.push(SessionEffect::RestStarted {
            seconds: rest_seconds,
        });
    }

    fn leave_rest(&mut self, skipped: bool, effects: &mut Vec<SessionEffect>) {
        let next = self
            .state
            .active_set_index
            .map(|i| i + 1)
            .filter(|&i| self.set(i).is_some());

        if let Some(next) = next {
            if !skipped {
                effects.push(SessionEffect::PlayCue(Cue::RestComplete));
            }
            self.begin_set(next, effects);
        } else {
            info!("'{}' complete", self.exercise_name);
            self.state.mode = SessionMode::Done;
            self.state.rest_remaining_seconds = 0;
            effects.push(SessionEffect::PlayCue(Cue::WorkoutComplete));
            effects.push(SessionEffect::Finished(FinishReason::Normal));
        }
    }
}
