use crate::types::Cue;

/// Remaining-second values that trigger a countdown beep, in firing order
pub const CUE_MARKS: [u32; 6] = [10, 5, 4, 3, 2, 1];

/// Result of one countdown tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestTick {
    /// Seconds left after this tick
    pub remaining: u32,
    /// Cue to play for this tick, if a mark was reached
    pub cue: Option<Cue>,
    /// The countdown reached zero on this tick
    pub expired: bool,
}

/// Countdown with fixed cue marks, each firing at most once per rest period.
///
/// Driven by external 1 Hz ticks; owns no timer.
#[derive(Debug, Clone, Default)]
pub struct RestScheduler {
    remaining: u32,
    active: bool,
    fired: [bool; CUE_MARKS.len()],
}

impl RestScheduler {
    /// Idle scheduler
    #[must_use]
    pub const fn new() -> Self {
        Self {
            remaining: 0,
            active: false,
            fired: [false; CUE_MARKS.len()],
        }
    }

    /// Begin a new rest period, discarding any previous one
    pub fn start(&mut self, duration_seconds: u32) {
        self.remaining = duration_seconds;
        self.active = true;
        self.fired = [false; CUE_MARKS.len()];
    }

    /// Advance one second. Returns `None` when no rest is running.
    pub fn tick(&mut self) -> Option<RestTick> {
        if !self.active {
            return None;
        }

        self.remaining = self.remaining.saturating_sub(1);

        let cue = CUE_MARKS
            .iter()
            .position(|&mark| mark == self.remaining)
            .filter(|&i| !self.fired[i])
            .map(|i| {
                self.fired[i] = true;
                Cue::CountdownBeep
            });

        let expired = self.remaining == 0;
        if expired {
            self.active = false;
        }

        Some(RestTick {
            remaining: self.remaining,
            cue,
            expired,
        })
    }

    /// Stop the countdown; no further cues fire for this period
    pub fn cancel(&mut self) {
        self.active = false;
        self.remaining = 0;
    }

    /// A rest period is running
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Seconds left
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.remaining
    }
}
