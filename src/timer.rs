use std::{collections::HashMap, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

/// What a timer is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// 1 Hz rest countdown
    RestCountdown,
    /// Delay before the next sensor connection attempt
    Reconnect,
}

/// Event posted when a timer elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// Timer purpose
    pub kind: TimerKind,
    /// Generation assigned when the timer was scheduled
    pub generation: u64,
}

struct TimerSlot {
    generation: u64,
    task: JoinHandle<()>,
}

/// Owns every pending timer of a session.
///
/// Each timer is a task that posts [`TimerFired`] into the engine channel.
/// Scheduling a purpose that is already running replaces it; the generation on
/// a fired event lets the loop drop events from a replaced or cancelled timer.
pub struct TimerArena<E> {
    events: mpsc::UnboundedSender<E>,
    slots: HashMap<TimerKind, TimerSlot>,
    next_generation: u64,
}

impl<E> TimerArena<E>
where
    E: From<TimerFired> + Send + 'static,
{
    /// Arena posting into `events`
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<E>) -> Self {
        Self {
            events,
            slots: HashMap::new(),
            next_generation: 1,
        }
    }

    /// Fire once after `delay`
    pub fn schedule_once(&mut self, kind: TimerKind, delay: Duration) -> u64 {
        let generation = self.bump();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(E::from(TimerFired { kind, generation }));
        });
        self.install(kind, generation, task);
        generation
    }

    /// Fire every `period`, first after one full period
    pub fn schedule_interval(&mut self, kind: TimerKind, period: Duration) -> u64 {
        let generation = self.bump();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                if events.send(E::from(TimerFired { kind, generation })).is_err() {
                    break;
                }
            }
        });
        self.install(kind, generation, task);
        generation
    }

    /// Cancel one timer. Returns true if one was pending.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        let Some(slot) = self.slots.remove(&kind) else {
            return false;
        };
        slot.task.abort();
        debug!("Cancelled {:?} timer", kind);
        true
    }

    /// Cancel every timer
    pub fn cancel_all(&mut self) {
        for (kind, slot) in self.slots.drain() {
            slot.task.abort();
            debug!("Cancelled {:?} timer", kind);
        }
    }

    /// The event comes from the live timer of its kind
    #[must_use]
    pub fn is_current(&self, fired: TimerFired) -> bool {
        self.slots
            .get(&fired.kind)
            .is_some_and(|slot| slot.generation == fired.generation)
    }

    /// Mark a one-shot timer as consumed. Returns false for stale events.
    pub fn take(&mut self, fired: TimerFired) -> bool {
        if !self.is_current(fired) {
            return false;
        }
        self.slots.remove(&fired.kind);
        true
    }

    /// A timer of this kind is pending
    #[must_use]
    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.slots.contains_key(&kind)
    }

    fn bump(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    fn install(&mut self, kind: TimerKind, generation: u64, task: JoinHandle<()>) {
        if let Some(old) = self.slots.insert(kind, TimerSlot { generation, task }) {
            old.task.abort();
        }
    }
}

impl<E> Drop for TimerArena<E> {
    fn drop(&mut self) {
        for slot in self.slots.values() {
            slot.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Fired(TimerFired);

    impl From<TimerFired> for Fired {
        fn from(value: TimerFired) -> Self {
            Self(value)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Fired>();
        let mut timers = TimerArena::new(tx);

        let generation = timers.schedule_once(TimerKind::Reconnect, Duration::from_secs(1));
        let Fired(fired) = rx.recv().await.unwrap();

        assert_eq!(fired.kind, TimerKind::Reconnect);
        assert_eq!(fired.generation, generation);
        assert!(timers.take(fired));
        assert!(!timers.is_pending(TimerKind::Reconnect));
        assert!(!timers.take(fired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticks_until_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Fired>();
        let mut timers = TimerArena::new(tx);

        timers.schedule_interval(TimerKind::RestCountdown, Duration::from_secs(1));
        for _ in 0..3 {
            let Fired(fired) = rx.recv().await.unwrap();
            assert!(timers.is_current(fired));
        }

        assert!(timers.cancel(TimerKind::RestCountdown));
        assert!(!timers.cancel(TimerKind::RestCountdown));

        tokio::time::sleep(Duration::from_secs(5)).await;
        while let Ok(Fired(fired)) = rx.try_recv() {
            assert!(!timers.is_current(fired));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_replaces_generation() {
        let (tx, _rx) = mpsc::unbounded_channel::<Fired>();
        let mut timers = TimerArena::new(tx);

        let first = timers.schedule_interval(TimerKind::RestCountdown, Duration::from_secs(1));
        let second = timers.schedule_interval(TimerKind::RestCountdown, Duration::from_secs(1));

        assert_ne!(first, second);
        assert!(!timers.is_current(TimerFired {
            kind: TimerKind::RestCountdown,
            generation: first,
        }));
        assert!(timers.is_current(TimerFired {
            kind: TimerKind::RestCountdown,
            generation: second,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_silences_everything() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Fired>();
        let mut timers = TimerArena::new(tx);

        timers.schedule_interval(TimerKind::RestCountdown, Duration::from_secs(1));
        timers.schedule_once(TimerKind::Reconnect, Duration::from_secs(2));
        timers.cancel_all();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
