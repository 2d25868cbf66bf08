use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    audio::{AudioOutput, CueDispatcher, LogAudio},
    completion::{CompletionGateway, PersistenceService, SubmissionResult},
    error::{Result, WorkoutError},
    reps::{self, RepInput},
    sensor::{LinkEvent, RepTransport, SensorLink},
    session::{SessionEffect, WorkoutSession},
    timer::{TimerArena, TimerFired, TimerKind},
    types::{
        ConnectionStatus, CountingMode, Cue, EngineConfig, ExercisePlan, FinishReason, RepSource,
        SessionMode, SessionSnapshot, WorkoutLogEntry, WorkoutSet,
    },
};

/// Progress published by a running engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotification {
    /// A set became active
    SetStarted {
        /// Active set
        set_index: u32,
    },
    /// Rep counter link status changed
    SensorStatus(ConnectionStatus),
    /// The active set's count changed
    RepCounted {
        /// Active set
        set_index: u32,
        /// Count after the increment
        count: u32,
        /// Origin of the rep
        source: RepSource,
    },
    /// A set was completed
    SetCompleted(WorkoutSet),
    /// Rest countdown started
    RestStarted {
        /// Countdown length in seconds
        seconds: u32,
    },
    /// One rest second elapsed
    RestTick {
        /// Seconds left
        remaining: u32,
    },
    /// Rest countdown stopped
    RestEnded {
        /// The user skipped it
        skipped: bool,
    },
    /// An audio cue was requested
    Cue(Cue),
    /// The session is done and its log entry was handed to persistence
    Finished {
        /// Why the session ended
        reason: FinishReason,
        /// Aggregated result
        entry: WorkoutLogEntry,
    },
    /// Persistence accepted the log entry
    Submitted(WorkoutLogEntry),
    /// Persistence rejected the log entry; the session stays finished
    SubmissionFailed {
        /// Failure description
        reason: String,
    },
}

#[derive(Debug)]
enum EngineCommand {
    Start,
    TapRep { set_index: u32 },
    CompleteSet { set_index: u32, reps: Option<u32> },
    SetWeight(f64),
    SkipRest,
    FinishEarly,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Unmount(Option<oneshot::Sender<()>>),
}

#[derive(Debug)]
enum EngineEvent {
    Command(EngineCommand),
    Timer(TimerFired),
    Link(LinkEvent),
    Submission(SubmissionResult),
}

impl From<EngineCommand> for EngineEvent {
    fn from(value: EngineCommand) -> Self {
        Self::Command(value)
    }
}

impl From<TimerFired> for EngineEvent {
    fn from(value: TimerFired) -> Self {
        Self::Timer(value)
    }
}

impl From<LinkEvent> for EngineEvent {
    fn from(value: LinkEvent) -> Self {
        Self::Link(value)
    }
}

impl From<SubmissionResult> for EngineEvent {
    fn from(value: SubmissionResult) -> Self {
        Self::Submission(value)
    }
}

/// Stream of engine progress; closes when the engine is unmounted
pub type EngineNotifications = mpsc::UnboundedReceiver<EngineNotification>;

/// Configures and mounts a session for one exercise
///
/// Mounting spawns one event loop task that owns the session state machine,
/// the rep counter link, every timer and the completion gateway. Commands from
/// the [`EngineHandle`], timer ticks, link traffic and submission results all
/// arrive on one channel and are handled in arrival order. Progress is
/// published as [`EngineNotification`]s.
///
/// # Examples
///
/// ```no_run
/// use repcount::{CountingMode, ExercisePlan, InMemoryPersistence, WorkoutEngine};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let plan = ExercisePlan::uniform("Squat", 3, 10, 60.0, 90);
///     let (engine, mut notifications) = WorkoutEngine::new(plan, Arc::new(InMemoryPersistence::new()))
///         .with_counting_mode(CountingMode::Manual)
///         .mount()?;
///
///     engine.start()?;
///     for _ in 0..10 {
///         engine.tap_rep(1)?;
///     }
///
///     while let Some(notification) = notifications.recv().await {
///         println!("{notification:?}");
///     }
///     Ok(())
/// }
/// ```
pub struct WorkoutEngine {
    plan: ExercisePlan,
    counting_mode: CountingMode,
    config: EngineConfig,
    audio: Arc<dyn AudioOutput>,
    persistence: Arc<dyn PersistenceService>,
}

impl WorkoutEngine {
    /// Automated counting, default timing, cues written to the log
    #[must_use]
    pub fn new(plan: ExercisePlan, persistence: Arc<dyn PersistenceService>) -> Self {
        Self {
            plan,
            counting_mode: CountingMode::default(),
            config: EngineConfig::default(),
            audio: Arc::new(LogAudio),
            persistence,
        }
    }

    /// Set how reps are counted
    #[must_use]
    pub const fn with_counting_mode(mut self, counting_mode: CountingMode) -> Self {
        self.counting_mode = counting_mode;
        self
    }

    /// Override timing
    #[must_use]
    pub const fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Play cues through `audio`
    #[must_use]
    pub fn with_audio(mut self, audio: Arc<dyn AudioOutput>) -> Self {
        self.audio = audio;
        self
    }

    /// Mount without a rep counter; reps come from taps only
    ///
    /// # Errors
    ///
    /// Returns [`WorkoutError::InvalidParameters`] if the plan has no sets or a
    /// set with a zero rep target.
    pub fn mount(self) -> Result<(EngineHandle, EngineNotifications)> {
        self.plan.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sensor = SensorLink::detached();
        Ok(self.launch(sensor, events_tx, events_rx))
    }

    /// Mount with a rep counter reached through `transport`
    ///
    /// The link is not opened until the session is started in automated mode.
    ///
    /// # Errors
    ///
    /// Returns [`WorkoutError::InvalidParameters`] if the plan has no sets or a
    /// set with a zero rep target.
    pub fn mount_with_sensor<T: RepTransport>(
        self,
        transport: T,
    ) -> Result<(EngineHandle, EngineNotifications)> {
        self.plan.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sensor = SensorLink::spawn(transport, events_tx.clone(), &self.config);
        Ok(self.launch(sensor, events_tx, events_rx))
    }

    fn launch(
        self,
        sensor: SensorLink,
        events_tx: mpsc::UnboundedSender<EngineEvent>,
        events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> (EngineHandle, EngineNotifications) {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        info!(
            "Mounting '{}' with {} sets",
            self.plan.name,
            self.plan.sets.len()
        );

        let engine = EngineLoop {
            session: WorkoutSession::new(&self.plan, self.counting_mode),
            sensor,
            timers: TimerArena::new(events_tx.clone()),
            gateway: CompletionGateway::new(self.persistence, events_tx.clone()),
            cues: CueDispatcher::spawn(self.audio),
            config: self.config,
            notifications: notify_tx,
            published_status: ConnectionStatus::Disconnected,
            events: events_rx,
        };
        let task = tokio::spawn(engine.run());

        let handle = EngineHandle {
            commands: events_tx,
            task: Some(task),
        };
        (handle, notify_rx)
    }
}

/// Controls a mounted session
///
/// Dropping the handle unmounts the session.
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineEvent>,
    task: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Start the first set
    ///
    /// # Errors
    ///
    /// Returns [`WorkoutError::EngineStopped`] if the engine is no longer running.
    pub fn start(&self) -> Result<()> {
        self.send(EngineCommand::Start)
    }

    /// Count one manual rep for `set_index`
    ///
    /// # Errors
    ///
    /// Returns [`WorkoutError::EngineStopped`] if the engine is no longer running.
    pub fn tap_rep(&self, set_index: u32) -> Result<()> {
        self.send(EngineCommand::TapRep { set_index })
    }

    /// Complete `set_index` directly (manual counting only). `reps` defaults
    /// to the set's target.
    ///
    /// # Errors
    ///
    /// Returns [`WorkoutError::EngineStopped`] if the engine is no longer running.
    pub fn complete_set(&self, set_index: u32, reps: Option<u32>) -> Result<()> {
        self.send(EngineCommand::CompleteSet { set_index, reps })
    }

    /// Change the weight recorded for the active set
    ///
    /// # Errors
    ///
    /// Returns [`WorkoutError::InvalidParameters`] for a negative or non-finite
    /// weight, or [`WorkoutError::EngineStopped`] if the engine is no longer running.
    pub fn set_weight(&self, weight: f64) -> Result<()> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(WorkoutError::InvalidParameters(format!(
                "Weight {weight} must be a finite, non-negative number"
            )));
        }
        self.send(EngineCommand::SetWeight(weight))
    }

    /// Skip the current rest
    ///
    /// # Errors
    ///
    /// Returns [`WorkoutError::EngineStopped`] if the engine is no longer running.
    pub fn skip_rest(&self) -> Result<()> {
        self.send(EngineCommand::SkipRest)
    }

    /// End the session now and submit what was completed
    ///
    /// # Errors
    ///
    /// Returns [`WorkoutError::EngineStopped`] if the engine is no longer running.
    pub fn finish_early(&self) -> Result<()> {
        self.send(EngineCommand::FinishEarly)
    }

    /// Current session state
    ///
    /// # Errors
    ///
    /// Returns [`WorkoutError::EngineStopped`] if the engine is no longer running.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Snapshot(tx))?;
        rx.await.map_err(|_| WorkoutError::EngineStopped)
    }

    /// Cancel timers, close the rep counter link and stop the engine
    ///
    /// # Errors
    ///
    /// Returns [`WorkoutError::EngineStopped`] if the engine had already stopped.
    pub async fn unmount(mut self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Unmount(Some(tx)))?;
        rx.await.map_err(|_| WorkoutError::EngineStopped)?;

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }

    fn send(&self, command: EngineCommand) -> Result<()> {
        self.commands
            .send(command.into())
            .map_err(|_| WorkoutError::EngineStopped)
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.send(EngineCommand::Unmount(None));
        }
    }
}

struct EngineLoop {
    session: WorkoutSession,
    sensor: SensorLink,
    timers: TimerArena<EngineEvent>,
    gateway: CompletionGateway<EngineEvent>,
    cues: CueDispatcher,
    config: EngineConfig,
    notifications: mpsc::UnboundedSender<EngineNotification>,
    published_status: ConnectionStatus,
    events: mpsc::UnboundedReceiver<EngineEvent>,
}

impl EngineLoop {
    async fn run(mut self) {
        let ack = loop {
            let Some(event) = self.events.recv().await else {
                break None;
            };

            match event {
                EngineEvent::Command(EngineCommand::Unmount(ack)) => break ack,
                EngineEvent::Command(command) => self.on_command(command),
                EngineEvent::Timer(fired) => self.on_timer(fired),
                EngineEvent::Link(link) => self.on_link(link),
                EngineEvent::Submission(outcome) => self.on_submission(outcome),
            }
            self.publish_sensor_status();
        };

        self.teardown().await;
        drop(self);

        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    fn on_command(&mut self, command: EngineCommand) {
        let effects = match command {
            EngineCommand::Start => self.session.start(),
            EngineCommand::TapRep { set_index } => {
                reps::on_rep_event(&mut self.session, RepInput::ManualTap { set_index })
            }
            EngineCommand::CompleteSet { set_index, reps } => {
                self.session.complete_set(set_index, reps)
            }
            EngineCommand::SetWeight(weight) => {
                if !self.session.set_weight(weight) {
                    debug!("Ignoring weight change in {} state", self.session.state().mode);
                }
                Vec::new()
            }
            EngineCommand::SkipRest => self.session.skip_rest(),
            EngineCommand::FinishEarly => self.session.finish_early(),
            EngineCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
                Vec::new()
            }
            EngineCommand::Unmount(_) => Vec::new(),
        };
        self.apply(effects);
    }

    fn on_timer(&mut self, fired: TimerFired) {
        match fired.kind {
            TimerKind::RestCountdown => {
                if !self.timers.is_current(fired) {
                    debug!("Dropping stale rest tick");
                    return;
                }
                let effects = self.session.on_rest_tick();
                self.apply(effects);
            }
            TimerKind::Reconnect => {
                if self.timers.take(fired) {
                    self.sensor.on_reconnect_due();
                }
            }
        }
    }

    fn on_link(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Subscribed { device_id } => self.sensor.on_subscribed(device_id),
            LinkEvent::ConnectFailed { reason } => {
                debug!("Rep counter unavailable: {}", reason);
                self.sensor.on_link_lost(&mut self.timers);
            }
            LinkEvent::Disconnected => {
                warn!("Rep counter disconnected, retrying");
                self.sensor.on_link_lost(&mut self.timers);
            }
            LinkEvent::Notification(payload) => {
                if self.session.state().mode != SessionMode::InSet {
                    debug!("Dropping rep payload outside a set");
                    return;
                }
                let Some((set_index, target_reps)) =
                    self.session.active_set().map(|s| (s.index, s.target_reps))
                else {
                    return;
                };
                let Some(delta) = self.sensor.on_notification(&payload, target_reps) else {
                    return;
                };

                let effects = reps::on_rep_event(
                    &mut self.session,
                    RepInput::SensorDelta { set_index, delta },
                );
                self.apply(effects);
            }
        }
    }

    fn on_submission(&self, outcome: SubmissionResult) {
        let notification = match outcome.result {
            Ok(()) => {
                info!("Saved '{}'", outcome.entry.exercise_name);
                EngineNotification::Submitted(outcome.entry)
            }
            Err(e) => EngineNotification::SubmissionFailed {
                reason: e.to_string(),
            },
        };
        self.notify(notification);
    }

    fn apply(&mut self, effects: Vec<SessionEffect>) {
        for effect in effects {
            match effect {
                SessionEffect::ConnectSensor => {
                    if !self.sensor.connect() {
                        debug!("No rep counter to connect");
                    }
                }
                SessionEffect::PlayCue(cue) => {
                    self.cues.dispatch(cue);
                    self.notify(EngineNotification::Cue(cue));
                }
                SessionEffect::RepCounted {
                    set_index,
                    count,
                    source,
                } => self.notify(EngineNotification::RepCounted {
                    set_index,
                    count,
                    source,
                }),
                SessionEffect::SetCompleted(set) => {
                    self.notify(EngineNotification::SetCompleted(set));
                }
                SessionEffect::ResetSensorCounter => self.sensor.reset_counter(),
                SessionEffect::RestStarted { seconds } => {
                    self.timers.schedule_interval(
                        TimerKind::RestCountdown,
                        Duration::from_millis(self.config.rest_tick_ms),
                    );
                    self.notify(EngineNotification::RestStarted { seconds });
                }
                SessionEffect::RestTicked { remaining } => {
                    self.notify(EngineNotification::RestTick { remaining });
                }
                SessionEffect::RestEnded { skipped } => {
                    self.timers.cancel(TimerKind::RestCountdown);
                    self.notify(EngineNotification::RestEnded { skipped });
                }
                SessionEffect::SetStarted { set_index } => {
                    self.notify(EngineNotification::SetStarted { set_index });
                }
                SessionEffect::Finished(reason) => self.finish(reason),
            }
        }
    }

    fn finish(&mut self, reason: FinishReason) {
        self.timers.cancel_all();

        if let Some(entry) =
            self.gateway
                .finalize(self.session.exercise_name(), self.session.sets(), reason)
        {
            self.notify(EngineNotification::Finished { reason, entry });
        }

        if self.sensor.is_attached() {
            self.sensor.close(
                &mut self.timers,
                Duration::from_millis(self.config.shutdown_timeout_ms),
            );
        }
    }

    async fn teardown(&mut self) {
        info!("Unmounting '{}'", self.session.exercise_name());
        self.timers.cancel_all();
        self.sensor
            .shutdown(
                &mut self.timers,
                Duration::from_millis(self.config.shutdown_timeout_ms),
            )
            .await;
    }

    fn publish_sensor_status(&mut self) {
        let status = self.sensor.status();
        if status != self.published_status {
            self.published_status = status;
            self.notify(EngineNotification::SensorStatus(status));
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            exercise_name: self.session.exercise_name().to_string(),
            counting_mode: self.session.counting_mode(),
            state: *self.session.state(),
            sets: self.session.sets().to_vec(),
            sensor: self.sensor.connection().clone(),
            current_weight: self.session.current_weight(),
        }
    }

    fn notify(&self, notification: EngineNotification) {
        let _ = self.notifications.send(notification);
    }
}
