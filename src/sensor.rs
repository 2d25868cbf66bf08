use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use std::time::Duration;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval, timeout, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    protocol::{reset_command, RepDecoder, RepDelta},
    timer::{TimerArena, TimerFired, TimerKind},
    types::{ConnectionStatus, EngineConfig, SensorConnection},
};

/// Raw notification payloads from the rep characteristic
pub type NotificationStream = BoxStream<'static, Bytes>;

/// Wireless transport primitives below the notification-delivery contract
#[async_trait]
pub trait RepTransport: Send + Sync + 'static {
    /// Find and connect to the rep counter, returning its device id
    async fn connect(&mut self) -> Result<String>;

    /// Subscribe to rep notifications
    async fn subscribe(&mut self) -> Result<NotificationStream>;

    /// Write a command to the device
    async fn write(&mut self, data: Bytes) -> Result<()>;

    /// The link is still up
    async fn is_connected(&self) -> bool;

    /// Stop rep notifications
    async fn unsubscribe(&mut self) -> Result<()>;

    /// Drop the link
    async fn disconnect(&mut self) -> Result<()>;
}

/// Posted by the link worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Connected, counter reset, notifications flowing
    Subscribed {
        /// Identifier of the device
        device_id: String,
    },
    /// A connection attempt did not reach the subscribed state
    ConnectFailed {
        /// Failure description
        reason: String,
    },
    /// An established link went away
    Disconnected,
    /// Raw rep characteristic payload
    Notification(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkCommand {
    Connect,
    ResetDevice,
    Shutdown,
}

enum PumpExit {
    Lost,
    Shutdown,
}

/// Connect, zero the device counter, then subscribe
async fn open_link<T: RepTransport>(transport: &mut T) -> Result<(String, NotificationStream)> {
    let device_id = transport.connect().await?;
    transport.write(reset_command()).await?;
    let stream = transport.subscribe().await?;
    Ok((device_id, stream))
}

async fn close_link<T: RepTransport>(transport: &mut T) {
    if let Err(e) = transport.unsubscribe().await {
        debug!("Unsubscribe failed: {}", e);
    }
    if let Err(e) = transport.disconnect().await {
        debug!("Disconnect failed: {}", e);
    }
}

async fn pump_notifications<T, E>(
    transport: &mut T,
    mut stream: NotificationStream,
    commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
    events: &mpsc::UnboundedSender<E>,
    health_interval: Duration,
) -> PumpExit
where
    T: RepTransport,
    E: From<LinkEvent> + Send + 'static,
{
    let mut health = interval(health_interval);
    health.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            payload = stream.next() => match payload {
                Some(payload) => {
                    if events.send(E::from(LinkEvent::Notification(payload))).is_err() {
                        return PumpExit::Shutdown;
                    }
                }
                None => {
                    warn!("Rep notification stream ended");
                    return PumpExit::Lost;
                }
            },
            command = commands.recv() => match command {
                Some(LinkCommand::ResetDevice) => {
                    if let Err(e) = transport.write(reset_command()).await {
                        warn!("Failed to reset rep counter: {}", e);
                    }
                }
                Some(LinkCommand::Connect) => debug!("Connect requested while connected"),
                Some(LinkCommand::Shutdown) | None => return PumpExit::Shutdown,
            },
            _ = health.tick() => {
                if !transport.is_connected().await {
                    warn!("Rep counter link lost");
                    return PumpExit::Lost;
                }
            }
        }
    }
}

async fn run_link_worker<T, E>(
    mut transport: T,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<E>,
    health_interval: Duration,
) where
    T: RepTransport,
    E: From<LinkEvent> + Send + 'static,
{
    while let Some(command) = commands.recv().await {
        match command {
            LinkCommand::Connect => match open_link(&mut transport).await {
                Ok((device_id, stream)) => {
                    info!("Subscribed to rep counter {}", device_id);
                    if events
                        .send(E::from(LinkEvent::Subscribed { device_id }))
                        .is_err()
                    {
                        break;
                    }

                    let exit = pump_notifications(
                        &mut transport,
                        stream,
                        &mut commands,
                        &events,
                        health_interval,
                    )
                    .await;

                    close_link(&mut transport).await;
                    match exit {
                        PumpExit::Lost => {
                            if events.send(E::from(LinkEvent::Disconnected)).is_err() {
                                return;
                            }
                        }
                        PumpExit::Shutdown => {
                            info!("Rep counter link closed");
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!("Rep counter connection attempt failed: {}", e);
                    close_link(&mut transport).await;
                    let reason = e.to_string();
                    if events
                        .send(E::from(LinkEvent::ConnectFailed { reason }))
                        .is_err()
                    {
                        return;
                    }
                }
            },
            LinkCommand::ResetDevice => debug!("No rep counter link, skipping reset"),
            LinkCommand::Shutdown => break,
        }
    }

    close_link(&mut transport).await;
    info!("Rep counter link closed");
}

async fn join_worker(mut worker: JoinHandle<()>, wait: Duration) {
    if timeout(wait, &mut worker).await.is_err() {
        warn!("Rep counter link did not close in time, aborting");
        worker.abort();
    }
}

/// Engine-side state of the rep counter link.
///
/// The transport itself lives on a worker task that reports back as
/// [`LinkEvent`]s. This half owns the status and the absolute-count baseline,
/// and schedules reconnects in the timer arena.
pub struct SensorLink {
    connection: SensorConnection,
    decoder: RepDecoder,
    commands: Option<mpsc::UnboundedSender<LinkCommand>>,
    worker: Option<JoinHandle<()>>,
    retry_attempts: u32,
    initial_retry_delay: Duration,
    retry_interval: Duration,
}

impl SensorLink {
    /// Link without a transport; reps come from manual input only
    #[must_use]
    pub fn detached() -> Self {
        Self {
            connection: SensorConnection::default(),
            decoder: RepDecoder::new(),
            commands: None,
            worker: None,
            retry_attempts: 0,
            initial_retry_delay: Duration::ZERO,
            retry_interval: Duration::ZERO,
        }
    }

    /// Spawn the link worker for `transport`. No connection is attempted until
    /// [`connect`](Self::connect).
    pub fn spawn<T, E>(transport: T, events: mpsc::UnboundedSender<E>, config: &EngineConfig) -> Self
    where
        T: RepTransport,
        E: From<LinkEvent> + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_link_worker(
            transport,
            command_rx,
            events,
            Duration::from_millis(config.health_check_interval_ms),
        ));

        Self {
            connection: SensorConnection::default(),
            decoder: RepDecoder::new(),
            commands: Some(command_tx),
            worker: Some(worker),
            retry_attempts: 0,
            initial_retry_delay: Duration::from_millis(config.initial_retry_delay_ms),
            retry_interval: Duration::from_millis(config.retry_interval_ms),
        }
    }

    /// Current link view
    #[must_use]
    pub const fn connection(&self) -> &SensorConnection {
        &self.connection
    }

    /// Link status
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.connection.status
    }

    /// A transport is attached and not shut down
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.commands.is_some()
    }

    /// Start connecting. Returns false without a transport or when already linked.
    pub fn connect(&mut self) -> bool {
        if self.connection.status != ConnectionStatus::Disconnected {
            return false;
        }
        if !self.send(LinkCommand::Connect) {
            return false;
        }
        info!("Connecting to rep counter");
        self.connection.status = ConnectionStatus::Connecting;
        true
    }

    /// Worker reports a live subscription
    pub fn on_subscribed(&mut self, device_id: String) {
        if !self.is_attached() {
            return;
        }
        self.connection.device_id = Some(device_id);
        self.connection.status = ConnectionStatus::Connected;
        self.retry_attempts = 0;
        self.decoder.reset();
        self.connection.last_absolute_count = 0;
    }

    /// Worker reports a failed attempt or a dropped link; schedule the next attempt
    pub fn on_link_lost<E>(&mut self, timers: &mut TimerArena<E>)
    where
        E: From<TimerFired> + Send + 'static,
    {
        if !self.is_attached() {
            return;
        }
        self.connection.status = ConnectionStatus::Connecting;

        let delay = if self.retry_attempts == 0 {
            self.initial_retry_delay
        } else {
            self.retry_interval
        };
        self.retry_attempts = self.retry_attempts.saturating_add(1);

        debug!(
            "Reconnect attempt {} in {}ms",
            self.retry_attempts,
            delay.as_millis()
        );
        timers.schedule_once(TimerKind::Reconnect, delay);
    }

    /// Reconnect timer elapsed
    pub fn on_reconnect_due(&mut self) {
        if self.connection.status == ConnectionStatus::Connecting {
            self.send(LinkCommand::Connect);
        }
    }

    /// Decode a payload for the active set
    pub fn on_notification(&mut self, payload: &[u8], target_reps: u32) -> Option<RepDelta> {
        if self.connection.status != ConnectionStatus::Connected {
            return None;
        }
        let Some(delta) = self.decoder.decode(payload, target_reps) else {
            debug!("Discarding rep payload {:02X?}", payload);
            return None;
        };
        self.connection.last_absolute_count = self.decoder.last_absolute_count();
        Some(delta)
    }

    /// Zero the baseline and ask the device to zero its own count.
    ///
    /// Until the device reports a total below the old baseline, absolute
    /// frames still carrying the old total are discarded.
    pub fn reset_counter(&mut self) {
        self.connection.last_absolute_count = 0;
        if self.connection.status == ConnectionStatus::Connected
            && self.send(LinkCommand::ResetDevice)
        {
            self.decoder.await_device_reset();
        } else {
            // next subscription writes the reset before any frame flows
            self.decoder.reset();
        }
    }

    /// Cancel any pending reconnect, then unsubscribe and disconnect, waiting
    /// at most `wait` for the worker to finish
    pub async fn shutdown<E>(&mut self, timers: &mut TimerArena<E>, wait: Duration)
    where
        E: From<TimerFired> + Send + 'static,
    {
        if let Some(worker) = self.stop(timers) {
            join_worker(worker, wait).await;
        }
    }

    /// Same as [`shutdown`](Self::shutdown) without waiting; the worker is
    /// joined (or aborted after `wait`) in the background
    pub fn close<E>(&mut self, timers: &mut TimerArena<E>, wait: Duration)
    where
        E: From<TimerFired> + Send + 'static,
    {
        if let Some(worker) = self.stop(timers) {
            tokio::spawn(join_worker(worker, wait));
        }
    }

    fn stop<E>(&mut self, timers: &mut TimerArena<E>) -> Option<JoinHandle<()>>
    where
        E: From<TimerFired> + Send + 'static,
    {
        timers.cancel(TimerKind::Reconnect);

        if let Some(commands) = self.commands.take() {
            let _ = commands.send(LinkCommand::Shutdown);
        }

        self.connection.status = ConnectionStatus::Disconnected;
        self.decoder.reset();
        self.connection.last_absolute_count = 0;
        self.worker.take()
    }

    fn send(&self, command: LinkCommand) -> bool {
        self.commands
            .as_ref()
            .is_some_and(|commands| commands.send(command).is_ok())
    }
}

impl Drop for SensorLink {
    fn drop(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(LinkCommand::Shutdown);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::WorkoutError;
    use futures::channel::mpsc as stream_channel;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockState {
        connected: bool,
        payloads: Option<stream_channel::UnboundedSender<Bytes>>,
        writes: Vec<Bytes>,
        connects: u32,
        failures_left: u32,
        stall_connect: bool,
        unsubscribes: u32,
        disconnects: u32,
    }

    /// Scripted rep counter shared between a test and the link worker
    #[derive(Clone, Default)]
    pub(crate) struct MockSensor {
        state: Arc<Mutex<MockState>>,
    }

    impl MockSensor {
        pub(crate) fn failing_first(attempts: u32) -> Self {
            let sensor = Self::default();
            sensor.state.lock().unwrap().failures_left = attempts;
            sensor
        }

        /// Connection attempts never resolve
        pub(crate) fn stalled() -> Self {
            let sensor = Self::default();
            sensor.state.lock().unwrap().stall_connect = true;
            sensor
        }

        pub(crate) fn push(&self, payload: &[u8]) {
            let state = self.state.lock().unwrap();
            if let Some(payloads) = &state.payloads {
                let _ = payloads.unbounded_send(Bytes::copy_from_slice(payload));
            }
        }

        pub(crate) fn drop_link(&self) {
            let mut state = self.state.lock().unwrap();
            state.connected = false;
            state.payloads = None;
        }

        pub(crate) fn writes(&self) -> Vec<Bytes> {
            self.state.lock().unwrap().writes.clone()
        }

        pub(crate) fn connects(&self) -> u32 {
            self.state.lock().unwrap().connects
        }

        pub(crate) fn closed(&self) -> (u32, u32) {
            let state = self.state.lock().unwrap();
            (state.unsubscribes, state.disconnects)
        }
    }

    #[async_trait]
    impl RepTransport for MockSensor {
        async fn connect(&mut self) -> Result<String> {
            let stalled = self.state.lock().unwrap().stall_connect;
            if stalled {
                futures::future::pending::<()>().await;
            }

            let mut state = self.state.lock().unwrap();
            if state.failures_left > 0 {
                state.failures_left -= 1;
                return Err(WorkoutError::DeviceNotFound);
            }
            state.connected = true;
            state.connects += 1;
            Ok("mock-counter".to_string())
        }

        async fn subscribe(&mut self) -> Result<NotificationStream> {
            let (tx, rx) = stream_channel::unbounded();
            self.state.lock().unwrap().payloads = Some(tx);
            Ok(rx.boxed())
        }

        async fn write(&mut self, data: Bytes) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if !state.connected {
                return Err(WorkoutError::Disconnected);
            }
            state.writes.push(data);
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            self.state.lock().unwrap().connected
        }

        async fn unsubscribe(&mut self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.unsubscribes += 1;
            state.payloads = None;
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.disconnects += 1;
            state.connected = false;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockSensor;
    use super::*;
    use crate::protocol::{REP_COUNT_TAG, RESET_COMMAND};

    #[derive(Debug)]
    enum TestEvent {
        Link(LinkEvent),
        Timer(TimerFired),
    }

    impl From<LinkEvent> for TestEvent {
        fn from(value: LinkEvent) -> Self {
            Self::Link(value)
        }
    }

    impl From<TimerFired> for TestEvent {
        fn from(value: TimerFired) -> Self {
            Self::Timer(value)
        }
    }

    struct Harness {
        link: SensorLink,
        timers: TimerArena<TestEvent>,
        events: mpsc::UnboundedReceiver<TestEvent>,
    }

    impl Harness {
        fn new(sensor: MockSensor) -> Self {
            let (tx, events) = mpsc::unbounded_channel();
            let link = SensorLink::spawn(sensor, tx.clone(), &EngineConfig::default());
            Self {
                link,
                timers: TimerArena::new(tx),
                events,
            }
        }

        /// Apply link/timer events the way the engine does until a
        /// notification arrives or the link subscribes.
        async fn drive(&mut self) -> TestEvent {
            loop {
                let event = self.events.recv().await.unwrap();
                match &event {
                    TestEvent::Link(LinkEvent::Subscribed { device_id }) => {
                        self.link.on_subscribed(device_id.clone());
                        return event;
                    }
                    TestEvent::Link(LinkEvent::ConnectFailed { .. } | LinkEvent::Disconnected) => {
                        self.link.on_link_lost(&mut self.timers);
                    }
                    TestEvent::Timer(fired) => {
                        if self.timers.take(*fired) {
                            self.link.on_reconnect_due();
                        }
                    }
                    TestEvent::Link(LinkEvent::Notification(_)) => return event,
                }
            }
        }

        async fn next_delta(&mut self, target_reps: u32) -> Option<RepDelta> {
            match self.drive().await {
                TestEvent::Link(LinkEvent::Notification(payload)) => {
                    self.link.on_notification(&payload, target_reps)
                }
                other => panic!("expected notification, got {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_resets_device_and_decodes_frames() {
        let sensor = MockSensor::default();
        let mut harness = Harness::new(sensor.clone());

        assert!(harness.link.connect());
        assert_eq!(harness.link.status(), ConnectionStatus::Connecting);
        assert!(!harness.link.connect());

        harness.drive().await;
        assert_eq!(harness.link.status(), ConnectionStatus::Connected);
        assert_eq!(
            harness.link.connection().device_id.as_deref(),
            Some("mock-counter")
        );
        assert_eq!(sensor.writes(), vec![Bytes::from_static(&RESET_COMMAND)]);

        sensor.push(&[REP_COUNT_TAG, 3]);
        sensor.push(&[REP_COUNT_TAG, 3]);
        sensor.push(&[REP_COUNT_TAG, 7]);
        assert_eq!(harness.next_delta(10).await, Some(RepDelta(3)));
        assert_eq!(harness.next_delta(10).await, None);
        assert_eq!(harness.next_delta(10).await, Some(RepDelta(4)));
        assert_eq!(harness.link.connection().last_absolute_count, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resets_baseline() {
        let sensor = MockSensor::default();
        let mut harness = Harness::new(sensor.clone());
        harness.link.connect();
        harness.drive().await;

        sensor.push(&[REP_COUNT_TAG, 3]);
        assert_eq!(harness.next_delta(10).await, Some(RepDelta(3)));

        sensor.drop_link();
        harness.drive().await;

        assert_eq!(harness.link.status(), ConnectionStatus::Connected);
        assert_eq!(sensor.connects(), 2);
        assert_eq!(harness.link.connection().last_absolute_count, 0);

        sensor.push(&[REP_COUNT_TAG, 4]);
        assert_eq!(harness.next_delta(10).await, Some(RepDelta(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delays_first_short_then_longer() {
        let sensor = MockSensor::failing_first(2);
        let mut harness = Harness::new(sensor.clone());
        let started = tokio::time::Instant::now();

        harness.link.connect();
        harness.drive().await;

        // 1s before the first retry, 2s before the second
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_millis(3_500));
        assert_eq!(harness.link.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_counter_writes_reset_command() {
        let sensor = MockSensor::default();
        let mut harness = Harness::new(sensor.clone());
        harness.link.connect();
        harness.drive().await;

        sensor.push(&[REP_COUNT_TAG, 5]);
        harness.next_delta(10).await;

        harness.link.reset_counter();
        assert_eq!(harness.link.connection().last_absolute_count, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            sensor.writes(),
            vec![
                Bytes::from_static(&RESET_COMMAND),
                Bytes::from_static(&RESET_COMMAND)
            ]
        );

        sensor.push(&[REP_COUNT_TAG, 2]);
        assert_eq!(harness.next_delta(10).await, Some(RepDelta(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_total_after_reset_is_discarded() {
        let sensor = MockSensor::default();
        let mut harness = Harness::new(sensor.clone());
        harness.link.connect();
        harness.drive().await;

        sensor.push(&[REP_COUNT_TAG, 10]);
        assert_eq!(harness.next_delta(10).await, Some(RepDelta(10)));

        harness.link.reset_counter();

        // the device repeats its total before the reset lands
        sensor.push(&[REP_COUNT_TAG, 10]);
        assert_eq!(harness.next_delta(10).await, None);
        assert_eq!(harness.link.connection().last_absolute_count, 0);

        sensor.push(&[REP_COUNT_TAG, 0]);
        assert_eq!(harness.next_delta(10).await, None);
        sensor.push(&[REP_COUNT_TAG, 4]);
        assert_eq!(harness.next_delta(10).await, Some(RepDelta(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_returns_without_joining_worker() {
        let sensor = MockSensor::stalled();
        let mut harness = Harness::new(sensor.clone());
        harness.link.connect();
        tokio::task::yield_now().await;

        harness.link.close(&mut harness.timers, Duration::from_secs(2));
        assert_eq!(harness.link.status(), ConnectionStatus::Disconnected);
        assert!(!harness.link.is_attached());
        assert!(!harness.link.connect());

        // the stuck worker is aborted in the background
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(sensor.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_unsubscribes_and_disconnects() {
        let sensor = MockSensor::default();
        let mut harness = Harness::new(sensor.clone());
        harness.link.connect();
        harness.drive().await;

        harness
            .link
            .shutdown(&mut harness.timers, Duration::from_secs(2))
            .await;

        assert_eq!(harness.link.status(), ConnectionStatus::Disconnected);
        assert!(!harness.link.is_attached());
        let (unsubscribes, disconnects) = sensor.closed();
        assert!(unsubscribes >= 1);
        assert!(disconnects >= 1);

        // a late payload cannot reach the session
        assert!(harness
            .link
            .on_notification(&[REP_COUNT_TAG, 2], 10)
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_reconnect() {
        let sensor = MockSensor::failing_first(u32::MAX);
        let mut harness = Harness::new(sensor.clone());
        harness.link.connect();

        let event = harness.events.recv().await.unwrap();
        assert!(matches!(
            event,
            TestEvent::Link(LinkEvent::ConnectFailed { .. })
        ));
        harness.link.on_link_lost(&mut harness.timers);
        assert!(harness.timers.is_pending(TimerKind::Reconnect));

        harness
            .link
            .shutdown(&mut harness.timers, Duration::from_secs(2))
            .await;
        assert!(!harness.timers.is_pending(TimerKind::Reconnect));
    }

    #[test]
    fn test_detached_link_never_connects() {
        let mut link = SensorLink::detached();
        assert!(!link.connect());
        assert_eq!(link.status(), ConnectionStatus::Disconnected);
        assert!(link.on_notification(&[REP_COUNT_TAG, 1], 10).is_none());
    }
}
