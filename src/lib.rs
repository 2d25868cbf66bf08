#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Repcount 🏋️
//!
//! An automated workout execution engine for strength training sessions.
//!
//! The engine walks one exercise through its prescribed sets: it counts reps
//! from manual taps or from a Bluetooth Low Energy rep counter, runs the rest
//! countdown with audio cues between sets, and hands a single log entry to a
//! persistence service when the session ends.
//!
//! ## Architecture
//!
//! - **Session state machine** ([`session`]): `Idle → InSet → Resting → … → Done`.
//!   Pure; every transition returns the effects to carry out.
//! - **Rep sources** ([`reps`]): taps and sensor deltas become individual rep
//!   events against one authoritative counter.
//! - **Sensor link** ([`sensor`], [`ble`], [`protocol`]): connect, reset, subscribe,
//!   decode absolute-count frames, reconnect forever.
//! - **Rest scheduler** ([`rest`]): 1 Hz countdown with cues at 10, 5, 4, 3, 2, 1.
//! - **Completion gateway** ([`completion`]): exactly one submission per session.
//! - **Engine** ([`engine`]): one event loop that owns all of the above.
//!
//! ## Rep Counter Protocol
//!
//! The counter exposes one characteristic that notifies and accepts
//! write-without-response:
//!
//! - `[0xAA, n]`: the device's running count since its last reset
//! - a single byte other than `0xAA` in `1..=target`: one rep
//! - UTF-8 text containing "rep": one rep
//!
//! Writing `[0xAA, 0x00]` resets the device count. The engine does this on
//! every subscription and after every completed set.
//!
//! ## Quick Start
//!
//! ```no_run
//! use repcount::{
//!     BleRepTransport, ConnectionParams, EngineNotification, ExercisePlan,
//!     InMemoryPersistence, WorkoutEngine,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 3 sets of 10 at 60kg, 90s rest
//!     let plan = ExercisePlan::uniform("Back Squat", 3, 10, 60.0, 90);
//!     let sensor = BleRepTransport::new(ConnectionParams::default()).await?;
//!
//!     let (engine, mut notifications) =
//!         WorkoutEngine::new(plan, Arc::new(InMemoryPersistence::new()))
//!             .mount_with_sensor(sensor)?;
//!
//!     engine.start()?;
//!
//!     while let Some(notification) = notifications.recv().await {
//!         if let EngineNotification::Finished { entry, .. } = notification {
//!             println!("{} reps in {} sets", entry.reps_completed, entry.sets_completed);
//!             break;
//!         }
//!     }
//!
//!     engine.unmount().await?;
//!     Ok(())
//! }
//! ```

/// Audio cue output
pub mod audio;
/// Bluetooth Low Energy rep counter transport
pub mod ble;
/// Session finalization and persistence
pub mod completion;
/// Session runtime and control handle
pub mod engine;
/// Error types and handling
pub mod error;
/// Rep counter wire format
pub mod protocol;
/// Rep source normalization
pub mod reps;
/// Rest countdown
pub mod rest;
/// Rep counter link lifecycle
pub mod sensor;
/// Set/rep state machine
pub mod session;
/// Cancellable timers
pub mod timer;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use audio::{AudioOutput, LogAudio};
pub use ble::{BleRepTransport, DiscoveredCounter};
pub use completion::{InMemoryPersistence, PersistenceService};
pub use engine::{EngineHandle, EngineNotification, EngineNotifications, WorkoutEngine};
pub use error::{Result, WorkoutError};
pub use protocol::{RepDecoder, RepDelta, RepFrame};
pub use sensor::{NotificationStream, RepTransport};
pub use session::{SessionEffect, WorkoutSession};
pub use types::{
    ConnectionParams, ConnectionStatus, CountingMode, Cue, EngineConfig, ExercisePlan,
    FinishReason, RepSource, SensorConnection, SessionMode, SessionSnapshot, SessionState,
    SetPrescription, WorkoutLogEntry, WorkoutSet,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Rep counter GATT service
///
/// The common HM-10 style serial service used by most BLE rep counters.
pub const REP_SERVICE_UUID: &str = "0000FFE0-0000-1000-8000-00805F9B34FB";

/// Rep counter characteristic
///
/// Notifies rep frames and accepts the reset command without response.
pub const REP_CHAR_UUID: &str = "0000FFE1-0000-1000-8000-00805F9B34FB";
