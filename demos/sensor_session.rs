use repcount::{
    BleRepTransport, ConnectionParams, EngineNotification, ExercisePlan, InMemoryPersistence,
    Result, WorkoutEngine,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("📡 Repcount Sensor Session Example");

    // counters advertise slowly while idle
    let params = ConnectionParams::default().with_scan_timeout_ms(8_000);
    let transport = BleRepTransport::new(params).await?;
    let counters = transport.scan().await?;
    if counters.is_empty() {
        warn!("No rep counter in range yet, the engine will keep retrying");
    }
    for counter in &counters {
        info!(
            "Found {} ({}) rssi {}",
            counter.device_id,
            counter.name.as_deref().unwrap_or("unnamed"),
            counter.rssi
        );
    }

    let plan = ExercisePlan::uniform("Bench Press", 3, 8, 70.0, 90);
    let (engine, mut notifications) =
        WorkoutEngine::new(plan, Arc::new(InMemoryPersistence::new())).mount_with_sensor(transport)?;

    engine.start()?;
    info!("Press Ctrl+C to finish early");

    loop {
        tokio::select! {
            notification = notifications.recv() => {
                let Some(notification) = notification else {
                    break;
                };
                match notification {
                    EngineNotification::SensorStatus(status) => info!("📡 Sensor {}", status),
                    EngineNotification::RepCounted { set_index, count, source } => {
                        info!("Set {}: rep {} ({})", set_index, count, source);
                    }
                    EngineNotification::SetCompleted(set) => {
                        info!("✅ Set {} done: {} reps", set.index, set.actual_reps);
                    }
                    EngineNotification::RestTick { remaining } if remaining % 10 == 0 => {
                        info!("⏱️ {}s rest left", remaining);
                    }
                    EngineNotification::Finished { reason, entry } => {
                        info!("🏁 {:?}: {} reps in {} sets", reason, entry.reps_completed, entry.sets_completed);
                    }
                    EngineNotification::Submitted(_) => break,
                    EngineNotification::SubmissionFailed { reason } => {
                        error!("❌ Failed to save: {}", reason);
                        break;
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Finishing early");
                engine.finish_early()?;
            }
        }
    }

    engine.unmount().await?;
    Ok(())
}
