use repcount::{
    CountingMode, EngineNotification, ExercisePlan, InMemoryPersistence, Result, SetPrescription,
    WorkoutEngine,
};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🏋️ Repcount Manual Session Example");

    let plan = ExercisePlan {
        name: "Goblet Squat".to_string(),
        sets: vec![
            SetPrescription {
                target_reps: 5,
                target_weight: 20.0,
                rest_seconds: 12,
            },
            SetPrescription {
                target_reps: 5,
                target_weight: 24.0,
                rest_seconds: 0,
            },
        ],
    };

    let store = InMemoryPersistence::new();
    let (engine, mut notifications) = WorkoutEngine::new(plan, Arc::new(store.clone()))
        .with_counting_mode(CountingMode::Manual)
        .mount()?;

    engine.start()?;

    while let Some(notification) = notifications.recv().await {
        match notification {
            EngineNotification::SetStarted { set_index } => {
                info!("▶️ Set {} started", set_index);
                if set_index == 2 {
                    engine.set_weight(22.5)?;
                }
                // Simulated lifter: one tap every 800ms
                for _ in 0..5 {
                    sleep(Duration::from_millis(800)).await;
                    engine.tap_rep(set_index)?;
                }
            }
            EngineNotification::RepCounted { count, .. } => info!("  rep {}", count),
            EngineNotification::RestTick { remaining } => info!("⏱️ {}s", remaining),
            EngineNotification::Cue(cue) => info!("🔊 {}", cue.id()),
            EngineNotification::Finished { entry, .. } => {
                info!(
                    "🏁 {}: {} sets, {} reps",
                    entry.exercise_name, entry.sets_completed, entry.reps_completed
                );
            }
            EngineNotification::Submitted(_) => {
                info!("✅ Saved");
                break;
            }
            EngineNotification::SubmissionFailed { reason } => {
                error!("❌ Failed to save: {}", reason);
                break;
            }
            _ => {}
        }
    }

    engine.unmount().await?;
    info!("Stored entries: {:?}", store.entries().await);
    Ok(())
}
