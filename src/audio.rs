use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{error::Result, types::Cue};

/// Audio subsystem that plays named cues
#[async_trait]
pub trait AudioOutput: Send + Sync + 'static {
    /// Play a cue; resolves when playback finishes
    async fn play(&self, cue: Cue) -> Result<()>;
}

/// Queues cues for one background player so they sound in request order.
///
/// Requesting a cue never waits for playback. Dropping the dispatcher lets the
/// player finish what is queued and stop.
pub struct CueDispatcher {
    queue: mpsc::UnboundedSender<Cue>,
}

impl CueDispatcher {
    /// Spawn the player for `audio`
    #[must_use]
    pub fn spawn(audio: Arc<dyn AudioOutput>) -> Self {
        let (queue, mut cues) = mpsc::unbounded_channel::<Cue>();
        tokio::spawn(async move {
            while let Some(cue) = cues.recv().await {
                if let Err(e) = audio.play(cue).await {
                    warn!("Failed to play {} cue: {}", cue, e);
                }
            }
        });
        Self { queue }
    }

    /// Queue `cue` behind anything still playing
    pub fn dispatch(&self, cue: Cue) {
        if self.queue.send(cue).is_err() {
            warn!("Audio player stopped, dropping {} cue", cue);
        }
    }
}

/// Writes cues to the log instead of a speaker
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAudio;

#[async_trait]
impl AudioOutput for LogAudio {
    async fn play(&self, cue: Cue) -> Result<()> {
        info!("🔊 {}", cue);
        Ok(())
    }
}
