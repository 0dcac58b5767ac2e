//! Shared control block for the TTS pipeline.
//!
//! One [`Control`] is created per engine and shared by every stage. It owns
//! the epoch counter (the cancellation token), the live config, and the
//! observable status. It holds no references back into the pipeline, so
//! there are no cycles: stages hold `Arc<Control>`, the engine handle holds
//! the rest.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use nayru_core::types::{validate_patch, ConfigPatch, EngineError, TtsConfig, TtsStatus};

pub struct Control {
    /// Current utterance epoch. Work stamped with an older epoch is stale
    /// and must be dropped at the next pipeline boundary.
    epoch: AtomicU64,
    config: Mutex<TtsConfig>,
    status_tx: watch::Sender<TtsStatus>,
}

impl Control {
    pub fn new(config: TtsConfig) -> Arc<Self> {
        let (status_tx, _) = watch::channel(TtsStatus::idle(&config));
        Arc::new(Self {
            epoch: AtomicU64::new(0),
            config: Mutex::new(config),
            status_tx,
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Invalidate all in-flight work. Returns the new epoch.
    pub fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Snapshot of the live config. Each chunk is synthesized under exactly
    /// one snapshot.
    pub fn config(&self) -> TtsConfig {
        self.config.lock().expect("config lock poisoned").clone()
    }

    /// Validate and merge a partial config update. Takes effect at the next
    /// chunk boundary.
    pub fn apply_patch(&self, patch: ConfigPatch) -> Result<TtsConfig, EngineError> {
        validate_patch(&patch)?;
        let updated = {
            let mut config = self.config.lock().expect("config lock poisoned");
            if let Some(url) = patch.kokoro_url {
                config.kokoro_url = url;
            }
            if let Some(voice) = patch.voice {
                config.voice = voice;
            }
            if let Some(speed) = patch.speed {
                config.speed = speed;
            }
            config.clone()
        };
        let (voice, speed) = (updated.voice.clone(), updated.speed);
        self.update_status(move |s| {
            s.voice = voice;
            s.speed = speed;
        });
        Ok(updated)
    }

    pub fn update_status(&self, f: impl FnOnce(&mut TtsStatus)) {
        self.status_tx.send_modify(f);
    }

    pub fn status(&self) -> TtsStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TtsStatus> {
        self.status_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nayru_core::types::TtsState;

    fn control() -> Arc<Control> {
        Control::new(TtsConfig::new("http://localhost:8880"))
    }

    #[test]
    fn epoch_strictly_increases() {
        let c = control();
        assert_eq!(c.epoch(), 0);
        assert_eq!(c.bump_epoch(), 1);
        assert_eq!(c.bump_epoch(), 2);
        assert_eq!(c.epoch(), 2);
    }

    #[test]
    fn patch_updates_config_and_status() {
        let c = control();
        let updated = c
            .apply_patch(ConfigPatch {
                voice: Some("bm_george".into()),
                speed: Some(1.5),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.voice, "bm_george");
        assert_eq!(updated.speed, 1.5);
        let status = c.status();
        assert_eq!(status.voice, "bm_george");
        assert_eq!(status.speed, 1.5);
    }

    #[test]
    fn invalid_speed_leaves_config_untouched() {
        let c = control();
        let err = c.apply_patch(ConfigPatch {
            voice: Some("bm_george".into()),
            speed: Some(9.0),
            ..Default::default()
        });
        assert!(err.is_err());
        assert_eq!(c.config().voice, "af_heart");
        assert_eq!(c.config().speed, 1.0);
    }

    #[test]
    fn status_updates_are_observable() {
        let c = control();
        let mut rx = c.subscribe();
        c.update_status(|s| s.state = TtsState::Converting);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().state, TtsState::Converting);
    }
}
