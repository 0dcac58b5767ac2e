//! Shared types for the nayru voice server ecosystem.
//!
//! These types are used across nayru-lib, nayru-cli, and downstream
//! consumers. Keeping them in nayru-core means consumers can depend on types
//! without pulling in tokio, rodio, or other heavy deps.

use serde::{Deserialize, Serialize};

// ─── Config ────────────────────────────────────────────────────────────────

/// Minimum accepted playback speed.
pub const MIN_SPEED: f32 = 0.5;
/// Maximum accepted playback speed.
pub const MAX_SPEED: f32 = 2.0;

/// TTS engine configuration.
///
/// There is no `Default`: the upstream URL is deployment-specific (Kokoro
/// distributions disagree on ports), so callers must supply it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Base URL of the upstream TTS server (no trailing slash).
    pub kokoro_url: String,
    pub voice: String,
    pub speed: f32,
}

impl TtsConfig {
    /// Config with the given upstream URL and the stock voice at 1.0x speed.
    pub fn new(kokoro_url: impl Into<String>) -> Self {
        Self {
            kokoro_url: kokoro_url.into(),
            voice: "af_heart".into(),
            speed: 1.0,
        }
    }
}

/// A partial config update. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigPatch {
    pub kokoro_url: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

// ─── Transport state ───────────────────────────────────────────────────────

/// Observable TTS state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsState {
    Idle,
    Converting,
    Playing,
    Paused,
}

/// TTS status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TtsStatus {
    pub state: TtsState,
    /// Chunks dispatched for the current utterance and not yet played,
    /// skipped, or failed.
    pub queue_length: usize,
    pub voice: String,
    pub speed: f32,
    /// Index of the chunk currently at the sink, if any.
    pub current_sentence_index: Option<usize>,
    /// Chunk count of the current utterance; 0 when idle.
    pub total_sentences: usize,
    /// Most recent degradation (failed chunk, dead audio device). Cleared by
    /// the next `speak`.
    pub last_error: Option<String>,
}

impl TtsStatus {
    pub fn idle(config: &TtsConfig) -> Self {
        Self {
            state: TtsState::Idle,
            queue_length: 0,
            voice: config.voice.clone(),
            speed: config.speed,
            current_sentence_index: None,
            total_sentences: 0,
            last_error: None,
        }
    }
}

// ─── Errors ────────────────────────────────────────────────────────────────

/// Structural errors returned by engine methods.
///
/// Upstream and device failures never surface here; they degrade per-chunk
/// and are reported through [`TtsStatus::last_error`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Validate a patch against the accepted ranges without applying it.
pub fn validate_patch(patch: &ConfigPatch) -> Result<(), EngineError> {
    if let Some(speed) = patch.speed {
        if !(MIN_SPEED..=MAX_SPEED).contains(&speed) || !speed.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "speed {speed} out of range [{MIN_SPEED}, {MAX_SPEED}]"
            )));
        }
    }
    if let Some(url) = &patch.kokoro_url {
        if url.trim().is_empty() {
            return Err(EngineError::InvalidConfig("empty kokoro_url".into()));
        }
    }
    if let Some(voice) = &patch.voice {
        if voice.trim().is_empty() {
            return Err(EngineError::InvalidConfig("empty voice".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_config_defaults() {
        let cfg = TtsConfig::new("http://localhost:8880");
        assert_eq!(cfg.voice, "af_heart");
        assert_eq!(cfg.speed, 1.0);
    }

    #[test]
    fn speed_bounds_accepted() {
        for speed in [0.5, 1.0, 2.0] {
            let patch = ConfigPatch {
                speed: Some(speed),
                ..Default::default()
            };
            assert!(validate_patch(&patch).is_ok(), "speed {speed} rejected");
        }
    }

    #[test]
    fn speed_out_of_range_rejected() {
        for speed in [0.49, 2.01, -1.0, f32::NAN] {
            let patch = ConfigPatch {
                speed: Some(speed),
                ..Default::default()
            };
            assert!(validate_patch(&patch).is_err(), "speed {speed} accepted");
        }
    }

    #[test]
    fn empty_voice_rejected() {
        let patch = ConfigPatch {
            voice: Some("  ".into()),
            ..Default::default()
        };
        assert!(validate_patch(&patch).is_err());
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TtsState::Paused).unwrap(), "\"paused\"");
        assert_eq!(serde_json::to_string(&TtsState::Idle).unwrap(), "\"idle\"");
    }

    #[test]
    fn idle_status_mirrors_config() {
        let cfg = TtsConfig {
            kokoro_url: "http://x".into(),
            voice: "bm_george".into(),
            speed: 1.5,
        };
        let s = TtsStatus::idle(&cfg);
        assert_eq!(s.voice, "bm_george");
        assert_eq!(s.speed, 1.5);
        assert_eq!(s.state, TtsState::Idle);
        assert_eq!(s.total_sentences, 0);
        assert!(s.current_sentence_index.is_none());
    }
}
