//! nayru-lib — Voice server engine.
//!
//! The TTS pipeline (text preparation → upstream synthesis → gapless
//! playback), its transport controls, and the HTTP API. Depends on
//! nayru-core for pure types and text processing.
//!
//! The engine spawns tokio tasks, so [`tts::TtsEngine::new`] must be called
//! from within a runtime.

pub mod control;
pub mod player;
pub mod provider;
pub mod server;
pub mod tts;

// Re-export nayru-core for convenience
pub use nayru_core;
