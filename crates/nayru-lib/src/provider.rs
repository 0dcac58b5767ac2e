//! Upstream synthesis providers.
//!
//! The chunk-to-PCM step sits behind [`Provider`], a tagged variant chosen
//! at engine construction: [`KokoroProvider`] speaks the OpenAI-compatible
//! `/v1/audio/speech` protocol, [`MockProvider`] fabricates silence and is
//! used by tests and audio-less deployments.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use nayru_core::types::TtsConfig;
use nayru_core::wav::{decode_wav, fix_wav_sizes, write_wav, WavAudio};

/// Hard timeout for one upstream request.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Synthesis failure, split by retry policy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SynthError {
    /// Network error, timeout, or 5xx — worth retrying.
    #[error("{0}")]
    Transient(String),
    /// 4xx or malformed audio — retrying would repeat the failure.
    #[error("{0}")]
    Fatal(String),
}

/// Upstream provider, selected at engine construction.
pub enum Provider {
    Kokoro(KokoroProvider),
    Mock(MockProvider),
}

impl Provider {
    pub fn kokoro() -> Self {
        Self::Kokoro(KokoroProvider::new())
    }

    pub fn mock(mock: MockProvider) -> Self {
        Self::Mock(mock)
    }

    /// Synthesize one chunk under one config snapshot.
    pub async fn synthesize(&self, text: &str, config: &TtsConfig) -> Result<WavAudio, SynthError> {
        match self {
            Self::Kokoro(p) => p.synthesize(text, config).await,
            Self::Mock(p) => p.synthesize(text, config).await,
        }
    }
}

// ─── Kokoro (HTTP upstream) ────────────────────────────────────────────────

pub struct KokoroProvider {
    client: reqwest::Client,
}

impl KokoroProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }

    async fn synthesize(&self, text: &str, config: &TtsConfig) -> Result<WavAudio, SynthError> {
        let url = format!(
            "{}/v1/audio/speech",
            config.kokoro_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "input": text,
            "voice": config.voice,
            "model": "kokoro",
            "speed": config.speed,
            "response_format": "wav",
        });

        debug!("kokoro: POST {} chars to {url}", text.len());
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthError::Transient(format!("request failed: {e}")))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(SynthError::Transient(format!("upstream returned {status}")));
        }
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(SynthError::Fatal(format!("upstream returned {status}: {detail}")));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SynthError::Transient(format!("failed to read response body: {e}")))?;

        let wav = fix_wav_sizes(bytes.to_vec());
        decode_wav(&wav).map_err(|e| SynthError::Fatal(format!("malformed wav: {e}")))
    }
}

impl Default for KokoroProvider {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Mock ──────────────────────────────────────────────────────────────────

/// One recorded synthesis request.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub text: String,
    pub voice: String,
    pub speed: f32,
}

/// Provider that fabricates silence clips and records every request.
///
/// `failing_on` makes any chunk whose text contains the given substring fail
/// (transiently or fatally), which is how the degradation paths are
/// exercised.
#[derive(Clone)]
pub struct MockProvider {
    sample_rate: u32,
    clip_ms: u64,
    latency_ms: u64,
    fail_substring: Option<String>,
    fail_transient: bool,
    requests: Arc<Mutex<Vec<MockRequest>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            sample_rate: 24_000,
            clip_ms: 100,
            latency_ms: 0,
            fail_substring: None,
            fail_transient: false,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Duration of the silence clip returned for each chunk.
    pub fn with_clip_ms(mut self, clip_ms: u64) -> Self {
        self.clip_ms = clip_ms;
        self
    }

    /// Simulated upstream latency per request.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Fail any chunk whose text contains `substring`.
    pub fn failing_on(mut self, substring: impl Into<String>, transient: bool) -> Self {
        self.fail_substring = Some(substring.into());
        self.fail_transient = transient;
        self
    }

    /// Snapshot of every request seen so far.
    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }

    async fn synthesize(&self, text: &str, config: &TtsConfig) -> Result<WavAudio, SynthError> {
        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .push(MockRequest {
                text: text.to_string(),
                voice: config.voice.clone(),
                speed: config.speed,
            });

        if let Some(needle) = &self.fail_substring {
            if text.contains(needle.as_str()) {
                return Err(if self.fail_transient {
                    SynthError::Transient(format!("mock transient failure for {needle:?}"))
                } else {
                    SynthError::Fatal(format!("mock fatal failure for {needle:?}"))
                });
            }
        }

        let samples = vec![0i16; (self.sample_rate as u64 * self.clip_ms / 1000) as usize];
        // Round-trip through the codec so the mock exercises the same path
        // real responses take.
        let wav = write_wav(&samples, self.sample_rate);
        decode_wav(&wav).map_err(|e| SynthError::Fatal(e.to_string()))
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}
