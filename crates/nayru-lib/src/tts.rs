//! TTS engine — text preparation → pipelined synthesis → gapless playback.
//!
//! Three-stage pipeline connected by bounded channels:
//!
//! ```text
//! speak("text") → prepare chunks → [chunk_tx] → synth workers (×2): provider fetch
//!     → [done_tx] → emitter: reorder by index → [clip_tx cap=4]
//!     → playback thread: gapless sink feeding (dedicated OS thread)
//! ```
//!
//! Two workers consume from a shared chunk channel, so synthesis of the next
//! chunk overlaps playback of the current one. Workers finish out of order;
//! the emitter parks early arrivals and releases clips in strictly ascending
//! index order. A watch-published cursor keeps workers from running further
//! ahead of the emit point than the player can buffer.
//!
//! Epoch-based cancellation: `speak()` and `stop()` bump an [`AtomicU64`]
//! (via [`Control`]), and every pipeline boundary compares item epochs
//! against it — all in-flight work for a superseded epoch is silently
//! discarded, so cancellation is O(1).
//!
//! [`AtomicU64`]: std::sync::atomic::AtomicU64

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

use nayru_core::text_prep::{clean_text_for_tts, prepare_chunks};
use nayru_core::types::{ConfigPatch, EngineError, TtsConfig, TtsState, TtsStatus};

use crate::control::Control;
use crate::player::{self, Clip, PlayerCmd, SinkKind};
use crate::provider::{Provider, SynthError};

/// Synthesis worker pool size: one chunk playing, one pre-fetching.
const SYNTH_WORKERS: usize = 2;
/// Decoded clips buffered ahead of playback (queue B).
const CLIP_QUEUE_DEPTH: usize = 4;
/// Prepared chunks buffered ahead of synthesis (queue A).
const CHUNK_QUEUE_DEPTH: usize = 64;
/// Retries after the first attempt, transient failures only.
const MAX_RETRIES: u32 = 2;
/// Backoff doubles from here: 200 ms, 400 ms.
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// One synthesizable unit of an utterance.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub epoch: u64,
    pub index: usize,
    /// Chunks dispatched for this utterance so far (exact for `speak`,
    /// running count for streamed input).
    pub total: usize,
    pub text: String,
}

/// Reply to a successful [`TtsEngine::speak`].
#[derive(Debug, Clone)]
pub struct SpeakReply {
    pub queued_chunks: usize,
    pub status: TtsStatus,
}

enum Cmd {
    Dispatch(Vec<Chunk>),
    StreamChunk(String),
    StreamEnd,
}

struct SynthResult {
    epoch: u64,
    index: usize,
    total: usize,
    outcome: Result<Clip, String>,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    epoch: u64,
    next: usize,
}

/// Cloneable handle to the TTS engine. All methods are non-blocking.
#[derive(Clone)]
pub struct TtsEngine {
    control: Arc<Control>,
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    player_tx: std::sync::mpsc::Sender<PlayerCmd>,
}

// ─── Engine construction ───────────────────────────────────────────────────

impl TtsEngine {
    /// Spawn the pipeline against the Kokoro upstream and the default audio
    /// device. Must be called within a tokio runtime.
    pub fn new(config: TtsConfig) -> Self {
        Self::spawn(config, Provider::kokoro(), SinkKind::Device)
    }

    /// Spawn with an explicit provider on the default audio device.
    pub fn with_provider(config: TtsConfig, provider: Provider) -> Self {
        Self::spawn(config, provider, SinkKind::Device)
    }

    /// Spawn with an explicit provider and audio output.
    pub fn spawn(config: TtsConfig, provider: Provider, sink: SinkKind) -> Self {
        let control = Control::new(config);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (chunk_tx, chunk_rx) = mpsc::channel::<Chunk>(CHUNK_QUEUE_DEPTH);
        let (done_tx, done_rx) = mpsc::channel::<SynthResult>(SYNTH_WORKERS);
        let (clip_tx, clip_rx) = mpsc::channel::<Clip>(CLIP_QUEUE_DEPTH);
        let (cursor_tx, cursor_rx) = watch::channel(Cursor { epoch: 0, next: 0 });

        // Playback OS thread (rodio OutputStream is !Send)
        let (player_tx, player_rx) = std::sync::mpsc::channel::<PlayerCmd>();
        let play_control = control.clone();
        std::thread::Builder::new()
            .name("nayru-playback".into())
            .spawn(move || {
                player::playback_thread(player_rx, clip_rx, play_control, sink);
            })
            .expect("failed to spawn playback thread");

        // Synthesis workers share the chunk channel
        let provider = Arc::new(provider);
        let chunk_rx = Arc::new(Mutex::new(chunk_rx));
        for worker_id in 0..SYNTH_WORKERS {
            tokio::spawn(synth_task(
                worker_id,
                chunk_rx.clone(),
                done_tx.clone(),
                cursor_rx.clone(),
                provider.clone(),
                control.clone(),
            ));
        }
        drop(done_tx);

        tokio::spawn(emit_task(done_rx, clip_tx, cursor_tx, control.clone()));
        tokio::spawn(dispatch_task(cmd_rx, chunk_tx, control.clone()));

        Self {
            control,
            cmd_tx,
            player_tx,
        }
    }

    // ─── Public API ────────────────────────────────────────────────────

    /// Queue text for speech, superseding whatever is playing. Returns
    /// immediately with the exact chunk count.
    pub fn speak(&self, text: &str) -> Result<SpeakReply, EngineError> {
        if text.trim().is_empty() {
            return Err(EngineError::InvalidInput("empty text".into()));
        }

        let epoch = self.control.bump_epoch();
        let _ = self.player_tx.send(PlayerCmd::Stop);

        let cleaned = clean_text_for_tts(text);
        let chunks = prepare_chunks(&cleaned);
        let total = chunks.len();

        self.control.update_status(|s| {
            s.state = if total > 0 {
                TtsState::Converting
            } else {
                TtsState::Idle
            };
            s.queue_length = total;
            s.total_sentences = total;
            s.current_sentence_index = None;
            s.last_error = None;
        });

        if total > 0 {
            let chunks = chunks
                .into_iter()
                .enumerate()
                .map(|(index, text)| Chunk {
                    epoch,
                    index,
                    total,
                    text,
                })
                .collect();
            let _ = self.cmd_tx.send(Cmd::Dispatch(chunks));
        }

        Ok(SpeakReply {
            queued_chunks: total,
            status: self.status(),
        })
    }

    /// Stop all speech immediately and drop all queued work.
    pub fn stop(&self) {
        self.control.bump_epoch();
        let _ = self.player_tx.send(PlayerCmd::Stop);
        self.control.update_status(|s| {
            s.state = TtsState::Idle;
            s.queue_length = 0;
            s.total_sentences = 0;
            s.current_sentence_index = None;
        });
    }

    /// Advance past the current clip. No-op when idle.
    pub fn skip(&self) -> TtsStatus {
        let _ = self.player_tx.send(PlayerCmd::Skip);
        self.status()
    }

    /// Pause playback. No-op unless playing.
    pub fn pause(&self) {
        let _ = self.player_tx.send(PlayerCmd::Pause);
    }

    /// Resume paused playback.
    pub fn resume(&self) {
        let _ = self.player_tx.send(PlayerCmd::Resume);
    }

    /// Current status snapshot.
    pub fn status(&self) -> TtsStatus {
        self.control.status()
    }

    /// Subscribe to status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<TtsStatus> {
        self.control.subscribe()
    }

    /// Current cancellation epoch. Strictly increases across
    /// `speak`/`stop` calls.
    pub fn epoch(&self) -> u64 {
        self.control.epoch()
    }

    /// Validate and apply a partial config update. Chunks already in flight
    /// keep the config they were issued under.
    pub fn set_config(&self, patch: ConfigPatch) -> Result<TtsConfig, EngineError> {
        self.control.apply_patch(patch)
    }

    /// Snapshot of the live config.
    pub fn get_config(&self) -> TtsConfig {
        self.control.config()
    }

    /// The chunking `speak` would apply to `text`, without speaking.
    pub fn preview_split(&self, text: &str) -> Vec<String> {
        prepare_chunks(&clean_text_for_tts(text))
    }

    /// Append a fragment of incrementally produced text. Completed sentences
    /// are dispatched into the current streaming utterance; the first
    /// fragment of a session supersedes whatever is playing.
    pub fn stream_chunk(&self, text: &str) {
        let _ = self.cmd_tx.send(Cmd::StreamChunk(text.to_string()));
    }

    /// Flush the streaming buffer and end the session.
    pub fn stream_end(&self) {
        let _ = self.cmd_tx.send(Cmd::StreamEnd);
    }
}

// ─── Dispatcher ────────────────────────────────────────────────────────────

struct StreamSession {
    epoch: u64,
    buf: String,
    next_index: usize,
}

async fn dispatch_task(
    mut cmd_rx: mpsc::UnboundedReceiver<Cmd>,
    chunk_tx: mpsc::Sender<Chunk>,
    control: Arc<Control>,
) {
    let mut stream: Option<StreamSession> = None;

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Cmd::Dispatch(chunks) => {
                stream = None;
                debug!("dispatch: {} chunks", chunks.len());
                for chunk in chunks {
                    if chunk.epoch != control.epoch() {
                        debug!("dispatch: epoch superseded, dropping remainder");
                        break;
                    }
                    if chunk_tx.send(chunk).await.is_err() {
                        return;
                    }
                }
            }
            Cmd::StreamChunk(text) => {
                let current = control.epoch();
                if stream.as_ref().map_or(true, |s| s.epoch != current) {
                    // New session: supersede whatever is playing.
                    let epoch = control.bump_epoch();
                    control.update_status(|s| {
                        s.state = TtsState::Converting;
                        s.queue_length = 0;
                        s.total_sentences = 0;
                        s.current_sentence_index = None;
                        s.last_error = None;
                    });
                    stream = Some(StreamSession {
                        epoch,
                        buf: String::new(),
                        next_index: 0,
                    });
                }
                let session = stream.as_mut().expect("stream session just ensured");

                session.buf.push_str(&text);
                let cut = complete_prefix_len(&session.buf);
                if cut > 0 {
                    let head: String = session.buf[..cut].to_string();
                    session.buf = session.buf[cut..].trim_start().to_string();
                    if !flush_stream_text(session, &head, &chunk_tx, &control).await {
                        return;
                    }
                }
            }
            Cmd::StreamEnd => {
                if let Some(mut session) = stream.take() {
                    if session.epoch == control.epoch() && !session.buf.trim().is_empty() {
                        let tail = std::mem::take(&mut session.buf);
                        if !flush_stream_text(&mut session, &tail, &chunk_tx, &control).await {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Clean, chunk, and dispatch one flushed span of streamed text.
/// Returns false when the pipeline has shut down.
async fn flush_stream_text(
    session: &mut StreamSession,
    text: &str,
    chunk_tx: &mpsc::Sender<Chunk>,
    control: &Control,
) -> bool {
    let cleaned = clean_text_for_tts(text);
    let chunks = prepare_chunks(&cleaned);
    if chunks.is_empty() {
        return true;
    }

    let added = chunks.len();
    control.update_status(|s| {
        s.queue_length += added;
        s.total_sentences += added;
        if s.state == TtsState::Idle {
            s.state = TtsState::Converting;
        }
    });
    debug!("dispatch: streaming {added} chunks (epoch {})", session.epoch);

    for text in chunks {
        let chunk = Chunk {
            epoch: session.epoch,
            index: session.next_index,
            total: session.next_index + 1,
            text,
        };
        session.next_index += 1;
        if session.epoch != control.epoch() {
            return true;
        }
        if chunk_tx.send(chunk).await.is_err() {
            return false;
        }
    }
    true
}

/// Byte length of the prefix of `buf` containing only completed sentences.
///
/// A sentence completes at an ASCII terminator followed by whitespace, or at
/// any full-width terminator. No capitalization check — the continuation is
/// not known yet.
fn complete_prefix_len(buf: &str) -> usize {
    let chars: Vec<(usize, char)> = buf.char_indices().collect();
    let mut cut = 0;
    for i in 0..chars.len() {
        let (pos, c) = chars[i];
        match c {
            '\u{3002}' | '\u{ff01}' | '\u{ff1f}' => cut = pos + c.len_utf8(),
            '.' | '!' | '?' => {
                if chars.get(i + 1).is_some_and(|&(_, n)| n.is_whitespace()) {
                    cut = pos + 1;
                }
            }
            _ => {}
        }
    }
    cut
}

// ─── Synthesis workers ─────────────────────────────────────────────────────

async fn synth_task(
    worker_id: usize,
    chunk_rx: Arc<Mutex<mpsc::Receiver<Chunk>>>,
    done_tx: mpsc::Sender<SynthResult>,
    mut cursor_rx: watch::Receiver<Cursor>,
    provider: Arc<Provider>,
    control: Arc<Control>,
) {
    loop {
        // Only one worker holds the lock while waiting for a job
        let chunk = {
            let mut rx = chunk_rx.lock().await;
            rx.recv().await
        };
        let Some(chunk) = chunk else { break };

        if chunk.epoch != control.epoch() {
            debug!("synth[{worker_id}]: discarding stale chunk");
            continue;
        }

        // Stay within the player's buffer depth of the emit cursor
        loop {
            let cursor = *cursor_rx.borrow();
            if cursor.epoch != chunk.epoch || chunk.index < cursor.next + CLIP_QUEUE_DEPTH {
                break;
            }
            if cursor_rx.changed().await.is_err() {
                return;
            }
        }

        let config = control.config();
        debug!(
            "synth[{worker_id}]: chunk {} ({} chars, epoch {})",
            chunk.index,
            chunk.text.len(),
            chunk.epoch
        );

        let Some(outcome) = synthesize_with_retry(worker_id, &provider, &chunk, &config, &control).await
        else {
            continue; // epoch superseded mid-fetch
        };

        // Recheck before enqueuing
        if chunk.epoch != control.epoch() {
            debug!("synth[{worker_id}]: discarding stale result");
            continue;
        }

        let result = SynthResult {
            epoch: chunk.epoch,
            index: chunk.index,
            total: chunk.total,
            outcome: outcome.map(|audio| Clip {
                epoch: chunk.epoch,
                index: chunk.index,
                sample_rate: audio.sample_rate,
                channels: audio.channels,
                samples: audio.samples,
            }),
        };
        if done_tx.send(result).await.is_err() {
            return;
        }
    }
}

/// One provider call with the retry policy applied: transient failures get
/// [`MAX_RETRIES`] more attempts with doubling backoff, fatal ones do not.
/// Returns `None` when the chunk's epoch was superseded.
async fn synthesize_with_retry(
    worker_id: usize,
    provider: &Provider,
    chunk: &Chunk,
    config: &TtsConfig,
    control: &Control,
) -> Option<Result<nayru_core::wav::WavAudio, String>> {
    let mut last_err = String::new();
    for attempt in 0..=MAX_RETRIES {
        if chunk.epoch != control.epoch() {
            return None;
        }
        if attempt > 0 {
            tokio::time::sleep(RETRY_BACKOFF * 2u32.pow(attempt - 1)).await;
            if chunk.epoch != control.epoch() {
                return None;
            }
        }
        match provider.synthesize(&chunk.text, config).await {
            Ok(audio) => return Some(Ok(audio)),
            Err(SynthError::Fatal(e)) => return Some(Err(e)),
            Err(SynthError::Transient(e)) => {
                warn!(
                    "synth[{worker_id}]: chunk {} attempt {} failed: {e}",
                    chunk.index,
                    attempt + 1
                );
                last_err = e;
            }
        }
    }
    Some(Err(last_err))
}

// ─── Emitter ───────────────────────────────────────────────────────────────

/// Releases synthesis results in strictly ascending index order, per epoch.
/// Failed chunks advance the cursor like successes, so one bad chunk never
/// stalls the utterance.
struct ReorderBuffer {
    epoch: u64,
    next: usize,
    successes: usize,
    pending: BTreeMap<usize, SynthResult>,
}

impl ReorderBuffer {
    fn new() -> Self {
        Self {
            epoch: 0,
            next: 0,
            successes: 0,
            pending: BTreeMap::new(),
        }
    }

    fn accept(&mut self, result: SynthResult) -> Vec<SynthResult> {
        if result.epoch != self.epoch {
            self.epoch = result.epoch;
            self.next = 0;
            self.successes = 0;
            self.pending.clear();
        }
        self.pending.insert(result.index, result);

        let mut ready = Vec::new();
        while let Some(result) = self.pending.remove(&self.next) {
            self.next += 1;
            if result.outcome.is_ok() {
                self.successes += 1;
            }
            ready.push(result);
        }
        ready
    }

    fn next_index(&self) -> usize {
        self.next
    }

    fn successes(&self) -> usize {
        self.successes
    }
}

async fn emit_task(
    mut done_rx: mpsc::Receiver<SynthResult>,
    clip_tx: mpsc::Sender<Clip>,
    cursor_tx: watch::Sender<Cursor>,
    control: Arc<Control>,
) {
    let mut reorder = ReorderBuffer::new();

    while let Some(result) = done_rx.recv().await {
        if result.epoch != control.epoch() {
            debug!("emit: discarding stale result");
            continue;
        }

        for ready in reorder.accept(result) {
            match ready.outcome {
                Ok(clip) => {
                    if clip.epoch == control.epoch() && clip_tx.send(clip).await.is_err() {
                        return;
                    }
                }
                Err(message) => {
                    warn!(
                        "emit: chunk {}/{} failed: {message}",
                        ready.index + 1,
                        ready.total
                    );
                    let note = format!("chunk {}/{} failed: {message}", ready.index + 1, ready.total);
                    let all_failed = reorder.successes() == 0;
                    control.update_status(move |s| {
                        s.queue_length = s.queue_length.saturating_sub(1);
                        s.last_error = Some(note);
                        // Nothing played and nothing left — collapse to idle.
                        if all_failed && s.queue_length == 0 && s.state == TtsState::Converting {
                            let total = s.total_sentences;
                            s.state = TtsState::Idle;
                            s.current_sentence_index = None;
                            s.total_sentences = 0;
                            s.last_error = Some(format!("all {total} chunks failed: {message}"));
                        }
                    });
                }
            }
            cursor_tx.send_replace(Cursor {
                epoch: reorder.epoch,
                next: reorder.next_index(),
            });
        }
    }
}
