//! Playback stage — a dedicated OS thread owning the audio sink.
//!
//! rodio's `OutputStream` is `!Send`, so the sink lives on this thread and
//! every mutation happens here. Clips arrive on a bounded queue; transport
//! commands arrive on a mailbox that is polled between sub-buffer writes
//! (≤50 ms granularity), so pause/skip/stop take effect mid-clip.
//!
//! Each clip is fed to the sink in small slices, throttled by sink
//! occupancy. Keeping a few slices queued means the next clip's first slice
//! lands before the previous clip's last one drains — playback is gapless
//! across clip boundaries.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tokio::sync::mpsc as async_mpsc;
use tracing::{debug, error};

use nayru_core::types::TtsState;

use crate::control::Control;

/// Mailbox poll interval while blocked.
const MAILBOX_POLL: Duration = Duration::from_millis(50);
/// Sub-buffer size fed to the sink.
const FEED_SLICE_MS: u32 = 50;
/// Slices kept queued in the sink while feeding.
const SINK_QUEUE_AHEAD: usize = 4;

/// Decoded PCM for one chunk.
#[derive(Debug, Clone)]
pub struct Clip {
    pub epoch: u64,
    pub index: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

/// Transport commands for the playback thread.
#[derive(Debug, Clone, Copy)]
pub enum PlayerCmd {
    Pause,
    Resume,
    Skip,
    Stop,
}

/// Audio output selection at engine construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// The default OS output device via rodio.
    Device,
    /// A timed drain simulation: no audio hardware required, identical
    /// transport behavior.
    Null,
}

enum FeedEnd {
    Completed,
    Skipped,
    Aborted,
    Shutdown,
}

pub(crate) fn playback_thread(
    cmd_rx: Receiver<PlayerCmd>,
    mut clip_rx: async_mpsc::Receiver<Clip>,
    control: Arc<Control>,
    kind: SinkKind,
) {
    let mut output: Option<Output> = None;
    let mut paused = false;
    let mut stashed: Option<Clip> = None;

    loop {
        let clip = match stashed.take() {
            Some(clip) => Some(clip),
            None => match clip_rx.try_recv() {
                Ok(clip) => Some(clip),
                Err(async_mpsc::error::TryRecvError::Empty) => None,
                Err(async_mpsc::error::TryRecvError::Disconnected) => break,
            },
        };

        let Some(clip) = clip else {
            match cmd_rx.recv_timeout(MAILBOX_POLL) {
                Ok(cmd) => handle_idle_cmd(
                    cmd,
                    &mut output,
                    &mut paused,
                    &mut stashed,
                    &mut clip_rx,
                    &control,
                ),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            maybe_go_idle(&mut output, &control, paused);
            continue;
        };

        if clip.epoch != control.epoch() {
            debug!("playback: discarding stale clip (epoch {})", clip.epoch);
            continue;
        }

        if output.is_none() {
            match Output::open(kind) {
                Ok(out) => output = Some(out),
                Err(e) => {
                    error!("playback: failed to open audio output: {e}");
                    control.update_status(|s| {
                        s.last_error = Some(format!("audio output unavailable: {e}"));
                        s.queue_length = s.queue_length.saturating_sub(1);
                        if s.queue_length == 0 && s.state != TtsState::Idle {
                            s.state = TtsState::Idle;
                            s.current_sentence_index = None;
                            s.total_sentences = 0;
                        }
                    });
                    // Dropped this clip; the next one retries the open.
                    continue;
                }
            }
        }
        let out = output.as_mut().expect("output just opened");

        let index = clip.index;
        let state = if paused { TtsState::Paused } else { TtsState::Playing };
        control.update_status(move |s| {
            s.current_sentence_index = Some(index);
            s.state = state;
        });

        match feed_clip(&clip, out, &cmd_rx, &control, &mut paused) {
            FeedEnd::Completed | FeedEnd::Skipped => {
                if clip.epoch == control.epoch() {
                    control.update_status(|s| {
                        s.queue_length = s.queue_length.saturating_sub(1);
                    });
                }
            }
            FeedEnd::Aborted => {}
            FeedEnd::Shutdown => break,
        }
    }

    if let Some(mut out) = output {
        out.clear();
    }
}

/// Feed one clip into the sink in ≤50 ms slices, polling the mailbox and
/// the epoch between writes.
fn feed_clip(
    clip: &Clip,
    out: &mut Output,
    cmd_rx: &Receiver<PlayerCmd>,
    control: &Control,
    paused: &mut bool,
) -> FeedEnd {
    let frames_per_slice = (clip.sample_rate / 1000 * FEED_SLICE_MS).max(1) as usize;
    let samples_per_slice = frames_per_slice * clip.channels.max(1) as usize;
    let mut offset = 0;

    while offset < clip.samples.len() {
        loop {
            match cmd_rx.try_recv() {
                Ok(PlayerCmd::Pause) => {
                    if !*paused {
                        *paused = true;
                        out.pause();
                        control.update_status(|s| {
                            if s.state == TtsState::Playing {
                                s.state = TtsState::Paused;
                            }
                        });
                    }
                }
                Ok(PlayerCmd::Resume) => {
                    if *paused {
                        *paused = false;
                        out.resume();
                        control.update_status(|s| {
                            if s.state == TtsState::Paused {
                                s.state = TtsState::Playing;
                            }
                        });
                    }
                }
                Ok(PlayerCmd::Skip) => {
                    out.clear();
                    return FeedEnd::Skipped;
                }
                Ok(PlayerCmd::Stop) => {
                    *paused = false;
                    out.clear();
                    return FeedEnd::Aborted;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => return FeedEnd::Shutdown,
            }

            if clip.epoch != control.epoch() {
                *paused = false;
                out.clear();
                return FeedEnd::Aborted;
            }

            if *paused {
                std::thread::sleep(MAILBOX_POLL);
                continue;
            }
            if out.queued() < SINK_QUEUE_AHEAD {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        let end = (offset + samples_per_slice).min(clip.samples.len());
        out.append(clip.sample_rate, clip.channels, clip.samples[offset..end].to_vec());
        offset = end;
    }

    FeedEnd::Completed
}

fn handle_idle_cmd(
    cmd: PlayerCmd,
    output: &mut Option<Output>,
    paused: &mut bool,
    stashed: &mut Option<Clip>,
    clip_rx: &mut async_mpsc::Receiver<Clip>,
    control: &Control,
) {
    match cmd {
        PlayerCmd::Pause => {
            if control.status().state == TtsState::Playing {
                *paused = true;
                if let Some(out) = output {
                    out.pause();
                }
                control.update_status(|s| s.state = TtsState::Paused);
            }
        }
        PlayerCmd::Resume => {
            if *paused {
                *paused = false;
                if let Some(out) = output {
                    out.resume();
                }
                control.update_status(|s| {
                    if s.state == TtsState::Paused {
                        s.state = TtsState::Playing;
                    }
                });
            }
        }
        // No clip at the sink — nothing to skip.
        PlayerCmd::Skip => {}
        PlayerCmd::Stop => {
            *paused = false;
            if let Some(out) = output {
                out.clear();
            }
            // Drop everything queued for superseded epochs. A clip from a
            // speak() that already followed the stop stays.
            loop {
                match clip_rx.try_recv() {
                    Ok(clip) if clip.epoch == control.epoch() => {
                        *stashed = Some(clip);
                        break;
                    }
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        }
    }
}

/// Transition Playing → Idle once the last chunk of the utterance has fully
/// drained from the sink.
fn maybe_go_idle(output: &mut Option<Output>, control: &Control, paused: bool) {
    if paused {
        return;
    }
    let status = control.status();
    if status.state != TtsState::Playing || status.queue_length != 0 {
        return;
    }
    let drained = output.as_mut().map_or(true, |out| out.is_empty());
    if drained {
        control.update_status(|s| {
            if s.state == TtsState::Playing && s.queue_length == 0 {
                s.state = TtsState::Idle;
                s.current_sentence_index = None;
                s.total_sentences = 0;
            }
        });
    }
}

// ─── Audio outputs ─────────────────────────────────────────────────────────

enum Output {
    Device {
        _stream: OutputStream,
        handle: OutputStreamHandle,
        sink: Sink,
    },
    Null(NullSink),
}

impl Output {
    fn open(kind: SinkKind) -> Result<Self, String> {
        match kind {
            SinkKind::Null => Ok(Self::Null(NullSink::new())),
            SinkKind::Device => {
                let (stream, handle) = OutputStream::try_default().map_err(|e| e.to_string())?;
                let sink = Sink::try_new(&handle).map_err(|e| e.to_string())?;
                Ok(Self::Device {
                    _stream: stream,
                    handle,
                    sink,
                })
            }
        }
    }

    fn append(&mut self, sample_rate: u32, channels: u16, samples: Vec<i16>) {
        match self {
            Self::Device { sink, .. } => {
                sink.append(SamplesBuffer::new(channels, sample_rate, samples));
            }
            Self::Null(null) => {
                null.append(slice_duration(samples.len(), channels, sample_rate));
            }
        }
    }

    fn queued(&mut self) -> usize {
        match self {
            Self::Device { sink, .. } => sink.len(),
            Self::Null(null) => null.queued(),
        }
    }

    fn is_empty(&mut self) -> bool {
        match self {
            Self::Device { sink, .. } => sink.empty(),
            Self::Null(null) => null.queued() == 0,
        }
    }

    fn pause(&mut self) {
        match self {
            Self::Device { sink, .. } => sink.pause(),
            Self::Null(null) => null.pause(),
        }
    }

    fn resume(&mut self) {
        match self {
            Self::Device { sink, .. } => sink.play(),
            Self::Null(null) => null.resume(),
        }
    }

    fn clear(&mut self) {
        match self {
            Self::Device { handle, sink, .. } => {
                sink.stop();
                match Sink::try_new(handle) {
                    Ok(fresh) => *sink = fresh,
                    Err(e) => error!("playback: failed to recreate sink: {e}"),
                }
            }
            Self::Null(null) => null.clear(),
        }
    }
}

fn slice_duration(samples: usize, channels: u16, sample_rate: u32) -> Duration {
    let frames = samples as f64 / channels.max(1) as f64;
    Duration::from_secs_f64(frames / sample_rate.max(1) as f64)
}

/// Wall-clock drain simulation of an audio sink.
struct NullSink {
    buffers: VecDeque<Duration>,
    last_tick: Instant,
    paused: bool,
}

impl NullSink {
    fn new() -> Self {
        Self {
            buffers: VecDeque::new(),
            last_tick: Instant::now(),
            paused: false,
        }
    }

    /// Consume elapsed wall-clock time from the front of the queue.
    fn tick(&mut self) {
        let now = Instant::now();
        if !self.paused {
            let mut elapsed = now.duration_since(self.last_tick);
            while let Some(front) = self.buffers.front_mut() {
                if elapsed >= *front {
                    elapsed -= *front;
                    self.buffers.pop_front();
                } else {
                    *front -= elapsed;
                    break;
                }
            }
        }
        self.last_tick = now;
    }

    fn append(&mut self, duration: Duration) {
        self.tick();
        self.buffers.push_back(duration);
    }

    fn queued(&mut self) -> usize {
        self.tick();
        self.buffers.len()
    }

    fn pause(&mut self) {
        self.tick();
        self.paused = true;
    }

    fn resume(&mut self) {
        self.last_tick = Instant::now();
        self.paused = false;
    }

    fn clear(&mut self) {
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_drains_in_real_time() {
        let mut sink = NullSink::new();
        sink.append(Duration::from_millis(20));
        sink.append(Duration::from_millis(20));
        assert_eq!(sink.queued(), 2);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(sink.queued(), 0);
    }

    #[test]
    fn null_sink_holds_while_paused() {
        let mut sink = NullSink::new();
        sink.append(Duration::from_millis(10));
        sink.pause();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(sink.queued(), 1);
        sink.resume();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(sink.queued(), 0);
    }

    #[test]
    fn null_sink_clear_empties_queue() {
        let mut sink = NullSink::new();
        sink.append(Duration::from_secs(5));
        sink.clear();
        assert_eq!(sink.queued(), 0);
    }

    #[test]
    fn slice_duration_accounts_for_channels() {
        assert_eq!(
            slice_duration(24_000, 1, 24_000),
            Duration::from_secs(1)
        );
        assert_eq!(
            slice_duration(24_000, 2, 24_000),
            Duration::from_millis(500)
        );
    }
}
