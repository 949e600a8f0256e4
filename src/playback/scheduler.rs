use super::sink::PlaybackSink;
use crate::error::EngineError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Playback scheduling parameters
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Sample rate of inbound model audio
    pub sample_rate: u32,
    /// Frame size handed to the sink. 320ms balances scheduling overhead
    /// against responsiveness.
    pub frame_duration_ms: u64,
    /// Fixed latency before the first frame starts
    pub startup_latency_ms: u64,
    /// Horizon within which frames are scheduled ahead of the clock
    pub lookahead_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            frame_duration_ms: 320,
            startup_latency_ms: 50,
            lookahead_ms: 200,
        }
    }
}

impl PlaybackConfig {
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as u64 * self.frame_duration_ms / 1000) as usize
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Finishing,
}

type FinishCallback = Box<dyn FnOnce() + Send>;

struct Inner {
    state: PlaybackState,
    /// Accumulates decoded samples until a full frame can be sliced off
    pending: Vec<f32>,
    /// Full frames awaiting scheduling, FIFO
    queue: VecDeque<Vec<f32>>,
    /// Next scheduled start time; None while idle
    cursor: Option<Instant>,
    finish_callbacks: Vec<FinishCallback>,
    /// Bumped by stop() so a superseded scheduling loop exits instead of
    /// replaying stale state
    epoch: u64,
    scheduled_samples: u64,
}

/// Plays a stream of small, irregularly-sized, irregularly-timed PCM chunks
/// with no gaps or clicks.
///
/// Incoming chunks accumulate and are sliced into fixed-size frames on a
/// FIFO queue. A self-rescheduling loop hands each frame to the sink when
/// its start time falls within the look-ahead window, advancing a monotonic
/// cursor by one frame duration per frame and clamping to "now" if the loop
/// ever falls behind.
///
/// Two ways down: `finish_playback` drains what is queued and then fires its
/// callback (turn completion must not clip the last word), `stop` cuts
/// everything instantly (barge-in, where the cut IS the correct behavior).
pub struct PlaybackScheduler {
    config: PlaybackConfig,
    sink: Arc<dyn PlaybackSink>,
    inner: Arc<Mutex<Inner>>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackScheduler {
    pub fn new(sink: Arc<dyn PlaybackSink>, config: PlaybackConfig) -> Self {
        info!(
            "Playback scheduler initialized: {}Hz, {}ms frames, {}ms lookahead (sink: {})",
            config.sample_rate,
            config.frame_duration_ms,
            config.lookahead_ms,
            sink.name()
        );

        Self {
            config,
            sink,
            inner: Arc::new(Mutex::new(Inner {
                state: PlaybackState::Idle,
                pending: Vec::new(),
                queue: VecDeque::new(),
                cursor: None,
                finish_callbacks: Vec::new(),
                epoch: 0,
                scheduled_samples: 0,
            })),
            loop_task: Mutex::new(None),
        }
    }

    /// Append raw little-endian PCM16 to the playback stream.
    ///
    /// No-op while Finishing: new audio must not revive a stream that is
    /// intentionally winding down.
    pub fn stream_audio(&self, pcm: &[u8]) {
        let samples = pcm16_to_f32(pcm);
        let frame_samples = self.config.frame_samples();

        let spawn_epoch = {
            let mut inner = self.inner.lock().expect("playback lock poisoned");

            if inner.state == PlaybackState::Finishing {
                debug!("Dropping {} samples while finishing", samples.len());
                return;
            }

            inner.pending.extend(samples);

            while inner.pending.len() >= frame_samples {
                let frame: Vec<f32> = inner.pending.drain(..frame_samples).collect();
                inner.queue.push_back(frame);
            }

            if inner.state == PlaybackState::Idle && !inner.queue.is_empty() {
                inner.state = PlaybackState::Playing;
                inner.cursor =
                    Some(Instant::now() + Duration::from_millis(self.config.startup_latency_ms));
                Some(inner.epoch)
            } else {
                None
            }
        };

        if let Some(epoch) = spawn_epoch {
            self.spawn_loop(epoch);
        }
    }

    /// Stop accepting new audio, let the queue drain, then invoke
    /// `on_finish` exactly once — synchronously if nothing is queued.
    ///
    /// Any partial accumulation remainder is flushed as a final short frame
    /// first, so no tail samples are lost.
    pub fn finish_playback(&self, on_finish: impl FnOnce() + Send + 'static) {
        let (immediate, spawn_epoch) = {
            let mut inner = self.inner.lock().expect("playback lock poisoned");

            if !inner.pending.is_empty() {
                let remainder: Vec<f32> = inner.pending.drain(..).collect();
                inner.queue.push_back(remainder);
            }

            match inner.state {
                PlaybackState::Idle => {
                    if inner.queue.is_empty() {
                        (Some(Box::new(on_finish) as FinishCallback), None)
                    } else {
                        // A flushed remainder still needs to play out
                        inner.state = PlaybackState::Finishing;
                        inner.cursor = Some(
                            Instant::now()
                                + Duration::from_millis(self.config.startup_latency_ms),
                        );
                        inner.finish_callbacks.push(Box::new(on_finish));
                        (None, Some(inner.epoch))
                    }
                }
                PlaybackState::Playing | PlaybackState::Finishing => {
                    inner.state = PlaybackState::Finishing;
                    inner.finish_callbacks.push(Box::new(on_finish));
                    (None, None)
                }
            }
        };

        if let Some(epoch) = spawn_epoch {
            self.spawn_loop(epoch);
        }
        if let Some(cb) = immediate {
            cb();
        }
    }

    /// Cancel a pending graceful finish (new audio arrived mid-finish, e.g.
    /// model self-correction). Already-scheduled playback is unaffected.
    pub fn reset_finishing(&self) {
        let mut inner = self.inner.lock().expect("playback lock poisoned");
        if inner.state == PlaybackState::Finishing {
            debug!("Finishing cancelled; resuming playback");
            inner.state = PlaybackState::Playing;
            inner.finish_callbacks.clear();
        }
    }

    /// Hard stop: halt every scheduled unit, clear all buffers, reset the
    /// cursor. Used for interruption, where the abrupt cut is intended.
    pub async fn stop(&self) -> Result<(), EngineError> {
        {
            let mut inner = self.inner.lock().expect("playback lock poisoned");
            inner.state = PlaybackState::Idle;
            inner.queue.clear();
            inner.pending.clear();
            inner.cursor = None;
            inner.finish_callbacks.clear();
            inner.epoch += 1;
        }

        {
            let mut task = self.loop_task.lock().expect("playback lock poisoned");
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }

        self.sink.halt().await
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().expect("playback lock poisoned").state
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().expect("playback lock poisoned").queue.len()
    }

    /// Total samples handed to the sink since creation (survives stop)
    pub fn scheduled_samples(&self) -> u64 {
        self.inner
            .lock()
            .expect("playback lock poisoned")
            .scheduled_samples
    }

    fn spawn_loop(&self, epoch: u64) {
        let inner = Arc::clone(&self.inner);
        let sink = Arc::clone(&self.sink);
        let config = self.config.clone();

        let handle = tokio::spawn(run_loop(inner, sink, config, epoch));

        let mut task = self.loop_task.lock().expect("playback lock poisoned");
        *task = Some(handle);
    }
}

enum LoopAction {
    Play(Vec<f32>),
    Sleep(Instant),
    Finish(Vec<FinishCallback>),
    Exit,
}

/// The scheduling loop. Each iteration either schedules the next due frame,
/// sleeps until shortly before the next frame is due, or winds down. All
/// state mutation happens synchronously under the lock; the lock is never
/// held across an await.
async fn run_loop(
    inner: Arc<Mutex<Inner>>,
    sink: Arc<dyn PlaybackSink>,
    config: PlaybackConfig,
    epoch: u64,
) {
    let lookahead = Duration::from_millis(config.lookahead_ms);
    let frame_duration = config.frame_duration();

    loop {
        let action = {
            let mut inner = inner.lock().expect("playback lock poisoned");

            if inner.epoch != epoch || inner.state == PlaybackState::Idle {
                LoopAction::Exit
            } else if inner.queue.is_empty() {
                let finishing = inner.state == PlaybackState::Finishing;
                inner.state = PlaybackState::Idle;
                inner.cursor = None;
                if finishing {
                    LoopAction::Finish(inner.finish_callbacks.drain(..).collect())
                } else {
                    LoopAction::Exit
                }
            } else {
                let now = Instant::now();
                let cursor = inner.cursor.unwrap_or(now);

                if cursor <= now + lookahead {
                    let frame = inner.queue.pop_front().expect("queue checked non-empty");
                    // Clamp so a stalled loop never schedules in the past
                    let start = cursor.max(now);
                    inner.cursor = Some(start + frame_duration);
                    inner.scheduled_samples += frame.len() as u64;
                    LoopAction::Play(frame)
                } else {
                    LoopAction::Sleep(cursor - lookahead)
                }
            }
        };

        match action {
            LoopAction::Play(frame) => {
                if let Err(e) = sink.play(frame, config.sample_rate).await {
                    error!("Failed to hand frame to sink: {}", e);
                }
            }
            LoopAction::Sleep(deadline) => {
                tokio::time::sleep_until(deadline).await;
            }
            LoopAction::Finish(callbacks) => {
                debug!("Playback drained; invoking {} finish callback(s)", callbacks.len());
                for cb in callbacks {
                    cb();
                }
                break;
            }
            LoopAction::Exit => break,
        }
    }
}

/// Network-order PCM16 to normalized f32. A trailing odd byte is ignored.
fn pcm16_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_conversion_normalizes() {
        let pcm: Vec<u8> = [0i16, i16::MAX, i16::MIN]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        let samples = pcm16_to_f32(&pcm);

        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0.0);
        assert!((samples[1] - (32767.0 / 32768.0)).abs() < 1e-6);
        assert_eq!(samples[2], -1.0);
    }

    #[test]
    fn pcm16_conversion_ignores_trailing_byte() {
        let samples = pcm16_to_f32(&[0x00, 0x01, 0xFF]);
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn frame_samples_at_24khz() {
        let config = PlaybackConfig::default();
        assert_eq!(config.frame_samples(), 7680); // 320ms at 24kHz
    }

    #[test]
    fn frame_samples_at_16khz() {
        let config = PlaybackConfig {
            sample_rate: 16000,
            ..PlaybackConfig::default()
        };
        assert_eq!(config.frame_samples(), 5120);
    }
}
