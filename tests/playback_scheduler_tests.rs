// Integration tests for the playback scheduler
//
// These run on a paused tokio clock: sleeps auto-advance, so frame
// scheduling is deterministic and instant. A recording sink stands in for
// the audio device.

use interview_live::error::EngineError;
use interview_live::playback::{PlaybackConfig, PlaybackScheduler, PlaybackSink, PlaybackState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct RecordedPlay {
    samples: usize,
    at: tokio::time::Instant,
}

/// Sink that records every frame handed to it
#[derive(Default)]
struct RecordingSink {
    plays: Mutex<Vec<RecordedPlay>>,
    halts: AtomicUsize,
}

#[async_trait::async_trait]
impl PlaybackSink for RecordingSink {
    async fn play(&self, samples: Vec<f32>, _sample_rate: u32) -> Result<(), EngineError> {
        self.plays.lock().unwrap().push(RecordedPlay {
            samples: samples.len(),
            at: tokio::time::Instant::now(),
        });
        Ok(())
    }

    async fn halt(&self) -> Result<(), EngineError> {
        self.halts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn scheduler_at_16khz() -> (Arc<RecordingSink>, PlaybackScheduler) {
    let sink = Arc::new(RecordingSink::default());
    let scheduler = PlaybackScheduler::new(
        Arc::clone(&sink) as Arc<dyn PlaybackSink>,
        PlaybackConfig {
            sample_rate: 16000,
            ..PlaybackConfig::default()
        },
    );
    (sink, scheduler)
}

fn pcm_of_samples(count: usize) -> Vec<u8> {
    vec![0u8; count * 2]
}

#[tokio::test(start_paused = true)]
async fn ten_seconds_schedules_32_frames_with_no_samples_lost() {
    let (sink, scheduler) = scheduler_at_16khz();

    // 10 seconds of 16kHz mono PCM16
    scheduler.stream_audio(&pcm_of_samples(160_000));

    let finished = Arc::new(AtomicUsize::new(0));
    let finished_clone = Arc::clone(&finished);
    scheduler.finish_playback(move || {
        finished_clone.fetch_add(1, Ordering::SeqCst);
    });

    tokio::time::sleep(Duration::from_secs(15)).await;

    let plays = sink.plays.lock().unwrap();
    // 31 full 320ms frames plus the flushed remainder
    assert_eq!(plays.len(), 32);
    assert_eq!(plays.iter().map(|p| p.samples).sum::<usize>(), 160_000);
    assert!(plays.iter().take(31).all(|p| p.samples == 5120));
    assert_eq!(plays[31].samples, 1280);

    // Frames went out in order, never regressing in time
    for pair in plays.windows(2) {
        assert!(pair[1].at >= pair[0].at);
    }

    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.state(), PlaybackState::Idle);
    assert_eq!(scheduler.scheduled_samples(), 160_000);
}

#[tokio::test(start_paused = true)]
async fn irregular_chunk_sizes_still_produce_fixed_frames() {
    let (sink, scheduler) = scheduler_at_16khz();

    // Chunks of odd, varying sizes adding up to exactly two frames
    scheduler.stream_audio(&pcm_of_samples(3000));
    scheduler.stream_audio(&pcm_of_samples(5000));
    scheduler.stream_audio(&pcm_of_samples(2240));

    tokio::time::sleep(Duration::from_secs(5)).await;

    let plays = sink.plays.lock().unwrap();
    assert_eq!(plays.len(), 2);
    assert!(plays.iter().all(|p| p.samples == 5120));
}

#[tokio::test(start_paused = true)]
async fn finish_with_empty_queue_invokes_callback_synchronously() {
    let (_sink, scheduler) = scheduler_at_16khz();

    let finished = Arc::new(AtomicUsize::new(0));
    let finished_clone = Arc::clone(&finished);
    scheduler.finish_playback(move || {
        finished_clone.fetch_add(1, Ordering::SeqCst);
    });

    // No await needed: nothing was queued
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.state(), PlaybackState::Idle);
}

#[tokio::test(start_paused = true)]
async fn finish_while_finishing_fires_each_callback_exactly_once() {
    let (_sink, scheduler) = scheduler_at_16khz();

    scheduler.stream_audio(&pcm_of_samples(5120 * 3));

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let first_clone = Arc::clone(&first);
    scheduler.finish_playback(move || {
        first_clone.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(scheduler.state(), PlaybackState::Finishing);

    let second_clone = Arc::clone(&second);
    scheduler.finish_playback(move || {
        second_clone.fetch_add(1, Ordering::SeqCst);
    });

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn audio_streamed_while_finishing_is_dropped() {
    let (sink, scheduler) = scheduler_at_16khz();

    scheduler.stream_audio(&pcm_of_samples(5120));
    scheduler.finish_playback(|| {});
    assert_eq!(scheduler.state(), PlaybackState::Finishing);

    // Winding down: this must not revive the stream
    scheduler.stream_audio(&pcm_of_samples(5120 * 4));

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(sink.plays.lock().unwrap().len(), 1);
    assert_eq!(scheduler.state(), PlaybackState::Idle);
}

#[tokio::test(start_paused = true)]
async fn reset_finishing_cancels_the_pending_callback() {
    let (_sink, scheduler) = scheduler_at_16khz();

    scheduler.stream_audio(&pcm_of_samples(5120 * 4));

    let finished = Arc::new(AtomicUsize::new(0));
    let finished_clone = Arc::clone(&finished);
    scheduler.finish_playback(move || {
        finished_clone.fetch_add(1, Ordering::SeqCst);
    });

    scheduler.reset_finishing();
    assert_eq!(scheduler.state(), PlaybackState::Playing);

    // More audio is accepted again after the reset
    scheduler.stream_audio(&pcm_of_samples(5120));

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(finished.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_clears_everything_immediately() {
    let (sink, scheduler) = scheduler_at_16khz();

    // Queue far more than the lookahead can schedule right away
    scheduler.stream_audio(&pcm_of_samples(5120 * 20));
    assert!(scheduler.queue_len() > 0);

    scheduler.stop().await.unwrap();

    assert_eq!(scheduler.queue_len(), 0);
    assert_eq!(scheduler.state(), PlaybackState::Idle);
    assert_eq!(sink.halts.load(Ordering::SeqCst), 1);

    // Nothing more plays after the cut
    let played_before = sink.plays.lock().unwrap().len();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sink.plays.lock().unwrap().len(), played_before);
}

#[tokio::test(start_paused = true)]
async fn playback_resumes_cleanly_after_stop() {
    let (sink, scheduler) = scheduler_at_16khz();

    scheduler.stream_audio(&pcm_of_samples(5120 * 4));
    scheduler.stop().await.unwrap();

    scheduler.stream_audio(&pcm_of_samples(5120 * 2));
    tokio::time::sleep(Duration::from_secs(5)).await;

    // Only the post-stop frames reach the sink in the second run
    let plays = sink.plays.lock().unwrap();
    let total: usize = plays.iter().map(|p| p.samples).sum();
    assert!(total <= 5120 * 6);
    assert_eq!(plays.iter().rev().take(2).map(|p| p.samples).sum::<usize>(), 5120 * 2);
    assert_eq!(scheduler.state(), PlaybackState::Idle);
}
