use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::error::{Result, StudioError};
use super::capture::CaptureSource;
use super::segment::{RecordingSegment, SegmentStatus};

/// Destination for finished segments. The upload pipeline implements this;
/// handoff must not block the capture loop.
pub trait SegmentSink: Send + Sync {
    fn submit(&self, segment: RecordingSegment);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Stopped,
    Recording,
    Stopping,
}

#[derive(Debug, Clone)]
pub enum RecorderEvent {
    SliceCaptured {
        index: u32,
        start_ms: u64,
        end_ms: u64,
    },
    /// Fatal to the current run: the loop has halted. A hole in the segment
    /// sequence is worse than stopping.
    CaptureFailed {
        index: u32,
        error: String,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct RecorderConfig {
    pub slice_duration: Duration,
    /// Settling delay between slices so the device is fully released before
    /// the next acquisition
    pub restart_delay: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            slice_duration: Duration::from_millis(5_000),
            restart_delay: Duration::from_millis(250),
        }
    }
}

impl From<&crate::config::RecordingConfig> for RecorderConfig {
    fn from(cfg: &crate::config::RecordingConfig) -> Self {
        Self {
            slice_duration: Duration::from_millis(cfg.slice_duration_ms),
            restart_delay: Duration::from_millis(cfg.restart_delay_ms),
        }
    }
}

/// Continuously slices the local capture into bounded segments, independent
/// of network conditions.
///
/// The loop is an explicit scheduler with a stop flag checked at loop top:
/// cancellation is a single flag flip with a well-defined drain point, and
/// `stop()` returns only after the final (possibly partial) slice has been
/// handed to the sink. Segment offsets are measured wall-clock deltas, so
/// `start[n] == end[n-1]` holds even though every slice's real duration
/// differs from the nominal one.
pub struct ChunkRecorder {
    recording_id: String,
    participant_id: String,
    state: Arc<Mutex<RecorderState>>,
    stop_flag: Arc<AtomicBool>,
    /// Fresh per run, so a stop landing between slices cannot leave a
    /// stale wakeup for the next run
    stop_signal: Mutex<Arc<Notify>>,
    task: Mutex<Option<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<RecorderEvent>,
}

impl ChunkRecorder {
    pub fn new(
        recording_id: &str,
        participant_id: &str,
    ) -> (Self, mpsc::UnboundedReceiver<RecorderEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                recording_id: recording_id.to_string(),
                participant_id: participant_id.to_string(),
                state: Arc::new(Mutex::new(RecorderState::Stopped)),
                stop_flag: Arc::new(AtomicBool::new(false)),
                stop_signal: Mutex::new(Arc::new(Notify::new())),
                task: Mutex::new(None),
                events,
            },
            events_rx,
        )
    }

    pub async fn state(&self) -> RecorderState {
        *self.state.lock().await
    }

    /// Begin a recording run. The recorder takes exclusive ownership of the
    /// source for the whole run and releases it before the run ends.
    pub async fn start(
        &self,
        source: Box<dyn CaptureSource>,
        config: RecorderConfig,
        sink: Arc<dyn SegmentSink>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if *state != RecorderState::Stopped {
                return Err(StudioError::RecorderBusy);
            }
            *state = RecorderState::Recording;
        }
        self.stop_flag.store(false, Ordering::SeqCst);
        let stop_signal = Arc::new(Notify::new());
        {
            let mut signal = self.stop_signal.lock().await;
            *signal = stop_signal.clone();
        }

        let handle = tokio::spawn(Self::run_loop(
            self.recording_id.clone(),
            self.participant_id.clone(),
            source,
            config,
            sink,
            self.state.clone(),
            self.stop_flag.clone(),
            stop_signal,
            self.events.clone(),
        ));

        let mut task = self.task.lock().await;
        *task = Some(handle);

        tracing::info!(
            recording_id = %self.recording_id,
            participant_id = %self.participant_id,
            slice_ms = config.slice_duration.as_millis() as u64,
            "Recording started"
        );
        Ok(())
    }

    /// Stop the run: flag the loop, force the in-flight slice to finalize as
    /// the final segment, and return once it has been handed off. Safe to
    /// call from any state; a second call is a no-op.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            match *state {
                RecorderState::Stopped => {
                    // the loop may still be draining after a fatal capture
                    // error; fall through to reap the task if one remains
                }
                RecorderState::Recording => *state = RecorderState::Stopping,
                RecorderState::Stopping => {}
            }
        }

        self.stop_flag.store(true, Ordering::SeqCst);
        {
            let signal = self.stop_signal.lock().await;
            signal.notify_one();
        }

        let handle = {
            let mut task = self.task.lock().await;
            task.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Recorder task panicked");
            }
        }

        let mut state = self.state.lock().await;
        *state = RecorderState::Stopped;
        tracing::info!(
            recording_id = %self.recording_id,
            participant_id = %self.participant_id,
            "Recording stopped"
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        recording_id: String,
        participant_id: String,
        mut source: Box<dyn CaptureSource>,
        config: RecorderConfig,
        sink: Arc<dyn SegmentSink>,
        state: Arc<Mutex<RecorderState>>,
        stop_flag: Arc<AtomicBool>,
        stop_signal: Arc<Notify>,
        events: mpsc::UnboundedSender<RecorderEvent>,
    ) {
        let media_type = source.media_type();
        let mut cumulative_ms: u64 = 0;
        let mut index: u32 = 0;

        loop {
            if stop_flag.load(Ordering::SeqCst) {
                break;
            }

            let slice = match source.begin_slice().await {
                Ok(slice) => slice,
                Err(e) => {
                    tracing::error!(
                        recording_id = %recording_id,
                        participant_id = %participant_id,
                        index = index + 1,
                        error = %e,
                        "Capture failed to start a slice, halting run"
                    );
                    let _ = events.send(RecorderEvent::CaptureFailed {
                        index: index + 1,
                        error: e.to_string(),
                    });
                    break;
                }
            };
            let slice_started = Instant::now();

            let stopping = tokio::select! {
                _ = sleep(config.slice_duration) => false,
                _ = stop_signal.notified() => true,
            };

            let payload = match slice.finalize().await {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(
                        recording_id = %recording_id,
                        participant_id = %participant_id,
                        index = index + 1,
                        error = %e,
                        "Slice failed to finalize, halting run"
                    );
                    let _ = events.send(RecorderEvent::CaptureFailed {
                        index: index + 1,
                        error: e.to_string(),
                    });
                    break;
                }
            };

            let actual_ms = slice_started.elapsed().as_millis() as u64;
            index += 1;
            let start_ms = cumulative_ms;
            let end_ms = cumulative_ms + actual_ms;
            cumulative_ms = end_ms;

            let segment = RecordingSegment {
                recording_id: recording_id.clone(),
                participant_id: participant_id.clone(),
                index,
                start_ms,
                end_ms,
                payload,
                media_type,
                status: SegmentStatus::Pending,
            };

            tracing::debug!(
                recording_id = %recording_id,
                participant_id = %participant_id,
                index = index,
                start_ms = start_ms,
                end_ms = end_ms,
                "Slice captured"
            );
            let _ = events.send(RecorderEvent::SliceCaptured {
                index,
                start_ms,
                end_ms,
            });
            sink.submit(segment);

            if stopping || stop_flag.load(Ordering::SeqCst) {
                break;
            }

            sleep(config.restart_delay).await;
        }

        // release the device before reporting stopped, so a re-acquire
        // cannot race a handle we still hold
        drop(source);
        let mut state = state.lock().await;
        *state = RecorderState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::capture::SyntheticCapture;
    use crate::recording::segment::MediaType;

    struct CollectingSink {
        segments: std::sync::Mutex<Vec<RecordingSegment>>,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                segments: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn collected(&self) -> Vec<RecordingSegment> {
            self.segments.lock().unwrap().clone()
        }
    }

    impl SegmentSink for CollectingSink {
        fn submit(&self, segment: RecordingSegment) {
            self.segments.lock().unwrap().push(segment);
        }
    }

    fn fast_config() -> RecorderConfig {
        RecorderConfig {
            slice_duration: Duration::from_millis(30),
            restart_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_segments_are_contiguous_from_one() {
        let (recorder, _events) = ChunkRecorder::new("rec-1", "alice");
        let sink = CollectingSink::new();

        recorder
            .start(
                Box::new(SyntheticCapture::new(MediaType::Video)),
                fast_config(),
                sink.clone(),
            )
            .await
            .unwrap();

        sleep(Duration::from_millis(120)).await;
        recorder.stop().await.unwrap();

        let segments = sink.collected();
        assert!(segments.len() >= 2, "expected multiple slices");
        assert_eq!(segments[0].index, 1);
        assert_eq!(segments[0].start_ms, 0);
        for pair in segments.windows(2) {
            assert_eq!(pair[1].index, pair[0].index + 1);
            assert_eq!(pair[1].start_ms, pair[0].end_ms);
        }
        for segment in &segments {
            assert!(segment.end_ms >= segment.start_ms);
            assert_eq!(segment.status, SegmentStatus::Pending);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flushes_partial_final_slice() {
        let (recorder, _events) = ChunkRecorder::new("rec-1", "alice");
        let sink = CollectingSink::new();

        recorder
            .start(
                Box::new(SyntheticCapture::new(MediaType::Video)),
                RecorderConfig {
                    slice_duration: Duration::from_secs(10),
                    restart_delay: Duration::from_millis(5),
                },
                sink.clone(),
            )
            .await
            .unwrap();

        sleep(Duration::from_millis(50)).await;
        recorder.stop().await.unwrap();

        let segments = sink.collected();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].index, 1);
        assert!(segments[0].end_ms >= segments[0].start_ms);
        assert!(segments[0].end_ms < 10_000, "partial slice, not a full one");
        assert_eq!(recorder.state().await, RecorderState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_twice_is_noop() {
        let (recorder, _events) = ChunkRecorder::new("rec-1", "alice");
        let sink = CollectingSink::new();

        recorder
            .start(
                Box::new(SyntheticCapture::new(MediaType::Video)),
                fast_config(),
                sink.clone(),
            )
            .await
            .unwrap();

        sleep(Duration::from_millis(40)).await;
        recorder.stop().await.unwrap();
        let after_first = sink.collected().len();

        recorder.stop().await.unwrap();
        assert_eq!(sink.collected().len(), after_first);
        assert_eq!(recorder.state().await, RecorderState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start_is_noop() {
        let (recorder, _events) = ChunkRecorder::new("rec-1", "alice");
        recorder.stop().await.unwrap();
        assert_eq!(recorder.state().await, RecorderState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_failure_halts_run_without_partial_segment() {
        let (recorder, mut events) = ChunkRecorder::new("rec-1", "alice");
        let sink = CollectingSink::new();

        recorder
            .start(
                Box::new(SyntheticCapture::new(MediaType::Video).failing_finalize_at(2)),
                fast_config(),
                sink.clone(),
            )
            .await
            .unwrap();

        // wait for the run to halt on its own
        let failure = loop {
            match events.recv().await.unwrap() {
                RecorderEvent::CaptureFailed { index, error } => break (index, error),
                RecorderEvent::SliceCaptured { .. } => continue,
            }
        };
        assert_eq!(failure.0, 2);

        recorder.stop().await.unwrap();
        let segments = sink.collected();
        assert_eq!(segments.len(), 1, "failed slice must not be submitted");
        assert_eq!(segments[0].index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_running_is_rejected() {
        let (recorder, _events) = ChunkRecorder::new("rec-1", "alice");
        let sink = CollectingSink::new();

        recorder
            .start(
                Box::new(SyntheticCapture::new(MediaType::Video)),
                fast_config(),
                sink.clone(),
            )
            .await
            .unwrap();

        let err = recorder
            .start(
                Box::new(SyntheticCapture::new(MediaType::Video)),
                fast_config(),
                sink.clone(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::RecorderBusy));

        recorder.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restartable_after_stop_with_fresh_indices() {
        let (recorder, _events) = ChunkRecorder::new("rec-1", "alice");
        let sink = CollectingSink::new();

        recorder
            .start(
                Box::new(SyntheticCapture::new(MediaType::Video)),
                fast_config(),
                sink.clone(),
            )
            .await
            .unwrap();
        sleep(Duration::from_millis(40)).await;
        recorder.stop().await.unwrap();
        let first_run = sink.collected().len();

        recorder
            .start(
                Box::new(SyntheticCapture::new(MediaType::Video)),
                fast_config(),
                sink.clone(),
            )
            .await
            .unwrap();
        sleep(Duration::from_millis(40)).await;
        recorder.stop().await.unwrap();

        let segments = sink.collected();
        assert!(segments.len() > first_run);
        // the new run restarts numbering and offsets
        assert_eq!(segments[first_run].index, 1);
        assert_eq!(segments[first_run].start_ms, 0);
    }
}
