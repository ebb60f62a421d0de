use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use reqwest::multipart::{Form, Part};
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::time::sleep;

use crate::config::UploadConfig;
use crate::error::{Result, StudioError};
use crate::recording::{RecordingSegment, SegmentSink, SegmentStatus};

/// Per-segment completion reporting. Recording is unbounded, so progress is
/// a running counter rather than a percentage.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    SegmentUploaded {
        index: u32,
        uploaded_so_far: u64,
    },
    /// Terminal for this segment only; the run continues
    SegmentFailed {
        index: u32,
        attempts: u32,
        reason: String,
    },
}

struct PipelineInner {
    client: reqwest::Client,
    endpoint: String,
    user_type: String,
    participant_name: Option<String>,
    max_attempts: u32,
    retry_base_delay: Duration,
    semaphore: Semaphore,
    uploaded: AtomicU64,
    in_flight: AtomicUsize,
    drained: Notify,
    events: mpsc::UnboundedSender<UploadEvent>,
}

/// Ships segments to the storage sink without ever blocking capture.
///
/// `submit` is fire-and-forget: transfers run concurrently under a permit
/// cap, each one retried with exponential backoff up to the attempt limit.
/// Segments may complete out of order; every transfer carries its own index
/// so the receiving side can reconstruct order, and segment N+1's transfer
/// never waits on segment N's completion.
#[derive(Clone)]
pub struct UploadPipeline {
    inner: Arc<PipelineInner>,
}

impl UploadPipeline {
    pub fn new(
        config: &UploadConfig,
        user_type: &str,
        participant_name: Option<String>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<UploadEvent>)> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StudioError::internal(format!("Failed to create HTTP client: {}", e)))?;

        let (events, events_rx) = mpsc::unbounded_channel();
        let pipeline = Self {
            inner: Arc::new(PipelineInner {
                client,
                endpoint: config.endpoint.clone(),
                user_type: user_type.to_string(),
                participant_name,
                max_attempts: config.max_attempts.max(1),
                retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
                semaphore: Semaphore::new(config.concurrency.max(1)),
                uploaded: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
                events,
            }),
        };
        Ok((pipeline, events_rx))
    }

    /// Queue a segment for transfer and return immediately
    pub fn submit(&self, segment: RecordingSegment) {
        let inner = self.inner.clone();
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(index = segment.index, "Segment queued for upload");
        tokio::spawn(async move {
            inner.transfer(segment).await;
            if inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                inner.drained.notify_waiters();
            }
        });
    }

    /// Wait until every submitted transfer has completed or terminally failed
    pub async fn drain(&self) {
        loop {
            let notified = self.inner.drained.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn uploaded_count(&self) -> u64 {
        self.inner.uploaded.load(Ordering::SeqCst)
    }
}

impl SegmentSink for UploadPipeline {
    fn submit(&self, segment: RecordingSegment) {
        UploadPipeline::submit(self, segment);
    }
}

impl PipelineInner {
    async fn transfer(&self, mut segment: RecordingSegment) {
        let _permit = self.semaphore.acquire().await;
        segment.status = SegmentStatus::Uploading;
        let index = segment.index;

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.send_segment(&segment).await {
                Ok(()) => {
                    segment.status = SegmentStatus::Uploaded;
                    let uploaded_so_far = self.uploaded.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::info!(
                        recording_id = %segment.recording_id,
                        participant_id = %segment.participant_id,
                        index = index,
                        uploaded_so_far = uploaded_so_far,
                        "Segment uploaded"
                    );
                    let _ = self.events.send(UploadEvent::SegmentUploaded {
                        index,
                        uploaded_so_far,
                    });
                    return;
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        recording_id = %segment.recording_id,
                        index = index,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        error = %last_error,
                        "Segment upload attempt failed"
                    );
                    if attempt < self.max_attempts {
                        let backoff = self.retry_base_delay * 2_u32.pow(attempt - 1);
                        sleep(backoff).await;
                    }
                }
            }
        }

        segment.status = SegmentStatus::Failed;
        tracing::error!(
            recording_id = %segment.recording_id,
            participant_id = %segment.participant_id,
            index = index,
            attempts = self.max_attempts,
            error = %last_error,
            "Segment upload exhausted retries"
        );
        let _ = self.events.send(UploadEvent::SegmentFailed {
            index,
            attempts: self.max_attempts,
            reason: last_error,
        });
    }

    async fn send_segment(&self, segment: &RecordingSegment) -> Result<()> {
        let file_part = Part::bytes(segment.payload.clone())
            .file_name(segment.file_name())
            .mime_str(segment.media_type.mime_type())
            .map_err(|e| StudioError::internal(format!("Invalid segment mime type: {}", e)))?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("room_id", segment.recording_id.clone())
            .text("user_type", self.user_type.clone())
            .text("chunk_index", segment.index.to_string())
            .text("start_time", format!("{:.3}", segment.start_secs()))
            .text("end_time", format!("{:.3}", segment.end_secs()))
            .text("participant_id", segment.participant_id.clone());
        if let Some(name) = &self.participant_name {
            form = form.text("participant_name", name.clone());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StudioError::UploadTransport(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(StudioError::UploadTransport(format!(
                "upload failed with status {}: {}",
                status, error_text
            )));
        }

        Ok(())
    }
}
