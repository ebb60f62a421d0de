use serde::{Deserialize, Serialize};

/// Container format of a captured segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
}

impl MediaType {
    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaType::Video => "video/webm",
            MediaType::Audio => "audio/webm",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        "webm"
    }
}

/// Processing status of a segment between capture and storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

impl Default for SegmentStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// One bounded-duration slice of locally captured media.
///
/// For a given (recording_id, participant_id) the indices are 1-based and
/// contiguous, and `start_ms == end_ms` of the previous segment; offsets are
/// measured wall-clock deltas since recording start, not the nominal slice
/// duration.
#[derive(Debug, Clone)]
pub struct RecordingSegment {
    pub recording_id: String,
    pub participant_id: String,
    pub index: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub payload: Vec<u8>,
    pub media_type: MediaType,
    pub status: SegmentStatus,
}

impl RecordingSegment {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }

    /// Offsets as float seconds, the unit the storage sink expects
    pub fn start_secs(&self) -> f64 {
        self.start_ms as f64 / 1000.0
    }

    pub fn end_secs(&self) -> f64 {
        self.end_ms as f64 / 1000.0
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.{}",
            self.participant_id,
            self.index,
            self.media_type.file_extension()
        )
    }
}
