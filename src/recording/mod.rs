mod capture;
mod recorder;
mod segment;

pub use capture::{classify_device_error, CaptureConstraints, CaptureSlice, CaptureSource, SyntheticCapture};
pub use recorder::{ChunkRecorder, RecorderConfig, RecorderEvent, RecorderState, SegmentSink};
pub use segment::{MediaType, RecordingSegment, SegmentStatus};
