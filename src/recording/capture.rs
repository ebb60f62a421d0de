use async_trait::async_trait;

use crate::error::{Result, StudioError};
use super::segment::MediaType;

/// Requested capture configuration for a participant's local stream
#[derive(Debug, Clone, Copy)]
pub struct CaptureConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// A local high-quality capture device.
///
/// The device is held exclusively by one recorder at a time; `begin_slice`
/// may not be called again until the previous slice has been finalized, and
/// implementations must fully release the device when dropped so a
/// re-acquire never hits a busy device.
#[async_trait]
pub trait CaptureSource: Send {
    fn media_type(&self) -> MediaType;

    /// Begin capturing a bounded slice from the device
    async fn begin_slice(&mut self) -> Result<Box<dyn CaptureSlice>>;
}

/// An in-flight capture slice
#[async_trait]
pub trait CaptureSlice: Send + std::fmt::Debug {
    /// Stop the slice and return the captured container payload. Partial
    /// data is valid output (the final slice of a run is usually short);
    /// an error here means the slice is lost and the run must halt.
    async fn finalize(self: Box<Self>) -> Result<Vec<u8>>;
}

/// Classify a platform capture failure into its device-error kind so the
/// caller gets an actionable message instead of a raw backend string.
pub fn classify_device_error(detail: &str) -> StudioError {
    let lower = detail.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
        StudioError::DevicePermissionDenied
    } else if lower.contains("busy") || lower.contains("in use") || lower.contains("already") {
        StudioError::DeviceBusy
    } else if lower.contains("not found") || lower.contains("no device") || lower.contains("no such")
    {
        StudioError::DeviceNotFound
    } else {
        StudioError::SliceFinalize(detail.to_string())
    }
}

/// Deterministic capture source for validation runs and tests: each slice
/// yields a payload derived from its ordinal, with optional scripted
/// failures at a given slice number.
pub struct SyntheticCapture {
    media_type: MediaType,
    slice_ordinal: u32,
    fail_begin_at: Option<u32>,
    fail_finalize_at: Option<u32>,
}

impl SyntheticCapture {
    pub fn new(media_type: MediaType) -> Self {
        Self {
            media_type,
            slice_ordinal: 0,
            fail_begin_at: None,
            fail_finalize_at: None,
        }
    }

    pub fn failing_begin_at(mut self, ordinal: u32) -> Self {
        self.fail_begin_at = Some(ordinal);
        self
    }

    pub fn failing_finalize_at(mut self, ordinal: u32) -> Self {
        self.fail_finalize_at = Some(ordinal);
        self
    }
}

#[async_trait]
impl CaptureSource for SyntheticCapture {
    fn media_type(&self) -> MediaType {
        self.media_type
    }

    async fn begin_slice(&mut self) -> Result<Box<dyn CaptureSlice>> {
        self.slice_ordinal += 1;
        if self.fail_begin_at == Some(self.slice_ordinal) {
            return Err(StudioError::DeviceBusy);
        }
        Ok(Box::new(SyntheticSlice {
            ordinal: self.slice_ordinal,
            fail: self.fail_finalize_at == Some(self.slice_ordinal),
        }))
    }
}

#[derive(Debug)]
struct SyntheticSlice {
    ordinal: u32,
    fail: bool,
}

#[async_trait]
impl CaptureSlice for SyntheticSlice {
    async fn finalize(self: Box<Self>) -> Result<Vec<u8>> {
        if self.fail {
            return Err(StudioError::SliceFinalize(format!(
                "synthetic failure at slice {}",
                self.ordinal
            )));
        }
        Ok(vec![self.ordinal as u8; 64])
    }
}
