use thiserror::Error;

/// Error taxonomy for the recording session core.
///
/// Variants are grouped by failure class so callers can map each one to a
/// distinct, actionable surface message instead of a generic failure.
#[derive(Debug, Error)]
pub enum StudioError {
    /// Signaling transport errors
    #[error("signaling connection lost: {0}")]
    SignalingTransport(String),

    #[error("room {0} not found")]
    RoomNotFound(String),

    #[error("room {0} is full ({1} participants max)")]
    RoomFull(String, u32),

    #[error("participant {0} is already in room {1}")]
    DuplicateParticipant(String, String),

    #[error("recording {0} is not accepting participants (status: {1})")]
    RoomClosed(String, String),

    /// Negotiation errors
    #[error("negotiation message for {remote_id} not valid in state {state}: {detail}")]
    OutOfStateNegotiation {
        remote_id: String,
        state: String,
        detail: String,
    },

    #[error("invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("WebRTC API error: {0}")]
    WebRtcApi(String),

    /// Media-device errors. Each kind maps to a distinct user-facing message;
    /// the recorder never falls back to a degraded stream.
    #[error("camera or microphone permission denied")]
    DevicePermissionDenied,

    #[error("capture device is in use by another application")]
    DeviceBusy,

    #[error("no capture device found")]
    DeviceNotFound,

    /// Capture errors, fatal to the current recording run
    #[error("failed to finalize capture slice: {0}")]
    SliceFinalize(String),

    #[error("recorder is already running")]
    RecorderBusy,

    /// Upload errors
    #[error("upload of segment {index} failed after {attempts} attempts: {reason}")]
    UploadExhausted {
        index: u32,
        attempts: u32,
        reason: String,
    },

    #[error("upload transport error: {0}")]
    UploadTransport(String),

    /// Guest-token errors
    #[error("invite token not recognized")]
    TokenUnknown,

    #[error("invite token has expired")]
    TokenExpired,

    #[error("invite token has already been used")]
    TokenExhausted,

    #[error("invite token is no longer active")]
    TokenInactive,

    /// External session service errors
    #[error("session service request failed: {0}")]
    SessionService(String),

    /// Generic errors
    #[error("failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using StudioError
pub type Result<T> = std::result::Result<T, StudioError>;

impl StudioError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        StudioError::Internal(msg.into())
    }

    /// Helper to create WebRTC API errors
    pub fn webrtc_api(msg: impl Into<String>) -> Self {
        StudioError::WebRtcApi(msg.into())
    }

    /// Helper to create signaling transport errors
    pub fn transport(msg: impl Into<String>) -> Self {
        StudioError::SignalingTransport(msg.into())
    }

    /// True for token rejections, which are reported to the guest verbatim
    pub fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            StudioError::TokenUnknown
                | StudioError::TokenExpired
                | StudioError::TokenExhausted
                | StudioError::TokenInactive
        )
    }
}

/// Convert webrtc::Error to StudioError
impl From<webrtc::Error> for StudioError {
    fn from(err: webrtc::Error) -> Self {
        StudioError::WebRtcApi(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StudioError::RoomNotFound("rec-42".to_string());
        assert_eq!(err.to_string(), "room rec-42 not found");

        let err = StudioError::UploadExhausted {
            index: 3,
            attempts: 5,
            reason: "503".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "upload of segment 3 failed after 5 attempts: 503"
        );
    }

    #[test]
    fn test_error_helpers() {
        let err = StudioError::internal("something went wrong");
        assert!(matches!(err, StudioError::Internal(_)));
    }

    #[test]
    fn test_token_rejection_classification() {
        assert!(StudioError::TokenExpired.is_token_rejection());
        assert!(StudioError::TokenExhausted.is_token_rejection());
        assert!(!StudioError::DeviceBusy.is_token_rejection());
    }

    #[test]
    fn test_device_errors_are_distinct() {
        let busy = StudioError::DeviceBusy.to_string();
        let denied = StudioError::DevicePermissionDenied.to_string();
        let missing = StudioError::DeviceNotFound.to_string();
        assert_ne!(busy, denied);
        assert_ne!(busy, missing);
        assert_ne!(denied, missing);
    }
}
