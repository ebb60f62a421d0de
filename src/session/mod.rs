mod client;
mod orchestrator;
mod service;

pub use client::SignalingClient;
pub use orchestrator::{CaptureFactory, SessionConfig, SessionEvent, SessionOrchestrator};
pub use service::{GuestTokenGrant, RecordingRecord, SessionServiceClient};
