//! Core of a real-time multi-party recording session: a signaling hub that
//! relays WebRTC connection setup between participants, a per-peer
//! connection coordinator, and a record-then-upload pipeline that slices
//! local capture into bounded segments and ships each one to storage with
//! bounded retries.

pub mod api;
pub mod config;
pub mod error;
pub mod peer;
pub mod recording;
pub mod session;
pub mod signaling;
pub mod tokens;
pub mod upload;
