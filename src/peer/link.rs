use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

/// Negotiation direction for one peer link. Deterministic by arrival order:
/// the newer joiner always offers, so both sides can never offer at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationRole {
    Offerer,
    Answerer,
}

/// Connection lifecycle for one (local, remote) participant pair.
///
/// `Connected` is reported only once the underlying transport reports
/// connected, and the machine never regresses out of it except to the
/// terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerLinkState {
    Idle,
    Offering,
    AwaitingAnswer,
    Answering,
    Connected,
    Disconnected,
    Closed,
}

impl PeerLinkState {
    pub fn can_transition(self, next: PeerLinkState) -> bool {
        use PeerLinkState::*;
        match (self, next) {
            // teardown and transport failure are reachable from anywhere
            (_, Closed) => true,
            (Closed, _) => false,
            (_, Disconnected) => true,
            (Disconnected, _) => false,
            (Idle, Offering) | (Idle, Answering) => true,
            (Offering, AwaitingAnswer) => true,
            (AwaitingAnswer, Connected) | (Answering, Connected) => true,
            // reported forward-only: no path back out of Connected
            (Connected, _) => false,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PeerLinkState::Idle => "idle",
            PeerLinkState::Offering => "offering",
            PeerLinkState::AwaitingAnswer => "awaiting_answer",
            PeerLinkState::Answering => "answering",
            PeerLinkState::Connected => "connected",
            PeerLinkState::Disconnected => "disconnected",
            PeerLinkState::Closed => "closed",
        }
    }
}

/// One peer connection and its negotiation state, owned exclusively by the
/// coordinator's arena.
pub struct PeerLink {
    pub remote_id: String,
    pub role: NegotiationRole,
    state: Arc<RwLock<PeerLinkState>>,
    pub peer_connection: Arc<RTCPeerConnection>,
}

impl PeerLink {
    pub fn new(
        remote_id: String,
        role: NegotiationRole,
        peer_connection: Arc<RTCPeerConnection>,
    ) -> Self {
        Self {
            remote_id,
            role,
            state: Arc::new(RwLock::new(PeerLinkState::Idle)),
            peer_connection,
        }
    }

    pub async fn state(&self) -> PeerLinkState {
        *self.state.read().await
    }

    /// Shared handle for transport callbacks
    pub fn state_handle(&self) -> Arc<RwLock<PeerLinkState>> {
        self.state.clone()
    }

    /// Apply a validated transition. Invalid transitions are rejected and
    /// logged rather than applied.
    pub async fn transition(&self, next: PeerLinkState) -> bool {
        let mut state = self.state.write().await;
        if state.can_transition(next) {
            tracing::debug!(
                remote_id = %self.remote_id,
                from = state.as_str(),
                to = next.as_str(),
                "Peer link transition"
            );
            *state = next;
            true
        } else {
            tracing::warn!(
                remote_id = %self.remote_id,
                from = state.as_str(),
                to = next.as_str(),
                "Rejected invalid peer link transition"
            );
            false
        }
    }

    /// Map a transport state report onto the link machine. Returns the new
    /// link state when it changed.
    pub async fn apply_transport_state(
        state: &Arc<RwLock<PeerLinkState>>,
        transport: RTCPeerConnectionState,
    ) -> Option<PeerLinkState> {
        let next = match transport {
            RTCPeerConnectionState::Connected => PeerLinkState::Connected,
            RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                PeerLinkState::Disconnected
            }
            _ => return None,
        };

        let mut current = state.write().await;
        if *current == next || !current.can_transition(next) {
            return None;
        }
        *current = next;
        Some(next)
    }

    pub async fn close(&self) {
        self.transition(PeerLinkState::Closed).await;
        if let Err(e) = self.peer_connection.close().await {
            tracing::warn!(remote_id = %self.remote_id, error = %e, "Error closing peer connection");
        }
    }
}
