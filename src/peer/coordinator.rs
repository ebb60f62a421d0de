use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use webrtc::api::API;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::error::{Result, StudioError};
use crate::signaling::SignalMessage;
use super::link::{NegotiationRole, PeerLink, PeerLinkState};
use super::media::{ice_servers_from_env, LocalMedia};

/// Out-of-order candidates are buffered per remote until a connection
/// exists; past this cap the oldest is dropped.
const MAX_PENDING_CANDIDATES: usize = 32;

/// Queued ICE candidate waiting for a connection / remote description
#[derive(Debug, Clone)]
struct PendingIceCandidate {
    candidate: String,
    sdp_mid: Option<String>,
    sdp_mline_index: Option<u16>,
}

/// Connection lifecycle notifications surfaced to the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    StateChanged {
        remote_id: String,
        state: PeerLinkState,
    },
    RemoteTrack {
        remote_id: String,
        kind: String,
    },
    RemoteStreamEnded {
        remote_id: String,
    },
}

/// Owns one peer-connection state machine per remote participant.
///
/// Links live in an arena keyed by remote id: inserted when negotiation
/// starts, removed on participant-left or terminal failure. A connection
/// object from a removed participant is never retained.
pub struct PeerConnectionCoordinator {
    api: Arc<API>,
    local_id: String,
    room_id: String,
    local_media: LocalMedia,
    links: Arc<RwLock<HashMap<String, Arc<PeerLink>>>>,
    pending_candidates: Arc<RwLock<HashMap<String, VecDeque<PendingIceCandidate>>>>,
    signal_tx: mpsc::UnboundedSender<SignalMessage>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerConnectionCoordinator {
    pub fn new(
        api: Arc<API>,
        local_id: String,
        room_id: String,
        local_media: LocalMedia,
        signal_tx: mpsc::UnboundedSender<SignalMessage>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            api,
            local_id,
            room_id,
            local_media,
            links: Arc::new(RwLock::new(HashMap::new())),
            pending_candidates: Arc::new(RwLock::new(HashMap::new())),
            signal_tx,
            events,
        }
    }

    /// Initiate negotiation toward `remote_id`. Only valid while no link
    /// exists for that remote; duplicate join events make this a no-op.
    pub async fn connect_to(&self, remote_id: &str) -> Result<()> {
        {
            let links = self.links.read().await;
            if let Some(link) = links.get(remote_id) {
                let state = link.state().await;
                tracing::debug!(
                    remote_id = %remote_id,
                    state = state.as_str(),
                    "connect_to ignored, negotiation already underway"
                );
                return Ok(());
            }
        }

        let link = self
            .create_link(remote_id.to_string(), NegotiationRole::Offerer)
            .await?;

        {
            let mut links = self.links.write().await;
            // a racing connect_to for the same remote loses here
            if links.contains_key(remote_id) {
                tracing::debug!(remote_id = %remote_id, "connect_to raced, dropping duplicate link");
                link.close().await;
                return Ok(());
            }
            links.insert(remote_id.to_string(), link.clone());
        }

        link.transition(PeerLinkState::Offering).await;

        if let Err(e) = self.send_offer(remote_id, &link).await {
            // a dead link must not block a later renegotiation attempt
            self.remove_link(remote_id).await;
            return Err(e);
        }

        link.transition(PeerLinkState::AwaitingAnswer).await;
        tracing::info!(local_id = %self.local_id, remote_id = %remote_id, "Sent offer");
        Ok(())
    }

    async fn send_offer(&self, remote_id: &str, link: &Arc<PeerLink>) -> Result<()> {
        let offer = link.peer_connection.create_offer(None).await?;
        link.peer_connection
            .set_local_description(offer.clone())
            .await?;

        self.send_signal(SignalMessage::Offer {
            room_id: self.room_id.clone(),
            to: remote_id.to_string(),
            from: None,
            sdp: offer.sdp,
        })
    }

    /// Apply a remote offer and reply with an answer. A duplicate offer for
    /// an established or mid-negotiation link is rejected, not applied.
    pub async fn handle_offer(&self, remote_id: &str, sdp: String) -> Result<()> {
        {
            let links = self.links.read().await;
            if let Some(link) = links.get(remote_id) {
                let state = link.state().await;
                tracing::warn!(
                    remote_id = %remote_id,
                    state = state.as_str(),
                    "Ignoring duplicate offer for existing link"
                );
                return Ok(());
            }
        }

        let link = self
            .create_link(remote_id.to_string(), NegotiationRole::Answerer)
            .await?;
        {
            let mut links = self.links.write().await;
            links.insert(remote_id.to_string(), link.clone());
        }

        link.transition(PeerLinkState::Answering).await;

        if let Err(e) = self.send_answer(remote_id, &link, sdp).await {
            self.remove_link(remote_id).await;
            return Err(e);
        }

        tracing::info!(remote_id = %remote_id, "Sent answer");
        Ok(())
    }

    async fn send_answer(&self, remote_id: &str, link: &Arc<PeerLink>, sdp: String) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp)
            .map_err(|e| StudioError::InvalidSdp(format!("offer: {}", e)))?;
        link.peer_connection.set_remote_description(offer).await?;

        self.flush_pending_candidates(remote_id, &link).await;

        let answer = link.peer_connection.create_answer(None).await?;
        link.peer_connection
            .set_local_description(answer.clone())
            .await?;

        self.send_signal(SignalMessage::Answer {
            room_id: self.room_id.clone(),
            to: remote_id.to_string(),
            from: None,
            sdp: answer.sdp,
        })
    }

    async fn remove_link(&self, remote_id: &str) {
        let link = {
            let mut links = self.links.write().await;
            links.remove(remote_id)
        };
        if let Some(link) = link {
            link.close().await;
        }
    }

    /// Apply a remote answer. Valid only while awaiting one; anything else
    /// is logged and ignored rather than applied to an established link.
    pub async fn handle_answer(&self, remote_id: &str, sdp: String) -> Result<()> {
        let link = {
            let links = self.links.read().await;
            links.get(remote_id).cloned()
        };

        let link = match link {
            Some(link) => link,
            None => {
                tracing::warn!(remote_id = %remote_id, "Ignoring answer with no link");
                return Ok(());
            }
        };

        let current_state = link.state().await;
        if current_state != PeerLinkState::AwaitingAnswer {
            tracing::warn!(
                remote_id = %remote_id,
                state = current_state.as_str(),
                "Ignoring answer outside awaiting_answer"
            );
            return Ok(());
        }

        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| StudioError::InvalidSdp(format!("answer: {}", e)))?;
        link.peer_connection.set_remote_description(answer).await?;

        self.flush_pending_candidates(remote_id, &link).await;
        tracing::info!(remote_id = %remote_id, "Applied answer");
        Ok(())
    }

    /// Apply a candidate to the matching connection, or buffer it until one
    /// exists. Covers candidates arriving ahead of the offer.
    pub async fn handle_ice_candidate(
        &self,
        remote_id: &str,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Result<()> {
        let link = {
            let links = self.links.read().await;
            links.get(remote_id).cloned()
        };

        let ready = match &link {
            Some(link) => link.peer_connection.remote_description().await.is_some(),
            None => false,
        };

        if !ready {
            let mut pending = self.pending_candidates.write().await;
            let queue = pending.entry(remote_id.to_string()).or_default();
            if queue.len() >= MAX_PENDING_CANDIDATES {
                queue.pop_front();
                tracing::warn!(
                    remote_id = %remote_id,
                    "Pending candidate buffer full, dropped oldest"
                );
            }
            queue.push_back(PendingIceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            });
            tracing::debug!(
                remote_id = %remote_id,
                queue_size = queue.len(),
                "Buffered ICE candidate until connection is ready"
            );
            return Ok(());
        }

        let link = link.expect("ready implies link");
        link.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate,
                sdp_mid,
                sdp_mline_index,
                username_fragment: None,
            })
            .await?;
        tracing::debug!(remote_id = %remote_id, "Added ICE candidate");
        Ok(())
    }

    /// Tear down the link to `remote_id` and drop it from the arena
    pub async fn disconnect_from(&self, remote_id: &str) {
        let link = {
            let mut links = self.links.write().await;
            links.remove(remote_id)
        };
        {
            let mut pending = self.pending_candidates.write().await;
            pending.remove(remote_id);
        }

        if let Some(link) = link {
            link.close().await;
            let _ = self.events.send(PeerEvent::RemoteStreamEnded {
                remote_id: remote_id.to_string(),
            });
            tracing::info!(remote_id = %remote_id, "Disconnected from peer");
        }
    }

    pub async fn close_all(&self) {
        let remotes: Vec<String> = {
            let links = self.links.read().await;
            links.keys().cloned().collect()
        };
        for remote_id in remotes {
            self.disconnect_from(&remote_id).await;
        }
    }

    pub async fn link_state(&self, remote_id: &str) -> Option<PeerLinkState> {
        let links = self.links.read().await;
        match links.get(remote_id) {
            Some(link) => Some(link.state().await),
            None => None,
        }
    }

    pub async fn link_count(&self) -> usize {
        self.links.read().await.len()
    }

    fn send_signal(&self, message: SignalMessage) -> Result<()> {
        self.signal_tx
            .send(message)
            .map_err(|_| StudioError::transport("signaling queue closed"))
    }

    async fn create_link(&self, remote_id: String, role: NegotiationRole) -> Result<Arc<PeerLink>> {
        let config = RTCConfiguration {
            ice_servers: ice_servers_from_env(),
            ..Default::default()
        };

        let peer_connection: Arc<RTCPeerConnection> =
            Arc::new(self.api.new_peer_connection(config).await?);

        for track in self.local_media.tracks() {
            peer_connection.add_track(track).await?;
        }

        let link = Arc::new(PeerLink::new(remote_id.clone(), role, peer_connection));
        self.wire_callbacks(&link);
        Ok(link)
    }

    fn wire_callbacks(&self, link: &Arc<PeerLink>) {
        let remote_id = link.remote_id.clone();
        let room_id = self.room_id.clone();
        let signal_tx = self.signal_tx.clone();
        link.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let remote_id = remote_id.clone();
                let room_id = room_id.clone();
                let signal_tx = signal_tx.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else { return };
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = signal_tx.send(SignalMessage::IceCandidate {
                                room_id,
                                to: remote_id,
                                from: None,
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to serialize local ICE candidate");
                        }
                    }
                })
            }));

        let remote_id = link.remote_id.clone();
        let state = link.state_handle();
        let events = self.events.clone();
        link.peer_connection
            .on_peer_connection_state_change(Box::new(
                move |transport: RTCPeerConnectionState| {
                    let remote_id = remote_id.clone();
                    let state = state.clone();
                    let events = events.clone();
                    Box::pin(async move {
                        if let Some(new_state) =
                            PeerLink::apply_transport_state(&state, transport).await
                        {
                            tracing::info!(
                                remote_id = %remote_id,
                                state = new_state.as_str(),
                                "Peer link state changed"
                            );
                            let _ = events.send(PeerEvent::StateChanged {
                                remote_id,
                                state: new_state,
                            });
                        }
                    })
                },
            ));

        let remote_id = link.remote_id.clone();
        let events = self.events.clone();
        link.peer_connection
            .on_track(Box::new(move |track, _receiver, _transceiver| {
                let remote_id = remote_id.clone();
                let events = events.clone();
                let kind = track.kind().to_string();
                Box::pin(async move {
                    tracing::info!(remote_id = %remote_id, kind = %kind, "Remote track arrived");
                    let _ = events.send(PeerEvent::RemoteTrack { remote_id, kind });
                })
            }));
    }

    /// Flush buffered candidates once the remote description is in place.
    /// Individual failures are logged, not fatal; renegotiation covers them.
    async fn flush_pending_candidates(&self, remote_id: &str, link: &Arc<PeerLink>) {
        let candidates = {
            let mut pending = self.pending_candidates.write().await;
            pending.remove(remote_id)
        };

        let Some(candidates) = candidates else { return };
        tracing::info!(
            remote_id = %remote_id,
            count = candidates.len(),
            "Flushing buffered ICE candidates"
        );

        for pending in candidates {
            let init = RTCIceCandidateInit {
                candidate: pending.candidate,
                sdp_mid: pending.sdp_mid,
                sdp_mline_index: pending.sdp_mline_index,
                username_fragment: None,
            };
            if let Err(e) = link.peer_connection.add_ice_candidate(init).await {
                tracing::warn!(
                    remote_id = %remote_id,
                    error = %e,
                    "Failed to apply buffered ICE candidate"
                );
            }
        }
    }
}
