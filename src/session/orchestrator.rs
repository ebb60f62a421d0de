use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::error::{Result, StudioError};
use crate::peer::{create_webrtc_api, LocalMedia, PeerConnectionCoordinator, PeerEvent, PeerLinkState};
use crate::recording::{
    CaptureConstraints, CaptureSource, ChunkRecorder, RecorderConfig, RecorderEvent,
    RecorderState, SegmentSink,
};
use crate::signaling::{MemberInfo, ParticipantRole, SignalMessage};
use crate::upload::{UploadEvent, UploadPipeline};
use super::client::SignalingClient;

/// Builds a fresh capture source per recording run. Acquisition failures
/// must come back classified (permission / busy / not found).
pub type CaptureFactory = Box<dyn Fn() -> Result<Box<dyn CaptureSource>> + Send + Sync>;

pub struct SessionConfig {
    /// Hub WebSocket endpoint, e.g. `ws://127.0.0.1:8080/session`
    pub server_url: String,
    pub room_id: String,
    pub participant_id: String,
    pub role: ParticipantRole,
    pub display_name: Option<String>,
    /// Invite token, required when joining as a guest
    pub invite_token: Option<String>,
    pub media: CaptureConstraints,
    pub recorder: RecorderConfig,
    pub upload: crate::config::UploadConfig,
    pub heartbeat_interval: Duration,
}

/// Session-level notifications for the embedding surface
#[derive(Debug, Clone)]
pub enum SessionEvent {
    RoomJoined {
        members: Vec<MemberInfo>,
    },
    MemberJoined {
        participant_id: String,
    },
    MemberLeft {
        participant_id: String,
    },
    PeerStateChanged {
        participant_id: String,
        state: PeerLinkState,
    },
    RemoteTrack {
        participant_id: String,
        kind: String,
    },
    RecordingStarted {
        start_time: u64,
    },
    RecordingStopped {
        uploaded: u64,
    },
    RecordingFailed {
        error: String,
    },
    UploadProgress {
        index: u32,
        uploaded_so_far: u64,
    },
    SegmentUploadFailed {
        index: u32,
        reason: String,
    },
    ServerError {
        message: String,
    },
}

/// Recording-run lifecycle: a start broadcast schedules a run, the shared
/// target time activates it, and a stop from any of those states returns to
/// idle. A stop during the countdown cancels the pending start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Scheduled,
    Active,
}

/// Wires the signaling client, peer coordinator, chunk recorder and upload
/// pipeline into one session. It is the only caller of recorder start/stop
/// and of coordinator connect/disconnect.
pub struct SessionOrchestrator {
    room_id: String,
    participant_id: String,
    role: ParticipantRole,
    recorder_config: RecorderConfig,
    client: Mutex<SignalingClient>,
    signal_tx: mpsc::UnboundedSender<SignalMessage>,
    coordinator: Arc<PeerConnectionCoordinator>,
    recorder: Arc<ChunkRecorder>,
    pipeline: UploadPipeline,
    capture_factory: CaptureFactory,
    events: mpsc::UnboundedSender<SessionEvent>,
    run_state: Mutex<RunState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionOrchestrator {
    /// Connect to the hub and enter the room. Guests carry their invite
    /// token; the hub validates it before membership is granted.
    pub async fn join(
        config: SessionConfig,
        capture_factory: CaptureFactory,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>)> {
        let (client, inbound) = SignalingClient::connect(&config.server_url).await?;
        let signal_tx = client
            .sender()
            .ok_or_else(|| StudioError::transport("signaling client closed at startup"))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (peer_events_tx, peer_events_rx) = mpsc::unbounded_channel();

        let local_media = LocalMedia::new(
            &config.participant_id,
            config.media.audio,
            config.media.video,
        );
        let coordinator = Arc::new(PeerConnectionCoordinator::new(
            create_webrtc_api(),
            config.participant_id.clone(),
            config.room_id.clone(),
            local_media,
            signal_tx.clone(),
            peer_events_tx,
        ));

        let (recorder, recorder_events) =
            ChunkRecorder::new(&config.room_id, &config.participant_id);
        let (pipeline, upload_events) = UploadPipeline::new(
            &config.upload,
            config.role.as_str(),
            config.display_name.clone(),
        )?;

        client.send(SignalMessage::JoinRoom {
            room_id: config.room_id.clone(),
            participant_id: config.participant_id.clone(),
            role: config.role,
            name: config.display_name.clone(),
            token: config.invite_token.clone(),
        })?;

        let orchestrator = Arc::new(Self {
            room_id: config.room_id,
            participant_id: config.participant_id,
            role: config.role,
            recorder_config: config.recorder,
            client: Mutex::new(client),
            signal_tx,
            coordinator,
            recorder: Arc::new(recorder),
            pipeline,
            capture_factory,
            events: events_tx,
            run_state: Mutex::new(RunState::Idle),
            tasks: Mutex::new(Vec::new()),
        });

        orchestrator
            .spawn_pumps(inbound, peer_events_rx, recorder_events, upload_events, config.heartbeat_interval)
            .await;

        Ok((orchestrator, events_rx))
    }

    async fn spawn_pumps(
        self: &Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<SignalMessage>,
        mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
        mut recorder_events: mpsc::UnboundedReceiver<RecorderEvent>,
        mut upload_events: mpsc::UnboundedReceiver<UploadEvent>,
        heartbeat_interval: Duration,
    ) {
        let mut tasks = self.tasks.lock().await;

        let this = self.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                this.handle_signal(message).await;
            }
            tracing::info!("Signaling stream ended");
        }));

        let this = self.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = peer_events.recv().await {
                this.handle_peer_event(event).await;
            }
        }));

        let this = self.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = recorder_events.recv().await {
                if let RecorderEvent::CaptureFailed { index, error } = event {
                    tracing::error!(index = index, error = %error, "Recording run failed");
                    let mut run = this.run_state.lock().await;
                    *run = RunState::Idle;
                    drop(run);
                    let _ = this.events.send(SessionEvent::RecordingFailed { error });
                }
            }
        }));

        let this = self.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = upload_events.recv().await {
                match event {
                    UploadEvent::SegmentUploaded {
                        index,
                        uploaded_so_far,
                    } => {
                        let _ = this.events.send(SessionEvent::UploadProgress {
                            index,
                            uploaded_so_far,
                        });
                    }
                    UploadEvent::SegmentFailed { index, reason, .. } => {
                        let _ = this
                            .events
                            .send(SessionEvent::SegmentUploadFailed { index, reason });
                    }
                }
            }
        }));

        let this = self.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if this
                    .signal_tx
                    .send(SignalMessage::Heartbeat {
                        room_id: this.room_id.clone(),
                    })
                    .is_err()
                {
                    break;
                }
            }
        }));
    }

    async fn handle_signal(self: &Arc<Self>, message: SignalMessage) {
        match message {
            SignalMessage::RoomJoined { members, .. } => {
                // declare readiness, then offer to everyone already present:
                // the newer joiner always initiates, which rules out glare
                let _ = self.signal_tx.send(SignalMessage::Ready {
                    room_id: self.room_id.clone(),
                    from: None,
                });
                for member in &members {
                    if member.participant_id != self.participant_id {
                        if let Err(e) = self.coordinator.connect_to(&member.participant_id).await {
                            tracing::error!(
                                remote_id = %member.participant_id,
                                error = %e,
                                "Failed to start negotiation"
                            );
                        }
                    }
                }
                let _ = self.events.send(SessionEvent::RoomJoined { members });
            }
            SignalMessage::UserJoined { participant_id, .. } => {
                // the newcomer offers to us; nothing to initiate here
                let _ = self
                    .events
                    .send(SessionEvent::MemberJoined { participant_id });
            }
            SignalMessage::Ready { from, .. } => {
                tracing::debug!(from = ?from, "Peer declared ready");
            }
            SignalMessage::Offer { from, to, sdp, .. } => {
                if to != self.participant_id {
                    return;
                }
                let Some(from) = from else { return };
                if let Err(e) = self.coordinator.handle_offer(&from, sdp).await {
                    tracing::error!(remote_id = %from, error = %e, "Failed to handle offer");
                }
            }
            SignalMessage::Answer { from, to, sdp, .. } => {
                if to != self.participant_id {
                    return;
                }
                let Some(from) = from else { return };
                if let Err(e) = self.coordinator.handle_answer(&from, sdp).await {
                    tracing::error!(remote_id = %from, error = %e, "Failed to handle answer");
                }
            }
            SignalMessage::IceCandidate {
                from,
                to,
                candidate,
                sdp_mid,
                sdp_mline_index,
                ..
            } => {
                if to != self.participant_id {
                    return;
                }
                let Some(from) = from else { return };
                if let Err(e) = self
                    .coordinator
                    .handle_ice_candidate(&from, candidate, sdp_mid, sdp_mline_index)
                    .await
                {
                    tracing::error!(remote_id = %from, error = %e, "Failed to handle candidate");
                }
            }
            SignalMessage::StartRecording { start_time, .. } => {
                let this = self.clone();
                tokio::spawn(async move {
                    this.begin_recording_at(start_time).await;
                });
            }
            SignalMessage::StopRecording { .. } => {
                let this = self.clone();
                tokio::spawn(async move {
                    this.finish_recording().await;
                });
            }
            SignalMessage::RecordingStopped {
                participant_id, ..
            } => {
                tracing::info!(participant_id = %participant_id, "Peer finished uploading");
            }
            SignalMessage::ParticipantLeft { participant_id, .. } => {
                self.coordinator.disconnect_from(&participant_id).await;
                let _ = self
                    .events
                    .send(SessionEvent::MemberLeft { participant_id });
            }
            SignalMessage::Error { message } => {
                tracing::error!(message = %message, "Hub reported an error");
                let _ = self.events.send(SessionEvent::ServerError { message });
            }
            SignalMessage::JoinRoom { .. }
            | SignalMessage::StartRecordingRequest { .. }
            | SignalMessage::Heartbeat { .. } => {
                tracing::debug!("Ignoring client-to-hub message echoed to client");
            }
        }
    }

    async fn handle_peer_event(self: &Arc<Self>, event: PeerEvent) {
        match event {
            PeerEvent::StateChanged { remote_id, state } => {
                if state == PeerLinkState::Disconnected {
                    // terminal transport failure destroys the link; a later
                    // join event negotiates from scratch
                    self.coordinator.disconnect_from(&remote_id).await;
                }
                let _ = self.events.send(SessionEvent::PeerStateChanged {
                    participant_id: remote_id,
                    state,
                });
            }
            PeerEvent::RemoteTrack { remote_id, kind } => {
                let _ = self.events.send(SessionEvent::RemoteTrack {
                    participant_id: remote_id,
                    kind,
                });
            }
            PeerEvent::RemoteStreamEnded { remote_id } => {
                let _ = self.events.send(SessionEvent::PeerStateChanged {
                    participant_id: remote_id,
                    state: PeerLinkState::Closed,
                });
            }
        }
    }

    /// Sleep until the shared start target, then begin capture. All
    /// participants receive the same target, so independently clocked
    /// clients start within a small tolerance of each other.
    async fn begin_recording_at(self: &Arc<Self>, start_time: u64) {
        {
            let mut run = self.run_state.lock().await;
            if *run != RunState::Idle {
                tracing::warn!("Ignoring start_recording while a run is pending or active");
                return;
            }
            *run = RunState::Scheduled;
        }

        let now = epoch_ms();
        if start_time > now {
            sleep(Duration::from_millis(start_time - now)).await;
        } else {
            tracing::warn!(
                start_time = start_time,
                now = now,
                "Start target already passed, beginning immediately"
            );
        }

        let mut run = self.run_state.lock().await;
        if *run != RunState::Scheduled {
            tracing::info!("Recording start canceled before the target time");
            return;
        }

        let source = match (self.capture_factory)() {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(error = %e, "Capture device unavailable");
                *run = RunState::Idle;
                let _ = self.events.send(SessionEvent::RecordingFailed {
                    error: e.to_string(),
                });
                return;
            }
        };

        let sink: Arc<dyn SegmentSink> = Arc::new(self.pipeline.clone());
        match self
            .recorder
            .start(source, self.recorder_config, sink)
            .await
        {
            Ok(()) => {
                *run = RunState::Active;
                let _ = self
                    .events
                    .send(SessionEvent::RecordingStarted { start_time });
            }
            Err(e) => {
                *run = RunState::Idle;
                let _ = self.events.send(SessionEvent::RecordingFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    /// Stop capture, drain uploads, then announce completion
    async fn finish_recording(self: &Arc<Self>) {
        {
            let mut run = self.run_state.lock().await;
            if *run == RunState::Idle {
                tracing::debug!("Stop received with no pending or active run");
                return;
            }
            // a Scheduled run is canceled here; begin_recording_at observes
            // the transition after its countdown
            *run = RunState::Idle;
        }

        if let Err(e) = self.recorder.stop().await {
            tracing::error!(error = %e, "Failed to stop recorder");
        }
        self.pipeline.drain().await;

        let _ = self.signal_tx.send(SignalMessage::RecordingStopped {
            room_id: self.room_id.clone(),
            participant_id: self.participant_id.clone(),
        });
        let _ = self.events.send(SessionEvent::RecordingStopped {
            uploaded: self.pipeline.uploaded_count(),
        });
    }

    /// Host command: ask the hub to schedule a synchronized start
    pub fn request_recording_start(&self) -> Result<()> {
        if self.role != ParticipantRole::Host {
            return Err(StudioError::internal(
                "only the host can start the recording",
            ));
        }
        self.signal_tx
            .send(SignalMessage::StartRecordingRequest {
                room_id: self.room_id.clone(),
            })
            .map_err(|_| StudioError::transport("signaling writer closed"))
    }

    /// Host command: stop the recording for the whole room
    pub fn request_recording_stop(&self) -> Result<()> {
        if self.role != ParticipantRole::Host {
            return Err(StudioError::internal(
                "only the host can stop the recording",
            ));
        }
        self.signal_tx
            .send(SignalMessage::StopRecording {
                room_id: self.room_id.clone(),
            })
            .map_err(|_| StudioError::transport("signaling writer closed"))
    }

    pub async fn peer_state(&self, remote_id: &str) -> Option<PeerLinkState> {
        self.coordinator.link_state(remote_id).await
    }

    pub fn uploaded_count(&self) -> u64 {
        self.pipeline.uploaded_count()
    }

    pub async fn recorder_state(&self) -> RecorderState {
        self.recorder.state().await
    }

    /// Leave the session: finish any active run, tear down every link, and
    /// close the transport. The capture device is released before return.
    pub async fn leave(self: &Arc<Self>) {
        self.finish_recording().await;
        self.coordinator.close_all().await;

        {
            let mut client = self.client.lock().await;
            client.close().await;
        }

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        tracing::info!(
            room_id = %self.room_id,
            participant_id = %self.participant_id,
            "Left session"
        );
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
