use std::sync::Arc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::signaling::{ParticipantRole, SignalMessage};
use super::routes::{epoch_ms, ApiContext};

/// One signaling connection. The socket is split into a reader loop and a
/// writer task fed by the member's outbound queue; when the socket ends for
/// any reason the membership is torn down as an implicit leave.
pub async fn handle_session_socket(websocket: WebSocket, ctx: Arc<ApiContext>) {
    tracing::info!("New signaling connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<SignalMessage>();

    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize outbound message");
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::text(text)).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    // (room_id, participant_id) once a join succeeds
    let mut membership: Option<(String, String)> = None;

    while let Some(result) = ws_receiver.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(error = %e, "WebSocket error");
                break;
            }
        };

        let Ok(text) = message.to_str() else { continue };
        let signal = match serde_json::from_str::<SignalMessage>(text) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::error!(error = %e, raw_message = %text, "Failed to parse message");
                continue;
            }
        };

        if let Some((room_id, participant_id)) = &membership {
            ctx.hub.heartbeat(room_id, participant_id).await;
        }

        handle_signal(&ctx, &tx, &mut membership, signal).await;
    }

    if let Some((room_id, participant_id)) = membership {
        ctx.hub.leave(&room_id, &participant_id).await;
    }
    sender_task.abort();
    tracing::info!("Signaling connection closed");
}

async fn handle_signal(
    ctx: &Arc<ApiContext>,
    tx: &mpsc::UnboundedSender<SignalMessage>,
    membership: &mut Option<(String, String)>,
    signal: SignalMessage,
) {
    match signal {
        SignalMessage::JoinRoom {
            room_id,
            participant_id,
            role,
            name,
            token,
        } => {
            if membership.is_some() {
                send_error(tx, "already joined a room on this connection");
                return;
            }

            let max_participants = match resolve_room_bound(ctx, &room_id, tx).await {
                Ok(bound) => bound,
                Err(()) => return, // rejection already sent
            };

            // guests enter via invite only; validated last so a rejected
            // room does not consume a single-use token
            if role == ParticipantRole::Guest {
                let Some(token) = token else {
                    send_error(tx, "invite token required");
                    return;
                };
                match ctx.tokens.validate(&token).await {
                    Ok(record) if record.recording_id != room_id => {
                        send_error(tx, "invite token is for a different recording");
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        send_error(tx, &e.to_string());
                        return;
                    }
                }
            }

            match ctx
                .hub
                .join(&room_id, &participant_id, role, name, max_participants, tx.clone())
                .await
            {
                Ok(members) => {
                    *membership = Some((room_id.clone(), participant_id));
                    let _ = tx.send(SignalMessage::RoomJoined { room_id, members });
                }
                Err(e) => send_error(tx, &e.to_string()),
            }
        }

        SignalMessage::StartRecordingRequest { room_id } => {
            let Some((_, participant_id)) = membership else {
                send_error(tx, "join a room first");
                return;
            };
            if ctx.hub.member_role(&room_id, participant_id).await != Some(ParticipantRole::Host) {
                send_error(tx, "only the host can start the recording");
                return;
            }
            // one shared target keeps independently clocked clients together
            let start_time = epoch_ms() + ctx.start_countdown_ms;
            tracing::info!(
                room_id = %room_id,
                start_time = start_time,
                "Broadcasting recording start"
            );
            if let Err(e) = ctx
                .hub
                .broadcast(
                    &room_id,
                    SignalMessage::StartRecording {
                        room_id: room_id.clone(),
                        start_time,
                    },
                )
                .await
            {
                send_error(tx, &e.to_string());
            }
        }

        SignalMessage::StopRecording { room_id } => {
            let Some((_, participant_id)) = membership else {
                send_error(tx, "join a room first");
                return;
            };
            if ctx.hub.member_role(&room_id, participant_id).await != Some(ParticipantRole::Host) {
                send_error(tx, "only the host can stop the recording");
                return;
            }
            tracing::info!(room_id = %room_id, "Broadcasting recording stop");
            if let Err(e) = ctx
                .hub
                .broadcast(
                    &room_id,
                    SignalMessage::StopRecording {
                        room_id: room_id.clone(),
                    },
                )
                .await
            {
                send_error(tx, &e.to_string());
            }
        }

        SignalMessage::Heartbeat { .. } => {
            // liveness already refreshed above
        }

        SignalMessage::Offer { .. }
        | SignalMessage::Answer { .. }
        | SignalMessage::IceCandidate { .. }
        | SignalMessage::Ready { .. }
        | SignalMessage::RecordingStopped { .. } => {
            let Some((room_id, participant_id)) = membership else {
                send_error(tx, "join a room first");
                return;
            };
            if let Err(e) = ctx.hub.relay(room_id, participant_id, signal).await {
                tracing::warn!(error = %e, "Relay failed");
            }
        }

        SignalMessage::RoomJoined { .. }
        | SignalMessage::UserJoined { .. }
        | SignalMessage::StartRecording { .. }
        | SignalMessage::ParticipantLeft { .. }
        | SignalMessage::Error { .. } => {
            tracing::debug!("Ignoring hub-to-client message from client");
        }
    }
}

/// Resolve the room's participant bound from the recording record when a
/// session service is configured. A record in a terminal status rejects the
/// join; an unreachable service falls back to the configured default.
async fn resolve_room_bound(
    ctx: &Arc<ApiContext>,
    room_id: &str,
    tx: &mpsc::UnboundedSender<SignalMessage>,
) -> std::result::Result<Option<u32>, ()> {
    let Some(service) = &ctx.session_service else {
        return Ok(None);
    };

    match service.get_recording(room_id).await {
        Ok(record) if !record.is_joinable() => {
            send_error(
                tx,
                &crate::error::StudioError::RoomClosed(room_id.to_string(), record.status).to_string(),
            );
            Err(())
        }
        Ok(record) => Ok(Some(record.max_participants)),
        Err(crate::error::StudioError::RoomNotFound(_)) => {
            send_error(
                tx,
                &crate::error::StudioError::RoomNotFound(room_id.to_string()).to_string(),
            );
            Err(())
        }
        Err(e) => {
            tracing::warn!(
                room_id = %room_id,
                error = %e,
                "Session service unreachable, using default room bound"
            );
            Ok(None)
        }
    }
}

fn send_error(tx: &mpsc::UnboundedSender<SignalMessage>, message: &str) {
    let _ = tx.send(SignalMessage::Error {
        message: message.to_string(),
    });
}
