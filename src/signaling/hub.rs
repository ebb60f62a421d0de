use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

use crate::error::{Result, StudioError};
use super::message::{MemberInfo, ParticipantRole, SignalMessage};

/// Key for identifying a member: (room_id, participant_id)
type MemberKey = (String, String);

/// Outbound queue handed to the hub on join. One writer task drains each
/// queue, so per-sender relay order is preserved end to end.
pub type MemberHandle = mpsc::UnboundedSender<SignalMessage>;

struct Member {
    info: MemberInfo,
    sender: MemberHandle,
    last_seen: Instant,
}

struct Room {
    max_participants: u32,
    /// Participant ids in join order
    members: Vec<String>,
}

/// Relays connection-setup messages between participants of a recording
/// room. No media passes through here; relay is best-effort with no
/// persistence or replay, and higher layers must tolerate a lost frame by
/// renegotiating.
pub struct SignalingHub {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
    members: Arc<RwLock<HashMap<MemberKey, Member>>>,
    default_max_participants: u32,
    liveness_timeout: Duration,
}

impl SignalingHub {
    pub fn new(default_max_participants: u32, liveness_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            members: Arc::new(RwLock::new(HashMap::new())),
            default_max_participants,
            liveness_timeout,
        })
    }

    /// Register membership and return the current member list (joiner
    /// included, in join order). Remaining members are notified with
    /// `user_joined` carrying the updated roster.
    pub async fn join(
        &self,
        room_id: &str,
        participant_id: &str,
        role: ParticipantRole,
        name: Option<String>,
        max_participants: Option<u32>,
        sender: MemberHandle,
    ) -> Result<Vec<MemberInfo>> {
        let mut rooms = self.rooms.write().await;
        let mut members = self.members.write().await;

        let room = rooms.entry(room_id.to_string()).or_insert_with(|| Room {
            max_participants: max_participants.unwrap_or(self.default_max_participants),
            members: Vec::new(),
        });

        if room.members.iter().any(|id| id == participant_id) {
            return Err(StudioError::DuplicateParticipant(
                participant_id.to_string(),
                room_id.to_string(),
            ));
        }

        if room.members.len() as u32 >= room.max_participants {
            return Err(StudioError::RoomFull(
                room_id.to_string(),
                room.max_participants,
            ));
        }

        room.members.push(participant_id.to_string());

        let info = MemberInfo {
            participant_id: participant_id.to_string(),
            role,
            name,
        };
        members.insert(
            (room_id.to_string(), participant_id.to_string()),
            Member {
                info,
                sender,
                last_seen: Instant::now(),
            },
        );

        let roster: Vec<MemberInfo> = room
            .members
            .iter()
            .filter_map(|id| members.get(&(room_id.to_string(), id.clone())))
            .map(|m| m.info.clone())
            .collect();

        // Notify everyone already in the room
        let notice = SignalMessage::UserJoined {
            room_id: room_id.to_string(),
            participant_id: participant_id.to_string(),
            members: roster.clone(),
        };
        for id in &room.members {
            if id == participant_id {
                continue;
            }
            if let Some(member) = members.get(&(room_id.to_string(), id.clone())) {
                if member.sender.send(notice.clone()).is_err() {
                    tracing::warn!(room_id = %room_id, participant_id = %id, "Dropped user_joined notice");
                }
            }
        }

        tracing::info!(
            room_id = %room_id,
            participant_id = %participant_id,
            role = %role.as_str(),
            member_count = room.members.len(),
            "Participant joined room"
        );
        Ok(roster)
    }

    /// Fan out `message` to every other current member of the room,
    /// stamping the sender identity. Undelivered frames are logged and
    /// dropped; signaling is best-effort.
    pub async fn relay(
        &self,
        room_id: &str,
        sender_id: &str,
        message: SignalMessage,
    ) -> Result<()> {
        let rooms = self.rooms.read().await;
        let members = self.members.read().await;

        let room = rooms
            .get(room_id)
            .ok_or_else(|| StudioError::RoomNotFound(room_id.to_string()))?;

        let stamped = message.with_sender(sender_id);
        for id in &room.members {
            if id == sender_id {
                continue;
            }
            if let Some(member) = members.get(&(room_id.to_string(), id.clone())) {
                if member.sender.send(stamped.clone()).is_err() {
                    tracing::warn!(
                        room_id = %room_id,
                        recipient = %id,
                        "Failed to relay message, recipient queue closed"
                    );
                }
            }
        }

        Ok(())
    }

    /// Deliver `message` to every member of the room, the sender included.
    /// Used for room-wide commands such as the recording start broadcast.
    pub async fn broadcast(&self, room_id: &str, message: SignalMessage) -> Result<()> {
        let rooms = self.rooms.read().await;
        let members = self.members.read().await;

        let room = rooms
            .get(room_id)
            .ok_or_else(|| StudioError::RoomNotFound(room_id.to_string()))?;

        for id in &room.members {
            if let Some(member) = members.get(&(room_id.to_string(), id.clone())) {
                if member.sender.send(message.clone()).is_err() {
                    tracing::warn!(
                        room_id = %room_id,
                        recipient = %id,
                        "Failed to broadcast message, recipient queue closed"
                    );
                }
            }
        }

        Ok(())
    }

    /// Remove membership and notify remaining members. Returns the removed
    /// member's roster entry if it existed. Empty rooms are dropped.
    pub async fn leave(&self, room_id: &str, participant_id: &str) -> Option<MemberInfo> {
        let mut rooms = self.rooms.write().await;
        let mut members = self.members.write().await;

        let removed = members.remove(&(room_id.to_string(), participant_id.to_string()))?;

        let room = rooms.get_mut(room_id)?;
        room.members.retain(|id| id != participant_id);

        if room.members.is_empty() {
            rooms.remove(room_id);
            tracing::info!(room_id = %room_id, "Room is empty, closing");
        } else {
            let roster: Vec<MemberInfo> = room
                .members
                .iter()
                .filter_map(|id| members.get(&(room_id.to_string(), id.clone())))
                .map(|m| m.info.clone())
                .collect();
            let notice = SignalMessage::ParticipantLeft {
                room_id: room_id.to_string(),
                participant_id: participant_id.to_string(),
                members: roster,
            };
            for id in &room.members {
                if let Some(member) = members.get(&(room_id.to_string(), id.clone())) {
                    let _ = member.sender.send(notice.clone());
                }
            }
        }

        tracing::info!(
            room_id = %room_id,
            participant_id = %participant_id,
            "Participant left room"
        );
        Some(removed.info)
    }

    /// Refresh a member's liveness. Any inbound frame counts; idle clients
    /// send explicit heartbeats.
    pub async fn heartbeat(&self, room_id: &str, participant_id: &str) {
        let mut members = self.members.write().await;
        if let Some(member) =
            members.get_mut(&(room_id.to_string(), participant_id.to_string()))
        {
            member.last_seen = Instant::now();
        }
    }

    /// Evict members silent past the liveness timeout as an implicit leave.
    /// Returns the evicted (room_id, participant_id) pairs.
    pub async fn sweep_stale(&self) -> Vec<(String, String)> {
        let stale: Vec<MemberKey> = {
            let members = self.members.read().await;
            let now = Instant::now();
            members
                .iter()
                .filter(|(_, m)| now.duration_since(m.last_seen) > self.liveness_timeout)
                .map(|(key, _)| key.clone())
                .collect()
        };

        for (room_id, participant_id) in &stale {
            tracing::warn!(
                room_id = %room_id,
                participant_id = %participant_id,
                "Member silent past liveness timeout, treating as leave"
            );
            self.leave(room_id, participant_id).await;
        }

        stale
    }

    /// Background task that runs the liveness sweep at half the timeout
    pub fn spawn_liveness_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let hub = self.clone();
        let period = hub.liveness_timeout / 2;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                hub.sweep_stale().await;
            }
        })
    }

    pub async fn member_count(&self, room_id: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(|r| r.members.len()).unwrap_or(0)
    }

    pub async fn member_role(&self, room_id: &str, participant_id: &str) -> Option<ParticipantRole> {
        let members = self.members.read().await;
        members
            .get(&(room_id.to_string(), participant_id.to_string()))
            .map(|m| m.info.role)
    }

    pub async fn room_exists(&self, room_id: &str) -> bool {
        let rooms = self.rooms.read().await;
        rooms.contains_key(room_id)
    }
}
