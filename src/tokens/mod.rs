use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Result, StudioError};

const TOKEN_LENGTH: usize = 32;

/// Single-use, time-limited invite token scoped to one recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestToken {
    pub token: String,
    pub recording_id: String,
    pub guest_name: Option<String>,
    pub expires_at: SystemTime,
    pub uses_remaining: u32,
    pub active: bool,
}

/// Issues and validates invite tokens. Validation consumes a use; expiry and
/// exhaustion deactivate the record, and every rejection carries a specific
/// reason so a guest is never silently treated as valid.
pub struct GuestTokenService {
    tokens: Arc<RwLock<HashMap<String, GuestToken>>>,
}

impl GuestTokenService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tokens: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn generate_token() -> String {
        let mut rng = rand::thread_rng();
        (0..TOKEN_LENGTH)
            .map(|_| {
                let chars = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
                chars[rng.gen_range(0..chars.len())] as char
            })
            .collect()
    }

    /// Issue a token for a recording. `uses` defaults to 1 at the API layer.
    pub async fn issue(
        &self,
        recording_id: &str,
        guest_name: Option<String>,
        validity: Duration,
        uses: u32,
    ) -> GuestToken {
        let token = GuestToken {
            token: Self::generate_token(),
            recording_id: recording_id.to_string(),
            guest_name,
            expires_at: SystemTime::now() + validity,
            uses_remaining: uses.max(1),
            active: true,
        };

        let mut tokens = self.tokens.write().await;
        tokens.insert(token.token.clone(), token.clone());

        tracing::info!(
            recording_id = %recording_id,
            uses = token.uses_remaining,
            "Issued guest token"
        );
        token
    }

    /// Validate a token and consume one use. The returned record reflects
    /// the state after consumption.
    pub async fn validate(&self, token: &str) -> Result<GuestToken> {
        let mut tokens = self.tokens.write().await;

        let record = tokens.get_mut(token).ok_or(StudioError::TokenUnknown)?;

        if record.uses_remaining == 0 {
            record.active = false;
            return Err(StudioError::TokenExhausted);
        }
        if !record.active {
            return Err(StudioError::TokenInactive);
        }
        if SystemTime::now() > record.expires_at {
            record.active = false;
            return Err(StudioError::TokenExpired);
        }

        record.uses_remaining -= 1;
        if record.uses_remaining == 0 {
            record.active = false;
        }

        tracing::info!(
            recording_id = %record.recording_id,
            uses_remaining = record.uses_remaining,
            "Guest token consumed"
        );
        Ok(record.clone())
    }

    /// Deactivate a token ahead of expiry
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        let record = tokens.get_mut(token).ok_or(StudioError::TokenUnknown)?;
        record.active = false;
        tracing::info!(recording_id = %record.recording_id, "Guest token revoked");
        Ok(())
    }

    /// Drop expired records. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        let now = SystemTime::now();
        tokens.retain(|_, record| record.active && record.expires_at > now);
        before - tokens.len()
    }
}

/// Guest join URL: `<origin>/join/<token>`
pub fn join_url(origin: &str, token: &str) -> String {
    format!(
        "{}/join/{}",
        origin.trim_end_matches('/'),
        urlencoding::encode(token)
    )
}
