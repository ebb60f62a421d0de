use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StudioError};

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Recording record owned by the external session service. The service is
/// the source of truth for identity, status and the participant bound; this
/// core only orchestrates live coordination around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingRecord {
    pub room_id: String,
    pub host_id: String,
    pub title: Option<String>,
    pub status: String,
    pub max_participants: u32,
}

impl RecordingRecord {
    /// Whether the recording still accepts participants
    pub fn is_joinable(&self) -> bool {
        !matches!(self.status.as_str(), "completed" | "cancelled")
    }
}

/// Guest token grant as issued by the session service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestTokenGrant {
    pub token: String,
    /// Epoch seconds
    pub expires_at: u64,
    pub uses_remaining: u32,
    pub join_url: String,
}

#[derive(Debug, Serialize)]
struct CreateRecordingRequest<'a> {
    host_id: &'a str,
    title: Option<&'a str>,
    max_participants: u32,
}

#[derive(Debug, Serialize)]
struct UpdateTitleRequest<'a> {
    title: &'a str,
}

/// Client for the recording-metadata REST service
pub struct SessionServiceClient {
    base_url: String,
    client: reqwest::Client,
}

impl SessionServiceClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| StudioError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub async fn create_recording(
        &self,
        host_id: &str,
        title: Option<&str>,
        max_participants: u32,
    ) -> Result<RecordingRecord> {
        let url = format!("{}/recordings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&CreateRecordingRequest {
                host_id,
                title,
                max_participants,
            })
            .send()
            .await
            .map_err(|e| StudioError::SessionService(format!("create recording: {}", e)))?;

        Self::json_body(response, "create recording").await
    }

    pub async fn get_recording(&self, room_id: &str) -> Result<RecordingRecord> {
        let url = format!(
            "{}/recordings/{}",
            self.base_url,
            urlencoding::encode(room_id)
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StudioError::SessionService(format!("fetch recording: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StudioError::RoomNotFound(room_id.to_string()));
        }
        Self::json_body(response, "fetch recording").await
    }

    pub async fn issue_guest_token(&self, room_id: &str) -> Result<GuestTokenGrant> {
        let url = format!(
            "{}/recordings/{}/token",
            self.base_url,
            urlencoding::encode(room_id)
        );
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| StudioError::SessionService(format!("issue token: {}", e)))?;

        Self::json_body(response, "issue token").await
    }

    pub async fn update_title(&self, room_id: &str, title: &str) -> Result<()> {
        let url = format!(
            "{}/recordings/{}/title",
            self.base_url,
            urlencoding::encode(room_id)
        );
        let response = self
            .client
            .put(&url)
            .json(&UpdateTitleRequest { title })
            .send()
            .await
            .map_err(|e| StudioError::SessionService(format!("update title: {}", e)))?;

        if !response.status().is_success() {
            return Err(StudioError::SessionService(format!(
                "update title failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Check if the session service is reachable
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn json_body<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        context: &str,
    ) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(StudioError::SessionService(format!(
                "{} failed with status {}: {}",
                context, status, error_text
            )));
        }
        response
            .json()
            .await
            .map_err(|e| StudioError::SessionService(format!("{}: invalid response: {}", context, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::Filter;

    async fn spawn_service() -> String {
        let create = warp::path("recordings")
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::json())
            .map(|body: serde_json::Value| {
                warp::reply::json(&serde_json::json!({
                    "room_id": "room-77",
                    "host_id": body["host_id"],
                    "title": body["title"],
                    "status": "created",
                    "max_participants": body["max_participants"],
                }))
            });
        let fetch = warp::path!("recordings" / String)
            .and(warp::get())
            .map(|room_id: String| {
                if room_id == "missing" {
                    warp::reply::with_status(
                        warp::reply::json(&serde_json::json!({"error": "not found"})),
                        warp::http::StatusCode::NOT_FOUND,
                    )
                } else {
                    warp::reply::with_status(
                        warp::reply::json(&serde_json::json!({
                            "room_id": room_id,
                            "host_id": "host-1",
                            "title": "Weekly sync",
                            "status": "live",
                            "max_participants": 4,
                        })),
                        warp::http::StatusCode::OK,
                    )
                }
            });
        let token = warp::path!("recordings" / String / "token")
            .and(warp::post())
            .map(|room_id: String| {
                warp::reply::json(&serde_json::json!({
                    "token": "tok-abc",
                    "expires_at": 1_900_000_000u64,
                    "uses_remaining": 1,
                    "join_url": format!("https://studio.example.com/join/tok-abc?room={}", room_id),
                }))
            });
        let title = warp::path!("recordings" / String / "title")
            .and(warp::put())
            .and(warp::body::json())
            .map(|_room_id: String, _body: serde_json::Value| {
                warp::reply::with_status("", warp::http::StatusCode::NO_CONTENT)
            });

        let routes = create.or(fetch).or(token).or(title);
        let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_create_and_fetch_recording() {
        let base = spawn_service().await;
        let client = SessionServiceClient::new(&base).unwrap();

        let created = client
            .create_recording("host-1", Some("Weekly sync"), 4)
            .await
            .unwrap();
        assert_eq!(created.room_id, "room-77");
        assert_eq!(created.max_participants, 4);

        let fetched = client.get_recording("room-77").await.unwrap();
        assert_eq!(fetched.status, "live");
        assert!(fetched.is_joinable());
    }

    #[tokio::test]
    async fn test_fetch_missing_recording_maps_to_room_not_found() {
        let base = spawn_service().await;
        let client = SessionServiceClient::new(&base).unwrap();
        let err = client.get_recording("missing").await.unwrap_err();
        assert!(matches!(err, StudioError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn test_issue_guest_token_grant() {
        let base = spawn_service().await;
        let client = SessionServiceClient::new(&base).unwrap();
        let grant = client.issue_guest_token("room-77").await.unwrap();
        assert_eq!(grant.token, "tok-abc");
        assert_eq!(grant.uses_remaining, 1);
        assert!(grant.join_url.contains("/join/"));
    }

    #[tokio::test]
    async fn test_update_title() {
        let base = spawn_service().await;
        let client = SessionServiceClient::new(&base).unwrap();
        client.update_title("room-77", "Renamed").await.unwrap();
    }

    #[test]
    fn test_terminal_status_not_joinable() {
        let record = RecordingRecord {
            room_id: "r".into(),
            host_id: "h".into(),
            title: None,
            status: "completed".into(),
            max_participants: 2,
        };
        assert!(!record.is_joinable());
    }
}
