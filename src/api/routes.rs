use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use serde::{Deserialize, Serialize};
use warp::Filter;

use crate::session::SessionServiceClient;
use crate::signaling::SignalingHub;
use crate::tokens::{join_url, GuestTokenService};
use super::websocket;

pub struct ApiContext {
    pub hub: Arc<SignalingHub>,
    pub tokens: Arc<GuestTokenService>,
    /// External recording-metadata service; without it, room bounds fall
    /// back to the configured default
    pub session_service: Option<Arc<SessionServiceClient>>,
    pub start_countdown_ms: u64,
    pub default_max_participants: u32,
    /// Origin used when shaping guest join URLs
    pub public_origin: String,
    pub token_validity: Duration,
}

#[derive(Debug, Deserialize)]
struct IssueTokenRequest {
    room_id: String,
    guest_name: Option<String>,
    validity_secs: Option<u64>,
    uses: Option<u32>,
}

#[derive(Debug, Serialize)]
struct IssueTokenResponse {
    token: String,
    expires_at: u64,
    uses_remaining: u32,
    join_url: String,
}

pub fn routes(
    ctx: Arc<ApiContext>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    session_websocket(ctx.clone())
        .or(health(ctx.clone()))
        .or(server_config(ctx.clone()))
        .or(issue_token(ctx))
}

fn with_ctx(
    ctx: Arc<ApiContext>,
) -> impl Filter<Extract = (Arc<ApiContext>,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn session_websocket(
    ctx: Arc<ApiContext>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path("session")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_ctx(ctx))
        .map(|ws: warp::ws::Ws, ctx: Arc<ApiContext>| {
            ws.on_upgrade(move |socket| websocket::handle_session_socket(socket, ctx))
        })
}

fn health(
    _ctx: Arc<ApiContext>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("session" / "health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "healthy",
            "service": "Studio Server",
            "version": env!("CARGO_PKG_VERSION"),
        }))
    })
}

fn server_config(
    ctx: Arc<ApiContext>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("session" / "config")
        .and(warp::get())
        .and(with_ctx(ctx))
        .map(|ctx: Arc<ApiContext>| {
            warp::reply::json(&serde_json::json!({
                "default_max_participants": ctx.default_max_participants,
                "start_countdown_ms": ctx.start_countdown_ms,
            }))
        })
}

/// Host-facing token issuance. Tokens are single-use unless asked otherwise.
fn issue_token(
    ctx: Arc<ApiContext>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("session" / "token")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_ctx(ctx))
        .and_then(
            |request: IssueTokenRequest, ctx: Arc<ApiContext>| async move {
                let validity = request
                    .validity_secs
                    .map(Duration::from_secs)
                    .unwrap_or(ctx.token_validity);
                let token = ctx
                    .tokens
                    .issue(
                        &request.room_id,
                        request.guest_name,
                        validity,
                        request.uses.unwrap_or(1),
                    )
                    .await;

                let expires_at = token
                    .expires_at
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                Ok::<_, warp::Rejection>(warp::reply::json(&IssueTokenResponse {
                    join_url: join_url(&ctx.public_origin, &token.token),
                    token: token.token,
                    expires_at,
                    uses_remaining: token.uses_remaining,
                }))
            },
        )
}

pub(super) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
