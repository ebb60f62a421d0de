use std::sync::Arc;
use std::time::Duration;

use studio_core::api;
use studio_core::config::Config;
use studio_core::session::SessionServiceClient;
use studio_core::signaling::SignalingHub;
use studio_core::tokens::GuestTokenService;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env();

    let hub = SignalingHub::new(
        config.signaling.default_max_participants,
        Duration::from_millis(config.signaling.liveness_timeout_ms),
    );
    let _sweeper = hub.spawn_liveness_sweeper();

    let session_service = config.session_service.as_ref().and_then(|svc| {
        match SessionServiceClient::new(&svc.base_url) {
            Ok(client) => {
                tracing::info!(url = %svc.base_url, "Session service client initialized");
                Some(Arc::new(client))
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to initialize session service client");
                None
            }
        }
    });

    let ctx = Arc::new(api::ApiContext {
        hub,
        tokens: GuestTokenService::new(),
        session_service,
        start_countdown_ms: config.signaling.start_countdown_ms,
        default_max_participants: config.signaling.default_max_participants,
        public_origin: config.server.public_origin.clone(),
        token_validity: Duration::from_secs(config.signaling.token_validity_secs),
    });

    let address = config.bind_address();
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "Studio signaling server listening"
    );
    warp::serve(api::routes(ctx)).run(address).await;
}
