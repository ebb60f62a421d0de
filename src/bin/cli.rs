// Studio CLI
// Operator tool for driving recording sessions against a running studio-server:
// health and config checks, token issuance, and scripted host/guest sessions.

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use studio_core::config::Config;
use studio_core::recording::{CaptureConstraints, MediaType, RecorderConfig, SyntheticCapture};
use studio_core::session::{SessionConfig, SessionEvent, SessionOrchestrator, SessionServiceClient};
use studio_core::signaling::ParticipantRole;

#[derive(Parser)]
#[command(name = "studio-cli")]
#[command(about = "Studio session CLI", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Get server configuration
    Config,

    /// Test WebSocket connection
    Connect,

    /// Create a recording via the session service (SESSION_SERVICE_URL)
    CreateRecording {
        /// Host participant ID
        #[arg(short = 'i', long)]
        host_id: String,

        /// Recording title (optional)
        #[arg(short, long)]
        title: Option<String>,

        /// Maximum participants
        #[arg(short, long, default_value = "4")]
        max_participants: u32,
    },

    /// Issue a guest invite token for a recording
    Token {
        /// Recording room ID
        #[arg(short, long)]
        room_id: String,

        /// Guest display name (optional)
        #[arg(short, long)]
        name: Option<String>,

        /// Number of uses (default 1)
        #[arg(short, long)]
        uses: Option<u32>,
    },

    /// Host a session: join, start a synchronized recording, stop, report
    Host {
        /// Recording room ID
        #[arg(short, long)]
        room_id: String,

        /// Host participant ID
        #[arg(short, long)]
        participant_id: String,

        /// Seconds to wait for guests before starting the recording
        #[arg(short, long, default_value = "10")]
        wait: u64,

        /// Seconds of capture before stopping
        #[arg(short, long, default_value = "15")]
        duration: u64,
    },

    /// Join a session as a guest with an invite token
    Join {
        /// Recording room ID
        #[arg(short, long)]
        room_id: String,

        /// Guest participant ID
        #[arg(short, long)]
        participant_id: String,

        /// Invite token
        #[arg(short, long)]
        token: String,

        /// Display name (optional)
        #[arg(short, long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Config => {
            check_config(&cli.server).await;
        }
        Commands::Connect => {
            test_connection(&cli.server).await;
        }
        Commands::CreateRecording {
            host_id,
            title,
            max_participants,
        } => {
            create_recording(host_id, title.as_deref(), *max_participants).await;
        }
        Commands::Token {
            room_id,
            name,
            uses,
        } => {
            issue_token(&cli.server, room_id, name.as_deref(), *uses).await;
        }
        Commands::Host {
            room_id,
            participant_id,
            wait,
            duration,
        } => {
            host_session(&cli.server, room_id, participant_id, *wait, *duration).await;
        }
        Commands::Join {
            room_id,
            participant_id,
            token,
            name,
        } => {
            join_session(
                &cli.server,
                room_id,
                participant_id,
                token,
                name.as_deref(),
            )
            .await;
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/session/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    println!("{}", "Fetching server configuration...".cyan());

    let url = format!("http://{}/session/config", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            if resp.status().is_success() {
                println!("{} Config endpoint accessible", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("\nConfiguration:");
                    println!("{}", serde_json::to_string_pretty(&body).unwrap());
                }
            } else {
                println!("{} Config fetch failed: {}", "✗".red(), resp.status());
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn test_connection(server: &str) {
    println!("{}", "Testing WebSocket connection...".cyan());

    let url = format!("ws://{}/session", server);
    match connect_async(url.as_str()).await {
        Ok((mut ws_stream, _)) => {
            println!("{} WebSocket connection established", "✓".green());
            let probe = json!({"type": "heartbeat", "room_id": "probe"});
            if ws_stream
                .send(Message::Text(probe.to_string()))
                .await
                .is_ok()
            {
                println!("{} Heartbeat frame accepted", "✓".green());
            }
            let _ = timeout(Duration::from_millis(500), ws_stream.next()).await;
            let _ = ws_stream.close(None).await;
        }
        Err(e) => {
            println!("{} Cannot connect to WebSocket: {}", "✗".red(), e);
        }
    }
}

async fn create_recording(host_id: &str, title: Option<&str>, max_participants: u32) {
    println!("{}", "Creating recording...".cyan());

    let Some(service) = Config::from_env().session_service else {
        println!(
            "{} SESSION_SERVICE_URL is not configured",
            "✗".red()
        );
        return;
    };
    let client = match SessionServiceClient::new(&service.base_url) {
        Ok(client) => client,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return;
        }
    };

    match client.create_recording(host_id, title, max_participants).await {
        Ok(record) => {
            println!("{} Recording created", "✓".green());
            println!("  Room ID: {}", record.room_id);
            println!("  Status: {}", record.status);
            println!("  Max participants: {}", record.max_participants);
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
        }
    }
}

async fn issue_token(server: &str, room_id: &str, name: Option<&str>, uses: Option<u32>) {
    println!("{}", "Issuing guest token...".cyan());

    let url = format!("http://{}/session/token", server);
    let client = reqwest::Client::new();
    let body = json!({
        "room_id": room_id,
        "guest_name": name,
        "uses": uses,
    });

    match client.post(&url).json(&body).send().await {
        Ok(resp) if resp.status().is_success() => {
            if let Ok(grant) = resp.json::<serde_json::Value>().await {
                println!("{} Token issued", "✓".green());
                println!("  Token: {}", grant["token"].as_str().unwrap_or(""));
                println!("  Uses remaining: {}", grant["uses_remaining"]);
                println!("  Join URL: {}", grant["join_url"].as_str().unwrap_or(""));
            }
        }
        Ok(resp) => {
            println!("{} Token issuance failed: {}", "✗".red(), resp.status());
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

fn session_config(
    server: &str,
    room_id: &str,
    participant_id: &str,
    role: ParticipantRole,
    name: Option<&str>,
    token: Option<&str>,
) -> SessionConfig {
    let defaults = Config::from_env();
    SessionConfig {
        server_url: format!("ws://{}/session", server),
        room_id: room_id.to_string(),
        participant_id: participant_id.to_string(),
        role,
        display_name: name.map(|n| n.to_string()),
        invite_token: token.map(|t| t.to_string()),
        media: CaptureConstraints::default(),
        recorder: RecorderConfig::from(&defaults.recording),
        upload: defaults.upload,
        heartbeat_interval: Duration::from_secs(5),
    }
}

async fn host_session(
    server: &str,
    room_id: &str,
    participant_id: &str,
    wait: u64,
    duration: u64,
) {
    println!(
        "{}",
        format!("Hosting session in room {}...", room_id).cyan()
    );

    let config = session_config(
        server,
        room_id,
        participant_id,
        ParticipantRole::Host,
        None,
        None,
    );
    let capture_factory = Box::new(|| {
        Ok(Box::new(SyntheticCapture::new(MediaType::Video))
            as Box<dyn studio_core::recording::CaptureSource>)
    });

    let (session, events) = match SessionOrchestrator::join(config, capture_factory).await {
        Ok(joined) => joined,
        Err(e) => {
            println!("{} Failed to join: {}", "✗".red(), e);
            return;
        }
    };
    println!("{} Joined as host", "✓".green());

    let reporter = spawn_event_reporter(events);

    println!("  Waiting {}s for guests...", wait);
    sleep(Duration::from_secs(wait)).await;

    if let Err(e) = session.request_recording_start() {
        println!("{} Failed to request start: {}", "✗".red(), e);
        return;
    }
    println!("{} Requested synchronized recording start", "✓".green());

    sleep(Duration::from_secs(duration)).await;

    if let Err(e) = session.request_recording_stop() {
        println!("{} Failed to request stop: {}", "✗".red(), e);
    }

    // give the drain a moment before reporting
    let _ = timeout(Duration::from_secs(30), reporter).await;
    println!(
        "{} Session complete, {} segments uploaded",
        "✓".green(),
        session.uploaded_count()
    );
    session.leave().await;
}

async fn join_session(
    server: &str,
    room_id: &str,
    participant_id: &str,
    token: &str,
    name: Option<&str>,
) {
    println!(
        "{}",
        format!("Joining room {} as guest...", room_id).cyan()
    );

    let config = session_config(
        server,
        room_id,
        participant_id,
        ParticipantRole::Guest,
        name,
        Some(token),
    );
    let capture_factory = Box::new(|| {
        Ok(Box::new(SyntheticCapture::new(MediaType::Video))
            as Box<dyn studio_core::recording::CaptureSource>)
    });

    let (session, mut events) = match SessionOrchestrator::join(config, capture_factory).await {
        Ok(joined) => joined,
        Err(e) => {
            println!("{} Failed to join: {}", "✗".red(), e);
            return;
        }
    };
    println!("{} Joined as guest", "✓".green());
    println!("  Recording follows the host; press Ctrl+C to leave.");

    let session_for_signal: Arc<SessionOrchestrator> = session.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        println!("\n{}", "Leaving session...".yellow());
        session_for_signal.leave().await;
        std::process::exit(0);
    });

    while let Some(event) = events.recv().await {
        report_event(&event);
        if let SessionEvent::RecordingStopped { uploaded } = event {
            println!(
                "{} Recording finished, {} segments uploaded",
                "✓".green(),
                uploaded
            );
            break;
        }
    }
    session.leave().await;
}

fn spawn_event_reporter(
    mut events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let stopped = matches!(event, SessionEvent::RecordingStopped { .. });
            report_event(&event);
            if stopped {
                break;
            }
        }
    })
}

fn report_event(event: &SessionEvent) {
    match event {
        SessionEvent::RoomJoined { members } => {
            println!("  {} members in room", members.len());
        }
        SessionEvent::MemberJoined { participant_id } => {
            println!("  {} {} joined", "+".green(), participant_id);
        }
        SessionEvent::MemberLeft { participant_id } => {
            println!("  {} {} left", "-".yellow(), participant_id);
        }
        SessionEvent::PeerStateChanged {
            participant_id,
            state,
        } => {
            println!("  {} -> {}", participant_id, state.as_str());
        }
        SessionEvent::RemoteTrack {
            participant_id,
            kind,
        } => {
            println!("  {} {} track from {}", "♪".cyan(), kind, participant_id);
        }
        SessionEvent::RecordingStarted { start_time } => {
            println!(
                "  {} recording started (target {})",
                "●".red(),
                start_time
            );
        }
        SessionEvent::RecordingStopped { uploaded } => {
            println!("  {} recording stopped, {} uploaded", "■".white(), uploaded);
        }
        SessionEvent::RecordingFailed { error } => {
            println!("  {} recording failed: {}", "✗".red(), error);
        }
        SessionEvent::UploadProgress {
            index,
            uploaded_so_far,
        } => {
            println!("  uploaded segment {} ({} so far)", index, uploaded_so_far);
        }
        SessionEvent::SegmentUploadFailed { index, reason } => {
            println!(
                "  {} segment {} failed to upload: {}",
                "✗".red(),
                index,
                reason
            );
        }
        SessionEvent::ServerError { message } => {
            println!("  {} server error: {}", "✗".red(), message);
        }
    }
}
