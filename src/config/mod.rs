use std::env;
use std::net::{IpAddr, Ipv4Addr};

pub struct Config {
    pub server: ServerConfig,
    pub signaling: SignalingConfig,
    pub recording: RecordingConfig,
    pub upload: UploadConfig,
    pub session_service: Option<SessionServiceConfig>,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin used when shaping guest join URLs
    pub public_origin: String,
}

pub struct SignalingConfig {
    /// Fallback room bound when the recording record cannot be resolved
    pub default_max_participants: u32,
    /// Members silent longer than this are treated as having left
    pub liveness_timeout_ms: u64,
    /// Delay stamped onto a start_recording broadcast so independently
    /// clocked clients begin capture together
    pub start_countdown_ms: u64,
    /// Default validity window for issued guest tokens
    pub token_validity_secs: u64,
}

pub struct RecordingConfig {
    pub slice_duration_ms: u64,
    /// Settling delay between consecutive capture slices, so the device is
    /// fully released before the next acquisition
    pub restart_delay_ms: u64,
}

pub struct UploadConfig {
    pub endpoint: String,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

/// Base URL of the external service that owns recording metadata
pub struct SessionServiceConfig {
    pub base_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .expect("Invalid SERVER_PORT"),
                public_origin: env::var("STUDIO_PUBLIC_ORIGIN")
                    .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            },
            signaling: SignalingConfig {
                default_max_participants: env_parse("STUDIO_MAX_PARTICIPANTS", 8),
                liveness_timeout_ms: env_parse("STUDIO_LIVENESS_TIMEOUT_MS", 15_000),
                start_countdown_ms: env_parse("STUDIO_START_COUNTDOWN_MS", 2_000),
                token_validity_secs: env_parse("STUDIO_TOKEN_VALIDITY_SECS", 3_600),
            },
            recording: RecordingConfig {
                slice_duration_ms: env_parse("STUDIO_SLICE_DURATION_MS", 5_000),
                restart_delay_ms: env_parse("STUDIO_RESTART_DELAY_MS", 250),
            },
            upload: UploadConfig {
                endpoint: env::var("STUDIO_UPLOAD_ENDPOINT")
                    .unwrap_or_else(|_| "http://127.0.0.1:9000/chunks".to_string()),
                max_attempts: env_parse("STUDIO_UPLOAD_MAX_ATTEMPTS", 3),
                retry_base_delay_ms: env_parse("STUDIO_UPLOAD_RETRY_DELAY_MS", 500),
                concurrency: env_parse("STUDIO_UPLOAD_CONCURRENCY", 4),
                timeout_secs: env_parse("STUDIO_UPLOAD_TIMEOUT_SECS", 60),
            },
            session_service: SessionServiceConfig::from_env(),
        }
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        // Try to parse as IP address first
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        // Handle common hostnames
        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}

impl SessionServiceConfig {
    pub fn from_env() -> Option<Self> {
        env::var("SESSION_SERVICE_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .map(|base_url| Self { base_url })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
