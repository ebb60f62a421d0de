use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::network_type::NetworkType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

pub fn create_webrtc_api() -> Arc<API> {
    let mut media_engine = MediaEngine::default();

    // RTCP feedback mechanisms for video - critical for keyframe recovery
    let video_rtcp_feedback = vec![
        RTCPFeedback {
            typ: "goog-remb".to_string(),
            parameter: "".to_string(),
        },
        RTCPFeedback {
            typ: "ccm".to_string(),
            parameter: "fir".to_string(),
        },
        RTCPFeedback {
            typ: "nack".to_string(),
            parameter: "".to_string(),
        },
        RTCPFeedback {
            typ: "nack".to_string(),
            parameter: "pli".to_string(),
        },
    ];

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: "video/VP8".to_string(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: "".to_string(),
                    rtcp_feedback: video_rtcp_feedback,
                },
                payload_type: 96,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .expect("Failed to register VP8 codec");

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: "audio/opus".to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .expect("Failed to register Opus codec");

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .expect("Failed to register default interceptors");

    // Configure SettingEngine to use IPv4 only to avoid IPv6 binding errors
    let mut setting_engine = SettingEngine::default();
    setting_engine.set_network_types(vec![NetworkType::Udp4, NetworkType::Tcp4]);

    // Disable mDNS to reduce unnecessary warnings
    setting_engine.set_ice_multicast_dns_mode(webrtc::ice::mdns::MulticastDnsMode::Disabled);

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build();

    Arc::new(api)
}

/// Assemble ICE servers from the environment. The relay infrastructure is
/// external; only its addresses are configuration here.
pub fn ice_servers_from_env() -> Vec<RTCIceServer> {
    let stun_server = std::env::var("STUN_SERVER_URL")
        .unwrap_or_else(|_| "stun:stun.l.google.com:19302".to_string());

    let mut ice_servers = vec![RTCIceServer {
        urls: vec![stun_server],
        ..Default::default()
    }];

    if let (Ok(turn_url), Ok(username), Ok(credential)) = (
        std::env::var("TURN_SERVER_URL"),
        std::env::var("TURN_USERNAME"),
        std::env::var("TURN_CREDENTIAL"),
    ) {
        ice_servers.push(RTCIceServer {
            urls: vec![turn_url],
            username,
            credential,
            credential_type:
                webrtc::ice_transport::ice_credential_type::RTCIceCredentialType::Password,
        });
    }

    ice_servers
}

/// The participant's local sample tracks, built according to its enabled
/// media flags. One instance per active session; attached to every peer link.
pub struct LocalMedia {
    pub video: Option<Arc<TrackLocalStaticSample>>,
    pub audio: Option<Arc<TrackLocalStaticSample>>,
}

impl LocalMedia {
    pub fn new(participant_id: &str, audio_enabled: bool, video_enabled: bool) -> Self {
        let stream_id = format!("{}_stream", participant_id);

        let video = video_enabled.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: "video/VP8".to_string(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                format!("{}_video", participant_id),
                stream_id.clone(),
            ))
        });

        let audio = audio_enabled.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: "audio/opus".to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                format!("{}_audio", participant_id),
                stream_id,
            ))
        });

        Self { video, audio }
    }

    pub fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        let mut tracks: Vec<Arc<dyn TrackLocal + Send + Sync>> = Vec::new();
        if let Some(video) = &self.video {
            tracks.push(video.clone());
        }
        if let Some(audio) = &self.audio {
            tracks.push(audio.clone());
        }
        tracks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_media_respects_enabled_flags() {
        let both = LocalMedia::new("alice", true, true);
        assert_eq!(both.tracks().len(), 2);

        let audio_only = LocalMedia::new("alice", true, false);
        assert!(audio_only.video.is_none());
        assert_eq!(audio_only.tracks().len(), 1);

        let none = LocalMedia::new("alice", false, false);
        assert!(none.tracks().is_empty());
    }

    #[test]
    fn test_api_builds() {
        let _api = create_webrtc_api();
    }
}
