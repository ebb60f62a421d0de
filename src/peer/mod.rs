mod coordinator;
mod link;
mod media;

pub use coordinator::{PeerConnectionCoordinator, PeerEvent};
pub use link::{NegotiationRole, PeerLink, PeerLinkState};
pub use media::{create_webrtc_api, ice_servers_from_env, LocalMedia};
