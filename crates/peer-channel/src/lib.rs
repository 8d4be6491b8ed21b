//! Per-peer WebRTC connection orchestration: trickle-ICE and SDP
//! offer/answer negotiation driving one outbound and one inbound data
//! channel per remote peer, with an observable negotiation state machine
//! and a typed notification surface (see the `peer-events` crate).

pub mod channel;
pub mod config;
pub mod error;
pub mod link;
pub mod signaling;

pub use channel::{PeerChannel, PeerDescriptor};
pub use config::{ChannelConfig, ChannelConfigBuilder};
pub use error::ChannelError;
pub use link::{LinkRole, NegotiationState};
pub use signaling::{HttpSignalingTransport, PeerSignal, SdpKind, SignalingTransport};
