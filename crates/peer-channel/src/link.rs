use std::sync::Arc;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::signaling::SignalingTransport;

/// Which direction of the peer pairing a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Created by `connect`, carries the locally created data channel.
    Outbound,
    /// Created lazily on inbound signaling traffic, accepts the remote
    /// peer's data channel.
    Inbound,
}

impl LinkRole {
    /// Wire tag attached to candidates this link produces. The receiving
    /// peer applies `true` to its outbound connection and `false` to its
    /// inbound one.
    pub fn remote_tag(self) -> bool {
        matches!(self, LinkRole::Inbound)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LinkRole::Outbound => "outbound",
            LinkRole::Inbound => "inbound",
        }
    }
}

/// Observable progress of one direction's offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    #[default]
    Idle,
    /// An offer is outstanding: pushed (outbound) or applied (inbound).
    OfferPending,
    /// The answer was pushed; waiting for the transport to open.
    AnswerPending,
    Open,
    /// A single-attempt push failed; recovery requires `reconnect`.
    Stalled,
}

fn build_api() -> Result<API, ChannelError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// One peer connection plus the handler set both roles share. The channel
/// instantiates this twice, once per [`LinkRole`], instead of wiring two
/// divergent copies of the same callbacks.
#[derive(Clone)]
pub(crate) struct NegotiatedLink {
    role: LinkRole,
    pc: Arc<RTCPeerConnection>,
}

impl NegotiatedLink {
    pub async fn new(role: LinkRole, config: &ChannelConfig) -> Result<Self, ChannelError> {
        let api = build_api()?;
        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(rtc_config).await?);
        Ok(Self { role, pc })
    }

    pub fn connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    /// Registers the mirrored handlers: trickle local candidates out through
    /// the relay, tagged with this link's role, and log ICE transitions.
    /// Candidate push failures are logged and the candidate dropped.
    pub fn wire_trickle(&self, peer_id: &str, token: &str, signaling: Arc<dyn SignalingTransport>) {
        let role = self.role;
        let peer_for_candidates = peer_id.to_string();
        let token = token.to_string();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let signaling = Arc::clone(&signaling);
                let peer_id = peer_for_candidates.clone();
                let token = token.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        return;
                    };
                    let init = match candidate.to_json() {
                        Ok(init) => init,
                        Err(err) => {
                            tracing::warn!(
                                target: "peer_webrtc",
                                peer_id = %peer_id,
                                link = role.as_str(),
                                error = %err,
                                "failed to encode local candidate"
                            );
                            return;
                        }
                    };
                    let json = match serde_json::to_string(&init) {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::warn!(
                                target: "peer_webrtc",
                                peer_id = %peer_id,
                                link = role.as_str(),
                                error = %err,
                                "failed to serialize local candidate"
                            );
                            return;
                        }
                    };
                    tracing::debug!(
                        target: "peer_webrtc",
                        peer_id = %peer_id,
                        link = role.as_str(),
                        is_remote = role.remote_tag(),
                        "pushing local candidate"
                    );
                    if let Err(err) = signaling
                        .send_ice_candidate(&peer_id, role.remote_tag(), &json, &token)
                        .await
                    {
                        tracing::warn!(
                            target: "peer_webrtc",
                            peer_id = %peer_id,
                            link = role.as_str(),
                            error = %err,
                            "dropping local candidate after failed push"
                        );
                    }
                })
            }));

        let peer_for_state = peer_id.to_string();
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                tracing::debug!(
                    target: "peer_webrtc",
                    peer_id = %peer_for_state,
                    link = role.as_str(),
                    state = ?state,
                    "ice connection state changed"
                );
                Box::pin(async {})
            }));
    }

    /// Creates an offer and applies it as the local description.
    pub async fn create_offer(&self) -> Result<String, ChannelError> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer).await?;
        let desc = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| ChannelError::Setup("missing local description".into()))?;
        Ok(desc.sdp)
    }

    /// Creates an answer for a previously applied remote offer and applies
    /// it as the local description.
    pub async fn create_answer(&self) -> Result<String, ChannelError> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer).await?;
        let desc = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| ChannelError::Setup("missing local description".into()))?;
        Ok(desc.sdp)
    }

    pub async fn apply_remote_offer(&self, description: &str) -> Result<(), ChannelError> {
        let offer = RTCSessionDescription::offer(description.to_string())?;
        self.pc.set_remote_description(offer).await?;
        Ok(())
    }

    pub async fn apply_remote_answer(&self, description: &str) -> Result<(), ChannelError> {
        let answer = RTCSessionDescription::answer(description.to_string())?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    pub async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    pub async fn apply_candidate(&self, init: RTCIceCandidateInit) -> Result<(), ChannelError> {
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    pub async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            tracing::debug!(
                target: "peer_webrtc",
                link = self.role.as_str(),
                error = %err,
                "peer connection close failed"
            );
        }
    }
}
