use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ChannelError;

const TOKEN_HEADER: &str = "x-signaling-token";

/// Which half of an SDP exchange a description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// One negotiation message as it crosses the relay.
///
/// `is_remote` records which connection role produced the candidate on the
/// sender's side; the receiver routes on it (see `PeerChannel`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal_type", rename_all = "snake_case")]
pub enum PeerSignal {
    IceCandidate { candidate: String, is_remote: bool },
    Sdp { kind: SdpKind, description: String },
}

/// Request/response contract of the signaling relay. Implementations carry
/// negotiation traffic only, never application payload.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn offer_session_description(
        &self,
        peer_id: &str,
        description: &str,
        token: &str,
    ) -> Result<(), ChannelError>;

    async fn answer_session_description(
        &self,
        peer_id: &str,
        description: &str,
        token: &str,
    ) -> Result<(), ChannelError>;

    async fn send_ice_candidate(
        &self,
        peer_id: &str,
        is_remote: bool,
        candidate: &str,
        token: &str,
    ) -> Result<(), ChannelError>;
}

#[derive(Debug, Serialize)]
struct SdpParam<'a> {
    peer_id: &'a str,
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct CandidateParam<'a> {
    peer_id: &'a str,
    is_remote: bool,
    candidate: &'a str,
}

/// Reference relay client speaking JSON over HTTP.
pub struct HttpSignalingTransport {
    client: Client,
    base: Url,
}

impl HttpSignalingTransport {
    pub fn new(base: &str) -> Result<Self, ChannelError> {
        let base = Url::parse(base)
            .map_err(|err| ChannelError::Signaling(format!("invalid relay url {base}: {err}")))?;
        Ok(Self {
            client: Client::new(),
            base,
        })
    }

    fn endpoint(&self, suffix: &str) -> Result<Url, ChannelError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ChannelError::Signaling("cannot extend relay url path".into()))?
            .push(suffix);
        Ok(url)
    }

    async fn post<T: Serialize + Sync>(
        &self,
        suffix: &str,
        body: &T,
        token: &str,
    ) -> Result<(), ChannelError> {
        let url = self.endpoint(suffix)?;
        let response = self
            .client
            .post(url)
            .header(TOKEN_HEADER, token)
            .json(body)
            .send()
            .await
            .map_err(|err| ChannelError::Signaling(err.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::Signaling(format!(
                "relay returned {}",
                response.status()
            )))
        }
    }
}

#[async_trait]
impl SignalingTransport for HttpSignalingTransport {
    async fn offer_session_description(
        &self,
        peer_id: &str,
        description: &str,
        token: &str,
    ) -> Result<(), ChannelError> {
        self.post(
            "offer",
            &SdpParam {
                peer_id,
                description,
            },
            token,
        )
        .await
    }

    async fn answer_session_description(
        &self,
        peer_id: &str,
        description: &str,
        token: &str,
    ) -> Result<(), ChannelError> {
        self.post(
            "answer",
            &SdpParam {
                peer_id,
                description,
            },
            token,
        )
        .await
    }

    async fn send_ice_candidate(
        &self,
        peer_id: &str,
        is_remote: bool,
        candidate: &str,
        token: &str,
    ) -> Result<(), ChannelError> {
        self.post(
            "candidate",
            &CandidateParam {
                peer_id,
                is_remote,
                candidate,
            },
            token,
        )
        .await
    }
}
