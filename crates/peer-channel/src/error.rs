use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// `connect` was called while the peer is marked offline.
    #[error("cannot set up send channel while peer is offline")]
    PeerOffline,
    /// A signaling push was rejected or never reached the relay.
    #[error("signaling push failed: {0}")]
    Signaling(String),
    /// A bounded wait for a negotiation precondition expired.
    #[error("timed out waiting for negotiation precondition")]
    Timeout,
    /// An answer arrived with no outbound connection to apply it to.
    #[error("received an answer but no outbound connection exists")]
    NoOutboundConnection,
    /// The data channel is not open for sending.
    #[error("send channel is not open")]
    NotReady,
    /// The channel was torn down while the operation was in flight.
    #[error("peer channel closed")]
    Closed,
    /// A signaling payload could not be decoded.
    #[error("malformed signal payload: {0}")]
    Malformed(String),
    /// WebRTC engine failure.
    #[error("webrtc failure: {0}")]
    Setup(String),
}

impl From<webrtc::Error> for ChannelError {
    fn from(err: webrtc::Error) -> Self {
        ChannelError::Setup(err.to_string())
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        ChannelError::Malformed(err.to_string())
    }
}
