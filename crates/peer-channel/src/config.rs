use std::time::Duration;

use webrtc::ice_transport::ice_server::RTCIceServer;

/// Construction-time configuration for a peer channel.
#[derive(Clone)]
pub struct ChannelConfig {
    /// ICE servers (STUN/TURN) used by both connection roles.
    pub ice_servers: Vec<RTCIceServer>,
    /// Whether the outbound data channel delivers in order.
    pub ordered: bool,
    /// Maximum retransmissions for unreliable channels.
    pub max_retransmits: Option<u16>,
    /// Upper bound on waiting for a candidate's negotiation precondition.
    pub candidate_wait_timeout: Duration,
    /// How often the precondition is re-checked while waiting.
    pub condition_poll_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![RTCIceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                ..Default::default()
            }],
            ordered: true,
            max_retransmits: None,
            candidate_wait_timeout: Duration::from_secs(5),
            condition_poll_interval: Duration::from_millis(100),
        }
    }
}

impl ChannelConfig {
    /// Configuration without STUN/TURN, for peers reachable over host
    /// candidates only.
    pub fn host_only() -> Self {
        Self {
            ice_servers: vec![],
            ..Default::default()
        }
    }

    pub fn builder() -> ChannelConfigBuilder {
        ChannelConfigBuilder::new()
    }
}

#[derive(Default)]
pub struct ChannelConfigBuilder {
    ice_servers: Vec<RTCIceServer>,
    ordered: Option<bool>,
    max_retransmits: Option<u16>,
    candidate_wait_timeout: Option<Duration>,
    condition_poll_interval: Option<Duration>,
}

impl ChannelConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ice_server(mut self, urls: Vec<String>) -> Self {
        self.ice_servers.push(RTCIceServer {
            urls,
            ..Default::default()
        });
        self
    }

    pub fn add_ice_server_with_credentials(
        mut self,
        urls: Vec<String>,
        username: String,
        credential: String,
    ) -> Self {
        self.ice_servers.push(RTCIceServer {
            urls,
            username,
            credential,
            ..Default::default()
        });
        self
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = Some(ordered);
        self
    }

    pub fn max_retransmits(mut self, max_retransmits: u16) -> Self {
        self.max_retransmits = Some(max_retransmits);
        self
    }

    pub fn candidate_wait_timeout(mut self, timeout: Duration) -> Self {
        self.candidate_wait_timeout = Some(timeout);
        self
    }

    pub fn condition_poll_interval(mut self, interval: Duration) -> Self {
        self.condition_poll_interval = Some(interval);
        self
    }

    pub fn build(self) -> ChannelConfig {
        let mut config = ChannelConfig::default();
        if !self.ice_servers.is_empty() {
            config.ice_servers = self.ice_servers;
        }
        if let Some(ordered) = self.ordered {
            config.ordered = ordered;
        }
        if let Some(max_retransmits) = self.max_retransmits {
            config.max_retransmits = Some(max_retransmits);
        }
        if let Some(timeout) = self.candidate_wait_timeout {
            config.candidate_wait_timeout = timeout;
        }
        if let Some(interval) = self.condition_poll_interval {
            config.condition_poll_interval = interval;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = ChannelConfig::builder()
            .add_ice_server_with_credentials(
                vec!["turn:turn.example.net:3478".to_string()],
                "user".to_string(),
                "secret".to_string(),
            )
            .ordered(false)
            .max_retransmits(4)
            .candidate_wait_timeout(Duration::from_millis(250))
            .build();
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].username, "user");
        assert!(!config.ordered);
        assert_eq!(config.max_retransmits, Some(4));
        assert_eq!(config.candidate_wait_timeout, Duration::from_millis(250));
        assert_eq!(config.condition_poll_interval, Duration::from_millis(100));
    }
}
