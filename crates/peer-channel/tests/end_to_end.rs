use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep, timeout};
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};

use peer_channel::{
    ChannelConfig, ChannelError, NegotiationState, PeerChannel, PeerDescriptor, SdpKind,
    SignalingTransport,
};
use peer_events::Connectivity;

const SESSION_TIMEOUT: Duration = Duration::from_secs(20);

fn init_tracing() {
    let _ = SubscriberBuilder::default()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Relay double that ferries every push straight into the counterpart
/// channel's dispatch entry points, the way a host integration would.
#[derive(Default)]
struct PairSignaling {
    counterpart: Mutex<Option<Arc<PeerChannel>>>,
}

impl PairSignaling {
    fn wire(&self, peer: &Arc<PeerChannel>) {
        *self.counterpart.lock().unwrap() = Some(Arc::clone(peer));
    }

    fn peer(&self) -> Arc<PeerChannel> {
        self.counterpart
            .lock()
            .unwrap()
            .clone()
            .expect("counterpart wired")
    }
}

#[async_trait]
impl SignalingTransport for PairSignaling {
    async fn offer_session_description(
        &self,
        _peer_id: &str,
        description: &str,
        _token: &str,
    ) -> Result<(), ChannelError> {
        let peer = self.peer();
        let description = description.to_string();
        tokio::spawn(async move {
            if let Err(err) = peer.on_sdp_signal(SdpKind::Offer, &description).await {
                tracing::warn!(error = %err, "offer dispatch failed");
            }
        });
        Ok(())
    }

    async fn answer_session_description(
        &self,
        _peer_id: &str,
        description: &str,
        _token: &str,
    ) -> Result<(), ChannelError> {
        let peer = self.peer();
        let description = description.to_string();
        tokio::spawn(async move {
            if let Err(err) = peer.on_sdp_signal(SdpKind::Answer, &description).await {
                tracing::warn!(error = %err, "answer dispatch failed");
            }
        });
        Ok(())
    }

    async fn send_ice_candidate(
        &self,
        _peer_id: &str,
        is_remote: bool,
        candidate: &str,
        _token: &str,
    ) -> Result<(), ChannelError> {
        let peer = self.peer();
        let candidate = candidate.to_string();
        tokio::spawn(async move {
            if let Err(err) = peer.on_ice_candidate_signal(&candidate, is_remote).await {
                tracing::warn!(error = %err, "candidate dispatch failed");
            }
        });
        Ok(())
    }
}

fn descriptor(id: &str, online: bool) -> PeerDescriptor {
    PeerDescriptor {
        id: id.to_string(),
        display_name: id.to_string(),
        avatar_ref: String::new(),
        online,
    }
}

async fn wait_until<F>(mut condition: F, what: &str)
where
    F: FnMut() -> bool,
{
    let end = Instant::now() + SESSION_TIMEOUT;
    loop {
        if condition() {
            return;
        }
        if Instant::now() >= end {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn session_establishes_and_delivers_payload() {
    init_tracing();

    let signaling_a = Arc::new(PairSignaling::default());
    let signaling_b = Arc::new(PairSignaling::default());
    let a = PeerChannel::new(
        descriptor("peer-b", true),
        "token-a",
        signaling_a.clone() as Arc<dyn SignalingTransport>,
        ChannelConfig::host_only(),
    );
    let b = PeerChannel::new(
        descriptor("peer-a", true),
        "token-b",
        signaling_b.clone() as Arc<dyn SignalingTransport>,
        ChannelConfig::host_only(),
    );
    signaling_a.wire(&b);
    signaling_b.wire(&a);

    let mut connectivity = a.events().subscribe_connectivity();
    let mut inbound = b.events().subscribe_inbound();

    a.connect().await.expect("connect");

    // Offer/answer completes long before the transports open.
    wait_until(
        || a.outbound_state() == NegotiationState::Open,
        "outbound negotiation to open",
    )
    .await;

    // The owning side reports the established session once its data
    // channel opens; the accepting side flips receive readiness.
    let event = timeout(SESSION_TIMEOUT, connectivity.recv())
        .await
        .expect("connectivity event in time")
        .expect("connectivity stream alive");
    assert_eq!(event, Connectivity::Established);
    assert!(a.is_send_ready());
    wait_until(|| b.is_receive_ready(), "receive channel to open").await;
    assert_eq!(b.inbound_state(), NegotiationState::Open);

    a.send_text("hello over the data channel")
        .await
        .expect("send");
    let payload = timeout(SESSION_TIMEOUT, inbound.recv())
        .await
        .expect("payload in time")
        .expect("inbound stream alive");
    assert!(payload.is_text);
    assert_eq!(payload.data.as_ref(), &b"hello over the data channel"[..]);

    // Teardown collapses both directions back to idle and surfaces the
    // lost session.
    a.close().await;
    let event = timeout(SESSION_TIMEOUT, connectivity.recv())
        .await
        .expect("disconnect event in time")
        .expect("connectivity stream alive");
    assert!(matches!(event, Connectivity::Lost { .. }));
    assert_eq!(a.outbound_state(), NegotiationState::Idle);
    assert!(!a.is_send_ready());

    b.close().await;
    assert_eq!(b.inbound_state(), NegotiationState::Idle);
    assert!(!b.is_receive_ready());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn semantic_events_flow_through_the_external_publisher() {
    init_tracing();

    let signaling = Arc::new(PairSignaling::default());
    let channel = PeerChannel::new(
        descriptor("peer-b", true),
        "token-a",
        signaling as Arc<dyn SignalingTransport>,
        ChannelConfig::host_only(),
    );

    // The message-interpretation layer republishes decoded events through
    // its own capability; the channel core is not involved.
    let mut typing = channel.events().subscribe_user_typing();
    let publisher = channel.events().semantic_publisher();
    publisher
        .user_typing(peer_events::TypingNotice {
            room_id: "room-1".to_string(),
            user_id: "peer-b".to_string(),
        })
        .expect("publish");
    let notice = typing.recv().await.expect("typing event");
    assert_eq!(notice.room_id, "room-1");
    assert_eq!(notice.user_id, "peer-b");
}
