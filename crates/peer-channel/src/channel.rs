use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{Mutex as AsyncMutex, Notify, watch};
use tokio::time::{Instant, sleep};
use uuid::Uuid;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

use peer_events::{Connectivity, EventPublisher, InboundPayload, PeerChannelEvents};

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::link::{LinkRole, NegotiatedLink, NegotiationState};
use crate::signaling::{PeerSignal, SdpKind, SignalingTransport};

/// Identity and presentation metadata of the remote peer a channel serves.
#[derive(Debug, Clone)]
pub struct PeerDescriptor {
    pub id: String,
    pub display_name: String,
    pub avatar_ref: String,
    pub online: bool,
}

/// Connection orchestrator for a single known peer.
///
/// Owns one outbound and one lazily created inbound peer connection, drives
/// trickle-ICE and SDP offer/answer negotiation for both through a shared
/// [`SignalingTransport`], and surfaces lifecycle plus raw inbound traffic
/// on [`PeerChannelEvents`].
pub struct PeerChannel {
    id: String,
    display_name: String,
    avatar_ref: String,
    online: AtomicBool,
    token: String,
    config: ChannelConfig,
    signaling: Arc<dyn SignalingTransport>,
    room_memberships: RwLock<Vec<String>>,
    outbound: AsyncMutex<Option<NegotiatedLink>>,
    inbound: AsyncMutex<Option<NegotiatedLink>>,
    send_channel: AsyncMutex<Option<Arc<RTCDataChannel>>>,
    receive_channel: AsyncMutex<Option<Arc<RTCDataChannel>>>,
    send_ready: AtomicBool,
    receive_ready: AtomicBool,
    outbound_state: watch::Sender<NegotiationState>,
    inbound_state: watch::Sender<NegotiationState>,
    events: PeerChannelEvents,
    connectivity_tx: EventPublisher<Connectivity>,
    inbound_tx: EventPublisher<InboundPayload>,
    closed: AtomicBool,
    shutdown: Notify,
    // Handed to connection callbacks so a dropped channel stops reacting
    // instead of keeping itself alive through its own handlers.
    weak_self: Weak<PeerChannel>,
}

impl PeerChannel {
    pub fn new(
        descriptor: PeerDescriptor,
        token: impl Into<String>,
        signaling: Arc<dyn SignalingTransport>,
        config: ChannelConfig,
    ) -> Arc<Self> {
        let events = PeerChannelEvents::new();
        let connectivity_tx = events.connectivity_publisher();
        let inbound_tx = events.inbound_publisher();
        Arc::new_cyclic(|weak_self| Self {
            id: descriptor.id,
            display_name: descriptor.display_name,
            avatar_ref: descriptor.avatar_ref,
            online: AtomicBool::new(descriptor.online),
            token: token.into(),
            config,
            signaling,
            room_memberships: RwLock::new(Vec::new()),
            outbound: AsyncMutex::new(None),
            inbound: AsyncMutex::new(None),
            send_channel: AsyncMutex::new(None),
            receive_channel: AsyncMutex::new(None),
            send_ready: AtomicBool::new(false),
            receive_ready: AtomicBool::new(false),
            outbound_state: watch::channel(NegotiationState::Idle).0,
            inbound_state: watch::channel(NegotiationState::Idle).0,
            events,
            connectivity_tx,
            inbound_tx,
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
            weak_self: weak_self.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn avatar_ref(&self) -> &str {
        &self.avatar_ref
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Presence is supplied externally; it gates outbound establishment.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        tracing::debug!(
            target: "peer_webrtc",
            peer_id = %self.id,
            online,
            "presence updated"
        );
    }

    pub fn is_send_ready(&self) -> bool {
        self.send_ready.load(Ordering::SeqCst)
    }

    pub fn is_receive_ready(&self) -> bool {
        self.receive_ready.load(Ordering::SeqCst)
    }

    pub fn join_room(&self, room_id: impl Into<String>) {
        self.room_memberships.write().push(room_id.into());
    }

    pub fn leave_room(&self, room_id: &str) {
        self.room_memberships.write().retain(|id| id != room_id);
    }

    pub fn rooms(&self) -> Vec<String> {
        self.room_memberships.read().clone()
    }

    /// The notification surface for this channel. External layers may only
    /// write to it through [`PeerChannelEvents::semantic_publisher`]; the
    /// raw-inbound stream is their sole ingestion point.
    pub fn events(&self) -> &PeerChannelEvents {
        &self.events
    }

    pub fn outbound_state(&self) -> NegotiationState {
        *self.outbound_state.borrow()
    }

    pub fn inbound_state(&self) -> NegotiationState {
        *self.inbound_state.borrow()
    }

    pub fn watch_outbound(&self) -> watch::Receiver<NegotiationState> {
        self.outbound_state.subscribe()
    }

    pub fn watch_inbound(&self) -> watch::Receiver<NegotiationState> {
        self.inbound_state.subscribe()
    }

    /// Brings up a fresh outbound connection and its data channel.
    ///
    /// Fails without side effects while the peer is offline. Replacing an
    /// existing outbound connection closes the previous one first; the
    /// inbound side is never touched.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(ChannelError::PeerOffline);
        }

        let link = NegotiatedLink::new(LinkRole::Outbound, &self.config).await?;
        link.wire_trickle(&self.id, &self.token, Arc::clone(&self.signaling));

        let previous = { self.outbound.lock().await.replace(link.clone()) };
        if let Some(previous) = previous {
            previous.close().await;
        }

        let weak = self.weak_self.clone();
        link.connection().on_negotiation_needed(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(channel) = weak.upgrade() else {
                    return;
                };
                channel.run_offer_cycle().await;
            })
        }));

        let label = Uuid::new_v4().to_string();
        let init = RTCDataChannelInit {
            ordered: Some(self.config.ordered),
            max_retransmits: self.config.max_retransmits,
            ..Default::default()
        };
        let dc = link
            .connection()
            .create_data_channel(&label, Some(init))
            .await?;
        self.wire_send_channel(&dc);
        *self.send_channel.lock().await = Some(dc);

        tracing::debug!(
            target: "peer_webrtc",
            peer_id = %self.id,
            channel = %label,
            "outbound connection created"
        );
        Ok(())
    }

    /// Tears down the outbound data channel and connects again. Does
    /// nothing while the peer is offline and never resets the inbound side.
    pub async fn reconnect(&self) -> Result<(), ChannelError> {
        if !self.online.load(Ordering::SeqCst) {
            tracing::debug!(
                target: "peer_webrtc",
                peer_id = %self.id,
                "skipping reconnect while peer is offline"
            );
            return Ok(());
        }
        self.disconnect_send_channel().await;
        self.connect().await
    }

    /// Forces a fresh offer push on the outbound connection, exactly as the
    /// negotiation-needed callback does. One push per call, no suppression.
    pub async fn renegotiate(&self) {
        self.run_offer_cycle().await;
    }

    async fn run_offer_cycle(&self) {
        let link = { self.outbound.lock().await.clone() };
        let Some(link) = link else {
            tracing::warn!(
                target: "peer_webrtc",
                peer_id = %self.id,
                "negotiation requested with no outbound connection"
            );
            return;
        };
        let sdp = match link.create_offer().await {
            Ok(sdp) => sdp,
            Err(err) => {
                tracing::warn!(
                    target: "peer_webrtc",
                    peer_id = %self.id,
                    error = %err,
                    "failed to create offer; outbound negotiation stalled"
                );
                self.outbound_state.send_replace(NegotiationState::Stalled);
                return;
            }
        };
        self.outbound_state
            .send_replace(NegotiationState::OfferPending);
        tracing::debug!(
            target: "peer_webrtc",
            peer_id = %self.id,
            sdp_len = sdp.len(),
            "pushing offer"
        );
        if let Err(err) = self
            .signaling
            .offer_session_description(&self.id, &sdp, &self.token)
            .await
        {
            tracing::warn!(
                target: "peer_webrtc",
                peer_id = %self.id,
                error = %err,
                "offer push failed; outbound negotiation stalled"
            );
            self.outbound_state.send_replace(NegotiationState::Stalled);
        }
    }

    /// Routes a decoded relay message to the matching entry point.
    pub async fn dispatch(&self, signal: PeerSignal) -> Result<(), ChannelError> {
        match signal {
            PeerSignal::IceCandidate {
                candidate,
                is_remote,
            } => self.on_ice_candidate_signal(&candidate, is_remote).await,
            PeerSignal::Sdp { kind, description } => {
                self.on_sdp_signal(kind, &description).await
            }
        }
    }

    /// Entry point for a candidate relayed from the remote peer.
    ///
    /// `is_remote = true` targets the local outbound connection and is
    /// applied once that connection holds a remote description;
    /// `is_remote = false` targets the inbound connection, which must exist.
    /// Either precondition is awaited with a bounded poll; on expiry the
    /// candidate is logged and dropped, never queued or retried.
    pub async fn on_ice_candidate_signal(
        &self,
        candidate_json: &str,
        is_remote: bool,
    ) -> Result<(), ChannelError> {
        let init: RTCIceCandidateInit = serde_json::from_str(candidate_json)?;
        tracing::debug!(
            target: "peer_webrtc",
            peer_id = %self.id,
            is_remote,
            "received candidate"
        );
        let applied = if is_remote {
            match self.wait_for_outbound_answer().await {
                Ok(link) => link.apply_candidate(init).await,
                Err(err) => Err(err),
            }
        } else {
            match self.wait_for_inbound_link().await {
                Ok(link) => link.apply_candidate(init).await,
                Err(err) => Err(err),
            }
        };
        if let Err(err) = &applied {
            tracing::warn!(
                target: "peer_webrtc",
                peer_id = %self.id,
                is_remote,
                error = %err,
                "dropping relayed candidate"
            );
        }
        applied
    }

    /// Entry point for an SDP description relayed from the remote peer.
    pub async fn on_sdp_signal(
        &self,
        kind: SdpKind,
        description: &str,
    ) -> Result<(), ChannelError> {
        match kind {
            SdpKind::Offer => self.accept_offer(description).await,
            SdpKind::Answer => self.accept_answer(description).await,
        }
    }

    async fn accept_offer(&self, description: &str) -> Result<(), ChannelError> {
        tracing::debug!(
            target: "peer_webrtc",
            peer_id = %self.id,
            sdp_len = description.len(),
            "received offer"
        );
        let link = self.ensure_inbound_link().await?;
        link.apply_remote_offer(description).await?;
        self.inbound_state
            .send_replace(NegotiationState::OfferPending);
        let answer = link.create_answer().await?;
        tracing::debug!(
            target: "peer_webrtc",
            peer_id = %self.id,
            sdp_len = answer.len(),
            "pushing answer"
        );
        match self
            .signaling
            .answer_session_description(&self.id, &answer, &self.token)
            .await
        {
            Ok(()) => {
                self.inbound_state
                    .send_replace(NegotiationState::AnswerPending);
            }
            Err(err) => {
                tracing::warn!(
                    target: "peer_webrtc",
                    peer_id = %self.id,
                    error = %err,
                    "answer push failed; inbound negotiation stalled"
                );
                self.inbound_state.send_replace(NegotiationState::Stalled);
            }
        }
        Ok(())
    }

    async fn accept_answer(&self, description: &str) -> Result<(), ChannelError> {
        tracing::debug!(
            target: "peer_webrtc",
            peer_id = %self.id,
            sdp_len = description.len(),
            "received answer"
        );
        // An answer with nothing to apply it to is a contract violation on
        // the caller's side and must not be swallowed.
        let link = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or(ChannelError::NoOutboundConnection)?;
        link.apply_remote_answer(description).await?;
        self.outbound_state.send_replace(NegotiationState::Open);
        Ok(())
    }

    async fn ensure_inbound_link(&self) -> Result<NegotiatedLink, ChannelError> {
        let mut guard = self.inbound.lock().await;
        if let Some(link) = guard.as_ref() {
            return Ok(link.clone());
        }
        let link = NegotiatedLink::new(LinkRole::Inbound, &self.config).await?;
        link.wire_trickle(&self.id, &self.token, Arc::clone(&self.signaling));

        let weak = self.weak_self.clone();
        link.connection()
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let weak = weak.clone();
                Box::pin(async move {
                    let Some(channel) = weak.upgrade() else {
                        return;
                    };
                    tracing::debug!(
                        target: "peer_webrtc",
                        peer_id = %channel.id,
                        label = %dc.label(),
                        "accepting inbound data channel"
                    );
                    channel.wire_receive_channel(&dc);
                    *channel.receive_channel.lock().await = Some(dc);
                })
            }));

        guard.replace(link.clone());
        tracing::debug!(
            target: "peer_webrtc",
            peer_id = %self.id,
            "inbound connection created"
        );
        Ok(link)
    }

    fn wire_send_channel(&self, dc: &Arc<RTCDataChannel>) {
        let weak = self.weak_self.clone();
        dc.on_open(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(channel) = weak.upgrade() else {
                    return;
                };
                tracing::debug!(
                    target: "peer_webrtc",
                    peer_id = %channel.id,
                    "send channel open"
                );
                channel.send_ready.store(true, Ordering::SeqCst);
                channel.outbound_state.send_replace(NegotiationState::Open);
                let _ = channel.connectivity_tx.publish(Connectivity::Established);
            })
        }));

        let weak = self.weak_self.clone();
        dc.on_close(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(channel) = weak.upgrade() else {
                    return;
                };
                tracing::debug!(
                    target: "peer_webrtc",
                    peer_id = %channel.id,
                    "send channel closed"
                );
                channel.send_ready.store(false, Ordering::SeqCst);
                channel.outbound_state.send_replace(NegotiationState::Idle);
                let _ = channel
                    .connectivity_tx
                    .publish(Connectivity::Lost { reason: None });
            })
        }));

        let weak = self.weak_self.clone();
        dc.on_error(Box::new(move |err: webrtc::Error| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(channel) = weak.upgrade() else {
                    return;
                };
                tracing::warn!(
                    target: "peer_webrtc",
                    peer_id = %channel.id,
                    error = %err,
                    "send channel error"
                );
            })
        }));
    }

    fn wire_receive_channel(&self, dc: &Arc<RTCDataChannel>) {
        let weak = self.weak_self.clone();
        dc.on_open(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(channel) = weak.upgrade() else {
                    return;
                };
                tracing::debug!(
                    target: "peer_webrtc",
                    peer_id = %channel.id,
                    "receive channel open"
                );
                channel.receive_ready.store(true, Ordering::SeqCst);
                channel.inbound_state.send_replace(NegotiationState::Open);
            })
        }));

        let weak = self.weak_self.clone();
        dc.on_close(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(channel) = weak.upgrade() else {
                    return;
                };
                tracing::debug!(
                    target: "peer_webrtc",
                    peer_id = %channel.id,
                    "receive channel closed"
                );
                channel.receive_ready.store(false, Ordering::SeqCst);
                channel.inbound_state.send_replace(NegotiationState::Idle);
            })
        }));

        let weak = self.weak_self.clone();
        dc.on_error(Box::new(move |err: webrtc::Error| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(channel) = weak.upgrade() else {
                    return;
                };
                tracing::warn!(
                    target: "peer_webrtc",
                    peer_id = %channel.id,
                    error = %err,
                    "receive channel error"
                );
            })
        }));

        let weak = self.weak_self.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(channel) = weak.upgrade() else {
                    return;
                };
                tracing::trace!(
                    target: "peer_webrtc",
                    peer_id = %channel.id,
                    payload_len = msg.data.len(),
                    is_text = msg.is_string,
                    "received payload"
                );
                let _ = channel.inbound_tx.publish(InboundPayload {
                    data: msg.data,
                    is_text: msg.is_string,
                });
            })
        }));
    }

    /// Sends an application payload over the outbound data channel.
    pub async fn send(&self, data: Bytes) -> Result<(), ChannelError> {
        let dc = self
            .send_channel
            .lock()
            .await
            .clone()
            .ok_or(ChannelError::NotReady)?;
        if !self.send_ready.load(Ordering::SeqCst) {
            return Err(ChannelError::NotReady);
        }
        dc.send(&data).await?;
        Ok(())
    }

    /// Sends a text payload over the outbound data channel.
    pub async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        let dc = self
            .send_channel
            .lock()
            .await
            .clone()
            .ok_or(ChannelError::NotReady)?;
        if !self.send_ready.load(Ordering::SeqCst) {
            return Err(ChannelError::NotReady);
        }
        dc.send_text(text.to_string()).await?;
        Ok(())
    }

    /// Closes the outbound data channel, leaving the inbound side untouched.
    pub async fn disconnect_send_channel(&self) {
        if let Some(dc) = self.send_channel.lock().await.take() {
            if let Err(err) = dc.close().await {
                tracing::debug!(
                    target: "peer_webrtc",
                    peer_id = %self.id,
                    error = %err,
                    "send channel close failed"
                );
            }
        }
    }

    /// Closes the inbound data channel.
    pub async fn disconnect_receive_channel(&self) {
        if let Some(dc) = self.receive_channel.lock().await.take() {
            if let Err(err) = dc.close().await {
                tracing::debug!(
                    target: "peer_webrtc",
                    peer_id = %self.id,
                    error = %err,
                    "receive channel close failed"
                );
            }
        }
    }

    /// Tears the channel down: cancels in-flight candidate waits, closes
    /// both data channels and both connections, and resets negotiation
    /// state. The instance stays unusable afterwards.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        self.disconnect_send_channel().await;
        self.disconnect_receive_channel().await;
        if let Some(link) = self.outbound.lock().await.take() {
            link.close().await;
        }
        if let Some(link) = self.inbound.lock().await.take() {
            link.close().await;
        }
        self.send_ready.store(false, Ordering::SeqCst);
        self.receive_ready.store(false, Ordering::SeqCst);
        self.outbound_state.send_replace(NegotiationState::Idle);
        self.inbound_state.send_replace(NegotiationState::Idle);
        tracing::debug!(target: "peer_webrtc", peer_id = %self.id, "peer channel closed");
    }

    async fn wait_for_outbound_answer(&self) -> Result<NegotiatedLink, ChannelError> {
        let deadline = Instant::now() + self.config.candidate_wait_timeout;
        loop {
            if let Some(link) = { self.outbound.lock().await.clone() } {
                if link.has_remote_description().await {
                    return Ok(link);
                }
            }
            self.sleep_until_next_poll(deadline).await?;
        }
    }

    async fn wait_for_inbound_link(&self) -> Result<NegotiatedLink, ChannelError> {
        let deadline = Instant::now() + self.config.candidate_wait_timeout;
        loop {
            if let Some(link) = { self.inbound.lock().await.clone() } {
                return Ok(link);
            }
            self.sleep_until_next_poll(deadline).await?;
        }
    }

    async fn sleep_until_next_poll(&self, deadline: Instant) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(ChannelError::Timeout);
        }
        let step = self.config.condition_poll_interval.min(deadline - now);
        tokio::select! {
            _ = sleep(step) => Ok(()),
            _ = self.shutdown.notified() => Err(ChannelError::Closed),
        }
    }
}
