use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

const STREAM_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event stream has no live subscribers")]
    NoSubscribers,
}

pub type EventResult<T> = Result<T, PublishError>;

/// Connectivity transitions of the outbound data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connectivity {
    Established,
    Lost { reason: Option<String> },
}

/// One payload received on the inbound data channel, before any decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPayload {
    pub data: Bytes,
    pub is_text: bool,
}

/// A chat message as decoded by the message-interpretation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub body: String,
    pub sent_at_ms: u64,
    pub read: bool,
}

/// Presence ping emitted while a peer is composing in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingNotice {
    pub room_id: String,
    pub user_id: String,
}

/// Milestone of an in-flight file transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransfer {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub chunk_index: u32,
    pub chunk: Bytes,
}

/// A single append-only broadcast stream.
#[derive(Debug)]
pub struct EventStream<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventStream<T> {
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(STREAM_DEPTH).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Hands out a write-only capability for this stream.
    pub fn publisher(&self) -> EventPublisher<T> {
        EventPublisher {
            tx: self.tx.clone(),
        }
    }

    /// Publishes without surfacing the no-subscriber case.
    pub fn publish(&self, event: T) {
        let _ = self.tx.send(event);
    }
}

impl<T: Clone + Send + 'static> Default for EventStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Write half of an [`EventStream`], safe to hand to producers without
/// exposing the subscription side.
#[derive(Debug, Clone)]
pub struct EventPublisher<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventPublisher<T> {
    pub fn publish(&self, event: T) -> EventResult<()> {
        self.tx
            .send(event)
            .map(|_| ())
            .map_err(|_| PublishError::NoSubscribers)
    }
}

/// The full notification surface of one peer channel.
///
/// The connectivity and raw-inbound streams are written by the channel
/// itself; the semantic streams belong to an external interpretation layer,
/// which receives its write capability through [`Self::semantic_publisher`]
/// and must treat the raw-inbound stream as its only ingestion point.
#[derive(Debug, Default)]
pub struct PeerChannelEvents {
    connectivity: EventStream<Connectivity>,
    inbound: EventStream<InboundPayload>,
    message_received: EventStream<ChatMessage>,
    message_read: EventStream<ChatMessage>,
    user_typing: EventStream<TypingNotice>,
    file_transfer_started: EventStream<FileTransfer>,
    file_transfer_chunk: EventStream<FileTransfer>,
    file_transfer_ended: EventStream<FileTransfer>,
}

impl PeerChannelEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_connectivity(&self) -> broadcast::Receiver<Connectivity> {
        self.connectivity.subscribe()
    }

    pub fn subscribe_inbound(&self) -> broadcast::Receiver<InboundPayload> {
        self.inbound.subscribe()
    }

    pub fn subscribe_message_received(&self) -> broadcast::Receiver<ChatMessage> {
        self.message_received.subscribe()
    }

    pub fn subscribe_message_read(&self) -> broadcast::Receiver<ChatMessage> {
        self.message_read.subscribe()
    }

    pub fn subscribe_user_typing(&self) -> broadcast::Receiver<TypingNotice> {
        self.user_typing.subscribe()
    }

    pub fn subscribe_file_transfer_started(&self) -> broadcast::Receiver<FileTransfer> {
        self.file_transfer_started.subscribe()
    }

    pub fn subscribe_file_transfer_chunk(&self) -> broadcast::Receiver<FileTransfer> {
        self.file_transfer_chunk.subscribe()
    }

    pub fn subscribe_file_transfer_ended(&self) -> broadcast::Receiver<FileTransfer> {
        self.file_transfer_ended.subscribe()
    }

    /// Write capability for the connectivity stream. Reserved for the
    /// channel that owns this surface.
    pub fn connectivity_publisher(&self) -> EventPublisher<Connectivity> {
        self.connectivity.publisher()
    }

    /// Write capability for the raw-inbound stream. Reserved for the
    /// channel that owns this surface.
    pub fn inbound_publisher(&self) -> EventPublisher<InboundPayload> {
        self.inbound.publisher()
    }

    /// Write capability for the semantic streams, handed to the external
    /// message-interpretation layer.
    pub fn semantic_publisher(&self) -> SemanticPublisher {
        SemanticPublisher {
            message_received: self.message_received.publisher(),
            message_read: self.message_read.publisher(),
            user_typing: self.user_typing.publisher(),
            file_transfer_started: self.file_transfer_started.publisher(),
            file_transfer_chunk: self.file_transfer_chunk.publisher(),
            file_transfer_ended: self.file_transfer_ended.publisher(),
        }
    }
}

/// Typed write access to the semantic event streams.
#[derive(Debug, Clone)]
pub struct SemanticPublisher {
    message_received: EventPublisher<ChatMessage>,
    message_read: EventPublisher<ChatMessage>,
    user_typing: EventPublisher<TypingNotice>,
    file_transfer_started: EventPublisher<FileTransfer>,
    file_transfer_chunk: EventPublisher<FileTransfer>,
    file_transfer_ended: EventPublisher<FileTransfer>,
}

impl SemanticPublisher {
    pub fn message_received(&self, message: ChatMessage) -> EventResult<()> {
        self.message_received.publish(message)
    }

    pub fn message_read(&self, message: ChatMessage) -> EventResult<()> {
        self.message_read.publish(message)
    }

    pub fn user_typing(&self, notice: TypingNotice) -> EventResult<()> {
        self.user_typing.publish(notice)
    }

    pub fn file_transfer_started(&self, transfer: FileTransfer) -> EventResult<()> {
        self.file_transfer_started.publish(transfer)
    }

    pub fn file_transfer_chunk(&self, transfer: FileTransfer) -> EventResult<()> {
        self.file_transfer_chunk.publish(transfer)
    }

    pub fn file_transfer_ended(&self, transfer: FileTransfer) -> EventResult<()> {
        self.file_transfer_ended.publish(transfer)
    }
}
