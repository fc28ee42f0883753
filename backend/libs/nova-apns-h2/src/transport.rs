/// HTTP/2 transport capability
///
/// The client never speaks HTTP/2 itself. A transport implementation owns
/// framing, TLS and flow control; the client only drives session lifecycle
/// and per-stream request/response through these traits.
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::config::ConnectOptions;
use crate::errors::TransportError;
use crate::models::RequestHeaders;

/// GOAWAY frame as received from the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoAway {
    pub error_code: u32,
    /// Highest stream id the gateway may have processed
    pub last_stream_id: u32,
    pub opaque_data: Option<Bytes>,
}

impl GoAway {
    /// Whether a stream with the given id is terminated by this GOAWAY.
    ///
    /// A stream with no id is still pending and cannot have been processed.
    pub fn affects(&self, stream_id: Option<u32>) -> bool {
        match stream_id {
            None => true,
            Some(id) => id > self.last_stream_id,
        }
    }
}

/// Session-level events, fanned out to every subscriber
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connect,
    Close,
    SocketError(String),
    Error(String),
    FrameError {
        frame_type: u8,
        error_code: u32,
        stream_id: u32,
    },
    GoAway(GoAway),
}

/// Per-stream events, in arrival order
#[derive(Debug)]
pub enum StreamEvent {
    /// First response HEADERS frame
    Response { status: u16 },
    Data(Bytes),
    End,
    Error(TransportError),
}

/// Establishes sessions to the gateway
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session. The client subscribes to session events only after
    /// this returns, so events emitted during `connect` (such as `Connect`)
    /// are not observed by it.
    async fn connect(
        &self,
        authority: &str,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn Session>, TransportError>;
}

/// A live multiplexed HTTP/2 connection
#[async_trait]
pub trait Session: Send + Sync {
    /// Subscribe to session events emitted after this call
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// Most recent GOAWAY received on this session.
    ///
    /// Consulted when a subscriber lags and may have missed the broadcast.
    fn last_goaway(&self) -> Option<GoAway>;

    /// Open a stream, write `body` as a single DATA write and half-close.
    ///
    /// Returns immediately; the stream stays pending until the transport
    /// assigns it an id.
    fn request(
        &self,
        headers: RequestHeaders,
        body: Bytes,
    ) -> Result<Box<dyn RequestStream>, TransportError>;

    fn is_destroyed(&self) -> bool;

    fn is_closed(&self) -> bool;

    /// Tear the connection down immediately. Must be idempotent.
    fn destroy(&self);

    /// Graceful shutdown: send GOAWAY and let in-flight streams finish
    async fn shutdown(&self);
}

#[async_trait]
pub trait RequestStream: Send {
    /// `None` while the stream is pending
    fn id(&self) -> Option<u32>;

    /// Next event on the stream. Must be cancel safe: dropping the future
    /// before completion loses no event.
    async fn next_event(&mut self) -> StreamEvent;
}
