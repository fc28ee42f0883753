//! Scripted in-memory transport for driving `ApnsClient` in tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use nova_apns_h2::{
    AuthToken, ConnectOptions, GoAway, RequestHeaders, RequestStream, Session, SessionEvent,
    StreamEvent, Transport, TransportError,
};
use tokio::sync::{broadcast, mpsc};

/// How the gateway answers the next request
#[derive(Debug, Clone)]
pub enum Reply {
    Respond { status: u16, body: &'static str },
    Error(TransportError),
    /// Never assigned a stream id, never answered
    Pending,
    /// Assigned a stream id but not answered until `release`
    Hold,
}

impl Reply {
    pub fn status(status: u16, body: &'static str) -> Self {
        Reply::Respond { status, body }
    }
}

type Script = Arc<Mutex<VecDeque<Reply>>>;

#[derive(Default)]
pub struct MockTransport {
    script: Script,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    fail_connect: AtomicBool,
}

impl MockTransport {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        let transport = Self::default();
        transport.script.lock().unwrap().extend(replies);
        Arc::new(transport)
    }

    /// Answers every request with 200
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        self.sessions.lock().unwrap()[index].clone()
    }

    /// Wait until the transport has seen `count` requests across all sessions
    pub async fn wait_for_requests(&self, count: usize) {
        for _ in 0..200 {
            let seen: usize = self
                .sessions
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.requests().len())
                .sum();
            if seen >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {count} requests");
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        authority: &str,
        _options: &ConnectOptions,
    ) -> Result<Arc<dyn Session>, TransportError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Io(format!("connection refused: {authority}")));
        }

        let session = Arc::new(MockSession::new(self.script.clone()));
        self.sessions.lock().unwrap().push(session.clone());
        let _ = session.events.send(SessionEvent::Connect);
        Ok(session)
    }
}

pub struct MockSession {
    events: broadcast::Sender<SessionEvent>,
    script: Script,
    destroyed: AtomicBool,
    closed: AtomicBool,
    next_stream_id: AtomicU32,
    shutdowns: AtomicUsize,
    requests: Mutex<Vec<(RequestHeaders, Bytes)>>,
    held: Mutex<Vec<mpsc::UnboundedSender<StreamEvent>>>,
    last_goaway: Mutex<Option<GoAway>>,
}

impl MockSession {
    fn new(script: Script) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            events,
            script,
            destroyed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            next_stream_id: AtomicU32::new(1),
            shutdowns: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            last_goaway: Mutex::new(None),
        }
    }

    pub fn requests(&self) -> Vec<(RequestHeaders, Bytes)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Live subscriptions to this session's events
    pub fn subscribers(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub fn goaway(&self, last_stream_id: u32, opaque_data: Option<&'static str>) {
        let frame = GoAway {
            error_code: 0,
            last_stream_id,
            opaque_data: opaque_data.map(|data| Bytes::from_static(data.as_bytes())),
        };
        *self.last_goaway.lock().unwrap() = Some(frame.clone());
        self.emit(SessionEvent::GoAway(frame));
    }

    /// Answer every held stream
    pub fn release(&self, status: u16, body: &'static str) {
        for tx in self.held.lock().unwrap().drain(..) {
            send_reply(&tx, status, body);
        }
    }

    fn allocate_id(&self) -> u32 {
        self.next_stream_id.fetch_add(2, Ordering::SeqCst)
    }
}

fn send_reply(tx: &mpsc::UnboundedSender<StreamEvent>, status: u16, body: &'static str) {
    let _ = tx.send(StreamEvent::Response { status });
    if !body.is_empty() {
        // Split to exercise chunk accumulation
        let (head, tail) = body.split_at(body.len() / 2);
        let _ = tx.send(StreamEvent::Data(Bytes::from_static(head.as_bytes())));
        let _ = tx.send(StreamEvent::Data(Bytes::from_static(tail.as_bytes())));
    }
    let _ = tx.send(StreamEvent::End);
}

#[async_trait]
impl Session for MockSession {
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn last_goaway(&self) -> Option<GoAway> {
        self.last_goaway.lock().unwrap().clone()
    }

    fn request(
        &self,
        headers: RequestHeaders,
        body: Bytes,
    ) -> Result<Box<dyn RequestStream>, TransportError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(TransportError::SessionClosed);
        }

        self.requests.lock().unwrap().push((headers, body));

        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Respond { status: 200, body: "" });

        let (tx, rx) = mpsc::unbounded_channel();
        let id = match reply {
            Reply::Respond { status, body } => {
                send_reply(&tx, status, body);
                Some(self.allocate_id())
            }
            Reply::Error(e) => {
                let _ = tx.send(StreamEvent::Error(e));
                Some(self.allocate_id())
            }
            Reply::Pending => {
                self.held.lock().unwrap().push(tx);
                None
            }
            Reply::Hold => {
                self.held.lock().unwrap().push(tx);
                Some(self.allocate_id())
            }
        };

        Ok(Box::new(MockStream { id, rx }))
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.store(true, Ordering::SeqCst);
        self.held.lock().unwrap().clear();
        self.emit(SessionEvent::Close);
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct MockStream {
    id: Option<u32>,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

#[async_trait]
impl RequestStream for MockStream {
    fn id(&self) -> Option<u32> {
        self.id
    }

    async fn next_event(&mut self) -> StreamEvent {
        self.rx
            .recv()
            .await
            .unwrap_or(StreamEvent::Error(TransportError::SessionClosed))
    }
}

/// Token that expires on demand and counts regenerations
#[derive(Default)]
pub struct MockToken {
    generation: AtomicU64,
    expired: AtomicBool,
    regenerations: AtomicUsize,
    thresholds: Mutex<Vec<i64>>,
}

impl MockToken {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn expire(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }

    pub fn regenerations(&self) -> usize {
        self.regenerations.load(Ordering::SeqCst)
    }

    pub fn thresholds(&self) -> Vec<i64> {
        self.thresholds.lock().unwrap().clone()
    }
}

impl AuthToken for MockToken {
    fn current(&self) -> String {
        format!("token-{}", self.generation())
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_expired(&self, threshold_secs: i64) -> bool {
        self.thresholds.lock().unwrap().push(threshold_secs);
        self.expired.load(Ordering::SeqCst)
    }

    fn regenerate(&self, expected_generation: u64) {
        if self
            .generation
            .compare_exchange(
                expected_generation,
                expected_generation + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            self.expired.store(false, Ordering::SeqCst);
            self.regenerations.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
