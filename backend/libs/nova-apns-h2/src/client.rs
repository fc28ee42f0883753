use std::sync::{Arc, Weak};

use bytes::BytesMut;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::ApnsConfig;
use crate::errors::ApnsError;
use crate::models::{
    Notification, Outcome, RequestHeaders, ResponseBody, EXPIRED_PROVIDER_TOKEN,
    INTERNAL_SERVER_ERROR,
};
use crate::token::AuthToken;
use crate::transport::{Session, SessionEvent, StreamEvent, Transport};

/// Retries after the first attempt when APNs reports `ExpiredProviderToken`
pub const MAX_RETRIES: u32 = 2;

/// Provider tokens older than this are re-signed before sending
pub const TOKEN_REFRESH_THRESHOLD_SECS: i64 = 3300;

enum SessionSlot {
    Absent,
    Live(Arc<dyn Session>),
    Destroyed,
}

/// How a finished stream should be resolved
#[derive(Debug, PartialEq)]
enum Classification {
    Success,
    RetryWithFreshToken,
    SessionFatal,
    Rejected(u16, ResponseBody),
    UnexpectedEnd(Option<u16>),
}

enum AttemptResult {
    Resolved(Outcome),
    TokenExpired,
}

/// Apple Push Notification Service client over a shared HTTP/2 session
///
/// At most one session is live per client; it is opened lazily on the
/// first write and reopened by the next write after it is destroyed.
/// Concurrent writes multiplex over the same session.
pub struct ApnsClient {
    config: ApnsConfig,
    transport: Arc<dyn Transport>,
    token: Option<Arc<dyn AuthToken>>,
    session: Mutex<SessionSlot>,
}

impl ApnsClient {
    pub fn new(config: ApnsConfig, transport: Arc<dyn Transport>) -> Self {
        info!(
            "Initialized APNs client for address={}, production={}",
            config.address, config.production
        );

        Self {
            config,
            transport,
            token: None,
            session: Mutex::new(SessionSlot::Absent),
        }
    }

    /// Use token-based authentication
    pub fn with_token(mut self, token: Arc<dyn AuthToken>) -> Self {
        self.token = Some(token);
        self
    }

    pub fn config(&self) -> &ApnsConfig {
        &self.config
    }

    /// Send one notification to one device
    ///
    /// Never fails: every transport, protocol and gateway error is carried
    /// in the returned `Outcome`. An expired provider token is refreshed and
    /// the request resent at most `MAX_RETRIES` times.
    pub async fn write(&self, notification: &Notification, device: &str) -> Outcome {
        let mut retry_count = 0;

        loop {
            match self.attempt(notification, device, retry_count).await {
                AttemptResult::Resolved(outcome) => return outcome,
                AttemptResult::TokenExpired => {
                    retry_count += 1;
                    warn!(
                        "Provider token expired for device {}, retrying ({}/{})",
                        device_prefix(device),
                        retry_count,
                        MAX_RETRIES
                    );
                }
            }
        }
    }

    /// Gracefully close the live session, letting in-flight streams finish
    pub async fn shutdown(&self) {
        let session = {
            let mut slot = self.session.lock().await;
            match &*slot {
                SessionSlot::Live(session) if !session.is_destroyed() => {
                    let session = session.clone();
                    *slot = SessionSlot::Destroyed;
                    Some(session)
                }
                _ => None,
            }
        };

        let Some(session) = session else {
            debug!("No live APNs session to shut down");
            return;
        };

        info!("Shutting down APNs session");
        session.shutdown().await;
        if !session.is_destroyed() {
            session.destroy();
        }
    }

    pub async fn has_live_session(&self) -> bool {
        match &*self.session.lock().await {
            SessionSlot::Live(session) => !session.is_destroyed() && !session.is_closed(),
            SessionSlot::Absent | SessionSlot::Destroyed => false,
        }
    }

    async fn ensure_session(&self) -> Result<Arc<dyn Session>, ApnsError> {
        let mut slot = self.session.lock().await;

        if let SessionSlot::Live(session) = &*slot {
            if !session.is_destroyed() && !session.is_closed() {
                return Ok(session.clone());
            }
        }

        let authority = self.config.authority();
        let session = self
            .transport
            .connect(&authority, &self.config.connect_options)
            .await
            .map_err(|source| {
                error!("Failed to connect APNs session to {}: {}", authority, source);
                ApnsError::Connect {
                    authority: authority.clone(),
                    source,
                }
            })?;

        debug!("Opened APNs session to {}", authority);
        tokio::spawn(watch_session(Arc::downgrade(&session), session.subscribe()));

        *slot = SessionSlot::Live(session.clone());
        Ok(session)
    }

    async fn destroy_session(&self, session: &Arc<dyn Session>) {
        if !session.is_destroyed() {
            session.destroy();
        }

        let mut slot = self.session.lock().await;
        if let SessionSlot::Live(current) = &*slot {
            if same_session(current, session) {
                *slot = SessionSlot::Destroyed;
            }
        }
    }

    async fn attempt(
        &self,
        notification: &Notification,
        device: &str,
        retry_count: u32,
    ) -> AttemptResult {
        let failed = |error: ApnsError, response: Option<ResponseBody>| {
            AttemptResult::Resolved(Outcome::Failed {
                device: device.to_string(),
                error,
                response,
            })
        };

        let session = match self.ensure_session().await {
            Ok(session) => session,
            Err(e) => return failed(e, None),
        };

        let mut headers =
            RequestHeaders::for_device(&self.config.address, device, &notification.headers);

        let token_generation = self.token.as_ref().map(|token| {
            if token.is_expired(TOKEN_REFRESH_THRESHOLD_SECS) {
                token.regenerate(token.generation());
            }
            headers.insert("authorization", format!("bearer {}", token.current()));
            token.generation()
        });

        // Subscribed before the stream opens so no GOAWAY can slip past.
        // Dropping the receiver on any return below unregisters it.
        let mut goaway = session.subscribe();
        let mut listening = true;

        let mut stream = match session.request(headers, notification.body.clone()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Request error: {}", e);
                return failed(ApnsError::Write(e), None);
            }
        };

        let mut status = None;
        let mut body = BytesMut::new();

        loop {
            tokio::select! {
                biased;

                event = stream.next_event() => match event {
                    StreamEvent::Response { status: code } => {
                        status.get_or_insert(code);
                    }
                    StreamEvent::Data(chunk) => body.extend_from_slice(&chunk),
                    StreamEvent::End => break,
                    StreamEvent::Error(e) => {
                        warn!("Request error: {}", e);
                        return failed(ApnsError::Write(e), None);
                    }
                },

                event = goaway.recv(), if listening => {
                    let frame = match event {
                        Ok(SessionEvent::GoAway(frame)) => Some(frame),
                        Ok(_) => None,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("GOAWAY listener lagged, {} session events skipped", skipped);
                            session.last_goaway()
                        }
                        Err(RecvError::Closed) => {
                            listening = false;
                            None
                        }
                    };

                    if let Some(frame) = frame.filter(|frame| frame.affects(stream.id())) {
                        debug!(
                            "Request {:?} ended early due to a GOAWAY frame for requests after {}",
                            stream.id(),
                            frame.last_stream_id
                        );

                        let response = frame
                            .opaque_data
                            .as_ref()
                            .filter(|data| !data.is_empty())
                            .and_then(|data| {
                                serde_json::from_slice::<ResponseBody>(data)
                                    .map_err(|e| warn!("Unparseable GOAWAY debug data: {}", e))
                                    .ok()
                            });

                        return failed(
                            ApnsError::GoAway {
                                error_code: frame.error_code,
                                last_stream_id: frame.last_stream_id,
                            },
                            response,
                        );
                    }
                }
            }
        }
        drop(goaway);

        debug!(
            "Request ended with status {:?} and responseData: {}",
            status,
            String::from_utf8_lossy(&body)
        );

        let can_retry = retry_count < MAX_RETRIES && token_generation.is_some();
        let classification = match classify(status, &body, can_retry) {
            Ok(classification) => classification,
            Err(e) => {
                warn!("Failed to parse APNs response body: {}", e);
                return failed(ApnsError::InvalidResponse(e), None);
            }
        };

        let device = device.to_string();
        let outcome = match classification {
            Classification::Success => Outcome::Success { device },
            Classification::RetryWithFreshToken => {
                if let (Some(token), Some(generation)) = (&self.token, token_generation) {
                    token.regenerate(generation);
                }
                return AttemptResult::TokenExpired;
            }
            Classification::SessionFatal => {
                error!("APNs reported InternalServerError, destroying session");
                self.destroy_session(&session).await;
                Outcome::Failed {
                    device,
                    error: ApnsError::InternalServerError,
                    response: None,
                }
            }
            Classification::Rejected(status, response) => Outcome::Rejected {
                device,
                status,
                response,
            },
            Classification::UnexpectedEnd(status) => Outcome::Failed {
                device,
                error: ApnsError::UnexpectedEndOfStream { status },
                response: None,
            },
        };

        AttemptResult::Resolved(outcome)
    }
}

fn classify(
    status: Option<u16>,
    body: &[u8],
    can_retry: bool,
) -> Result<Classification, serde_json::Error> {
    let status = match status {
        Some(200) => return Ok(Classification::Success),
        Some(status) if !body.is_empty() => status,
        status => return Ok(Classification::UnexpectedEnd(status)),
    };

    let response: ResponseBody = serde_json::from_slice(body)?;

    Ok(match status {
        403 if can_retry && response.has_reason(EXPIRED_PROVIDER_TOKEN) => {
            Classification::RetryWithFreshToken
        }
        500 if response.has_reason(INTERNAL_SERVER_ERROR) => Classification::SessionFatal,
        _ => Classification::Rejected(status, response),
    })
}

/// Logs session lifecycle and destroys the session on transport errors.
/// Holds only a weak reference so it never keeps a dropped session alive.
async fn watch_session(session: Weak<dyn Session>, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Session watcher lagged, {} events skipped", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            SessionEvent::SocketError(e) => {
                error!("Socket error: {}", e);
                destroy_if_live(&session);
            }
            SessionEvent::Error(e) => {
                error!("Session error: {}", e);
                destroy_if_live(&session);
            }
            SessionEvent::Connect => debug!("Session connected"),
            SessionEvent::Close => {
                debug!("Session closed");
                break;
            }
            SessionEvent::FrameError {
                frame_type,
                error_code,
                stream_id,
            } => debug!(
                "Frame error: (frameType: {}, errorCode {}, streamId: {})",
                frame_type, error_code, stream_id
            ),
            SessionEvent::GoAway(frame) => debug!(
                "GOAWAY received: (errorCode {}, lastStreamId: {}, opaqueData: {:?})",
                frame.error_code, frame.last_stream_id, frame.opaque_data
            ),
        }
    }
}

fn destroy_if_live(session: &Weak<dyn Session>) {
    if let Some(session) = session.upgrade() {
        if !session.is_destroyed() {
            session.destroy();
        }
    }
}

fn same_session(a: &Arc<dyn Session>, b: &Arc<dyn Session>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn device_prefix(device: &str) -> String {
    device.chars().take(8).collect()
}
