/// Nova APNs HTTP/2 Client
///
/// This library delivers individual push notifications to Apple Push
/// Notification Service over a long-lived, multiplexed HTTP/2 session.
///
/// It handles:
/// - Lazy session establishment and reconnect after fatal transport errors
/// - Bearer provider-token injection and refresh before expiry
/// - Bounded resend when APNs reports `ExpiredProviderToken`
/// - GOAWAY handling for pending and unprocessed streams
/// - Classification of every write into success, rejection or error
///
/// HTTP/2 framing and TLS are supplied by a `Transport` implementation.
pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod token;
pub mod transport;

pub use client::{ApnsClient, MAX_RETRIES, TOKEN_REFRESH_THRESHOLD_SECS};
pub use config::{ApnsConfig, ClientCertificate, ConnectOptions};
pub use errors::{ApnsError, TransportError};
pub use models::{Notification, Outcome, Priority, RequestHeaders, ResponseBody};
pub use token::{AuthToken, ProviderToken};
pub use transport::{GoAway, RequestStream, Session, SessionEvent, StreamEvent, Transport};
