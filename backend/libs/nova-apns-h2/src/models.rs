use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ApnsError;

pub const EXPIRED_PROVIDER_TOKEN: &str = "ExpiredProviderToken";
pub const INTERNAL_SERVER_ERROR: &str = "InternalServerError";

/// APNs Notification Priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Immediate delivery
    High,
    /// Background delivery
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &str {
        match self {
            Priority::High => "10",
            Priority::Low => "5",
        }
    }
}

/// A ready-to-send notification: serialized payload plus header overrides
#[derive(Debug, Clone, Default)]
pub struct Notification {
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl Notification {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Serialize `payload` as the JSON body
    pub fn from_json<T: Serialize>(payload: &T) -> Result<Self, ApnsError> {
        let body = serde_json::to_vec(payload).map_err(|e| ApnsError::Payload(e.to_string()))?;
        Ok(Self::new(body))
    }

    /// Header names are lower-cased as HTTP/2 requires
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_topic(self, topic: impl Into<String>) -> Self {
        self.with_header("apns-topic", topic)
    }

    pub fn with_priority(self, priority: Priority) -> Self {
        self.with_header("apns-priority", priority.as_str())
    }

    /// Unix timestamp after which APNs discards the notification
    pub fn with_expiration(self, expiration: i64) -> Self {
        self.with_header("apns-expiration", expiration.to_string())
    }

    pub fn with_push_type(self, push_type: impl Into<String>) -> Self {
        self.with_header("apns-push-type", push_type)
    }

    pub fn with_collapse_id(self, collapse_id: impl Into<String>) -> Self {
        self.with_header("apns-collapse-id", collapse_id)
    }

    pub fn with_id(self, id: Uuid) -> Self {
        self.with_header("apns-id", id.hyphenated().to_string())
    }
}

/// Headers for a single stream, pseudo-headers included
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestHeaders(BTreeMap<String, String>);

impl RequestHeaders {
    /// Default POST headers for `device`, overlaid with the notification's overrides
    pub fn for_device(authority: &str, device: &str, overrides: &BTreeMap<String, String>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(":scheme".to_string(), "https".to_string());
        headers.insert(":method".to_string(), "POST".to_string());
        headers.insert(":authority".to_string(), authority.to_string());
        headers.insert(":path".to_string(), format!("/3/device/{}", device));

        for (name, value) in overrides {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }

        Self(headers)
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0.insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// JSON body APNs returns on failure, and in GOAWAY debug data
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Milliseconds since epoch at which the device token became invalid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ResponseBody {
    pub fn has_reason(&self, reason: &str) -> bool {
        self.reason.as_deref() == Some(reason)
    }
}

/// Result of one `ApnsClient::write` call
#[derive(Debug)]
pub enum Outcome {
    /// Gateway answered 200
    Success { device: String },
    /// Gateway answered with a non-200 status and a reason
    Rejected {
        device: String,
        status: u16,
        response: ResponseBody,
    },
    /// Transport failure, GOAWAY, or unexpected stream end
    Failed {
        device: String,
        error: ApnsError,
        response: Option<ResponseBody>,
    },
}

impl Outcome {
    pub fn device(&self) -> &str {
        match self {
            Outcome::Success { device }
            | Outcome::Rejected { device, .. }
            | Outcome::Failed { device, .. } => device,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Outcome::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ApnsError> {
        match self {
            Outcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn response(&self) -> Option<&ResponseBody> {
        match self {
            Outcome::Rejected { response, .. } => Some(response),
            Outcome::Failed { response, .. } => response.as_ref(),
            Outcome::Success { .. } => None,
        }
    }
}
