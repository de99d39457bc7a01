use bytes::Bytes;
use serde::Serialize;

use crate::exchange::HeaderMap;

pub const HEADER_ID: &str = "apns-id";
pub const HEADER_EXPIRATION: &str = "apns-expiration";
pub const HEADER_PRIORITY: &str = "apns-priority";
pub const HEADER_TOPIC: &str = "apns-topic";
pub const HEADER_COLLAPSE_ID: &str = "apns-collapse-id";
pub const HEADER_PUSH_TYPE: &str = "apns-push-type";

/// A notification ready to be dispatched.
///
/// Headers and body are produced before dispatch and never touched by the
/// connection afterwards. The body is the already serialized payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notification {
    headers: HeaderMap,
    body: Bytes,
}

impl Notification {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
    /// Serialize `payload` as json and use it as the body.
    pub fn json<T: Serialize + ?Sized>(payload: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(payload)?;
        Ok(Self::new(body))
    }
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
    pub fn with_id(self, id: impl Into<String>) -> Self {
        self.with_header(HEADER_ID, id)
    }
    /// Unix timestamp in seconds, `0` means deliver once or drop.
    pub fn with_expiration(self, expiration: u64) -> Self {
        self.with_header(HEADER_EXPIRATION, expiration.to_string())
    }
    pub fn with_priority(self, priority: u8) -> Self {
        self.with_header(HEADER_PRIORITY, priority.to_string())
    }
    pub fn with_topic(self, topic: impl Into<String>) -> Self {
        self.with_header(HEADER_TOPIC, topic)
    }
    pub fn with_collapse_id(self, collapse_id: impl Into<String>) -> Self {
        self.with_header(HEADER_COLLAPSE_ID, collapse_id)
    }
    pub fn with_push_type(self, push_type: impl Into<String>) -> Self {
        self.with_header(HEADER_PUSH_TYPE, push_type)
    }
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}
