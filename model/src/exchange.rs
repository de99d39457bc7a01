use std::collections::BTreeMap;

use bytes::Bytes;

use crate::{notification::Notification, recipient::Recipient};

/// Header name to value, ordered by name.
pub type HeaderMap = BTreeMap<String, String>;

pub const PSEUDO_SCHEME: &str = ":scheme";
pub const PSEUDO_METHOD: &str = ":method";
pub const PSEUDO_AUTHORITY: &str = ":authority";
pub const PSEUDO_PATH: &str = ":path";
pub const PSEUDO_STATUS: &str = ":status";

/// The only status that counts as delivered. Compared as a string.
pub const STATUS_OK: &str = "200";

/// Request metadata written at the start of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub headers: HeaderMap,
}

impl RequestHead {
    /// Base pseudo headers for `recipient`, overlaid with the notification headers.
    ///
    /// A notification header with the same name as a base header replaces it.
    pub fn for_recipient(authority: &str, recipient: &Recipient, notification: &Notification) -> Self {
        let mut headers = HeaderMap::from([
            (PSEUDO_SCHEME.to_string(), "https".to_string()),
            (PSEUDO_METHOD.to_string(), "POST".to_string()),
            (PSEUDO_AUTHORITY.to_string(), authority.to_string()),
            (PSEUDO_PATH.to_string(), recipient.request_path()),
        ]);
        headers.extend(
            notification
                .headers()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Self { headers }
    }
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
    pub fn path(&self) -> Option<&str> {
        self.get(PSEUDO_PATH)
    }
    pub fn method(&self) -> Option<&str> {
        self.get(PSEUDO_METHOD)
    }
}

/// Frames the dispatcher writes into a stream, in order: one head, the body, end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFrame {
    Head(RequestHead),
    Data(Bytes),
    End,
}

/// Frames read back from a stream. The stream ending marks the end of the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFrame {
    Head(HeaderMap),
    Data(Bytes),
}

impl ResponseFrame {
    pub fn head_with_status(status: impl Into<String>) -> Self {
        ResponseFrame::Head(HeaderMap::from([(PSEUDO_STATUS.to_string(), status.into())]))
    }
}
