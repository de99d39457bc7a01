use serde::{Deserialize, Serialize};

use crate::recipient::Recipient;

/// Why a single recipient was not delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content")]
pub enum DeliveryError {
    /// The gateway answered with a non-200 status and this error payload.
    Rejected(serde_json::Value),
    /// The gateway answered with a non-200 status and a payload that is not valid json.
    MalformedPayload { body: String, reason: String },
    /// The stream ended before any `:status` arrived.
    MissingStatus,
    /// The stream failed in the middle of the exchange.
    Transport { reason: String },
    AcquireTimeout,
    ExchangeTimeout,
    /// The exchange task panicked or was cancelled.
    Aborted { reason: String },
}

impl DeliveryError {
    pub fn is_malformed_payload(&self) -> bool {
        matches!(self, DeliveryError::MalformedPayload { .. })
    }
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Rejected(payload) => write!(f, "rejected: {}", payload),
            DeliveryError::MalformedPayload { reason, .. } => {
                write!(f, "malformed error payload: {}", reason)
            }
            DeliveryError::MissingStatus => write!(f, "response without status"),
            DeliveryError::Transport { reason } => write!(f, "transport error: {}", reason),
            DeliveryError::AcquireTimeout => write!(f, "timed out waiting for a stream"),
            DeliveryError::ExchangeTimeout => write!(f, "timed out waiting for the response"),
            DeliveryError::Aborted { reason } => write!(f, "aborted: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub recipient: Recipient,
    /// Response status, when the gateway got far enough to send one.
    pub status: Option<u16>,
    pub error: DeliveryError,
}

/// The settled state of one recipient's exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Sent(Recipient),
    Failed(DeliveryFailure),
}

impl DeliveryOutcome {
    pub fn recipient(&self) -> &Recipient {
        match self {
            DeliveryOutcome::Sent(recipient) => recipient,
            DeliveryOutcome::Failed(failure) => &failure.recipient,
        }
    }
}

/// Aggregate of one dispatch call.
///
/// Every recipient of the call is in exactly one of `sent` and `failed`. The
/// order inside each list follows completion and carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub sent: Vec<Recipient>,
    pub failed: Vec<DeliveryFailure>,
}

impl DispatchResult {
    pub fn push(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Sent(recipient) => self.sent.push(recipient),
            DeliveryOutcome::Failed(failure) => self.failed.push(failure),
        }
    }
    pub fn recipients_count(&self) -> usize {
        self.sent.len() + self.failed.len()
    }
    pub fn is_all_sent(&self) -> bool {
        self.failed.is_empty()
    }
    pub fn is_sent(&self, recipient: &str) -> bool {
        self.sent.iter().any(|r| r.as_str() == recipient)
    }
    pub fn failure_of(&self, recipient: &str) -> Option<&DeliveryFailure> {
        self.failed.iter().find(|f| f.recipient.as_str() == recipient)
    }
}

impl FromIterator<DeliveryOutcome> for DispatchResult {
    fn from_iter<I: IntoIterator<Item = DeliveryOutcome>>(iter: I) -> Self {
        let mut result = DispatchResult::default();
        for outcome in iter {
            result.push(outcome);
        }
        result
    }
}
