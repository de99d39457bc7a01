pub mod config;
pub mod credentials;
pub mod exchange;
pub mod notification;
pub mod recipient;
pub mod result;

pub use config::{ConnectionConfig, ConnectionOptions};
pub use credentials::{CredentialError, CredentialOptions, CredentialSource, Credentials, OneOrMany};
pub use exchange::{HeaderMap, RequestFrame, RequestHead, ResponseFrame, STATUS_OK};
pub use notification::Notification;
pub use recipient::{Recipient, Recipients};
pub use result::{DeliveryError, DeliveryFailure, DeliveryOutcome, DispatchResult};
