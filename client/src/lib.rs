pub mod connection;
pub mod engine;
pub mod error;
pub mod provider;
pub mod wait_queue;

pub use bytes;
pub use connection::{Connection, ConnectionState};
pub use engine::DispatchEngine;
pub use error::{Error, ErrorKind};
pub use pushpool_model as model;
pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::connection::{Connection, ConnectionState};
    pub use crate::error::{Error, ErrorKind};
    pub use crate::model::*;
    pub use crate::provider::{
        channel::{ChannelProvider, Gateway, GatewayHandlerObject, GatewayResponse},
        CapacitySignal, ExchangeStream, ProviderError, ProviderErrorKind, StreamError,
        StreamErrorKind, StreamProvider,
    };
}
