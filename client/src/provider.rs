//! The contract between the dispatcher and whatever owns the transport endpoints.
//!
//! A provider hands out single-use [`ExchangeStream`]s without blocking and tells
//! the dispatcher through a [`CapacitySignal`] when more might be available.
use std::{borrow::Cow, sync::Arc};

use futures_util::{Sink, Stream};
use pushpool_model::{RequestFrame, ResponseFrame};

pub mod channel;

/// One exclusive request/response exchange over a multiplexed endpoint.
///
/// Dropping the stream gives it back to its provider, whatever state the
/// exchange is in.
pub trait ExchangeStream:
    Send
    + Unpin
    + 'static
    + Stream<Item = Result<ResponseFrame, StreamError>>
    + Sink<RequestFrame, Error = StreamError>
{
}

pub trait StreamProvider: Send + Sync + 'static {
    type Stream: ExchangeStream;
    /// Take a stream if one is free right now. Never waits.
    ///
    /// `Err` means the provider cannot serve anything anymore, e.g. no endpoint
    /// could be established.
    fn acquire_one(&self) -> Result<Option<Self::Stream>, ProviderError>;
    /// Register the signal to notify whenever capacity may have been freed or added.
    fn on_capacity_available(&self, signal: CapacitySignal);
    /// Start bringing up endpoints. Completion is only observable through the signal.
    fn begin_establishing(&self) -> Result<(), ProviderError>;
    /// Tear down every endpoint.
    fn release_all(&self);
}

/// Wake up the dispatcher because capacity may be available.
///
/// Notifications coalesce: many calls before the listener wakes count as one.
#[derive(Debug, Clone)]
pub struct CapacitySignal {
    tx: flume::Sender<()>,
}

#[derive(Debug)]
pub struct CapacityListener {
    rx: flume::Receiver<()>,
}

impl CapacitySignal {
    pub fn channel() -> (CapacitySignal, CapacityListener) {
        let (tx, rx) = flume::bounded(1);
        (CapacitySignal { tx }, CapacityListener { rx })
    }
    pub fn notify(&self) {
        // a full channel already carries a pending wakeup
        let _ = self.tx.try_send(());
    }
}

impl CapacityListener {
    /// Returns `false` once every signal has been dropped.
    pub async fn wait(&self) -> bool {
        self.rx.recv_async().await.is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub context: Cow<'static, str>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, context: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            context: context.into(),
        }
    }
    pub fn establish(context: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ProviderErrorKind::Establish, context)
    }
    pub fn closed(context: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ProviderErrorKind::Closed, context)
    }
    pub fn underlying<E: std::error::Error + Send + Sync + 'static>(
        context: impl Into<Cow<'static, str>>,
    ) -> impl FnOnce(E) -> Self {
        move |e| Self::new(ProviderErrorKind::Underlying(Arc::new(e)), context)
    }
}

#[derive(Debug, Clone)]
pub enum ProviderErrorKind {
    Establish,
    Closed,
    Underlying(Arc<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderErrorKind::Establish => write!(f, "cannot establish endpoint"),
            ProviderErrorKind::Closed => write!(f, "provider closed"),
            ProviderErrorKind::Underlying(e) => write!(f, "underlying error: {}", e),
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.context, self.kind)
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ProviderErrorKind::Underlying(e) => Some(&**e),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct StreamError {
    pub kind: StreamErrorKind,
    pub context: Cow<'static, str>,
}

impl StreamError {
    pub fn new(kind: StreamErrorKind, context: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            context: context.into(),
        }
    }
}

#[derive(Debug)]
pub enum StreamErrorKind {
    Closed,
    Reset,
    Underlying(Box<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Display for StreamErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamErrorKind::Closed => write!(f, "stream closed"),
            StreamErrorKind::Reset => write!(f, "stream reset"),
            StreamErrorKind::Underlying(e) => write!(f, "underlying error: {}", e),
        }
    }
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.context, self.kind)
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            StreamErrorKind::Underlying(e) => Some(&**e),
            _ => None,
        }
    }
}
