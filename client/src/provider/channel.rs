//! In-process provider. Streams are tokio channels and their far end is a
//! [`Gateway`] that plays the push service.
use std::{
    borrow::Cow,
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use futures_util::{Sink, Stream};
use pushpool_model::{ConnectionConfig, Recipient, RequestFrame, RequestHead, ResponseFrame};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    OwnedSemaphorePermit, Semaphore, TryAcquireError,
};
use tracing::Instrument;

use super::{
    CapacitySignal, ExchangeStream, ProviderError, StreamError, StreamErrorKind, StreamProvider,
};

/// Response bodies reach the client in chunks of at most this many bytes.
pub const RESPONSE_CHUNK_SIZE: usize = 8;

#[derive(Debug, Clone)]
enum ProviderState {
    Idle,
    Establishing,
    Ready,
    Failed(ProviderError),
    Released,
}

#[derive(Debug)]
struct Shared {
    permits: Arc<Semaphore>,
    capacity: usize,
    state: Mutex<ProviderState>,
    signal: Mutex<Option<CapacitySignal>>,
    gateway: flume::Sender<GatewayStream>,
    outstanding: AtomicUsize,
    acquired: AtomicUsize,
    establish_delay: Duration,
    establish_failure: Option<Cow<'static, str>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
    fn notify(&self) {
        let signal = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(signal) = signal.as_ref() {
            signal.notify();
        }
    }
    fn establish(&self) -> Result<(), ProviderError> {
        if let Some(reason) = &self.establish_failure {
            let error = ProviderError::establish(reason.clone());
            *self.state() = ProviderState::Failed(error.clone());
            self.notify();
            return Err(error);
        }
        {
            let mut state = self.state();
            if matches!(*state, ProviderState::Released) {
                return Err(ProviderError::closed("released before established"));
            }
            *state = ProviderState::Ready;
        }
        self.permits.add_permits(self.capacity);
        tracing::debug!(capacity = self.capacity, "endpoints established");
        self.notify();
        Ok(())
    }
}

/// Stream capacity is `max_endpoints * streams_per_endpoint` unless set on the
/// builder. Endpoints come up after the establish delay, or fail to.
#[derive(Debug)]
pub struct ChannelProvider {
    shared: Arc<Shared>,
}

#[derive(Debug)]
pub struct ChannelProviderBuilder {
    gateway: flume::Sender<GatewayStream>,
    capacity: Option<usize>,
    establish_delay: Duration,
    establish_failure: Option<Cow<'static, str>>,
}

impl ChannelProviderBuilder {
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }
    pub fn establish_delay(mut self, delay: Duration) -> Self {
        self.establish_delay = delay;
        self
    }
    /// Make endpoint bring-up fail with `reason`.
    pub fn fail_establishing(mut self, reason: impl Into<Cow<'static, str>>) -> Self {
        self.establish_failure = Some(reason.into());
        self
    }
    pub fn build(self, config: &ConnectionConfig) -> Result<ChannelProvider, ProviderError> {
        let capacity = self.capacity.unwrap_or_else(|| config.stream_capacity());
        Ok(ChannelProvider {
            shared: Arc::new(Shared {
                permits: Arc::new(Semaphore::new(0)),
                capacity,
                state: Mutex::new(ProviderState::Idle),
                signal: Mutex::new(None),
                gateway: self.gateway,
                outstanding: AtomicUsize::new(0),
                acquired: AtomicUsize::new(0),
                establish_delay: self.establish_delay,
                establish_failure: self.establish_failure,
            }),
        })
    }
}

impl ChannelProvider {
    pub fn builder() -> (ChannelProviderBuilder, Gateway) {
        let (gateway_tx, gateway_rx) = flume::unbounded();
        (
            ChannelProviderBuilder {
                gateway: gateway_tx,
                capacity: None,
                establish_delay: Duration::ZERO,
                establish_failure: None,
            },
            Gateway {
                incoming: gateway_rx,
            },
        )
    }
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
    /// Streams handed out and not yet dropped.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }
    /// Streams handed out since creation.
    pub fn acquired(&self) -> usize {
        self.shared.acquired.load(Ordering::SeqCst)
    }
}

impl StreamProvider for ChannelProvider {
    type Stream = ChannelStream;

    fn acquire_one(&self) -> Result<Option<ChannelStream>, ProviderError> {
        match &*self.shared.state() {
            ProviderState::Failed(e) => return Err(e.clone()),
            ProviderState::Released => return Err(ProviderError::closed("provider released")),
            _ => {}
        }
        let permit = match self.shared.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return Ok(None),
            Err(TryAcquireError::Closed) => {
                return Err(ProviderError::closed("provider released"))
            }
        };
        let (request_tx, request_rx) = unbounded_channel();
        let (response_tx, response_rx) = unbounded_channel();
        self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
        self.shared.acquired.fetch_add(1, Ordering::SeqCst);
        let lease = StreamLease {
            permit: Some(permit),
            shared: self.shared.clone(),
        };
        let gateway_stream = GatewayStream {
            requests: request_rx,
            responses: response_tx,
        };
        if self.shared.gateway.send(gateway_stream).is_err() {
            tracing::debug!("gateway is gone, stream will close");
        }
        Ok(Some(ChannelStream {
            tx: request_tx,
            rx: response_rx,
            _lease: lease,
        }))
    }

    fn on_capacity_available(&self, signal: CapacitySignal) {
        *self.shared.signal.lock().unwrap_or_else(PoisonError::into_inner) = Some(signal);
        if matches!(*self.shared.state(), ProviderState::Ready) {
            self.shared.notify();
        }
    }

    fn begin_establishing(&self) -> Result<(), ProviderError> {
        {
            let mut state = self.shared.state();
            match *state {
                ProviderState::Idle => *state = ProviderState::Establishing,
                ProviderState::Released => return Err(ProviderError::closed("provider released")),
                _ => return Ok(()),
            }
        }
        if self.shared.establish_delay.is_zero() {
            return self.shared.establish();
        }
        let shared = self.shared.clone();
        let task = async move {
            tokio::time::sleep(shared.establish_delay).await;
            if let Err(e) = shared.establish() {
                tracing::warn!(error = %e, "endpoint bring-up failed");
            }
        }
        .instrument(tracing::info_span!("establish"));
        tokio::spawn(task);
        Ok(())
    }

    fn release_all(&self) {
        *self.shared.state() = ProviderState::Released;
        self.shared.permits.close();
        tracing::debug!(outstanding = self.outstanding(), "released all endpoints");
    }
}

/// Gives the permit back and wakes the dispatcher when a stream is dropped.
#[derive(Debug)]
struct StreamLease {
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<Shared>,
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.shared.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.shared.notify();
    }
}

pin_project_lite::pin_project! {
    #[derive(Debug)]
    pub struct ChannelStream {
        #[pin]
        tx: UnboundedSender<RequestFrame>,
        #[pin]
        rx: UnboundedReceiver<Result<ResponseFrame, StreamError>>,
        _lease: StreamLease,
    }
}

impl Stream for ChannelStream {
    type Item = Result<ResponseFrame, StreamError>;
    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let mut this = self.project();
        this.rx.poll_recv(cx)
    }
}

impl Sink<RequestFrame> for ChannelStream {
    type Error = StreamError;
    fn poll_close(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }
    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }
    fn poll_ready(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }
    fn start_send(self: std::pin::Pin<&mut Self>, item: RequestFrame) -> Result<(), Self::Error> {
        let this = self.project();
        if this.tx.send(item).is_err() {
            return Err(StreamError::new(
                StreamErrorKind::Closed,
                "gateway side of the stream is gone",
            ));
        }
        Ok(())
    }
}

impl ExchangeStream for ChannelStream {}

/// The gateway end of one stream.
#[derive(Debug)]
pub struct GatewayStream {
    requests: UnboundedReceiver<RequestFrame>,
    responses: UnboundedSender<Result<ResponseFrame, StreamError>>,
}

impl GatewayStream {
    /// Collect the request up to its end. `None` if the client left before that.
    pub async fn read(mut self) -> Option<IncomingExchange> {
        let mut head = None;
        let mut body = BytesMut::new();
        loop {
            match self.requests.recv().await? {
                RequestFrame::Head(request_head) => head = Some(request_head),
                RequestFrame::Data(chunk) => body.extend_from_slice(&chunk),
                RequestFrame::End => break,
            }
        }
        Some(IncomingExchange {
            head: head?,
            body: body.freeze(),
            responder: self.responses,
        })
    }
}

#[derive(Debug)]
pub struct IncomingExchange {
    pub head: RequestHead,
    pub body: Bytes,
    responder: UnboundedSender<Result<ResponseFrame, StreamError>>,
}

impl IncomingExchange {
    /// The recipient decoded from the request path.
    pub fn recipient(&self) -> Option<Recipient> {
        self.head.path().and_then(Recipient::from_request_path)
    }
    pub fn respond(self, response: GatewayResponse) {
        let responder = self.responder;
        match response {
            GatewayResponse::Reply { status, body } => {
                let _ = responder.send(Ok(ResponseFrame::head_with_status(status)));
                let mut offset = 0;
                while offset < body.len() {
                    let end = (offset + RESPONSE_CHUNK_SIZE).min(body.len());
                    let _ = responder.send(Ok(ResponseFrame::Data(body.slice(offset..end))));
                    offset = end;
                }
            }
            GatewayResponse::Reset(reason) => {
                let _ = responder.send(Err(StreamError::new(StreamErrorKind::Reset, reason)));
            }
            GatewayResponse::Hangup => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayResponse {
    Reply { status: String, body: Bytes },
    /// Fail the stream mid-exchange.
    Reset(Cow<'static, str>),
    /// End the stream without sending anything.
    Hangup,
}

impl GatewayResponse {
    pub fn ok() -> Self {
        Self::reply("200", Bytes::new())
    }
    pub fn reply(status: impl Into<String>, body: impl Into<Bytes>) -> Self {
        GatewayResponse::Reply {
            status: status.into(),
            body: body.into(),
        }
    }
    /// A rejection carrying `{"reason": reason}`.
    pub fn rejected(status: u16, reason: &str) -> Self {
        let body = serde_json::json!({ "reason": reason }).to_string();
        Self::reply(status.to_string(), body)
    }
}

/// Where a [`ChannelProvider`]'s streams end up.
#[derive(Debug)]
pub struct Gateway {
    incoming: flume::Receiver<GatewayStream>,
}

impl Gateway {
    /// `None` once the provider is dropped.
    pub async fn next_stream(&self) -> Option<GatewayStream> {
        self.incoming.recv_async().await.ok()
    }
    /// Next complete request, skipping streams abandoned half way.
    pub async fn accept(&self) -> Option<IncomingExchange> {
        loop {
            let stream = self.next_stream().await?;
            if let Some(exchange) = stream.read().await {
                return Some(exchange);
            }
        }
    }
    /// Answer every stream with `handler`, each on its own task.
    pub fn serve<H: GatewayHandler>(self, handler: H) -> tokio::task::JoinHandle<()> {
        let task = async move {
            while let Some(stream) = self.next_stream().await {
                let handler = handler.clone();
                let exchange_task = async move {
                    let Some(exchange) = stream.read().await else {
                        tracing::debug!("client left before finishing the request");
                        return;
                    };
                    let response = handler
                        .handle(exchange.head.clone(), exchange.body.clone())
                        .await;
                    exchange.respond(response);
                };
                tokio::spawn(exchange_task.in_current_span());
            }
        }
        .instrument(tracing::info_span!("gateway"));
        tokio::spawn(task)
    }
}

pub trait GatewayHandler: Clone + Send + 'static {
    type Future: Future<Output = GatewayResponse> + Send;
    fn handle(&self, head: RequestHead, body: Bytes) -> Self::Future;
}

type BoxedResponse = Pin<Box<dyn Future<Output = GatewayResponse> + Send>>;

/// The dynamic object wrapper for [`GatewayHandler`].
#[derive(Clone)]
pub struct GatewayHandlerObject {
    #[allow(clippy::type_complexity)]
    handle: Arc<dyn Fn(RequestHead, Bytes) -> BoxedResponse + Send + Sync>,
}

impl std::fmt::Debug for GatewayHandlerObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayHandlerObject").finish()
    }
}

impl GatewayHandlerObject {
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(RequestHead, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GatewayResponse> + Send + 'static,
    {
        Self {
            handle: Arc::new(move |head: RequestHead, body: Bytes| -> BoxedResponse {
                Box::pin(f(head, body))
            }),
        }
    }
    /// Accept every notification.
    pub fn accept_all() -> Self {
        Self::from_fn(|_head, _body| async { GatewayResponse::ok() })
    }
    /// Answer by recipient token, accepting any token not in `script`.
    pub fn scripted<I, K>(script: I) -> Self
    where
        I: IntoIterator<Item = (K, GatewayResponse)>,
        K: Into<String>,
    {
        let script: Arc<HashMap<String, GatewayResponse>> = Arc::new(
            script
                .into_iter()
                .map(|(token, response)| (token.into(), response))
                .collect(),
        );
        Self::from_fn(move |head, _body| {
            let response = head
                .path()
                .and_then(Recipient::from_request_path)
                .and_then(|recipient| script.get(recipient.as_str()).cloned())
                .unwrap_or_else(GatewayResponse::ok);
            async move { response }
        })
    }
    /// Hold every response back for `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        Self::from_fn(move |head, body| {
            let inner = self.clone();
            async move {
                tokio::time::sleep(latency).await;
                inner.handle(head, body).await
            }
        })
    }
}

impl GatewayHandler for GatewayHandlerObject {
    type Future = BoxedResponse;

    fn handle(&self, head: RequestHead, body: Bytes) -> Self::Future {
        (self.handle)(head, body)
    }
}
