use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pushpool_model::{ConnectionConfig, ConnectionOptions, DispatchResult, Notification, Recipients};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    engine::DispatchEngine,
    error::{Error, ErrorKind},
    provider::{CapacitySignal, ProviderError, StreamProvider},
    wait_queue::WaitQueue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Ready,
    Destroyed,
}

enum Lifecycle<P: StreamProvider> {
    Uninitialized,
    Ready(ReadyConnection<P>),
    Destroyed,
}

struct ReadyConnection<P: StreamProvider> {
    engine: DispatchEngine<P>,
    ct: CancellationToken,
    _drain_handle: tokio::task::JoinHandle<()>,
}

impl<P: StreamProvider> Drop for ReadyConnection<P> {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

/// A pool of streams to the push gateway, and the entry point for sending.
///
/// ```text
/// Uninitialized --initialize--> Ready --destroy--> Destroyed
/// ```
///
/// Sending is only possible while `Ready`. Anything else fails right away.
pub struct Connection<P: StreamProvider> {
    options: ConnectionOptions,
    lifecycle: Mutex<Lifecycle<P>>,
}

impl<P: StreamProvider> std::fmt::Debug for Connection<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}

impl<P: StreamProvider> Connection<P> {
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            options,
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
        }
    }
    fn lock(&self) -> MutexGuard<'_, Lifecycle<P>> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }
    pub fn state(&self) -> ConnectionState {
        match &*self.lock() {
            Lifecycle::Uninitialized => ConnectionState::Uninitialized,
            Lifecycle::Ready(_) => ConnectionState::Ready,
            Lifecycle::Destroyed => ConnectionState::Destroyed,
        }
    }
    /// The provider, while the connection is `Ready`.
    pub fn provider(&self) -> Option<Arc<P>> {
        match &*self.lock() {
            Lifecycle::Ready(ready) => Some(ready.engine.provider().clone()),
            _ => None,
        }
    }
    /// Resolve the options, build the provider with `factory` and start it.
    ///
    /// The connection is `Ready` as soon as the provider accepts acquisitions;
    /// endpoints may still be coming up, in which case sends queue. Calling this
    /// on a connection that is not `Uninitialized` is rejected.
    #[tracing::instrument(skip_all)]
    pub async fn initialize<F>(&self, factory: F) -> crate::Result<()>
    where
        F: FnOnce(&ConnectionConfig) -> Result<P, ProviderError>,
    {
        let mut lifecycle = self.lock();
        match &*lifecycle {
            Lifecycle::Uninitialized => {}
            Lifecycle::Ready(_) => {
                return Err(Error::new(
                    ErrorKind::AlreadyInitialized,
                    "initialize connection",
                ))
            }
            Lifecycle::Destroyed => return Err(Error::destroyed()),
        }
        let config = self
            .options
            .resolve()
            .map_err(Error::contextual("resolve connection options"))?;
        let provider = Arc::new(factory(&config).map_err(Error::contextual("build provider"))?);
        let queue = Arc::new(WaitQueue::new());

        let (signal, listener) = CapacitySignal::channel();
        provider.on_capacity_available(signal);
        let ct = CancellationToken::new();
        let drain_task = {
            let ct = ct.child_token();
            let provider = provider.clone();
            let queue = queue.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = ct.cancelled() => {
                            tracing::debug!("task cancelled");
                            break
                        }
                        woke = listener.wait() => {
                            if !woke {
                                tracing::debug!("capacity signal closed");
                                break;
                            }
                            queue.drain(|| provider.acquire_one());
                        }
                    }
                }
            }
            .instrument(tracing::info_span!("capacity_drain"))
        };
        let drain_handle = tokio::spawn(drain_task);
        if let Err(e) = provider.begin_establishing() {
            ct.cancel();
            provider.release_all();
            return Err(Error::contextual("establish endpoint")(e));
        }
        tracing::debug!(authority = %config.authority(), "connection ready");
        *lifecycle = Lifecycle::Ready(ReadyConnection {
            engine: DispatchEngine::new(provider, queue, &config),
            ct,
            _drain_handle: drain_handle,
        });
        Ok(())
    }
    /// Send `notification` to every recipient. See [`DispatchEngine::send`].
    pub async fn send(
        &self,
        notification: Notification,
        recipients: impl Into<Recipients>,
    ) -> crate::Result<DispatchResult> {
        let engine = match &*self.lock() {
            Lifecycle::Ready(ready) => ready.engine.clone(),
            Lifecycle::Uninitialized => return Err(Error::not_initialized()),
            Lifecycle::Destroyed => return Err(Error::destroyed()),
        };
        engine.send(notification, recipients).await
    }
    /// Release every endpoint. The connection cannot be used afterwards.
    ///
    /// Sends still waiting in the queue are abandoned and never resolve; bound
    /// them with a timeout if that matters. Calling this again does nothing.
    pub fn destroy(&self) {
        let previous = std::mem::replace(&mut *self.lock(), Lifecycle::Destroyed);
        if let Lifecycle::Ready(ready) = previous {
            ready.ct.cancel();
            ready.engine.provider().release_all();
            tracing::debug!(
                abandoned = ready.engine.queue().len(),
                "connection destroyed"
            );
        }
    }
}
