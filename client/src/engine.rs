//! Fan-out of one notification into one exchange per recipient.
use std::{sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use futures_util::{stream::FuturesUnordered, SinkExt, StreamExt};
use pushpool_model::{
    exchange::PSEUDO_STATUS, ConnectionConfig, DeliveryError, DeliveryFailure, DeliveryOutcome,
    DispatchResult, Notification, Recipient, Recipients, RequestFrame, RequestHead,
    ResponseFrame, STATUS_OK,
};
use tracing::Instrument;

use crate::{
    error::{Error, ErrorKind},
    provider::{ExchangeStream, ProviderError, StreamError, StreamProvider},
    wait_queue::{Acquisition, WaitQueue},
};

pub struct DispatchEngine<P: StreamProvider> {
    provider: Arc<P>,
    queue: Arc<WaitQueue<P::Stream>>,
    authority: Arc<str>,
    acquire_timeout: Option<Duration>,
    exchange_timeout: Option<Duration>,
}

impl<P: StreamProvider> Clone for DispatchEngine<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            queue: self.queue.clone(),
            authority: self.authority.clone(),
            acquire_timeout: self.acquire_timeout,
            exchange_timeout: self.exchange_timeout,
        }
    }
}

/// What was read back from a finished stream.
struct Response {
    status: Option<String>,
    body: Bytes,
}

impl<P: StreamProvider> DispatchEngine<P> {
    pub fn new(
        provider: Arc<P>,
        queue: Arc<WaitQueue<P::Stream>>,
        config: &ConnectionConfig,
    ) -> Self {
        Self {
            provider,
            queue,
            authority: Arc::from(config.authority()),
            acquire_timeout: config.acquire_timeout,
            exchange_timeout: config.exchange_timeout,
        }
    }
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }
    pub fn queue(&self) -> &Arc<WaitQueue<P::Stream>> {
        &self.queue
    }
    /// Deliver `notification` to every recipient and collect the outcomes.
    ///
    /// Each recipient runs as its own task; one failing never stops the others.
    /// Only a broken provider fails the call as a whole.
    #[tracing::instrument(skip_all, fields(recipients = tracing::field::Empty))]
    pub async fn send(
        &self,
        notification: Notification,
        recipients: impl Into<Recipients>,
    ) -> crate::Result<DispatchResult> {
        let recipients = recipients.into();
        tracing::Span::current().record("recipients", recipients.len());
        if recipients.is_empty() {
            return Err(Error::new(ErrorKind::EmptyRecipients, "send notification"));
        }
        let notification = Arc::new(notification);
        let mut abort_handles = Vec::with_capacity(recipients.len());
        let mut exchanges = FuturesUnordered::new();
        for recipient in recipients {
            let engine = self.clone();
            let notification = notification.clone();
            let task_recipient = recipient.clone();
            let span = tracing::info_span!("exchange", recipient = %recipient);
            let handle = tokio::spawn(
                async move { engine.deliver(task_recipient, &notification).await }.instrument(span),
            );
            abort_handles.push(handle.abort_handle());
            exchanges.push(async move { (recipient, handle.await) });
        }
        let mut result = DispatchResult::default();
        while let Some((recipient, joined)) = exchanges.next().await {
            match joined {
                Ok(Ok(outcome)) => result.push(outcome),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "provider failed during dispatch");
                    for handle in &abort_handles {
                        handle.abort();
                    }
                    return Err(Error::contextual("send notification")(e));
                }
                Err(join_error) => {
                    tracing::error!(%recipient, error = %join_error, "exchange task aborted");
                    result.push(DeliveryOutcome::Failed(DeliveryFailure {
                        recipient,
                        status: None,
                        error: DeliveryError::Aborted {
                            reason: join_error.to_string(),
                        },
                    }));
                }
            }
        }
        tracing::debug!(
            sent = result.sent.len(),
            failed = result.failed.len(),
            "dispatch finished"
        );
        Ok(result)
    }

    async fn deliver(
        &self,
        recipient: Recipient,
        notification: &Notification,
    ) -> Result<DeliveryOutcome, ProviderError> {
        let Some(stream) = self.acquire().await? else {
            tracing::warn!("timed out waiting for a stream");
            return Ok(failed(recipient, None, DeliveryError::AcquireTimeout));
        };
        let head = RequestHead::for_recipient(&self.authority, &recipient, notification);
        let exchange = exchange(stream, head, notification.body().clone());
        let response = match self.exchange_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, exchange).await {
                Ok(response) => response,
                Err(_) => {
                    tracing::warn!("timed out waiting for the response");
                    return Ok(failed(recipient, None, DeliveryError::ExchangeTimeout));
                }
            },
            None => exchange.await,
        };
        let outcome = match response {
            Ok(response) => classify(recipient, response),
            Err(e) => {
                tracing::warn!(error = %e, "stream failed");
                failed(
                    recipient,
                    None,
                    DeliveryError::Transport {
                        reason: e.to_string(),
                    },
                )
            }
        };
        Ok(outcome)
    }

    /// `Ok(None)` when the configured acquire timeout elapsed.
    async fn acquire(&self) -> Result<Option<P::Stream>, ProviderError> {
        let provider = &self.provider;
        let pending = match self.queue.acquire_or_enqueue(|| provider.acquire_one())? {
            Acquisition::Ready(stream) => return Ok(Some(stream)),
            Acquisition::Pending(pending) => pending,
        };
        tracing::trace!("no free stream, waiting in queue");
        match self.acquire_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, pending).await {
                Ok(stream) => stream.map(Some),
                Err(_) => Ok(None),
            },
            None => pending.await.map(Some),
        }
    }
}

/// Write the request and read the whole response. The stream is released when
/// this returns, on every path.
async fn exchange<S: ExchangeStream>(
    mut stream: S,
    head: RequestHead,
    body: Bytes,
) -> Result<Response, StreamError> {
    stream.feed(RequestFrame::Head(head)).await?;
    stream.feed(RequestFrame::Data(body)).await?;
    stream.send(RequestFrame::End).await?;

    let mut status = None;
    let mut body = BytesMut::new();
    while let Some(frame) = stream.next().await {
        match frame? {
            ResponseFrame::Head(headers) => {
                if let Some(value) = headers.get(PSEUDO_STATUS) {
                    status = Some(value.clone());
                }
            }
            ResponseFrame::Data(chunk) => body.extend_from_slice(&chunk),
        }
    }
    Ok(Response {
        status,
        body: body.freeze(),
    })
}

fn classify(recipient: Recipient, response: Response) -> DeliveryOutcome {
    let Some(status) = response.status else {
        tracing::warn!("response ended without status");
        return failed(recipient, None, DeliveryError::MissingStatus);
    };
    if status == STATUS_OK {
        tracing::debug!("delivered");
        return DeliveryOutcome::Sent(recipient);
    }
    let code = status.parse::<u16>().ok();
    let error = match serde_json::from_slice::<serde_json::Value>(&response.body) {
        Ok(payload) => DeliveryError::Rejected(payload),
        Err(e) => DeliveryError::MalformedPayload {
            body: String::from_utf8_lossy(&response.body).into_owned(),
            reason: e.to_string(),
        },
    };
    tracing::warn!(%status, %error, "delivery rejected");
    failed(recipient, code, error)
}

fn failed(recipient: Recipient, status: Option<u16>, error: DeliveryError) -> DeliveryOutcome {
    DeliveryOutcome::Failed(DeliveryFailure {
        recipient,
        status,
        error,
    })
}
