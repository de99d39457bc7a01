//! FIFO of callers waiting for a stream.
//!
//! Every access goes through one lock, and so does the call into the provider
//! made on the queue's behalf. A stream is therefore never handed to two
//! waiters, and no waiter can miss a wakeup between its failed attempt and its
//! enqueue.
use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::{Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::provider::ProviderError;

type Delivery<S> = Result<S, ProviderError>;
type Waiter<S> = oneshot::Sender<Delivery<S>>;

#[derive(Debug)]
pub struct WaitQueue<S> {
    waiters: Mutex<VecDeque<Waiter<S>>>,
}

#[derive(Debug)]
pub enum Acquisition<S> {
    Ready(S),
    Pending(PendingAcquisition<S>),
}

pin_project_lite::pin_project! {
    /// A queued request for a stream.
    ///
    /// Resolves once a drain hands it a stream, or fails when the provider
    /// reports it is broken. Dropping it leaves its slot to be skipped.
    #[derive(Debug)]
    pub struct PendingAcquisition<S> {
        #[pin]
        rx: oneshot::Receiver<Delivery<S>>,
    }
}

impl<S> Future for PendingAcquisition<S> {
    type Output = Result<S, ProviderError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.rx
            .poll(cx)
            .map_err(|_| ProviderError::closed("wait queue dropped"))?
    }
}

impl<S> Default for WaitQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> WaitQueue<S> {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }
    fn lock(&self) -> MutexGuard<'_, VecDeque<Waiter<S>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
    pub fn len(&self) -> usize {
        self.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
    /// Append a waiter. Never rejects.
    pub fn enqueue(&self) -> PendingAcquisition<S> {
        let (tx, rx) = oneshot::channel();
        self.lock().push_back(tx);
        PendingAcquisition { rx }
    }
    /// Take a stream now if nobody is queued ahead, otherwise get in line.
    ///
    /// Older waiters are served first from whatever `acquire` yields.
    pub fn acquire_or_enqueue<F>(&self, mut acquire: F) -> Result<Acquisition<S>, ProviderError>
    where
        F: FnMut() -> Result<Option<S>, ProviderError>,
    {
        let mut waiters = self.lock();
        let leftover = Self::serve(&mut waiters, &mut acquire)?;
        if waiters.is_empty() {
            let stream = match leftover {
                Some(stream) => Some(stream),
                None => acquire()?,
            };
            if let Some(stream) = stream {
                return Ok(Acquisition::Ready(stream));
            }
        }
        let (tx, rx) = oneshot::channel();
        waiters.push_back(tx);
        Ok(Acquisition::Pending(PendingAcquisition { rx }))
    }
    /// Hand streams to waiters in arrival order until either runs out.
    ///
    /// Stops at the first `None` from `acquire`: a wakeup is only a hint. If
    /// `acquire` fails, every queued waiter receives the error. Returns how many
    /// waiters left the queue, including ones that had already given up.
    pub fn drain<F>(&self, mut acquire: F) -> usize
    where
        F: FnMut() -> Result<Option<S>, ProviderError>,
    {
        let mut waiters = self.lock();
        let before = waiters.len();
        // a stream nobody is left to take goes back to the provider on drop
        match Self::serve(&mut waiters, &mut acquire) {
            Ok(_leftover) => {}
            Err(e) => {
                tracing::debug!(error = %e, waiters = waiters.len(), "failing queued acquisitions");
                for waiter in waiters.drain(..) {
                    let _ = waiter.send(Err(e.clone()));
                }
            }
        }
        let served = before.saturating_sub(waiters.len());
        tracing::trace!(served, remaining = waiters.len(), "drained wait queue");
        served
    }
    fn serve<F>(
        waiters: &mut VecDeque<Waiter<S>>,
        acquire: &mut F,
    ) -> Result<Option<S>, ProviderError>
    where
        F: FnMut() -> Result<Option<S>, ProviderError>,
    {
        waiters.retain(|waiter| !waiter.is_closed());
        while !waiters.is_empty() {
            let Some(mut stream) = acquire()? else {
                return Ok(None);
            };
            loop {
                let Some(waiter) = waiters.pop_front() else {
                    return Ok(Some(stream));
                };
                match waiter.send(Ok(stream)) {
                    Ok(()) => break,
                    // the waiter gave up in the meantime, try the next one
                    Err(Ok(returned)) => stream = returned,
                    Err(Err(_)) => break,
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    fn pool(streams: impl IntoIterator<Item = u32>) -> VecDeque<u32> {
        streams.into_iter().collect()
    }

    #[tokio::test]
    async fn test_fifo_fulfillment() {
        let queue = WaitQueue::<u32>::new();
        let mut free = pool([]);
        let Acquisition::Pending(a) = queue.acquire_or_enqueue(|| Ok(free.pop_front())).unwrap()
        else {
            panic!("nothing is free, a must queue");
        };
        let Acquisition::Pending(mut b) =
            queue.acquire_or_enqueue(|| Ok(free.pop_front())).unwrap()
        else {
            panic!("nothing is free, b must queue");
        };

        free.push_back(7);
        assert_eq!(queue.drain(|| Ok(free.pop_front())), 1);
        assert_eq!(a.await.unwrap(), 7);
        assert!(futures_util::poll!(&mut b).is_pending());

        free.push_back(8);
        queue.drain(|| Ok(free.pop_front()));
        assert_eq!(b.await.unwrap(), 8);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_spurious_drain_keeps_waiters() {
        let queue = WaitQueue::<u32>::new();
        let pending = queue.enqueue();
        assert_eq!(queue.drain(|| Ok(None)), 0);
        assert_eq!(queue.drain(|| Ok(None)), 0);
        assert_eq!(queue.len(), 1);
        queue.drain(|| Ok(Some(1)));
        assert_eq!(pending.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_is_skipped() {
        let queue = WaitQueue::<u32>::new();
        let gone = queue.enqueue();
        let alive = queue.enqueue();
        drop(gone);
        let mut free = pool([1, 2]);
        assert_eq!(queue.drain(|| Ok(free.pop_front())), 2);
        assert_eq!(alive.await.unwrap(), 1);
        // only one stream was taken out of the pool
        assert_eq!(free, pool([2]));
    }

    #[tokio::test]
    async fn test_newcomer_does_not_jump_the_queue() {
        let queue = WaitQueue::<u32>::new();
        let first = queue.enqueue();
        let mut free = pool([5]);
        let second = queue.acquire_or_enqueue(|| Ok(free.pop_front())).unwrap();
        assert!(matches!(second, Acquisition::Pending(_)));
        assert_eq!(first.await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_provider_failure_reaches_every_waiter() {
        let queue = WaitQueue::<u32>::new();
        let a = queue.enqueue();
        let b = queue.enqueue();
        queue.drain(|| Err(ProviderError::establish("no endpoint")));
        assert!(a.await.is_err());
        assert!(b.await.is_err());
        assert!(queue.is_empty());
    }
}
