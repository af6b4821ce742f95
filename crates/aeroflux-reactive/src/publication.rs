//! Component B: the outbound half of a connection. §4.B's send algorithm
//! runs entirely inside [`MessagePublicationInner::tick`], called once per
//! event-loop tick -- nothing here ever blocks the caller of `enqueue`
//! longer than it takes to push onto the internal queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aeroflux_core::ready::OfferResult;
use aeroflux_core::CoreError;
use aeroflux_transport::{DriverPublication, SessionId};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

struct SendItem {
    payload: Bytes,
    cursor: usize,
    enqueued_at: Instant,
    /// When the head of the queue first saw `BackPressured`/`AdminAction`.
    /// Cleared on any accepted offer so a timeout only fires when the item
    /// is stuck, not merely slow overall.
    backpressure_since: Option<Instant>,
    completion: oneshot::Sender<Result<(), CoreError>>,
}

impl SendItem {
    fn complete(self, result: Result<(), CoreError>) {
        let _ = self.completion.send(result);
    }
}

pub struct MessagePublicationInner {
    driver: Arc<dyn DriverPublication>,
    queue: Mutex<VecDeque<SendItem>>,
    queue_capacity: usize,
    created_at: Instant,
    connect_timeout: Duration,
    publication_timeout: Duration,
    backpressure_timeout: Duration,
    fairness_batch: usize,
    disposed: AtomicBool,
    connect_waiters: Mutex<Vec<oneshot::Sender<Result<(), CoreError>>>>,
}

/// A handle to one outbound channel, mutated only by its owning event loop
/// (I2's single-writer rule extends to publications too). Cloning shares
/// the same underlying queue.
#[derive(Clone)]
pub struct MessagePublication {
    inner: Arc<MessagePublicationInner>,
}

impl MessagePublication {
    pub fn new(
        driver: Arc<dyn DriverPublication>,
        queue_capacity: usize,
        connect_timeout: Duration,
        publication_timeout: Duration,
        backpressure_timeout: Duration,
        fairness_batch: usize,
    ) -> Self {
        Self {
            inner: Arc::new(MessagePublicationInner {
                driver,
                queue: Mutex::new(VecDeque::new()),
                queue_capacity,
                created_at: Instant::now(),
                connect_timeout,
                publication_timeout,
                backpressure_timeout,
                fairness_batch,
                disposed: AtomicBool::new(false),
                connect_waiters: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.driver.session_id()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Appends `payload` to the send queue. Fails immediately with
    /// `Backpressured` if the queue is already at `sendQueueCapacity`
    /// (§4.B: "non-blocking" caller policy -- this crate does not offer a
    /// blocking variant). The returned future resolves once the item has
    /// either been fully offered to the driver or has failed.
    pub async fn enqueue(&self, payload: Bytes) -> Result<(), CoreError> {
        if self.is_disposed() {
            return Err(CoreError::cancelled("publication is disposed"));
        }
        let rx = {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.queue_capacity {
                return Err(CoreError::backpressured("send queue is at capacity"));
            }
            let (tx, rx) = oneshot::channel();
            queue.push_back(SendItem {
                payload,
                cursor: 0,
                enqueued_at: Instant::now(),
                backpressure_since: None,
                completion: tx,
            });
            rx
        };
        rx.await.unwrap_or_else(|_| Err(CoreError::cancelled("publication disposed before send completed")))
    }

    /// Resolves once the driver reports the publication connected, or fails
    /// with `NotConnected` after `connectTimeout`. Progress is driven
    /// entirely by the owning event loop's `tick`; this call only waits.
    pub async fn ensure_connected(&self) -> Result<(), CoreError> {
        if self.inner.driver.is_connected() {
            return Ok(());
        }
        let rx = {
            let mut waiters = self.inner.connect_waiters.lock();
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            rx
        };
        let remaining = self
            .inner
            .connect_timeout
            .saturating_sub(self.inner.created_at.elapsed());
        match tokio::time::timeout(remaining, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CoreError::cancelled("publication disposed while connecting")),
            Err(_) => Err(CoreError::not_connected("ensureConnected exceeded connectTimeout")),
        }
    }

    /// Marks the publication closed. Already-enqueued items are drained and
    /// failed with `Cancelled` on the next tick (I3); new `enqueue` calls
    /// fail immediately.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
    }

    /// Runs one send-algorithm step. Returns whether any queue progress was
    /// made this tick, which feeds the owning event loop's idle strategy.
    pub fn tick(&self) -> bool {
        let inner = &self.inner;
        let now = Instant::now();

        if inner.disposed.load(Ordering::SeqCst) {
            self.drain_disposed();
            return false;
        }

        let mut work_done = self.notify_connect_waiters(now);

        let mut served = 0usize;
        loop {
            if served >= inner.fairness_batch {
                break;
            }

            let snapshot = {
                let queue = inner.queue.lock();
                queue
                    .front()
                    .map(|item| (item.payload.clone(), item.cursor, item.enqueued_at, item.backpressure_since))
            };
            let Some((payload, cursor, enqueued_at, backpressure_since)) = snapshot else {
                break;
            };

            if now.duration_since(enqueued_at) > inner.publication_timeout {
                let item = { inner.queue.lock().pop_front() };
                if let Some(item) = item {
                    item.complete(Err(CoreError::timeout("publicationTimeout exceeded")));
                    work_done = true;
                    served += 1;
                }
                continue;
            }

            let mtu = inner.driver.mtu_length().max(1);
            let total_len = payload.len();
            let this_len = (total_len - cursor).min(mtu);
            let begin = cursor == 0;
            let end = cursor + this_len == total_len;
            let result = inner.driver.offer_fragment(&payload[cursor..cursor + this_len], begin, end);

            match result {
                OfferResult::Accepted(_) => {
                    let done = {
                        let mut queue = inner.queue.lock();
                        match queue.front_mut() {
                            Some(item) => {
                                item.cursor += this_len;
                                item.backpressure_since = None;
                                item.cursor == total_len
                            }
                            None => true,
                        }
                    };
                    if done {
                        if let Some(item) = inner.queue.lock().pop_front() {
                            item.complete(Ok(()));
                        }
                    }
                    work_done = true;
                    served += 1;
                }
                OfferResult::BackPressured | OfferResult::AdminAction => match backpressure_since {
                    None => {
                        if let Some(item) = inner.queue.lock().front_mut() {
                            item.backpressure_since = Some(now);
                        }
                        break;
                    }
                    Some(since) if now.duration_since(since) > inner.backpressure_timeout => {
                        let item = { inner.queue.lock().pop_front() };
                        if let Some(item) = item {
                            item.complete(Err(CoreError::timeout("backpressureTimeout exceeded")));
                            work_done = true;
                            served += 1;
                        }
                        continue;
                    }
                    Some(_) => break,
                },
                OfferResult::NotConnected => {
                    if now.duration_since(inner.created_at) <= inner.connect_timeout {
                        break;
                    }
                    if let Some(item) = inner.queue.lock().pop_front() {
                        item.complete(Err(CoreError::not_connected("publication never connected")));
                    }
                    inner.disposed.store(true, Ordering::SeqCst);
                    work_done = true;
                    served += 1;
                    break;
                }
                OfferResult::MaxPositionExceeded | OfferResult::Closed => {
                    if let Some(item) = inner.queue.lock().pop_front() {
                        item.complete(Err(CoreError::fatal("publication closed or exceeded max position")));
                    }
                    inner.disposed.store(true, Ordering::SeqCst);
                    work_done = true;
                    served += 1;
                    break;
                }
            }
        }

        work_done
    }

    fn notify_connect_waiters(&self, now: Instant) -> bool {
        let inner = &self.inner;
        if !inner.driver.is_connected() && now.duration_since(inner.created_at) <= inner.connect_timeout {
            return false;
        }
        let waiters = std::mem::take(&mut *inner.connect_waiters.lock());
        if waiters.is_empty() {
            return false;
        }
        let connected = inner.driver.is_connected();
        for waiter in waiters {
            let result = if connected { Ok(()) } else { Err(CoreError::not_connected("ensureConnected exceeded connectTimeout")) };
            let _ = waiter.send(result);
        }
        true
    }

    fn drain_disposed(&self) {
        let items: Vec<SendItem> = {
            let mut queue = self.inner.queue.lock();
            queue.drain(..).collect()
        };
        if !items.is_empty() {
            debug!(count = items.len(), "draining publication queue after dispose");
        }
        for item in items {
            item.complete(Err(CoreError::cancelled("publication disposed")));
        }
        let waiters = std::mem::take(&mut *self.inner.connect_waiters.lock());
        for waiter in waiters {
            let _ = waiter.send(Err(CoreError::cancelled("publication disposed")));
        }
    }

    pub fn driver(&self) -> &Arc<dyn DriverPublication> {
        &self.inner.driver
    }

    pub fn close_driver(&self) {
        self.inner.driver.close();
        warn!(session_id = %self.session_id(), "publication closed");
    }
}

impl crate::event_loop::Ticking for MessagePublication {
    fn tick(&self) -> bool {
        MessagePublication::tick(self)
    }
}
