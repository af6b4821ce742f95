//! The user-visible receive half of a [`crate::connection::Connection`].
//!
//! §3 specifies Inbound as polymorphic over `{feed-fragments, complete,
//! fail}` on the producer side. We translate that into a bounded
//! `tokio::mpsc` channel: the event loop is the producer (never blocks,
//! only ever `try_send`s) and the user handler is the consumer, exposed as
//! a [`futures::Stream`].

use std::pin::Pin;
use std::task::{Context, Poll};

use aeroflux_core::CoreError;
use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;

enum InboundEvent {
    Item(Bytes),
    Error(CoreError),
}

/// The producer half, held by the event loop / fragment handler. Never
/// blocks: a full channel is reported back as [`FeedOutcome::Backpressured`]
/// so the caller can decide policy (cease polling for the client, drop with
/// SLOW_CONSUMER for the server).
#[derive(Clone)]
pub struct InboundSink {
    tx: mpsc::Sender<InboundEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    Accepted,
    Backpressured,
    Closed,
}

impl InboundSink {
    pub fn feed(&self, payload: Bytes) -> FeedOutcome {
        match self.tx.try_send(InboundEvent::Item(payload)) {
            Ok(()) => FeedOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => FeedOutcome::Backpressured,
            Err(mpsc::error::TrySendError::Closed(_)) => FeedOutcome::Closed,
        }
    }

    /// Delivers a terminal error. The stream yields this item and then
    /// ends; no further `feed` calls should be made afterwards.
    pub fn fail(&self, err: CoreError) {
        let _ = self.tx.try_send(InboundEvent::Error(err));
    }

    /// Signals normal completion by dropping the sender; the stream simply
    /// ends.
    pub fn complete(self) {
        drop(self.tx);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The consumer half, handed to the user's connection handler.
pub struct Inbound {
    rx: mpsc::Receiver<InboundEvent>,
}

/// Creates a bound sink/stream pair with the given prefetch capacity
/// (§4.C's `prefetch`).
pub fn channel(prefetch: usize) -> (InboundSink, Inbound) {
    let (tx, rx) = mpsc::channel(prefetch.max(1));
    (InboundSink { tx }, Inbound { rx })
}

impl Stream for Inbound {
    type Item = Result<Bytes, CoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(InboundEvent::Item(bytes))) => Poll::Ready(Some(Ok(bytes))),
            Poll::Ready(Some(InboundEvent::Error(err))) => Poll::Ready(Some(Err(err))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
