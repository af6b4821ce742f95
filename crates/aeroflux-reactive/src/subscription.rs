//! Component C: binds a driver subscription to fragment handlers and
//! reassembles fragments before delivery. Two flavors share one assembler
//! implementation: [`ClientSubscription`] has exactly one sink, while
//! [`ServerSubscription`] demultiplexes by session id (§4.C).

use std::collections::VecDeque;
use std::sync::Arc;

use aeroflux_core::CoreError;
use aeroflux_transport::{DriverSubscription, ImageUnavailableHandler, SessionId};
use bytes::Bytes;
use dashmap::DashMap;
use tracing::warn;

use crate::assembler::FragmentAssembler;
use crate::inbound::{FeedOutcome, InboundSink};

/// One sink, fed every assembled payload. Used by both the client connector
/// (one peer) and the server's per-connection wiring once a session is
/// known.
pub struct ClientSubscription {
    driver: Arc<dyn DriverSubscription>,
    assembler: FragmentAssembler,
    sink: parking_lot::Mutex<Option<InboundSink>>,
    /// Assembled payloads the sink has already refused once. Replayed in
    /// order before the driver is polled again, so a slow downstream never
    /// loses a message -- it only stops the subscription from reading more.
    pending: parking_lot::Mutex<VecDeque<Bytes>>,
    fragment_limit: usize,
}

impl ClientSubscription {
    pub fn new(driver: Arc<dyn DriverSubscription>, fragment_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            driver,
            assembler: FragmentAssembler::new(),
            sink: parking_lot::Mutex::new(None),
            pending: parking_lot::Mutex::new(VecDeque::new()),
            fragment_limit,
        })
    }

    pub fn attach(&self, sink: InboundSink) {
        *self.sink.lock() = Some(sink);
    }

    pub fn driver(&self) -> &Arc<dyn DriverSubscription> {
        &self.driver
    }
}

impl crate::event_loop::Ticking for ClientSubscription {
    fn tick(&self) -> bool {
        let sink_guard = self.sink.lock();
        let Some(sink) = sink_guard.as_ref() else {
            return false;
        };

        // §4.C: a subscription ceases to poll while backpressured. Drain
        // anything buffered from an earlier tick first, in order, before
        // touching the driver again.
        {
            let mut pending = self.pending.lock();
            while let Some(payload) = pending.pop_front() {
                match sink.feed(payload.clone()) {
                    FeedOutcome::Accepted => {}
                    FeedOutcome::Backpressured => {
                        pending.push_front(payload);
                        return false;
                    }
                    FeedOutcome::Closed => return false,
                }
            }
        }

        let assembler = &self.assembler;
        let mut consumed_any = false;
        let fragments = self.driver.poll(self.fragment_limit, &mut |payload, header| {
            let Some(complete) = assembler.assemble(payload, header) else {
                return;
            };
            let mut pending = self.pending.lock();
            if !pending.is_empty() {
                // A payload earlier in this same batch is already queued
                // behind a full sink; keep order by buffering this one too
                // instead of racing it ahead via `feed`.
                pending.push_back(complete);
                return;
            }
            drop(pending);
            if sink.feed(complete.clone()) == FeedOutcome::Backpressured {
                self.pending.lock().push_back(complete);
            }
        });
        if fragments > 0 {
            consumed_any = true;
        }
        consumed_any
    }
}

/// Demultiplexes one shared subscription across many sessions. The server
/// handler owns the session→sink map; unknown sessions are logged and
/// dropped per §4.C.
pub struct ServerSubscription {
    driver: Arc<dyn DriverSubscription>,
    assembler: FragmentAssembler,
    sinks: DashMap<SessionId, InboundSink>,
    fragment_limit: usize,
    on_slow_consumer: ImageUnavailableHandler,
}

impl ServerSubscription {
    pub fn new(driver: Arc<dyn DriverSubscription>, fragment_limit: usize, on_slow_consumer: ImageUnavailableHandler) -> Arc<Self> {
        Arc::new(Self {
            driver,
            assembler: FragmentAssembler::new(),
            sinks: DashMap::new(),
            fragment_limit,
            on_slow_consumer,
        })
    }

    pub fn driver(&self) -> &Arc<dyn DriverSubscription> {
        &self.driver
    }

    pub fn attach(&self, session_id: SessionId, sink: InboundSink) {
        self.sinks.insert(session_id, sink);
    }

    /// Removes and terminates a session's sink, e.g. on image-unavailable
    /// or explicit connection dispose.
    pub fn detach(&self, session_id: SessionId) {
        self.assembler.discard(session_id);
        if let Some((_, sink)) = self.sinks.remove(&session_id) {
            sink.complete();
        }
    }

    /// Fails a session's sink with SLOW_CONSUMER and removes it, per §5's
    /// bounded per-session buffer policy, then notifies `on_slow_consumer`
    /// so the owning `Connection` is disposed too -- a slow inbound must
    /// take down the whole session, not just silence its reads.
    fn fail_slow_consumer(&self, session_id: SessionId) {
        self.assembler.discard(session_id);
        if let Some((_, sink)) = self.sinks.remove(&session_id) {
            sink.fail(CoreError::new(aeroflux_core::ErrorKind::SlowConsumer, "per-session inbound buffer overflowed"));
        }
        (self.on_slow_consumer)(session_id);
    }
}

impl crate::event_loop::Ticking for ServerSubscription {
    fn tick(&self) -> bool {
        let assembler = &self.assembler;
        let mut slow_sessions = Vec::new();
        let fragments = self.driver.poll(self.fragment_limit, &mut |payload, header| {
            let Some(complete) = assembler.assemble(payload, header) else {
                return;
            };
            match self.sinks.get(&header.session_id) {
                Some(sink) => {
                    if sink.feed(complete) == FeedOutcome::Backpressured {
                        slow_sessions.push(header.session_id);
                    }
                }
                None => {
                    warn!(session_id = %header.session_id, "dropping fragment for unknown session");
                }
            }
        });
        for session_id in slow_sessions {
            self.fail_slow_consumer(session_id);
        }
        fragments > 0
    }
}
