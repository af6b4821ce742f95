//! Component E: pairs one publication with one subscription under a shared
//! session id, and exposes the state machine from §4.E:
//! `INIT -> ACTIVE -> DISPOSING -> DISPOSED`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use aeroflux_transport::SessionId;
use tokio::sync::Notify;
use tracing::debug;

use crate::inbound::Inbound;
use crate::outbound::Outbound;
use crate::publication::MessagePublication;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Init = 0,
    Active = 1,
    Disposing = 2,
    Disposed = 3,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnectionState::Init,
            1 => ConnectionState::Active,
            2 => ConnectionState::Disposing,
            _ => ConnectionState::Disposed,
        }
    }
}

struct ConnectionInner {
    session_id: SessionId,
    publication: MessagePublication,
    state: AtomicU8,
    dispose_notify: Notify,
    teardown: Box<dyn Fn() + Send + Sync>,
}

/// A full-duplex connection: one publication (exclusive), one subscription
/// reference (shared with siblings in the server case), and the lifecycle
/// glue described by I4: the dispose-hook never fires before the connection
/// was actually established.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
    inbound: Arc<tokio::sync::Mutex<Option<Inbound>>>,
    outbound: Outbound,
}

impl Connection {
    /// `teardown` runs exactly once, when the connection transitions into
    /// `Disposing`; it is responsible for detaching this session from its
    /// (possibly shared) subscription and closing the publication's driver
    /// handle.
    pub fn new(session_id: SessionId, publication: MessagePublication, inbound: Inbound, teardown: impl Fn() + Send + Sync + 'static) -> Self {
        let inner = Arc::new(ConnectionInner {
            session_id,
            publication: publication.clone(),
            state: AtomicU8::new(ConnectionState::Active as u8),
            dispose_notify: Notify::new(),
            teardown: Box::new(teardown),
        });
        Self {
            outbound: Outbound::new(publication),
            inbound: Arc::new(tokio::sync::Mutex::new(Some(inbound))),
            inner,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session_id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == ConnectionState::Disposed
    }

    /// Takes the inbound stream. A connection has exactly one consumer;
    /// calling this twice returns `None` the second time.
    pub async fn inbound(&self) -> Option<Inbound> {
        self.inbound.lock().await.take()
    }

    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    /// Begins (or no-ops if already past) the DISPOSING transition. Safe to
    /// call from any thread; the actual teardown work runs synchronously
    /// here since it is limited to dropping driver/collection handles.
    pub fn dispose(&self) {
        let previous = self.inner.state.swap(ConnectionState::Disposing as u8, Ordering::SeqCst);
        if previous == ConnectionState::Disposing as u8 || previous == ConnectionState::Disposed as u8 {
            return;
        }
        debug!(session_id = %self.inner.session_id, "connection disposing");
        self.inner.publication.dispose();
        (self.inner.teardown)();
        self.inner.state.store(ConnectionState::Disposed as u8, Ordering::SeqCst);
        self.inner.dispose_notify.notify_waiters();
    }

    /// Resolves exactly once, after full teardown (§4.E contract).
    pub async fn on_dispose(&self) {
        loop {
            if self.is_disposed() {
                return;
            }
            let notified = self.inner.dispose_notify.notified();
            if self.is_disposed() {
                return;
            }
            notified.await;
        }
    }
}
