use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aeroflux_transport::{DriverSubscription, FrameHeader, ImageAvailableHandler, ImageUnavailableHandler, SessionId};
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

/// Receive side of a UDP channel. One subscription owns one bound socket and
/// demuxes inbound datagrams by the session id each frame carries, firing
/// `on_available`/`on_unavailable` as sessions come and go.
///
/// `poll` never blocks: it drains up to `fragment_limit` already-arrived
/// datagrams with `try_recv_from` and returns. The event loop supplies the
/// cadence; this type supplies no cadence of its own.
pub struct UdpDriverSubscription {
    socket: Arc<UdpSocket>,
    stream_id: i32,
    image_timeout: Duration,
    last_seen: DashMap<SessionId, (SocketAddr, Instant)>,
    on_available: ImageAvailableHandler,
    on_unavailable: ImageUnavailableHandler,
}

impl UdpDriverSubscription {
    pub(crate) fn new(
        socket: Arc<UdpSocket>,
        stream_id: i32,
        image_timeout: Duration,
        on_available: ImageAvailableHandler,
        on_unavailable: ImageUnavailableHandler,
    ) -> Arc<Self> {
        Arc::new(Self {
            socket,
            stream_id,
            image_timeout,
            last_seen: DashMap::new(),
            on_available,
            on_unavailable,
        })
    }

    /// Address the given session last sent a datagram from. Used by the
    /// server handler to bind the MDC reverse publication once a session
    /// first appears.
    pub fn peer_addr(&self, session_id: SessionId) -> Option<SocketAddr> {
        self.last_seen.get(&session_id).map(|entry| entry.0)
    }

    /// The socket's actual bound address, useful when the channel was
    /// opened with an ephemeral (`:0`) port.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn note_activity(&self, session_id: SessionId, from: SocketAddr) {
        let is_new = !self.last_seen.contains_key(&session_id);
        self.last_seen.insert(session_id, (from, Instant::now()));
        if is_new {
            debug!(stream_id = self.stream_id, session_id = %session_id, %from, "image available");
            (self.on_available)(session_id);
        }
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<SessionId> = self
            .last_seen
            .iter()
            .filter(|entry| now.duration_since(entry.value().1) > self.image_timeout)
            .map(|entry| *entry.key())
            .collect();
        for session_id in expired {
            self.last_seen.remove(&session_id);
            debug!(stream_id = self.stream_id, session_id = %session_id, "image unavailable (timeout)");
            (self.on_unavailable)(session_id);
        }
    }
}

impl DriverSubscription for UdpDriverSubscription {
    fn stream_id(&self) -> i32 {
        self.stream_id
    }

    fn poll(&self, fragment_limit: usize, handler: &mut dyn FnMut(&[u8], &FrameHeader)) -> usize {
        self.sweep_expired();

        let mut buf = [0u8; 65536];
        let mut consumed = 0;
        while consumed < fragment_limit {
            let (len, from) = match self.socket.try_recv_from(&mut buf) {
                Ok(result) => result,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            };
            let Some((header, payload)) = crate::wire::decode(&buf[..len]) else {
                trace!("dropping undersized datagram");
                continue;
            };
            if header.stream_id != self.stream_id {
                trace!(expected = self.stream_id, got = header.stream_id, "dropping frame for foreign stream");
                continue;
            }
            self.note_activity(header.session_id, from);
            handler(payload, &header);
            consumed += 1;
        }
        consumed
    }

    fn close(&self) {
        let sessions: Vec<SessionId> = self.last_seen.iter().map(|e| *e.key()).collect();
        self.last_seen.clear();
        for session_id in sessions {
            (self.on_unavailable)(session_id);
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
