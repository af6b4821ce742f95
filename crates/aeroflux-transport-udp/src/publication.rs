use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use aeroflux_transport::{DriverPublication, FrameFlags, FrameHeader, SessionId};
use parking_lot::Mutex;
use tokio::net::UdpSocket;

use aeroflux_core::ready::OfferResult;

use crate::wire::{self, HEADER_LEN};

/// Aeron's own default MTU; kept here rather than re-derived since this
/// driver has no path-MTU discovery of its own.
pub const DEFAULT_MTU: usize = 1408;

/// One outbound UDP channel. `destination` starts unset for the server-side
/// reverse publication of an MDC rendezvous and is filled in once the peer's
/// address is learned from the matching inbound subscription; see
/// `UdpDriver::bind_reverse_publication`.
pub struct UdpDriverPublication {
    socket: Arc<UdpSocket>,
    session_id: SessionId,
    stream_id: i32,
    destination: Mutex<Option<SocketAddr>>,
    position: AtomicI64,
    mtu: usize,
}

impl UdpDriverPublication {
    pub(crate) fn new(
        socket: Arc<UdpSocket>,
        session_id: SessionId,
        stream_id: i32,
        destination: Option<SocketAddr>,
        mtu: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            socket,
            session_id,
            stream_id,
            destination: Mutex::new(destination),
            position: AtomicI64::new(0),
            mtu,
        })
    }

    /// Fills in (or replaces) the destination address. Used once for the
    /// MDC reverse publication; a no-op use for a regular client publication
    /// that already has a fixed destination.
    pub fn set_destination(&self, addr: SocketAddr) {
        *self.destination.lock() = Some(addr);
    }

    pub fn destination(&self) -> Option<SocketAddr> {
        *self.destination.lock()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DriverPublication for UdpDriverPublication {
    fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn stream_id(&self) -> i32 {
        self.stream_id
    }

    fn is_connected(&self) -> bool {
        self.destination.lock().is_some()
    }

    fn mtu_length(&self) -> usize {
        self.mtu - HEADER_LEN
    }

    fn offer_fragment(&self, payload: &[u8], begin: bool, end: bool) -> OfferResult {
        let Some(destination) = *self.destination.lock() else {
            return OfferResult::NotConnected;
        };
        if payload.len() > self.mtu_length() {
            return OfferResult::MaxPositionExceeded;
        }

        let mut datagram = vec![0u8; HEADER_LEN + payload.len()];
        wire::encode_header(
            &mut datagram,
            &FrameHeader {
                session_id: self.session_id,
                stream_id: self.stream_id,
                flags: FrameFlags { begin, end },
            },
        );
        datagram[HEADER_LEN..].copy_from_slice(payload);

        match self.socket.try_send_to(&datagram, destination) {
            Ok(sent) => {
                let position = self.position.fetch_add(sent as i64, Ordering::Relaxed) + sent as i64;
                OfferResult::Accepted(position)
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => OfferResult::BackPressured,
            Err(_) => OfferResult::AdminAction,
        }
    }

    fn close(&self) {
        *self.destination.lock() = None;
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
