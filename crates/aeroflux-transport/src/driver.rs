//! The boundary between aeroflux and the underlying transport. Everything in
//! this module describes a contract an underlying media driver must satisfy;
//! `aeroflux-transport-udp` is the one concrete implementation this repo
//! ships, built directly on UDP sockets since the real driver (media driver,
//! counters, buffer layout) is explicitly out of scope per the design notes.

use std::sync::Arc;

use aeroflux_core::{ChannelUri, CoreError, OfferResult};

use crate::frame::FrameHeader;
use crate::session::SessionId;

pub type ImageAvailableHandler = Arc<dyn Fn(SessionId) + Send + Sync>;
pub type ImageUnavailableHandler = Arc<dyn Fn(SessionId) + Send + Sync>;

/// A live driver instance: owns whatever background resources the concrete
/// transport needs (sockets, driver directory, ...) and hands out
/// publications/subscriptions on demand.
pub trait Driver: Send + Sync {
    /// Creates (or looks up) a publication on `channel`/`stream_id`. The
    /// driver assigns the session id.
    fn add_publication(
        &self,
        channel: &ChannelUri,
        stream_id: i32,
    ) -> Result<Arc<dyn DriverPublication>, CoreError>;

    /// Creates (or looks up) a subscription on `channel`/`stream_id`.
    /// `on_available`/`on_unavailable` fire from inside `poll` on whichever
    /// thread calls it -- callers are expected to call `poll` from a single
    /// owning thread, matching invariant I2.
    fn add_subscription(
        &self,
        channel: &ChannelUri,
        stream_id: i32,
        on_available: ImageAvailableHandler,
        on_unavailable: ImageUnavailableHandler,
    ) -> Result<Arc<dyn DriverSubscription>, CoreError>;

    /// Disposes the driver and, if it owns a driver directory, deletes it.
    fn close(&self);

    /// Escape hatch for driver-specific setup the abstract contract doesn't
    /// generalize, e.g. the UDP driver's single-socket client channel.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// The send side of a channel. Identity is `(channel, streamId, sessionId)`.
pub trait DriverPublication: Send + Sync {
    fn session_id(&self) -> SessionId;
    fn stream_id(&self) -> i32;
    fn is_connected(&self) -> bool;
    fn mtu_length(&self) -> usize;

    /// Non-blocking offer of one already-sliced fragment with explicit
    /// begin/end flags. Never blocks; transient failure is reported via
    /// `OfferResult`, not by blocking the caller.
    fn offer_fragment(&self, payload: &[u8], begin: bool, end: bool) -> OfferResult;

    fn close(&self);

    /// Escape hatch for driver-specific rendezvous the abstract contract
    /// deliberately doesn't generalize (e.g. the UDP driver's MDC
    /// destination binding). Most callers never need this.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// The receive side of a channel. Identity is `(channel, streamId)`.
pub trait DriverSubscription: Send + Sync {
    fn stream_id(&self) -> i32;

    /// Polls for up to `fragment_limit` fragments, invoking `handler` once
    /// per fragment (BEGIN/MIDDLE/END flags included in the header; the
    /// subscription does not reassemble -- that's `aeroflux-reactive`'s job).
    /// Also drives image liveness bookkeeping. Returns fragments consumed.
    fn poll(&self, fragment_limit: usize, handler: &mut dyn FnMut(&[u8], &FrameHeader)) -> usize;

    fn close(&self);

    fn as_any(&self) -> &dyn std::any::Any;
}
