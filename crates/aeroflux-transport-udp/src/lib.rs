//! A `Driver` implementation backed directly by UDP sockets.
//!
//! The real Aeron media driver speaks a term-buffer/shared-memory protocol
//! to its clients and handles retransmission, flow control and NAK-based
//! reliability itself. None of that is reproduced here -- this driver is a
//! minimal, honestly best-effort UDP transport: one socket per publication
//! and per subscription, a 9-byte frame header carrying session id, stream
//! id and fragmentation flags, and image liveness detected purely from
//! datagram arrival times. It is enough to exercise every behavior the
//! design notes describe above the driver boundary (back-pressure, image
//! lifecycle, session collisions, MDC rendezvous) without requiring a real
//! Aeron driver process.

mod driver;
mod publication;
mod subscription;
mod wire;

pub use driver::UdpDriver;
pub use publication::{UdpDriverPublication, DEFAULT_MTU};
pub use subscription::UdpDriverSubscription;
