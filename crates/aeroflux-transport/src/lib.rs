//! Driver-facing contracts: the boundary that `aeroflux-reactive` programs
//! against and that `aeroflux-transport-udp` implements.
//!
//! This crate has no opinion about threads, sockets or reassembly -- it only
//! fixes the vocabulary (`SessionId`, `FrameHeader`) and the shape of the
//! driver (`Driver`, `DriverPublication`, `DriverSubscription`) so the two
//! sides can be developed and tested independently.

pub mod driver;
pub mod frame;
pub mod session;

pub use driver::{Driver, DriverPublication, DriverSubscription, ImageAvailableHandler, ImageUnavailableHandler};
pub use frame::{FrameFlags, FrameHeader};
pub use session::SessionId;
