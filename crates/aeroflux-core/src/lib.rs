//! Shared contracts for the aeroflux connector stack: the stable error
//! taxonomy, the offer-result vocabulary, the backoff idle strategy and
//! channel URI parsing.
//!
//! Everything here is pure data and small state machines -- no I/O, no
//! threads. The transport driver (`aeroflux-transport`) and the connector
//! library (`aeroflux-reactive`) both depend on this crate so that error
//! kinds and offer results mean the same thing on both sides of the driver
//! boundary.

pub mod error;
pub mod idle;
pub mod options;
pub mod ready;
pub mod uri;

pub use error::{CoreError, ErrorKind, Result};
pub use idle::BackoffIdleStrategy;
pub use options::ConnectorOptions;
pub use ready::OfferResult;
pub use uri::ChannelUri;
