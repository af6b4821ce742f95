//! Reactive full-duplex message transport layered over a non-blocking,
//! log-buffer-style driver (`aeroflux-transport`). Every component listed
//! here corresponds to one piece of the design notes' component inventory:
//! resource manager (A), publication (B), subscription (C), connection (D),
//! inbound/outbound (C/B), client connector (F), server handler (G).
//!
//! Nothing in this crate is tied to UDP specifically; it only needs a
//! `Driver` implementation. `aeroflux-transport-udp` is the one this repo
//! ships, wired in through [`resource_manager::ResourceManager::start`] and
//! [`client::create_client`].

mod assembler;
mod client;
mod connection;
mod event_loop;
mod inbound;
mod outbound;
mod publication;
mod resource_manager;
mod server;
mod subscription;

pub use aeroflux_core::{ChannelUri, ConnectorOptions, CoreError, ErrorKind};
pub use aeroflux_transport::SessionId;

pub use client::{create_client, ClientBuilder};
pub use connection::{Connection, ConnectionState};
pub use event_loop::EventLoop;
pub use inbound::{FeedOutcome, Inbound};
pub use outbound::Outbound;
pub use publication::MessagePublication;
pub use resource_manager::{reverse_channel, ResourceManager, ResourceManagerConfig};
pub use server::{create_server, ServerBuilder, ServerHandler};
pub use subscription::{ClientSubscription, ServerSubscription};
