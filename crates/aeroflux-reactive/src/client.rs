//! Component F: connects outbound to a fixed server endpoint and waits for
//! the server's reverse image to appear before handing the caller a
//! [`Connection`] (§4.F).
//!
//! The outbound publication and inbound subscription share one duplex UDP
//! socket via `UdpDriver::open_client_channel` rather than the literal
//! control-endpoint SETUP handshake: a plain UDP socket already lets the
//! server's reply reach the exact address the client sent from, so the
//! session-id rendezvous works the same way without a second protocol. See
//! the design notes for the full rationale.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aeroflux_core::{ChannelUri, ConnectorOptions, CoreError, ErrorKind};
use aeroflux_transport::{
    DriverSubscription, ImageAvailableHandler, ImageUnavailableHandler, SessionId,
};
use aeroflux_transport_udp::UdpDriver;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::connection::Connection;
use crate::inbound;
use crate::publication::MessagePublication;
use crate::resource_manager::ResourceManager;
use crate::subscription::ClientSubscription;

pub struct ClientBuilder {
    resources: Arc<ResourceManager>,
    options: ConnectorOptions,
    server_stream_id: i32,
    client_stream_id: i32,
}

/// Entry point for §6's `createClient(resources).options(cfg).connect(addr)`
/// builder. Shares the same [`ResourceManager`] a server would use -- same
/// driver, same pool of event loops -- rather than standing up a private
/// driver/loop pair, so an application that runs both a client and a server
/// only ever has one set of background threads.
pub fn create_client(resources: Arc<ResourceManager>) -> ClientBuilder {
    ClientBuilder {
        resources,
        options: ConnectorOptions::default(),
        server_stream_id: aeroflux_core::options::DEFAULT_SERVER_STREAM_ID,
        client_stream_id: aeroflux_core::options::DEFAULT_CLIENT_STREAM_ID,
    }
}

impl ClientBuilder {
    pub fn options(mut self, options: ConnectorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn stream_ids(mut self, server_stream_id: i32, client_stream_id: i32) -> Self {
        self.server_stream_id = server_stream_id;
        self.client_stream_id = client_stream_id;
        self
    }

    /// Opens the duplex channel, waits for the server's reverse image to
    /// appear (bounded by `connect_timeout`), and returns an active
    /// [`Connection`]. Fails with `NotConnected` if no image appears in
    /// time; the half-opened channel is torn down before returning.
    ///
    /// A driver-assigned session id is not guaranteed unique against one the
    /// server already tracks (§9's open question on `sessionId` uniqueness);
    /// a collision looks identical to the server never replying at all, so
    /// each attempt that times out is retried with a fresh session id up to
    /// `session_collision_retries` additional times before giving up.
    pub async fn connect(self, server_addr: SocketAddr) -> Result<Connection, CoreError> {
        let attempts = 1 + self.options.session_collision_retries;
        let mut last_err = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                warn!(attempt, server_addr = %server_addr, "retrying client connect after no image appeared");
            }
            match self.connect_once(server_addr).await {
                Ok(connection) => return Ok(connection),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| CoreError::new(ErrorKind::NotConnected, "no server image appeared within connectTimeout")))
    }

    async fn connect_once(&self, server_addr: SocketAddr) -> Result<Connection, CoreError> {
        let driver = self
            .resources
            .driver()
            .as_any()
            .downcast_ref::<UdpDriver>()
            .ok_or_else(|| CoreError::new(ErrorKind::Other, "client connector requires a UdpDriver-backed resource manager"))?;

        let (available_tx, available_rx) = oneshot::channel();
        let available_tx = Mutex::new(Some(available_tx));
        let fired = Arc::new(AtomicBool::new(false));

        let on_available: ImageAvailableHandler = {
            let fired = fired.clone();
            Arc::new(move |session_id| {
                if fired.swap(true, Ordering::SeqCst) {
                    return;
                }
                if let Some(tx) = available_tx.lock().take() {
                    let _ = tx.send(session_id);
                }
            })
        };
        // Populated once the `Connection` exists below; an image-unavailable
        // that fires before then means the server never replied at all, which
        // `available_rx` timing out already covers.
        let connection_slot: Arc<Mutex<Option<Connection>>> = Arc::new(Mutex::new(None));
        let on_unavailable: ImageUnavailableHandler = {
            let connection_slot = connection_slot.clone();
            Arc::new(move |session_id| {
                info!(session_id = %session_id, "client image unavailable");
                let connection = connection_slot.lock().clone();
                if let Some(connection) = connection {
                    connection.dispose();
                }
            })
        };

        let (publication, subscription) = driver.open_client_channel(server_addr, self.server_stream_id, self.client_stream_id, on_available, on_unavailable)?;

        let message_publication = MessagePublication::new(
            publication.clone(),
            self.options.send_queue_capacity,
            self.options.connect_timeout,
            self.options.publication_timeout,
            self.options.backpressure_timeout,
            self.options.fairness_batch,
        );
        let client_subscription = ClientSubscription::new(subscription.clone(), self.options.fragment_limit);

        let event_loop = self.resources.loop_for(&ChannelUri::for_endpoint(server_addr.to_string()));
        let publication_resource_id = event_loop.add(Arc::new(message_publication.clone()));
        let subscription_resource_id = event_loop.add(client_subscription.clone());

        let connect_timeout = self.options.connect_timeout;
        let session_id: SessionId = match tokio::time::timeout(connect_timeout, available_rx).await {
            Ok(Ok(session_id)) => session_id,
            _ => {
                message_publication.dispose();
                subscription.close();
                return Err(CoreError::new(ErrorKind::NotConnected, "no server image appeared within connectTimeout"));
            }
        };

        let (sink, inbound_stream) = inbound::channel(self.options.fragment_limit.max(1) * 4);
        client_subscription.attach(sink);

        let teardown_subscription = subscription.clone();
        let connection = Connection::new(session_id, message_publication, inbound_stream, move || {
            teardown_subscription.close();
            event_loop.remove(publication_resource_id);
            event_loop.remove(subscription_resource_id);
        });
        *connection_slot.lock() = Some(connection.clone());

        info!(session_id = %session_id, %server_addr, "client connected");
        Ok(connection)
    }
}
