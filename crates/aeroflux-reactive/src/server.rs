//! Component G: listens on one shared subscription, demultiplexes sessions,
//! and creates a reverse publication per session using the driver's
//! MDC-style rendezvous (§4.G, §9).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aeroflux_core::{ChannelUri, ConnectorOptions, CoreError, ErrorKind};
use aeroflux_transport::{ImageAvailableHandler, ImageUnavailableHandler, SessionId};
use aeroflux_transport_udp::{UdpDriverPublication, UdpDriverSubscription};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::connection::Connection;
use crate::inbound;
use crate::resource_manager::{reverse_channel, ResourceManager};
use crate::subscription::ServerSubscription;

type ConnectionHandler = dyn Fn(Connection) + Send + Sync;

struct ServerState {
    resources: Arc<ResourceManager>,
    subscription: Mutex<Option<Arc<ServerSubscription>>>,
    inbound_channel: ChannelUri,
    inbound_stream_id: i32,
    outbound_template: ChannelUri,
    outbound_stream_id: i32,
    options: ConnectorOptions,
    handler: Arc<ConnectionHandler>,
    connections: DashMap<SessionId, Connection>,
    disposed: AtomicBool,
    runtime: tokio::runtime::Handle,
}

impl ServerState {
    /// Builds the per-session reverse publication and hands a [`Connection`]
    /// to the user handler. Runs as a spawned task off the event-loop thread
    /// that fired `on_available`, since it awaits `ensureConnected`.
    async fn handle_new_session(state: Arc<ServerState>, session_id: SessionId) {
        if state.disposed.load(Ordering::SeqCst) {
            return;
        }

        let Some(subscription) = state.subscription.lock().clone() else {
            return;
        };

        if state.connections.contains_key(&session_id) {
            error!(session_id = %session_id, "session collision: image-available for a session already tracked");
            return;
        }

        let Some(peer_addr) = subscription
            .driver()
            .as_any()
            .downcast_ref::<UdpDriverSubscription>()
            .and_then(|s| s.peer_addr(session_id))
        else {
            warn!(session_id = %session_id, "image-available fired with no known peer address; skipping");
            return;
        };

        let outbound_channel = reverse_channel(&state.outbound_template, session_id);
        let publication = match state
            .resources
            .publication(
                &outbound_channel,
                state.outbound_stream_id,
                state.options.send_queue_capacity,
                state.options.connect_timeout,
                state.options.publication_timeout,
                state.options.backpressure_timeout,
                state.options.fairness_batch,
            )
            .await
        {
            Ok(publication) => publication,
            Err(err) => {
                error!(session_id = %session_id, error = %err, "failed to create reverse publication, rejecting session");
                return;
            }
        };

        if let Some(udp_publication) = publication.driver().as_any().downcast_ref::<UdpDriverPublication>() {
            udp_publication.set_destination(peer_addr);
        }

        if let Err(err) = publication.ensure_connected().await {
            error!(session_id = %session_id, error = %err, "reverse publication never connected, rejecting session");
            publication.dispose();
            state.resources.forget_publication(&outbound_channel, state.outbound_stream_id);
            return;
        }

        let (sink, inbound) = inbound::channel(state.options.fragment_limit.max(1) * 4);
        subscription.attach(session_id, sink);

        let connection = Connection::new(session_id, publication, inbound, {
            let channel = outbound_channel.clone();
            let resources = state.resources.clone();
            let outbound_stream_id = state.outbound_stream_id;
            move || {
                resources.forget_publication(&channel, outbound_stream_id);
            }
        });

        state.connections.insert(session_id, connection.clone());
        info!(session_id = %session_id, "session established");
        (state.handler)(connection);
    }

    fn handle_lost_session(&self, session_id: SessionId) {
        info!(session_id = %session_id, "image unavailable");
        let subscription = self.subscription.lock().clone();
        if let Some(subscription) = subscription {
            subscription.detach(session_id);
        }
        if let Some((_, connection)) = self.connections.remove(&session_id) {
            connection.dispose();
        }
    }

    /// A per-session inbound buffer overflowed (SLOW_CONSUMER). The
    /// subscription has already failed and removed that session's sink;
    /// this only has to take the `Connection` itself down per §7's "dispose
    /// that Connection only" rule.
    fn handle_slow_consumer(&self, session_id: SessionId) {
        warn!(session_id = %session_id, "slow consumer: disposing connection");
        if let Some((_, connection)) = self.connections.remove(&session_id) {
            connection.dispose();
        }
    }
}

/// A bound server, the `onDisposable` handle from §4.G.
#[derive(Clone)]
pub struct ServerHandler {
    state: Arc<ServerState>,
}

impl ServerHandler {
    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::SeqCst)
    }

    /// The shared inbound subscription's bound local address. Useful when
    /// binding to an ephemeral port (`:0`) and the caller needs to learn
    /// which one was actually chosen.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.state
            .subscription
            .lock()
            .clone()?
            .driver()
            .as_any()
            .downcast_ref::<UdpDriverSubscription>()?
            .local_addr()
            .ok()
    }

    /// Disposes every tracked connection concurrently, then closes the
    /// shared subscription (§4.G.4).
    pub async fn dispose(&self) {
        if self.state.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let connections: Vec<Connection> = self.state.connections.iter().map(|e| e.value().clone()).collect();
        self.state.connections.clear();

        let waits = connections.into_iter().map(|connection| async move {
            connection.dispose();
            connection.on_dispose().await;
        });
        futures::future::join_all(waits).await;

        // Extracted into a plain `let` first: `close()` below synchronously
        // fires `on_unavailable` for any still-tracked session, which calls
        // back into `handle_lost_session` and would deadlock on this same
        // mutex if the lock guard were still held (e.g. via an `if let`
        // scrutinee, whose temporary lives across the block).
        let subscription = self.state.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.driver().close();
            self.state.resources.forget_subscription(&self.state.inbound_channel, self.state.inbound_stream_id);
        }
    }
}

pub struct ServerBuilder {
    resources: Arc<ResourceManager>,
    options: ConnectorOptions,
    handler: Option<Arc<ConnectionHandler>>,
    server_stream_id: i32,
    client_stream_id: i32,
}

pub fn create_server(resources: Arc<ResourceManager>) -> ServerBuilder {
    ServerBuilder {
        resources,
        options: ConnectorOptions::default(),
        handler: None,
        server_stream_id: aeroflux_core::options::DEFAULT_SERVER_STREAM_ID,
        client_stream_id: aeroflux_core::options::DEFAULT_CLIENT_STREAM_ID,
    }
}

impl ServerBuilder {
    pub fn options(mut self, options: ConnectorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn stream_ids(mut self, server_stream_id: i32, client_stream_id: i32) -> Self {
        self.server_stream_id = server_stream_id;
        self.client_stream_id = client_stream_id;
        self
    }

    pub fn handle(mut self, handler: impl Fn(Connection) + Send + Sync + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Binds the shared inbound subscription and starts listening.
    /// `inbound_endpoint` is where clients publish to; `outbound_control_endpoint`
    /// is the local address the server's per-session reverse publications
    /// send from.
    pub async fn bind(self, inbound_endpoint: &str, outbound_control_endpoint: &str) -> Result<ServerHandler, CoreError> {
        let handler = self
            .handler
            .ok_or_else(|| CoreError::new(ErrorKind::Other, "server handler not set; call .handle(..) before .bind(..)"))?;

        let inbound_channel = ChannelUri::for_endpoint(inbound_endpoint);
        let state = Arc::new(ServerState {
            resources: self.resources.clone(),
            subscription: Mutex::new(None),
            inbound_channel: inbound_channel.clone(),
            inbound_stream_id: self.server_stream_id,
            outbound_template: ChannelUri::for_dynamic_control(outbound_control_endpoint),
            outbound_stream_id: self.client_stream_id,
            options: self.options,
            handler,
            connections: DashMap::new(),
            disposed: AtomicBool::new(false),
            runtime: tokio::runtime::Handle::current(),
        });

        let on_available: ImageAvailableHandler = {
            let state = state.clone();
            Arc::new(move |session_id| {
                let state = state.clone();
                let rt = state.runtime.clone();
                rt.spawn(async move {
                    ServerState::handle_new_session(state, session_id).await;
                });
            })
        };
        let on_unavailable: ImageUnavailableHandler = {
            let state = state.clone();
            Arc::new(move |session_id| state.handle_lost_session(session_id))
        };
        let on_slow_consumer: ImageUnavailableHandler = {
            let state = state.clone();
            Arc::new(move |session_id| state.handle_slow_consumer(session_id))
        };

        let subscription = self.resources.new_server_subscription(
            &inbound_channel,
            self.server_stream_id,
            self.options.fragment_limit,
            on_available,
            on_unavailable,
            on_slow_consumer,
        )?;
        *state.subscription.lock() = Some(subscription);

        info!(inbound_endpoint, outbound_control_endpoint, "server bound");
        Ok(ServerHandler { state })
    }
}
