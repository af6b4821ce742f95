use std::net::SocketAddr;
use std::sync::Arc;

use aeroflux_core::{ChannelUri, CoreError, ErrorKind};
use aeroflux_transport::{Driver, DriverPublication, DriverSubscription, ImageAvailableHandler, ImageUnavailableHandler, SessionId};
use tokio::net::UdpSocket;
use tracing::info;

use crate::publication::{UdpDriverPublication, DEFAULT_MTU};
use crate::subscription::UdpDriverSubscription;

/// A UDP-backed `Driver`. There is no shared driver process and no driver
/// directory -- every publication and subscription owns its own socket, and
/// "the driver" is just the factory plus the defaults new sockets inherit.
pub struct UdpDriver {
    mtu: usize,
    image_timeout: std::time::Duration,
}

impl UdpDriver {
    pub fn new() -> Arc<Self> {
        Self::with_options(DEFAULT_MTU, std::time::Duration::from_secs(10))
    }

    pub fn with_options(mtu: usize, image_timeout: std::time::Duration) -> Arc<Self> {
        Arc::new(Self { mtu, image_timeout })
    }

    fn bind(addr: SocketAddr) -> Result<UdpSocket, CoreError> {
        let std_socket = std::net::UdpSocket::bind(addr)
            .map_err(|err| CoreError::new(ErrorKind::Fatal, format!("bind {addr} failed")).with_cause(err))?;
        std_socket
            .set_nonblocking(true)
            .map_err(|err| CoreError::new(ErrorKind::Fatal, "set_nonblocking failed").with_cause(err))?;
        UdpSocket::from_std(std_socket)
            .map_err(|err| CoreError::new(ErrorKind::Fatal, "adopt socket into tokio runtime failed").with_cause(err))
    }

    fn parse_addr(raw: &str, what: &str) -> Result<SocketAddr, CoreError> {
        raw.parse()
            .map_err(|_| CoreError::new(ErrorKind::Other, format!("invalid {what} address: {raw}")))
    }

    /// Opens a client's outbound publication and inbound subscription on one
    /// shared socket. Real Aeron keeps these as separate transport objects
    /// joined only by the session-id rendezvous; a plain UDP socket is
    /// naturally duplex, so reusing it here gets the same observable
    /// behavior (the server's reply reaches the exact address the client
    /// sent from) without needing a second control-channel handshake. See
    /// the design notes for why this is a deliberate simplification of the
    /// literal MDC control-endpoint protocol.
    pub fn open_client_channel(
        &self,
        server_addr: SocketAddr,
        publication_stream_id: i32,
        subscription_stream_id: i32,
        on_available: ImageAvailableHandler,
        on_unavailable: ImageUnavailableHandler,
    ) -> Result<(Arc<UdpDriverPublication>, Arc<UdpDriverSubscription>), CoreError> {
        let bind_addr: SocketAddr = if server_addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }.parse().unwrap();
        let socket = Arc::new(Self::bind(bind_addr)?);
        let session_id = SessionId::new(rand::random());
        info!(%server_addr, session_id = session_id.value(), "opened client channel");

        let publication = UdpDriverPublication::new(socket.clone(), session_id, publication_stream_id, Some(server_addr), self.mtu);
        let subscription = UdpDriverSubscription::new(socket, subscription_stream_id, self.image_timeout, on_available, on_unavailable);
        Ok((publication, subscription))
    }
}

impl Driver for UdpDriver {
    fn add_publication(
        &self,
        channel: &ChannelUri,
        stream_id: i32,
    ) -> Result<Arc<dyn DriverPublication>, CoreError> {
        if channel.control_mode_dynamic() && channel.endpoint().is_none() {
            // The MDC reverse publication: no destination yet. The server
            // handler fills it in via `UdpDriverPublication::set_destination`
            // once it has seen the first datagram from the matching session.
            let control = channel
                .control()
                .ok_or_else(|| CoreError::new(ErrorKind::Other, "dynamic control-mode channel is missing `control`"))?;
            let bind_addr = Self::parse_addr(control, "control")?;
            let socket = Arc::new(Self::bind(bind_addr)?);
            let session_id = channel
                .session_id()
                .ok_or_else(|| CoreError::new(ErrorKind::Other, "mdc reverse publication requires an explicit session-id"))?;
            info!(%bind_addr, stream_id, session_id, "opened mdc reverse publication");
            return Ok(UdpDriverPublication::new(socket, SessionId::new(session_id), stream_id, None, self.mtu));
        }

        let endpoint = channel
            .endpoint()
            .ok_or_else(|| CoreError::new(ErrorKind::Other, "publication channel is missing `endpoint`"))?;
        let destination = Self::parse_addr(endpoint, "endpoint")?;
        let bind_addr: SocketAddr = if destination.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }.parse().unwrap();
        let socket = Arc::new(Self::bind(bind_addr)?);
        let session_id = channel.session_id().unwrap_or_else(|| rand::random());
        info!(%destination, stream_id, session_id, "opened publication");
        Ok(UdpDriverPublication::new(
            socket,
            SessionId::new(session_id),
            stream_id,
            Some(destination),
            self.mtu,
        ))
    }

    fn add_subscription(
        &self,
        channel: &ChannelUri,
        stream_id: i32,
        on_available: ImageAvailableHandler,
        on_unavailable: ImageUnavailableHandler,
    ) -> Result<Arc<dyn DriverSubscription>, CoreError> {
        let endpoint = channel
            .endpoint()
            .ok_or_else(|| CoreError::new(ErrorKind::Other, "subscription channel is missing `endpoint`"))?;
        let bind_addr = Self::parse_addr(endpoint, "endpoint")?;
        let socket = Arc::new(Self::bind(bind_addr)?);
        info!(%bind_addr, stream_id, "opened subscription");
        Ok(UdpDriverSubscription::new(socket, stream_id, self.image_timeout, on_available, on_unavailable))
    }

    fn close(&self) {}

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
