//! End-to-end exercises of the client/server connector pair over real
//! loopback UDP sockets: message delivery in both directions, fragment
//! reassembly, and image-unavailable propagating into connection disposal.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use aeroflux_core::{ChannelUri, ConnectorOptions};
use aeroflux_reactive::{create_client, create_server, Connection, ResourceManager, ResourceManagerConfig, ServerHandler};
use aeroflux_transport::{Driver, DriverPublication};
use aeroflux_transport_udp::UdpDriver;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn fast_options() -> ConnectorOptions {
    ConnectorOptions::default()
        .with_connect_timeout(Duration::from_secs(2))
        .with_image_liveness_timeout(Duration::from_secs(2))
}

async fn start_server(image_timeout: Duration, handle: impl Fn(Connection) + Send + Sync + 'static) -> (ServerHandler, SocketAddr) {
    let driver = UdpDriver::with_options(1408, image_timeout);
    let resources = ResourceManager::start(ResourceManagerConfig::new(driver));
    let server = create_server(resources)
        .options(fast_options())
        .handle(handle)
        .bind("127.0.0.1:0", "127.0.0.1:0")
        .await
        .expect("server binds");
    let addr = server.local_addr().expect("server has a bound local address");
    (server, addr)
}

async fn connect_client(server_addr: SocketAddr, image_timeout: Duration) -> Connection {
    let driver = UdpDriver::with_options(1408, image_timeout);
    let resources = ResourceManager::start(ResourceManagerConfig::new(driver));
    create_client(resources).options(fast_options()).connect(server_addr).await.expect("client connects")
}

#[tokio::test(flavor = "multi_thread")]
async fn client_messages_reach_server_handler_in_order() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (server, addr) = start_server(Duration::from_secs(2), move |connection| {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut inbound = connection.inbound().await.expect("inbound taken exactly once");
            while let Some(item) = inbound.next().await {
                let _ = tx.send(item.expect("payload delivered without error"));
            }
        });
    })
    .await;

    let client = connect_client(addr, Duration::from_secs(2)).await;
    client.outbound().send(Bytes::from_static(b"hello")).await.expect("enqueue 1");
    client.outbound().send(Bytes::from_static(b"world")).await.expect("enqueue 2");

    let first = timeout(Duration::from_secs(2), rx.recv()).await.expect("first message arrives timely").unwrap();
    let second = timeout(Duration::from_secs(2), rx.recv()).await.expect("second message arrives timely").unwrap();
    assert_eq!(first, Bytes::from_static(b"hello"));
    assert_eq!(second, Bytes::from_static(b"world"));

    client.dispose();
    server.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn server_reply_reaches_client_inbound() {
    let (server, addr) = start_server(Duration::from_secs(2), |connection| {
        tokio::spawn(async move {
            let mut inbound = connection.inbound().await.expect("inbound taken exactly once");
            if let Some(Ok(payload)) = inbound.next().await {
                let reply = Bytes::from([b"echo:".as_slice(), &payload[..]].concat());
                let _ = connection.outbound().send(reply).await;
            }
        });
    })
    .await;

    let client = connect_client(addr, Duration::from_secs(2)).await;
    client.outbound().send(Bytes::from_static(b"ping")).await.expect("enqueue");

    let mut client_inbound = client.inbound().await.expect("client inbound taken exactly once");
    let reply = timeout(Duration::from_secs(2), client_inbound.next())
        .await
        .expect("reply arrives timely")
        .expect("stream yields an item")
        .expect("item carries no error");
    assert_eq!(reply, Bytes::from_static(b"echo:ping"));

    client.dispose();
    server.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn message_larger_than_mtu_reassembles_whole() {
    // mtu(17) - header(9) = 8 payload bytes per datagram, forcing several
    // BEGIN/MIDDLE/END fragments for a ~60 byte message.
    const SMALL_MTU: usize = 17;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let driver = UdpDriver::with_options(SMALL_MTU, Duration::from_secs(2));
    let resources = ResourceManager::start(ResourceManagerConfig::new(driver));
    let server = create_server(resources)
        .options(fast_options())
        .handle(move |connection| {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut inbound = connection.inbound().await.expect("inbound taken exactly once");
                while let Some(item) = inbound.next().await {
                    let _ = tx.send(item.expect("payload delivered without error"));
                }
            });
        })
        .bind("127.0.0.1:0", "127.0.0.1:0")
        .await
        .expect("server binds");
    let addr = server.local_addr().expect("server has a bound local address");

    let client_driver = UdpDriver::with_options(SMALL_MTU, Duration::from_secs(2));
    let client_resources = ResourceManager::start(ResourceManagerConfig::new(client_driver));
    let client = create_client(client_resources).options(fast_options()).connect(addr).await.expect("client connects");

    let payload = Bytes::from_static(b"this message is longer than one fragment's worth of mtu bytes");
    client.outbound().send(payload.clone()).await.expect("enqueue");

    let received = timeout(Duration::from_secs(2), rx.recv()).await.expect("message arrives timely").unwrap();
    assert_eq!(received, payload);

    client.dispose();
    server.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn client_going_away_disposes_the_server_side_connection() {
    let image_timeout = Duration::from_millis(150);
    let (lost_tx, mut lost_rx) = mpsc::unbounded_channel();

    let (server, addr) = start_server(image_timeout, move |connection| {
        let lost_tx = lost_tx.clone();
        tokio::spawn(async move {
            connection.on_dispose().await;
            let _ = lost_tx.send(connection.session_id());
        });
    })
    .await;

    let client = connect_client(addr, image_timeout).await;
    let session_id = client.session_id();

    client.dispose();

    let lost_session = timeout(Duration::from_secs(2), lost_rx.recv()).await.expect("server notices the image going away").unwrap();
    assert_eq!(lost_session, session_id);

    server.dispose().await;
}

#[cfg(target_os = "linux")]
fn named_threads_running(prefix: &str) -> usize {
    let Ok(entries) = std::fs::read_dir("/proc/self/task") else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            std::fs::read_to_string(entry.path().join("comm"))
                .map(|comm| comm.trim().starts_with(prefix))
                .unwrap_or(false)
        })
        .count()
}

#[cfg(not(target_os = "linux"))]
fn named_threads_running(_prefix: &str) -> usize {
    0
}

#[tokio::test(flavor = "multi_thread")]
async fn server_dispose_disconnects_clients_and_joins_its_event_loops() {
    let image_timeout = Duration::from_millis(150);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let driver = UdpDriver::with_options(1408, image_timeout);
    let resources = ResourceManager::start(ResourceManagerConfig::new(driver));
    let server = create_server(resources.clone())
        .options(fast_options())
        .handle(move |connection| {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut inbound = connection.inbound().await.expect("inbound taken exactly once");
                if let Some(item) = inbound.next().await {
                    let _ = tx.send(item.expect("payload delivered without error"));
                }
            });
        })
        .bind("127.0.0.1:0", "127.0.0.1:0")
        .await
        .expect("server binds");
    let addr = server.local_addr().expect("server has a bound local address");

    let client = connect_client(addr, image_timeout).await;
    client.outbound().send(Bytes::from_static(b"1")).await.expect("enqueue");
    timeout(Duration::from_secs(2), rx.recv()).await.expect("server observes the first item");

    server.dispose().await;
    resources.dispose().await;

    timeout(Duration::from_secs(5), client.on_dispose()).await.expect("client connection completes teardown within 5s");
    assert_eq!(named_threads_running("aeroflux-event-loop"), 0, "no event-loop threads should remain after ResourceManager::dispose");

    client.dispose();
}

#[tokio::test(flavor = "multi_thread")]
async fn session_collision_is_refused_by_the_server() {
    let established = std::sync::Arc::new(AtomicUsize::new(0));
    let established_clone = established.clone();
    let (server, addr) = start_server(Duration::from_secs(2), move |_connection| {
        established_clone.fetch_add(1, Ordering::SeqCst);
    })
    .await;

    // Bypass the client connector (which always gets a driver-assigned
    // random session id) to force the exact collision §8 scenario 5
    // describes: two publications presenting the same session id to the
    // server's shared inbound subscription.
    const FORCED_SESSION_ID: i32 = 424242;
    let raw_driver = UdpDriver::with_options(1408, Duration::from_secs(2));
    let channel = ChannelUri::for_endpoint(addr.to_string()).with_session_id(FORCED_SESSION_ID);

    let first = raw_driver.add_publication(&channel, 1).expect("first publication opens");
    first.offer_fragment(b"from-first", true, true);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while established.load(Ordering::SeqCst) == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(established.load(Ordering::SeqCst), 1, "first session establishes");

    let second = raw_driver.add_publication(&channel, 1).expect("second publication opens");
    second.offer_fragment(b"from-second", true, true);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(established.load(Ordering::SeqCst), 1, "colliding session id must be refused, not double-counted");

    first.close();
    second.close();
    server.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_consumer_does_not_block_other_sessions() {
    // Small fragment_limit keeps the per-session inbound buffer
    // (fragment_limit * 4, see resource_manager/server wiring) tiny, so the
    // overflow that triggers SLOW_CONSUMER is reached quickly in a test.
    let mut options = fast_options();
    options.fragment_limit = 2;

    let order = std::sync::Arc::new(AtomicUsize::new(0));
    let (b_tx, mut b_rx) = mpsc::unbounded_channel();

    let driver = UdpDriver::with_options(1408, Duration::from_secs(2));
    let resources = ResourceManager::start(ResourceManagerConfig::new(driver));
    let held_connections: std::sync::Arc<parking_lot::Mutex<Vec<Connection>>> = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let server = create_server(resources.clone())
        .options(options)
        .handle({
            let order = order.clone();
            let b_tx = b_tx.clone();
            let held_connections = held_connections.clone();
            move |connection| {
                let index = order.fetch_add(1, Ordering::SeqCst);
                if index == 0 {
                    // Session A: never drained, so its inbound sink fills up
                    // and overflows.
                    held_connections.lock().push(connection);
                } else {
                    // Session B: drained normally the whole time.
                    let b_tx = b_tx.clone();
                    tokio::spawn(async move {
                        let mut inbound = connection.inbound().await.expect("inbound taken exactly once");
                        while let Some(Ok(_item)) = inbound.next().await {
                            let _ = b_tx.send(());
                        }
                    });
                }
            }
        })
        .bind("127.0.0.1:0", "127.0.0.1:0")
        .await
        .expect("server binds");
    let addr = server.local_addr().expect("server has a bound local address");

    let client_a = connect_client(addr, Duration::from_secs(2)).await;
    for _ in 0..64 {
        client_a.outbound().send(Bytes::from_static(b"flood")).await.expect("enqueue onto A");
    }

    let client_b = connect_client(addr, Duration::from_secs(2)).await;
    // Scaled down from the literal spec's 10,000 items for test runtime;
    // the property under test (B's delivery count equals B's send count
    // despite A's overflow) does not depend on the exact scale.
    const B_ITEMS: usize = 500;
    for i in 0..B_ITEMS {
        client_b.outbound().send(Bytes::from(format!("b-{i}"))).await.expect("enqueue onto B");
    }

    for _ in 0..B_ITEMS {
        timeout(Duration::from_secs(5), b_rx.recv()).await.expect("session B keeps receiving despite A's overflow").unwrap();
    }

    client_a.dispose();
    client_b.dispose();
    server.dispose().await;
    resources.dispose().await;
}
