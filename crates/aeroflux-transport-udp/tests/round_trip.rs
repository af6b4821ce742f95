use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aeroflux_core::ChannelUri;
use aeroflux_core::ready::OfferResult;
use aeroflux_transport::{Driver, DriverPublication, DriverSubscription};
use aeroflux_transport_udp::{UdpDriver, UdpDriverSubscription};

#[tokio::test(flavor = "multi_thread")]
async fn single_fragment_message_round_trips() {
    let driver = UdpDriver::new();

    let available = Arc::new(AtomicUsize::new(0));
    let available_clone = available.clone();
    let subscription = driver
        .add_subscription(
            &ChannelUri::for_endpoint("127.0.0.1:0"),
            1,
            Arc::new(move |_session| {
                available_clone.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(|_session| {}),
        )
        .expect("add_subscription");

    let sub_addr = subscription
        .as_any()
        .downcast_ref::<UdpDriverSubscription>()
        .expect("concrete udp subscription")
        .local_addr()
        .expect("local_addr");
    let publication = driver
        .add_publication(&ChannelUri::for_endpoint(sub_addr.to_string()), 1)
        .expect("add_publication");

    let result = publication.offer_fragment(b"hello aeroflux", true, true);
    assert!(matches!(result, OfferResult::Accepted(_)));

    // UDP delivery is not synchronous even on loopback; give it a moment.
    let mut received = None;
    for _ in 0..50 {
        let mut captured = Vec::new();
        subscription.poll(8, &mut |payload, header| {
            captured.push((payload.to_vec(), *header));
        });
        if let Some(first) = captured.into_iter().next() {
            received = Some(first);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (payload, header) = received.expect("message delivered within deadline");
    assert_eq!(payload, b"hello aeroflux");
    assert_eq!(header.session_id, publication.session_id());
    assert_eq!(header.stream_id, 1);
    assert!(header.flags.begin && header.flags.end);
    assert_eq!(available.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn offer_without_destination_is_not_connected() {
    let driver = UdpDriver::new();
    let channel = ChannelUri::for_endpoint("127.0.0.1:0").with_control("127.0.0.1:0").with_session_id(7);
    let publication = driver.add_publication(&channel, 1).expect("add_publication");
    // `for_endpoint` always sets an endpoint, so this isn't actually the MDC
    // reverse path, but exercises the same NotConnected branch directly.
    publication.close();
    assert_eq!(publication.offer_fragment(b"x", true, true), OfferResult::NotConnected);
}
