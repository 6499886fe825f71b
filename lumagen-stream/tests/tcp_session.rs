//! Supervisor sessions over a real loopback TCP socket

use std::sync::Arc;
use std::time::Duration;

use lumagen_protocol::{Event, PowerState, StatusUpdate};
use lumagen_stream::{
    transport_for, CancellationToken, ConnectionDescriptor, ConnectionState, ConnectionSupervisor,
    EventDispatcher, ReconnectConfig,
};
use rstest::rstest;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

const WAIT: Duration = Duration::from_secs(2);
const STREAM: &[u8] = b"!S02,1\r\n!I24,3,2,A,3840,2160,24,235,1,4,0,2\r\n!S03\r\n!S02,0\r\n";

fn reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
        jitter: 0.0,
        stability_threshold: Duration::from_millis(300),
    }
}

#[rstest]
#[case::whole(STREAM.len())]
#[case::bytewise(1)]
#[case::odd_chunks(7)]
#[tokio::test]
async fn test_events_survive_tcp_segmentation(#[case] chunk: usize) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let device = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.set_nodelay(true).unwrap();
        for piece in STREAM.chunks(chunk) {
            socket.write_all(piece).await.unwrap();
            socket.flush().await.unwrap();
        }
        // keep the link up until the engine side is done
        tokio::time::sleep(WAIT).await;
    });

    let dispatcher = Arc::new(EventDispatcher::new());
    let (_sub, mut events) = dispatcher.subscribe_channel(|e| !matches!(e, Event::StatusChanged(_)));
    let (_status, mut status) = dispatcher.subscribe_channel(|e| matches!(e, Event::StatusChanged(_)));

    let transport = transport_for(
        &ConnectionDescriptor::Ip {
            host: "127.0.0.1".into(),
            port,
        },
        Duration::from_secs(1),
    );
    let handle = ConnectionSupervisor::new(
        transport,
        reconnect(),
        512,
        dispatcher,
        Arc::new(()),
        CancellationToken::new(),
    )
    .spawn();
    assert!(handle.wait_for(ConnectionState::Connected, WAIT).await);

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap());
    }
    assert_eq!(
        received,
        vec![
            Event::PowerChanged(PowerState::On),
            Event::LabelsChanged,
            Event::PowerChanged(PowerState::Standby),
        ]
    );

    let mut updates = 0;
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), status.recv()).await {
        if updates == 0 {
            assert_eq!(event, Event::StatusChanged(StatusUpdate::LogicalInput(3)));
        }
        updates += 1;
    }
    assert_eq!(updates, 9);
    assert_eq!(handle.stats().parse_errors, 0);

    handle.shutdown().await;
    device.abort();
}

#[tokio::test]
async fn test_supervisor_retries_until_device_listens() {
    // reserve a port, then free it so the first attempts are refused
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let transport = transport_for(
        &ConnectionDescriptor::Ip {
            host: "127.0.0.1".into(),
            port,
        },
        Duration::from_secs(1),
    );
    let handle = ConnectionSupervisor::new(
        transport,
        reconnect(),
        512,
        Arc::new(EventDispatcher::new()),
        Arc::new(()),
        CancellationToken::new(),
    )
    .spawn();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_ne!(handle.state(), ConnectionState::Connected);
    assert!(handle.stats().connect_attempts >= 2);

    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let accept = tokio::spawn(async move { listener.accept().await.map(|(socket, _)| socket) });

    assert!(handle.wait_for(ConnectionState::Connected, WAIT).await);
    let _socket = accept.await.unwrap().unwrap();
    assert_eq!(handle.stats().sessions, 1);
    handle.shutdown().await;
}
