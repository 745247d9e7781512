//! End-to-end tests over loopback TCP.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use tagwire::protocol::{build_frame, write_frame, FrameReader};
use tagwire::{
    Category, CategorySet, ClientBuilder, EndpointError, MessageDescriptor, MessageFactory,
    ServerBuilder,
};

async fn start(builder: ServerBuilder) -> SocketAddr {
    let server = builder.host("127.0.0.1").port(0).bind().await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run());
    addr
}

fn thanks_server() -> ServerBuilder {
    ServerBuilder::new()
        .workers(4)
        .auto_reply(json!({"text": "thanks"}))
}

fn request_bytes(payload: serde_json::Value) -> Vec<u8> {
    MessageFactory::default()
        .message(Category::Request, payload)
        .unwrap()
        .encode()
        .unwrap()
}

/// Send one REQUEST on a raw socket and read back one frame.
async fn raw_round_trip(stream: &mut TcpStream) -> tagwire::Message {
    write_frame(stream, &request_bytes(json!({"text": "raw"})))
        .await
        .unwrap();
    let mut reader = FrameReader::new(stream);
    let frame = reader.next_frame().await.unwrap().unwrap();
    MessageFactory::default().decode(&frame).unwrap()
}

#[tokio::test]
async fn test_request_gets_auto_reply() {
    let addr = start(thanks_server()).await;

    let client = ClientBuilder::new()
        .port(addr.port())
        .connect_timeout(Duration::from_secs(5))
        .connect()
        .await
        .unwrap();

    let batch = vec![MessageDescriptor::request(json!({"text": "hi"}))];
    let reports = client.send_all(&batch).await;

    assert_eq!(reports.len(), 1);
    let response = reports[0].outcome.as_ref().unwrap().as_ref().unwrap();
    assert_eq!(response.category(), Category::Response);
    assert_eq!(response.payload(), &json!({"text": "thanks"}));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_sequential_requests_pair_with_their_responses() {
    let server = ServerBuilder::new().workers(4).handle(Category::Request, |msg, ctx| async move {
        let n = msg.payload()["n"].clone();
        ctx.respond(json!({ "echo": n })).await
    });
    let addr = start(server).await;

    let client = ClientBuilder::new()
        .port(addr.port())
        .workers(4)
        .connect()
        .await
        .unwrap();

    let batch: Vec<_> = (0..20)
        .map(|n| MessageDescriptor::request(json!({ "n": n })))
        .collect();
    let reports = client.send_all(&batch).await;

    // every send task waits on the rendezvous lock, so each reads its own reply
    for (n, report) in reports.iter().enumerate() {
        let response = report.outcome.as_ref().unwrap().as_ref().unwrap();
        assert_eq!(response.payload(), &json!({ "echo": n }));
    }

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_category_never_reaches_the_wire() {
    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    let server = ServerBuilder::new()
        .categories(CategorySet::extended())
        .handle(Category::Request, move |_msg, ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ctx.respond(json!({})).await
            }
        });
    let addr = start(server).await;

    let client = ClientBuilder::new().port(addr.port()).connect().await.unwrap();
    let batch = vec![
        MessageDescriptor::new("BOGUS", json!({"text": "hi"})),
        // known tag, but not registered on a minimal client
        MessageDescriptor::new("PUBLISH", json!({})),
        MessageDescriptor::request(json!({"text": "hi"})),
    ];

    let reports = client.send_all(&batch).await;
    client.close().await.unwrap();

    for report in &reports[..2] {
        match &report.outcome {
            Err(EndpointError::Send { source, .. }) => {
                assert!(matches!(**source, EndpointError::UnknownCategory(_)));
            }
            other => panic!("expected UnknownCategory, got {:?}", other),
        }
    }
    assert!(reports[2].is_ok());
    assert_eq!(received.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_broken_connection_does_not_affect_others() {
    let addr = start(thanks_server()).await;

    // closes mid-payload
    let mut broken = TcpStream::connect(addr).await.unwrap();
    broken.write_all(&[0, 0, 0, 50, 1, 2, 3]).await.unwrap();
    drop(broken);

    // sends a frame that is not a message, then keeps going
    let mut garbled = TcpStream::connect(addr).await.unwrap();
    garbled.write_all(&build_frame(&[0xc1, 0xc1]).unwrap()).await.unwrap();
    garbled.write_all(&build_frame(b"").unwrap()).await.unwrap();
    let reply = raw_round_trip(&mut garbled).await;
    assert_eq!(reply.payload(), &json!({"text": "thanks"}));

    let client = ClientBuilder::new().port(addr.port()).connect().await.unwrap();
    let reply = client.request(json!({"text": "hi"})).await.unwrap();
    assert_eq!(reply.payload(), &json!({"text": "thanks"}));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_fragmented_request_over_tcp() {
    let addr = start(thanks_server()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.set_nodelay(true).unwrap();

    let frame = build_frame(&request_bytes(json!({"text": "slowly"}))).unwrap();
    for byte in &frame {
        stream.write_all(&[*byte]).await.unwrap();
        stream.flush().await.unwrap();
        tokio::task::yield_now().await;
    }

    let mut reader = FrameReader::new(&mut stream);
    let reply = reader.next_frame().await.unwrap().unwrap();
    let reply = MessageFactory::default().decode(&reply).unwrap();
    assert_eq!(reply.category(), Category::Response);
}

#[tokio::test]
async fn test_many_clients_concurrently() {
    let addr = start(thanks_server()).await;

    let clients: Vec<_> = (0..8)
        .map(|i| {
            tokio::spawn(async move {
                let client = ClientBuilder::new()
                    .port(addr.port())
                    .workers(2)
                    .connect()
                    .await
                    .unwrap();
                for _ in 0..5 {
                    let reply = client.request(json!({ "client": i })).await.unwrap();
                    assert_eq!(reply.payload(), &json!({"text": "thanks"}));
                }
                client.close().await.unwrap();
            })
        })
        .collect();

    for client in clients {
        client.await.unwrap();
    }
}

#[tokio::test]
async fn test_oversized_frame_closes_only_that_connection() {
    let addr = start(thanks_server().max_payload_size(64)).await;

    let mut big = TcpStream::connect(addr).await.unwrap();
    big.write_all(&1_000_000u32.to_be_bytes()).await.unwrap();
    let mut reader = FrameReader::new(&mut big);
    // server hangs up on the bad length
    assert!(reader.next_frame().await.unwrap().is_none());

    let mut ok = TcpStream::connect(addr).await.unwrap();
    let reply = raw_round_trip(&mut ok).await;
    assert_eq!(reply.category(), Category::Response);
}

#[tokio::test]
async fn test_non_reading_peer_does_not_starve_other_connections() {
    let addr = start(thanks_server().workers(2).max_pending_frames(64)).await;

    // floods requests and never reads a reply
    let mut flood = TcpStream::connect(addr).await.unwrap();
    let frame = build_frame(&request_bytes(json!({"text": "flood"}))).unwrap();
    let mut burst = Vec::with_capacity(frame.len() * 1_000);
    for _ in 0..1_000 {
        burst.extend_from_slice(&frame);
    }
    let flooder = tokio::spawn(async move {
        for _ in 0..400 {
            if flood.write_all(&burst).await.is_err() {
                break;
            }
        }
        flood
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let client = ClientBuilder::new().port(addr.port()).connect().await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), client.request(json!({"text": "hi"})))
        .await
        .expect("second client starved")
        .unwrap();
    assert_eq!(reply.payload(), &json!({"text": "thanks"}));
    client.close().await.unwrap();

    flooder.abort();
}
