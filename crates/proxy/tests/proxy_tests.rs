//! Socket-level tests of the transaction engine: a real proxy instance on
//! an ephemeral port, scripted origin servers on localhost, and event
//! subscribers asserting the observable lifecycle.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use wiretap_proxy::protocol::ErrorKind;
use wiretap_proxy::transaction::PROXY_AGENT;
use wiretap_proxy::{Proxy, ProxyConfig, ProxyEvent};

/// Binds a proxy on an ephemeral port and starts serving it.
async fn start_proxy() -> (SocketAddr, broadcast::Receiver<ProxyEvent>) {
    let config = ProxyConfig { listen_port: 0, ..ProxyConfig::default() };
    let proxy = Proxy::bind(&config).unwrap();
    // the listener binds the wildcard address; dial loopback
    let addr = SocketAddr::from(([127, 0, 0, 1], proxy.local_addr().unwrap().port()));
    let events = proxy.subscribe();
    tokio::spawn(proxy.run());
    (addr, events)
}

/// Collects one transaction's events, through its terminal event.
async fn collect_events(rx: &mut broadcast::Receiver<ProxyEvent>) -> Vec<ProxyEvent> {
    let mut events = Vec::new();
    loop {
        let event = rx.recv().await.unwrap();
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

async fn read_request_head(stream: &mut TcpStream) -> Vec<u8> {
    let mut head = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            return head;
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            return head;
        }
    }
}

/// An origin that answers every request with the given bytes.
async fn scripted_origin(response: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut peer, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = read_request_head(&mut peer).await;
                peer.write_all(response).await.unwrap();
                peer.flush().await.unwrap();
                // leave the socket open; the proxy frames the response
                // itself and closes when done
                let mut sink = [0u8; 64];
                let _ = peer.read(&mut sink).await;
            });
        }
    });
    addr
}

#[tokio::test(flavor = "multi_thread")]
async fn simple_get_relays_response_and_orders_events() {
    let origin = scripted_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
    let (proxy_addr, mut events) = start_proxy().await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let request = format!(
        "GET /foo/bar HTTP/1.1\r\nHost: {origin}\r\nAccept: application/html\r\n\r\n"
    );
    client.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");

    let events = collect_events(&mut events).await;
    let names: Vec<&str> = events
        .iter()
        .map(|e| match e {
            ProxyEvent::TransactionStarted { .. } => "started",
            ProxyEvent::RequestRead { .. } => "request",
            ProxyEvent::ResponseHeadersRead { .. } => "response-headers",
            ProxyEvent::ResponseRead { .. } => "response",
            ProxyEvent::TransactionComplete { .. } => "complete",
            ProxyEvent::TransactionFailed { .. } => "failed",
        })
        .collect();
    assert_eq!(names, vec!["started", "request", "response-headers", "response", "complete"]);

    // all events belong to the same transaction
    let id = events[0].transaction_id();
    assert!(events.iter().all(|e| e.transaction_id() == id));

    // the request snapshot is the fully parsed message
    let ProxyEvent::RequestRead { request, .. } = &events[1] else {
        panic!("expected RequestRead");
    };
    assert_eq!(request.method(), "GET");
    assert_eq!(request.uri(), "/foo/bar");
    assert_eq!(request.headers().find("accept"), vec!["application/html"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn chunked_response_is_relayed_byte_exact() {
    const CHUNKED_403: &[u8] = b"HTTP/1.1 403 Forbidden\r\n\
        Content-Type: text/html\r\n\
        Transfer-Encoding: chunked\r\n\
        \r\n\
        8\r\n<html>\r\n\r\n\
        9\r\n</html>\r\n\r\n\
        0\r\n\r\n";

    let origin = scripted_origin(CHUNKED_403).await;
    let (proxy_addr, mut events) = start_proxy().await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let request = format!("GET / HTTP/1.1\r\nHost: {origin}\r\n\r\n");
    client.write_all(request.as_bytes()).await.unwrap();

    let mut relayed = Vec::new();
    client.read_to_end(&mut relayed).await.unwrap();
    assert_eq!(relayed, CHUNKED_403);

    let events = collect_events(&mut events).await;
    let response = events
        .iter()
        .find_map(|e| match e {
            ProxyEvent::ResponseRead { response, .. } => Some(response),
            _ => None,
        })
        .expect("ResponseRead event");
    assert_eq!(response.status_code(), 403);
    assert_eq!(response.status_message(), "Forbidden");
    assert_eq!(response.body_as_str(), "<html>\r\n</html>\r\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_tunnels_bytes_both_ways() {
    // echo origin
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut peer, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        loop {
            let n = peer.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            peer.write_all(&buf[..n]).await.unwrap();
        }
    });

    let (proxy_addr, mut events) = start_proxy().await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let request = format!(
        "CONNECT {origin} HTTP/1.0\r\nContent-Length: 0\r\nProxy-Connection: keep-alive\r\n\r\n"
    );
    client.write_all(request.as_bytes()).await.unwrap();

    let expected_reply = format!("HTTP/1.1 200 OK\r\nProxy-Agent: {PROXY_AGENT}\r\n\r\n");
    let mut reply = vec![0u8; expected_reply.len()];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, expected_reply.as_bytes());

    // opaque bytes flow through untouched, both directions
    client.write_all(b"ping-through-tunnel").await.unwrap();
    let mut echoed = vec![0u8; b"ping-through-tunnel".len()];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, b"ping-through-tunnel");

    // client hangup ends the tunnel cleanly
    drop(client);
    let events = collect_events(&mut events).await;
    assert!(matches!(events.first(), Some(ProxyEvent::TransactionStarted { .. })));
    assert!(matches!(events.last(), Some(ProxyEvent::TransactionComplete { .. })));
    assert!(!events.iter().any(|e| matches!(e, ProxyEvent::TransactionFailed { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_to_dead_origin_answers_400() {
    // claim a port, then close it so connects are refused
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let (proxy_addr, mut events) = start_proxy().await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let request = format!("CONNECT {dead_addr} HTTP/1.0\r\n\r\n");
    client.write_all(request.as_bytes()).await.unwrap();

    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    let expected = format!("HTTP/1.1 400 Bad Request\r\nProxy-Agent: {PROXY_AGENT}\r\n\r\n");
    assert_eq!(reply, expected.as_bytes());

    let events = collect_events(&mut events).await;
    assert!(matches!(events.last(), Some(ProxyEvent::TransactionFailed { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_request_fails_the_transaction() {
    let (proxy_addr, mut events) = start_proxy().await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(b"GE@T / HTTP/1.1\r\n\r\n").await.unwrap();

    let events = collect_events(&mut events).await;
    let Some(ProxyEvent::TransactionFailed { error, .. }) = events.last() else {
        panic!("expected TransactionFailed, got {events:?}");
    };
    assert_eq!(error.kind(), ErrorKind::MalformedRequest);

    // the proxy hangs up on the client
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn request_without_host_fails_after_request_read() {
    let (proxy_addr, mut events) = start_proxy().await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

    let events = collect_events(&mut events).await;
    assert!(matches!(events[0], ProxyEvent::TransactionStarted { .. }));
    assert!(matches!(events[1], ProxyEvent::RequestRead { .. }));
    let Some(ProxyEvent::TransactionFailed { error, .. }) = events.last() else {
        panic!("expected TransactionFailed, got {events:?}");
    };
    assert_eq!(error.kind(), ErrorKind::MalformedRequest);
}

#[tokio::test(flavor = "multi_thread")]
async fn transaction_ids_increase_monotonically() {
    let origin = scripted_origin(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n").await;
    let (proxy_addr, mut events) = start_proxy().await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let request = format!("GET / HTTP/1.1\r\nHost: {origin}\r\n\r\n");
        client.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();

        let transaction = collect_events(&mut events).await;
        ids.push(transaction[0].transaction_id());
    }

    assert_eq!(ids, vec![1, 2, 3]);
}
