//! Polling transports: handshake, batch delivery across reconnects, POST
//! side channel, jsonp wrapping, poll timeout behavior.

use std::time::Duration;

use http::Method;
use sockio::{Config, Framing, MessageType, SocketIoService};

use fixture::{create_server, http_get, send_req, EchoHandler};

#[tokio::test]
async fn legacy_polling_handshake_and_reconnect() {
    let (handler, mut connect_rx, mut message_rx, _disconnect_rx) = EchoHandler::new(false);
    let config = Config::builder()
        .framing(Framing::Delimited)
        .polling_timeout(Duration::from_millis(300))
        .write_timeout(Duration::from_millis(200))
        .build();
    let port = create_server(SocketIoService::with_config(handler, config)).await;

    // the handshake is the framed sid
    let (status, body) = http_get(port, "/socket.io/1/").await;
    assert_eq!(status, 200);
    let sid = body.strip_prefix("~m~16~m~").expect("framed handshake").to_string();
    assert_eq!(sid.len(), 16);

    let session = connect_rx.recv().await.unwrap();
    session.send("hello").unwrap();

    // the queued payload is delivered on the next poll
    let (status, body) = http_get(port, &format!("/socket.io/1/xhr-polling/{sid}")).await;
    assert_eq!(status, 200);
    assert_eq!(body, "~m~5~m~hello");

    // inbound messages arrive on a form-encoded POST
    let (status, _, body) = send_req(
        port,
        Method::POST,
        &format!("/socket.io/1/xhr-polling/{sid}"),
        Some("d=~m~5~m~world".to_string()),
        &[("Content-Type", "application/x-www-form-urlencoded")],
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body, "ok");

    let msg = tokio::time::timeout(Duration::from_secs(2), message_rx.recv())
        .await
        .expect("timed out waiting for posted message")
        .unwrap();
    assert_eq!(msg.typ(), MessageType::Text);
    assert_eq!(msg.data(), "world");

    // an idle poll is bounded by the polling timeout; the keep-alive noop
    // has no wire form under this framing
    let started = std::time::Instant::now();
    let (status, body) = http_get(port, &format!("/socket.io/1/xhr-polling/{sid}")).await;
    assert_eq!(status, 200);
    assert_eq!(body, "");
    assert!(started.elapsed() >= Duration::from_millis(250));
}

#[tokio::test]
async fn tagged_polling_post_and_poll() {
    let (handler, mut connect_rx, mut message_rx, _disconnect_rx) = EchoHandler::new(false);
    let config = Config::builder()
        .polling_timeout(Duration::from_millis(300))
        .build();
    let port = create_server(SocketIoService::with_config(handler, config)).await;

    let (_, body) = http_get(port, "/socket.io/1/").await;
    let sid = body.split(':').next().unwrap().to_string();
    let session = connect_rx.recv().await.unwrap();

    // first poll carries the framed connect message
    let (status, body) = http_get(port, &format!("/socket.io/1/xhr-polling/{sid}")).await;
    assert_eq!(status, 200);
    assert_eq!(body, "\u{fffd}3\u{fffd}1::");

    // raw POST body under the tagged framing
    let (status, _, body) = send_req(
        port,
        Method::POST,
        &format!("/socket.io/1/xhr-polling/{sid}"),
        Some("3:::world".to_string()),
        &[],
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body, "1");

    let msg = tokio::time::timeout(Duration::from_secs(2), message_rx.recv())
        .await
        .expect("timed out waiting for posted message")
        .unwrap();
    assert_eq!(msg.data(), "world");

    // an idle poll answers with a keep-alive noop frame
    let (status, body) = http_get(port, &format!("/socket.io/1/xhr-polling/{sid}")).await;
    assert_eq!(status, 200);
    assert_eq!(body, "\u{fffd}3\u{fffd}8::");

    session.send("queued").unwrap();
    let (_, body) = http_get(port, &format!("/socket.io/1/xhr-polling/{sid}")).await;
    assert_eq!(body, "\u{fffd}10\u{fffd}3:::queued");
}

#[tokio::test]
async fn jsonp_polling_wraps_the_batch() {
    let (handler, mut connect_rx, _message_rx, _disconnect_rx) = EchoHandler::new(false);
    let config = Config::builder()
        .polling_timeout(Duration::from_millis(300))
        .build();
    let port = create_server(SocketIoService::with_config(handler, config)).await;

    let (_, body) = http_get(port, "/socket.io/1/").await;
    let sid = body.split(':').next().unwrap().to_string();
    let _session = connect_rx.recv().await.unwrap();

    let (status, headers, body) = send_req(
        port,
        Method::GET,
        &format!("/socket.io/1/jsonp-polling/{sid}?i=2"),
        None,
        &[],
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(
        headers.get("content-type").unwrap(),
        "text/javascript; charset=UTF-8"
    );
    assert_eq!(headers.get("x-xss-protection").unwrap(), "0");
    // the batch is the framed connect message, wrapped for the callback
    assert_eq!(body, "io.j[2](\"\u{fffd}3\u{fffd}1::\");");
}

#[tokio::test]
async fn post_without_payload_field_is_rejected() {
    let (handler, mut connect_rx, _message_rx, _disconnect_rx) = EchoHandler::new(false);
    let port = create_server(SocketIoService::with_config(handler, Config::default())).await;

    let (_, body) = http_get(port, "/socket.io/1/").await;
    let sid = body.split(':').next().unwrap().to_string();
    let _session = connect_rx.recv().await.unwrap();

    let (status, _, _) = send_req(
        port,
        Method::POST,
        &format!("/socket.io/1/jsonp-polling/{sid}"),
        Some("x=1".to_string()),
        &[("Content-Type", "application/x-www-form-urlencoded")],
    )
    .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn post_to_unknown_session_fails() {
    let (handler, _connect_rx, _message_rx, _disconnect_rx) = EchoHandler::new(false);
    let port = create_server(SocketIoService::with_config(handler, Config::default())).await;

    let (status, _, _) = send_req(
        port,
        Method::POST,
        "/socket.io/1/xhr-polling/0123456789abcdef",
        Some("3:::hi".to_string()),
        &[],
    )
    .await;
    assert_eq!(status, 500);
}
