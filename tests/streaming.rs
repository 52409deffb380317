//! The streamed-response transports: multipart part framing and the
//! htmlfile document, read incrementally from a live response body.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Either, Empty, Full};
use hyper_util::{
    client::legacy::Client,
    rt::TokioExecutor,
};
use sockio::{Config, MessageType, SocketIoService};

use fixture::{create_server, http_get, EchoHandler};

type StreamBody = Either<Full<Bytes>, Empty<Bytes>>;

async fn open_stream(
    port: u16,
    path: &str,
    body: Option<&str>,
) -> (StatusCode, http::HeaderMap, hyper::body::Incoming) {
    let body = match body {
        Some(body) => Either::Left(Full::new(Bytes::from(body.to_string()))),
        None => Either::Right(Empty::new()),
    };
    let req = Request::builder()
        .method(Method::GET)
        .uri(format!("http://127.0.0.1:{port}{path}"))
        .body(body)
        .unwrap();
    let client: Client<_, StreamBody> = Client::builder(TokioExecutor::new()).build_http();
    let res = client.request(req).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    (status, headers, res.into_body())
}

async fn next_chunk(body: &mut hyper::body::Incoming) -> String {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
            .await
            .expect("timed out waiting for a body chunk")
            .expect("stream ended")
            .expect("stream errored");
        if let Ok(data) = frame.into_data() {
            return String::from_utf8_lossy(&data).into_owned();
        }
    }
}

#[tokio::test]
async fn multipart_stream_parts() {
    let (handler, mut connect_rx, _message_rx, _disconnect_rx) = EchoHandler::new(false);
    let port = create_server(SocketIoService::with_config(handler, Config::default())).await;

    let (_, body) = http_get(port, "/socket.io/1/").await;
    let sid = body.split(':').next().unwrap().to_string();
    let session = connect_rx.recv().await.unwrap();

    // queue before attaching so the first part carries both frames
    session.send("hello").unwrap();

    let (status, headers, mut stream) =
        open_stream(port, &format!("/socket.io/1/xhr-multipart/{sid}"), None).await;
    assert_eq!(status, 200);
    assert_eq!(
        headers.get("content-type").unwrap(),
        "multipart/x-mixed-replace; boundary=\"socketio\""
    );

    assert_eq!(next_chunk(&mut stream).await, "--socketio\r\n");
    let part = next_chunk(&mut stream).await;
    assert!(part.starts_with("Content-Type: text/plain\r\n\r\n"));
    assert!(part.contains("\u{fffd}9\u{fffd}3:::hello"));
    assert!(part.contains("\u{fffd}3\u{fffd}1::"));
    assert!(part.ends_with("\n--socketio\n"));

    // parts keep flowing on the same response
    session.send("again").unwrap();
    let part = next_chunk(&mut stream).await;
    assert!(part.contains("\u{fffd}9\u{fffd}3:::again"));
}

#[tokio::test]
async fn htmlfile_stream_preamble_and_chunks() {
    let (handler, mut connect_rx, _message_rx, _disconnect_rx) = EchoHandler::new(false);
    let port = create_server(SocketIoService::with_config(handler, Config::default())).await;

    let (_, body) = http_get(port, "/socket.io/1/").await;
    let sid = body.split(':').next().unwrap().to_string();
    let session = connect_rx.recv().await.unwrap();
    session.send("hi").unwrap();

    let (status, headers, mut stream) =
        open_stream(port, &format!("/socket.io/1/htmlfile/{sid}"), None).await;
    assert_eq!(status, 200);
    assert_eq!(headers.get("content-type").unwrap(), "text/html");

    let preamble = next_chunk(&mut stream).await;
    assert!(preamble.len() >= 244);
    assert!(preamble.contains("parent.s._(msg, document);"));

    let chunk = next_chunk(&mut stream).await;
    assert!(chunk.starts_with("<script>_(\""));
    assert!(chunk.contains("3:::hi"));
    assert!(chunk.ends_with("\");</script>"));
}

#[tokio::test]
async fn streaming_request_body_feeds_the_session() {
    let (handler, mut connect_rx, mut message_rx, _disconnect_rx) = EchoHandler::new(false);
    let port = create_server(SocketIoService::with_config(handler, Config::default())).await;

    let (_, body) = http_get(port, "/socket.io/1/").await;
    let sid = body.split(':').next().unwrap().to_string();
    let _session = connect_rx.recv().await.unwrap();

    // a payload carried on the attach request itself, no POST involved
    let (status, _, mut stream) = open_stream(
        port,
        &format!("/socket.io/1/xhr-multipart/{sid}"),
        Some("3:::direct"),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(next_chunk(&mut stream).await, "--socketio\r\n");

    let msg = tokio::time::timeout(Duration::from_secs(2), message_rx.recv())
        .await
        .expect("timed out waiting for the same-socket message")
        .unwrap();
    assert_eq!(msg.typ(), MessageType::Text);
    assert_eq!(msg.data(), "direct");
}
