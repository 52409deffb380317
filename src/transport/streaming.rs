//! The streamed-response transports: xhr-multipart pushes each batch as a
//! part of a `multipart/x-mixed-replace` response, htmlfile pushes script
//! chunks into a forever-loading document. Inbound bytes can stream in on
//! the same connection's request body; the POST side channel is accepted
//! too.

use std::sync::Arc;

use bytes::{Buf, Bytes};
use http::{
    header::{CONNECTION, CONTENT_TYPE},
    Response, StatusCode,
};
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    body::ResponseBody,
    errors::Error,
    session::Session,
    transport::{Socket, Transport},
};

const BOUNDARY: &str = "socketio";

/// Everything before the first message of an htmlfile response. The shim
/// forwards each chunk to the parent document; the padding defeats browser
/// buffering.
fn htmlfile_preamble() -> Bytes {
    let mut s = String::from(
        "<html><body><script>var _ = function (msg) { parent.s._(msg, document); };</script>",
    );
    while s.len() < 256 {
        s.push(' ');
    }
    Bytes::from(s)
}

/// Answer a streaming GET: attach and keep the response body open, writing
/// one part per outbound batch until the socket closes.
pub(crate) async fn attach_req<ReqBody, B>(
    transport: Transport,
    session: Arc<Session>,
    body: ReqBody,
) -> Result<Response<ResponseBody<B>>, Error>
where
    ReqBody: http_body::Body + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: std::fmt::Debug + Send,
{
    let (socket, mut out_rx) = Socket::new(transport, 8, None);
    let generation = session.attach(transport, socket.clone()).await?;
    debug!("[sid={session}] {transport} stream opened");

    // bytes the client sends on the same connection feed the session; the
    // reader simply stops at end of body, which for most clients is
    // immediate, leaving the connection to the outbound stream
    let inbound = session.inbound_sender();
    let reader_socket = socket.clone();
    let reader_session = session.clone();
    tokio::spawn(async move {
        let mut body = Box::pin(body);
        loop {
            let frame = tokio::select! {
                _ = reader_socket.closed() => break,
                frame = body.frame() => frame,
            };
            match frame {
                Some(Ok(frame)) => {
                    if let Ok(mut data) = frame.into_data() {
                        if data.remaining() == 0 {
                            continue;
                        }
                        let data = data.copy_to_bytes(data.remaining());
                        debug!("[sid={reader_session}] {transport}: received: {:?}", data);
                        if inbound.send(data).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Err(_e)) => {
                    debug!("[sid={reader_session}] {transport}: request read error: {_e:?}");
                    reader_socket.close().ok();
                    break;
                }
                None => break,
            }
        }
    });

    let (body_tx, body_rx) = mpsc::channel::<Bytes>(8);
    let preamble = match transport {
        Transport::XhrMultipart => Bytes::from_static(b"--socketio\r\n"),
        _ => htmlfile_preamble(),
    };

    tokio::spawn(async move {
        if body_tx.send(preamble).await.is_err() {
            socket.close().ok();
            session.detach(generation).await;
            return;
        }
        loop {
            tokio::select! {
                _ = socket.closed() => break,
                batch = out_rx.recv() => match batch {
                    None => break,
                    Some(batch) => {
                        let part = wrap_part(transport, &batch);
                        debug!("[sid={session}] {transport}: sending part");
                        if body_tx.send(part).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        socket.close().ok();
        session.detach(generation).await;
        debug!("[sid={session}] {transport} stream closed");
    });

    let builder = match transport {
        Transport::XhrMultipart => Response::builder()
            .status(StatusCode::OK)
            .header(
                CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary=\"{BOUNDARY}\""),
            )
            .header(CONNECTION, "keep-alive"),
        _ => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/html"),
    };
    Ok(builder.body(ResponseBody::channel(body_rx))?)
}

fn wrap_part(transport: Transport, data: &[u8]) -> Bytes {
    let data = String::from_utf8_lossy(data);
    match transport {
        Transport::XhrMultipart => {
            Bytes::from(format!("Content-Type: text/plain\r\n\r\n{data}\n--{BOUNDARY}\n"))
        }
        _ => {
            let payload = serde_json::to_string(&data).unwrap_or_default();
            Bytes::from(format!("<script>_({payload});</script>"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_is_padded() {
        let preamble = htmlfile_preamble();
        assert!(preamble.len() >= 244);
        let text = std::str::from_utf8(&preamble).unwrap();
        assert!(text.contains("parent.s._(msg, document);"));
    }

    #[test]
    fn multipart_part_layout() {
        let part = wrap_part(Transport::XhrMultipart, b"hello");
        assert_eq!(
            part,
            Bytes::from_static(b"Content-Type: text/plain\r\n\r\nhello\n--socketio\n")
        );
    }

    #[test]
    fn htmlfile_part_is_script_chunk() {
        let part = wrap_part(Transport::Htmlfile, "he\"llo".as_bytes());
        assert_eq!(part, Bytes::from_static(b"<script>_(\"he\\\"llo\");</script>"));
    }
}
