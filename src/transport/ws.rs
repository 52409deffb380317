//! The websocket transport (and its flashsocket twin, identical on the wire):
//! upgrades the GET, then pumps outbound batches into text frames and inbound
//! frames into the session's decoder over one long-lived connection.

use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    tungstenite::{protocol::Role, Message as WsMessage},
    WebSocketStream,
};
use tracing::debug;

use crate::{
    body::ResponseBody,
    config::Config,
    errors::Error,
    futures::ws_response,
    message::Payload,
    session::Session,
    transport::{Socket, Transport},
};

/// Answer a websocket attach request: respond 101 and hand the upgraded
/// connection to a transport task.
pub(crate) fn attach_req<ReqBody, B>(
    config: Arc<Config>,
    transport: Transport,
    session: Arc<Session>,
    req: Request<ReqBody>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    ReqBody: Send + 'static,
{
    if session.is_online()
        && session
            .transport()
            .map(|t| t.is_websocket())
            .unwrap_or(false)
    {
        return Err(Error::AlreadyConnected);
    }
    let ws_key = req
        .headers()
        .get("Sec-WebSocket-Key")
        .ok_or(Error::Handshake)?
        .clone();

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let io = TokioIo::new(upgraded);
                let ws = WebSocketStream::from_raw_socket(io, Role::Server, None).await;
                match run(config, transport, session, ws).await {
                    Ok(()) => debug!("ws closed"),
                    Err(e) => debug!("ws closed with error: {e:?}"),
                }
            }
            Err(e) => debug!("ws upgrade error: {e}"),
        }
    });

    ws_response(&ws_key).map_err(Error::Http)
}

async fn run<S>(
    config: Arc<Config>,
    transport: Transport,
    session: Arc<Session>,
    ws: WebSocketStream<S>,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (socket, mut out_rx) = Socket::new(transport, 1, None);
    let generation = session.attach(transport, socket.clone()).await?;
    let inbound = session.inbound_sender();
    let (mut sink, mut stream) = ws.split();

    // outbound pump: one text frame per flushed batch. Pending batches are
    // drained before a close is honored so a final keep-alive still goes out.
    let writer = socket.clone();
    let writer_session = session.clone();
    let tx_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                batch = out_rx.recv() => match batch {
                    None => break,
                    Some(batch) => {
                        let text = String::from_utf8_lossy(&batch).into_owned();
                        debug!("[sid={writer_session}] ws: sending batch");
                        if sink.send(WsMessage::Text(text)).await.is_err() {
                            writer.close().ok();
                            break;
                        }
                    }
                },
                _ = writer.closed() => break,
            }
        }
    });

    // a client that answers heartbeats never goes quiet for this long; with
    // heartbeats disabled the polling budget bounds the wait instead
    let quiet = if config.heartbeat_interval.is_zero() {
        config.polling_timeout
    } else {
        config.heartbeat_interval + config.heartbeat_timeout
    };

    loop {
        if socket.is_closed() {
            break;
        }
        let next = tokio::select! {
            _ = socket.closed() => break,
            next = read_frame(&mut stream, quiet) => next,
        };
        match next {
            ReadOutcome::Quiet => {
                // flush a keep-alive noop before giving up the reader
                tokio::time::timeout(config.write_timeout, session.send_wait(Payload::Noop))
                    .await
                    .ok();
                debug!("[sid={session}] ws: lost connection (read timeout, noop sent)");
                break;
            }
            ReadOutcome::Eof => break,
            ReadOutcome::Frame(data) => {
                if inbound.send(data).await.is_err() {
                    break;
                }
            }
            ReadOutcome::Ignored => {}
        }
    }

    socket.close().ok();
    // the pump drains any pending batch and exits once it observes the close
    tokio::time::timeout(config.write_timeout, tx_task).await.ok();
    session.detach(generation).await;
    Ok(())
}

enum ReadOutcome {
    Frame(Bytes),
    Ignored,
    Quiet,
    Eof,
}

async fn read_frame<S>(
    stream: &mut futures::stream::SplitStream<WebSocketStream<S>>,
    quiet: std::time::Duration,
) -> ReadOutcome
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let next = match tokio::time::timeout(quiet, stream.next()).await {
        Err(_) => return ReadOutcome::Quiet,
        Ok(next) => next,
    };
    match next {
        None => ReadOutcome::Eof,
        Some(Err(_)) => ReadOutcome::Eof,
        Some(Ok(WsMessage::Text(text))) => ReadOutcome::Frame(Bytes::from(text.into_bytes())),
        Some(Ok(WsMessage::Binary(data))) => ReadOutcome::Frame(Bytes::from(data)),
        Some(Ok(WsMessage::Close(_))) => ReadOutcome::Eof,
        Some(Ok(_)) => ReadOutcome::Ignored,
    }
}
