//! The polling transports: each GET answers with one outbound batch (or a
//! keep-alive noop after the polling timeout), inbound payloads arrive on
//! side-channel POSTs. jsonp-polling differs only in the javascript wrapping
//! of the response and the form-encoded POST body.

use std::sync::Arc;

use bytes::Bytes;
use http::{header::CONTENT_LENGTH, header::CONTENT_TYPE, Response, StatusCode};
use tracing::debug;

use crate::{
    body::ResponseBody,
    config::Config,
    errors::Error,
    futures::http_response,
    message::Payload,
    payload::Framing,
    session::Session,
    transport::{Socket, Transport},
};

/// Answer a polling GET: attach, wait for one outbound batch, respond.
pub(crate) async fn attach_req<B>(
    config: Arc<Config>,
    transport: Transport,
    session: Arc<Session>,
    jsonp_index: Option<u32>,
) -> Result<Response<ResponseBody<B>>, Error> {
    let (socket, mut out_rx) = Socket::new(transport, 1, None);
    let generation = session.attach(transport, socket.clone()).await?;
    debug!("[sid={session}] polling request");

    let batch = tokio::select! {
        _ = socket.closed() => None,
        batch = out_rx.recv() => batch,
        _ = tokio::time::sleep(config.polling_timeout) => {
            // bound the poll: answer with a keep-alive noop
            debug!("[sid={session}] polling timeout, sending noop");
            session.send(Payload::Noop).ok();
            tokio::time::timeout(config.write_timeout, out_rx.recv())
                .await
                .ok()
                .flatten()
        }
    };
    socket.close().ok();
    session.detach(generation).await;

    let data = batch.unwrap_or_default();
    debug!("[sid={session}] sending data: {:?}", data);
    match transport {
        Transport::JsonpPolling => {
            let index = jsonp_index.unwrap_or(0);
            let payload = serde_json::to_string(&String::from_utf8_lossy(&data))?;
            let body = format!("io.j[{index}]({payload});");
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "text/javascript; charset=UTF-8")
                .header("X-XSS-Protection", "0")
                .header(CONTENT_LENGTH, body.len())
                .body(ResponseBody::full(body))?)
        }
        _ => Ok(http_response(StatusCode::OK, data)?),
    }
}

/// Feed the payload of an inbound POST to the session.
pub(crate) async fn post_req<B>(
    config: Arc<Config>,
    transport: Transport,
    session: Arc<Session>,
    body: Bytes,
    form_encoded: bool,
) -> Result<Response<ResponseBody<B>>, Error> {
    let payload = if transport.post_encoded() || form_encoded {
        form_urlencoded::parse(&body)
            .find(|(key, _)| key == "d")
            .map(|(_, value)| Bytes::from(value.into_owned().into_bytes()))
            .ok_or(Error::MissingPostData)?
    } else {
        body
    };
    debug!("[sid={session}] handle: received: {:?}", payload);
    session.post(payload).await?;

    let ack = match config.framing {
        Framing::Tagged => "1",
        Framing::Delimited => "ok",
    };
    Ok(http_response(StatusCode::OK, ack)?)
}
