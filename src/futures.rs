use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::ready;
use http::{
    header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, SEC_WEBSOCKET_ACCEPT, UPGRADE},
    HeaderValue, Response, StatusCode,
};
use pin_project::pin_project;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::body::ResponseBody;

pub(crate) type BoxResponseFuture<B> =
    Pin<Box<dyn Future<Output = Response<ResponseBody<B>>> + Send>>;

/// Create a plain text response.
pub(crate) fn http_response<B, D>(
    code: StatusCode,
    data: D,
) -> Result<Response<ResponseBody<B>>, http::Error>
where
    D: Into<Bytes>,
{
    let body: Bytes = data.into();
    Response::builder()
        .status(code)
        .header(CONTENT_LENGTH, body.len())
        .header(CONTENT_TYPE, "text/plain; charset=UTF-8")
        .body(ResponseBody::full(body))
}

/// Create a response for a websocket upgrade.
pub(crate) fn ws_response<B>(ws_key: &HeaderValue) -> Result<Response<ResponseBody<B>>, http::Error> {
    let derived = derive_accept_key(ws_key.as_bytes());
    let sec = derived.parse::<HeaderValue>().unwrap();
    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(UPGRADE, HeaderValue::from_static("websocket"))
        .header(CONNECTION, HeaderValue::from_static("Upgrade"))
        .header(SEC_WEBSOCKET_ACCEPT, sec)
        .body(ResponseBody::empty())
}

#[pin_project]
pub struct ResponseFuture<F, B> {
    #[pin]
    inner: ResponseFutureInner<F, B>,
}

impl<F, B> ResponseFuture<F, B> {
    pub(crate) fn boxed(future: BoxResponseFuture<B>) -> Self {
        Self {
            inner: ResponseFutureInner::Boxed { future },
        }
    }

    pub(crate) fn inner(future: F) -> Self {
        Self {
            inner: ResponseFutureInner::Inner { future },
        }
    }
}

#[pin_project(project = ResFutProj)]
enum ResponseFutureInner<F, B> {
    Boxed {
        future: BoxResponseFuture<B>,
    },
    Inner {
        #[pin]
        future: F,
    },
}

impl<ResBody, F, E> Future for ResponseFuture<F, ResBody>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = Result<Response<ResponseBody<ResBody>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let res = match self.project().inner.project() {
            ResFutProj::Inner { future } => ready!(future.poll(cx))?.map(ResponseBody::new),
            ResFutProj::Boxed { future } => ready!(future.as_mut().poll(cx)),
        };
        Poll::Ready(Ok(res))
    }
}
