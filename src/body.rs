//! Response body wrapper so one service can answer with its own bodies or
//! with the inner service's body.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use http_body_util::Full;
use pin_project::pin_project;
use tokio::sync::mpsc;

#[pin_project(project = BodyProj)]
pub enum ResponseBody<B> {
    Empty,
    Full {
        #[pin]
        body: Full<Bytes>,
    },
    /// Streamed body fed chunk by chunk from a transport task; used by the
    /// multipart and htmlfile transports.
    Channel { rx: mpsc::Receiver<Bytes> },
    Inner {
        #[pin]
        body: B,
    },
}

impl<B> ResponseBody<B> {
    pub fn empty() -> Self {
        ResponseBody::Empty
    }

    pub fn full(body: impl Into<Bytes>) -> Self {
        ResponseBody::Full {
            body: Full::new(body.into()),
        }
    }

    pub fn channel(rx: mpsc::Receiver<Bytes>) -> Self {
        ResponseBody::Channel { rx }
    }

    pub fn new(body: B) -> Self {
        ResponseBody::Inner { body }
    }
}

impl<B> Default for ResponseBody<B> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<B> Body for ResponseBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            BodyProj::Empty => Poll::Ready(None),
            BodyProj::Full { body } => body
                .poll_frame(cx)
                .map(|opt| opt.map(|res| res.map_err(|never| match never {}))),
            BodyProj::Channel { rx } => rx
                .poll_recv(cx)
                .map(|opt| opt.map(|data| Ok(Frame::data(data)))),
            BodyProj::Inner { body } => body.poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            ResponseBody::Empty => true,
            ResponseBody::Full { body } => body.is_end_stream(),
            ResponseBody::Channel { .. } => false,
            ResponseBody::Inner { body } => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            ResponseBody::Empty => {
                let mut hint = SizeHint::default();
                hint.set_upper(0);
                hint
            }
            ResponseBody::Full { body } => body.size_hint(),
            ResponseBody::Channel { .. } => SizeHint::default(),
            ResponseBody::Inner { body } => body.size_hint(),
        }
    }
}
