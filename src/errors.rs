use http::{Response, StatusCode};
use tokio_tungstenite::tungstenite;
use tracing::debug;

use crate::{
    body::ResponseBody,
    payload::{DecodeError, EncodeError},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session is shutting down or destroyed.
    #[error("session is closed")]
    Closed,
    /// The outbound queue is at capacity.
    #[error("outbound queue is full")]
    QueueFull,
    /// Operation on a socket that is no longer connected.
    #[error("socket is not connected")]
    NotConnected,
    /// A streaming transport is already attached and healthy.
    #[error("socket is already connected")]
    AlreadyConnected,
    /// The decoder rejected inbound bytes. The socket is closed, the session
    /// survives.
    #[error("malformed payload: {0}")]
    Malformed(#[from] DecodeError),
    #[error("{0}")]
    Encode(#[from] EncodeError),
    /// An outbound batch was dropped because it could not be encoded.
    #[error("batch dropped: encode failure")]
    BatchDropped,
    #[error("error serializing json value: {0}")]
    Json(#[from] serde_json::Error),
    /// The websocket upgrade failed.
    #[error("websocket handshake error")]
    Handshake,
    /// A form-encoded POST without its payload field.
    #[error("missing post data")]
    MissingPostData,
    #[error("message is not an event")]
    NotAnEvent,
    #[error("write timed out")]
    WriteTimeout,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] http::Error),
    #[error("ws transport error: {0}")]
    Ws(#[from] tungstenite::Error),
    /// Answer the HTTP client with this status and no body.
    #[error("http error response: {0:?}")]
    HttpErrorResponse(StatusCode),
}

/// Convert an error into an http response.
/// Known conditions map to their status; everything else is a 500.
impl<B> From<Error> for Response<ResponseBody<B>> {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::HttpErrorResponse(code) => code,
            Error::Handshake | Error::MissingPostData | Error::Malformed(_) => {
                StatusCode::BAD_REQUEST
            }
            e => {
                debug!("uncaught error: {e:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Response::builder()
            .status(status)
            .body(ResponseBody::empty())
            .unwrap()
    }
}
