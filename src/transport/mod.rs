//! The transport layer: one uniform socket contract implemented by six
//! concrete HTTP carrier mechanisms.
//!
//! Streaming transports keep a single connection open and push every outbound
//! batch through it; polling transports answer one outbound batch per GET and
//! receive inbound payloads through side-channel POSTs.

use std::{net::SocketAddr, str::FromStr, sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::errors::Error;

pub(crate) mod polling;
pub(crate) mod streaming;
pub(crate) mod ws;

/// Whether a transport carries outbound traffic over one long-lived
/// connection or over a fresh HTTP response per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Streaming,
    Polling,
}

/// The concrete carrier mechanism a session is momentarily bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Websocket,
    Flashsocket,
    XhrPolling,
    XhrMultipart,
    Htmlfile,
    JsonpPolling,
}

impl Transport {
    pub fn name(&self) -> &'static str {
        match self {
            Transport::Websocket => "websocket",
            Transport::Flashsocket => "flashsocket",
            Transport::XhrPolling => "xhr-polling",
            Transport::XhrMultipart => "xhr-multipart",
            Transport::Htmlfile => "htmlfile",
            Transport::JsonpPolling => "jsonp-polling",
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Transport::Websocket
            | Transport::Flashsocket
            | Transport::XhrMultipart
            | Transport::Htmlfile => Kind::Streaming,
            Transport::XhrPolling | Transport::JsonpPolling => Kind::Polling,
        }
    }

    /// True when inbound POST payloads arrive form-encoded in a `d` field
    /// rather than as the raw request body.
    pub fn post_encoded(&self) -> bool {
        matches!(self, Transport::JsonpPolling)
    }

    /// True for the transports that speak the websocket wire protocol.
    pub(crate) fn is_websocket(&self) -> bool {
        matches!(self, Transport::Websocket | Transport::Flashsocket)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("transport unknown")]
pub struct UnknownTransport;

impl FromStr for Transport {
    type Err = UnknownTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "websocket" => Ok(Transport::Websocket),
            "flashsocket" => Ok(Transport::Flashsocket),
            "xhr-polling" => Ok(Transport::XhrPolling),
            "xhr-multipart" => Ok(Transport::XhrMultipart),
            "htmlfile" => Ok(Transport::Htmlfile),
            "jsonp-polling" => Ok(Transport::JsonpPolling),
            _ => Err(UnknownTransport),
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle to the wire side of one transport attachment.
///
/// The session's flusher writes encoded batches into it; the transport task
/// on the other end turns each batch into whatever the wire wants (a
/// websocket frame, a multipart part, one polling response). Close is
/// idempotent and observable from both sides.
#[derive(Debug, Clone)]
pub(crate) struct Socket {
    transport: Transport,
    tx: mpsc::Sender<Bytes>,
    closed: Arc<watch::Sender<bool>>,
    remote_addr: Option<SocketAddr>,
}

impl Socket {
    pub(crate) fn new(
        transport: Transport,
        capacity: usize,
        remote_addr: Option<SocketAddr>,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (closed, _) = watch::channel(false);
        (
            Socket {
                transport,
                tx,
                closed: Arc::new(closed),
                remote_addr,
            },
            rx,
        )
    }

    pub(crate) fn transport(&self) -> Transport {
        self.transport
    }

    pub(crate) fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Write one outbound batch, bounded by the configured write timeout.
    pub(crate) async fn write(&self, data: Bytes, timeout: Duration) -> Result<(), Error> {
        if *self.closed.borrow() {
            return Err(Error::NotConnected);
        }
        match tokio::time::timeout(timeout, self.tx.send(data)).await {
            Err(_) => Err(Error::WriteTimeout),
            Ok(Err(_)) => Err(Error::NotConnected),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Idempotent close: the first call succeeds, later calls report the
    /// socket as no longer connected.
    pub(crate) fn close(&self) -> Result<(), Error> {
        if self.closed.send_replace(true) {
            Err(Error::NotConnected)
        } else {
            Ok(())
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the socket has been closed by either side.
    pub(crate) async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        if *rx.borrow() {
            return;
        }
        rx.changed().await.ok();
    }
}
