//! A server implementation of the Socket.IO realtime messaging protocol
//! (0.6/0.7 generation): a bidirectional, session-oriented message channel
//! layered over interchangeable HTTP transports (websocket, xhr-polling,
//! xhr-multipart, htmlfile, jsonp-polling, flashsocket).
//!
//! A client opens a logical [`Session`], negotiates a [`Transport`] and
//! exchanges framed messages. Losing the transport does not end the session:
//! outbound payloads buffer while disconnected and the client may re-attach
//! against the same session id until the reconnect deadline passes.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sockio::{async_trait, Handler, Session, SocketIoService};
//!
//! #[derive(Clone)]
//! struct Echo;
//!
//! #[async_trait]
//! impl Handler for Echo {
//!     async fn on_connect(&self, session: Arc<Session>) {
//!         while let Ok(Some(msg)) = session.recv().await {
//!             session.send(msg.data()).ok();
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let svc = SocketIoService::new(Echo);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     loop {
//!         let (stream, _) = listener.accept().await.unwrap();
//!         let io = hyper_util::rt::TokioIo::new(stream);
//!         let svc = svc.clone();
//!         tokio::spawn(async move {
//!             hyper::server::conn::http1::Builder::new()
//!                 .serve_connection(io, svc)
//!                 .with_upgrades()
//!                 .await
//!                 .ok();
//!         });
//!     }
//! }
//! ```

pub use async_trait::async_trait;

pub mod config;
pub mod errors;
pub mod handler;
pub mod layer;
pub mod message;
pub mod payload;
pub mod server;
pub mod service;
pub mod session;
pub mod sid;
pub mod transport;

mod body;
mod futures;

pub use config::Config;
pub use errors::Error;
pub use handler::{FnHandler, Handler};
pub use message::{Message, MessageType, Payload};
pub use payload::{Decoder, Encoder, Framing};
pub use server::Server;
pub use service::SocketIoService;
pub use session::Session;
pub use sid::Sid;
pub use transport::{Kind, Transport};
