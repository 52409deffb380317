//! The server: owns the session table, verifies origins, creates and
//! destroys sessions, and broadcasts to them.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use http::request::Parts;
use serde::Serialize;
use tracing::debug;

use crate::{
    config::Config,
    errors::Error,
    handler::Handler,
    message::Payload,
    payload::{Encoder, Framing},
    session::Session,
    sid::Sid,
};

/// Application-supplied request authorization predicate.
pub type Authorizer = Box<dyn Fn(&Parts) -> bool + Send + Sync>;

type SessionMap = RwLock<HashMap<Sid, Arc<Session>>>;

pub struct Server<H: Handler> {
    config: Arc<Config>,
    sessions: SessionMap,
    handler: H,
    authorizer: Option<Authorizer>,
    transport_names: String,
}

impl<H: Handler> Server<H> {
    pub fn new(handler: H, config: Config) -> Self {
        let transport_names = config.transport_names();
        debug!("registered transports: {transport_names}");
        Self {
            config: Arc::new(config),
            sessions: RwLock::new(HashMap::new()),
            handler,
            authorizer: None,
            transport_names,
        }
    }

    /// Install a request authorization predicate, consulted before any other
    /// request handling.
    pub fn set_authorizer(&mut self, authorizer: Authorizer) {
        self.authorizer = Some(authorizer);
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Look up a live session by its id.
    pub fn session(&self, sid: Sid) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(&sid).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Schedule a payload to every session.
    pub fn broadcast(&self, payload: impl Into<Payload>) {
        self.broadcast_except(None, payload)
    }

    /// Schedule a payload to every session but `except`.
    pub fn broadcast_except(&self, except: Option<Sid>, payload: impl Into<Payload>) {
        let payload = payload.into();
        let sessions = self.sessions.read().unwrap();
        for (sid, session) in sessions.iter() {
            if Some(*sid) != except {
                session.send(payload.clone()).ok();
            }
        }
    }

    /// Emit an event to every session.
    pub fn emit(&self, name: &str, args: impl Serialize) -> Result<(), Error> {
        self.emit_except(None, name, args)
    }

    /// Emit an event to every session but `except`.
    pub fn emit_except(
        &self,
        except: Option<Sid>,
        name: &str,
        args: impl Serialize,
    ) -> Result<(), Error> {
        let args = crate::message::args_vec(serde_json::to_value(args)?);
        self.broadcast_except(
            except,
            Payload::Event {
                name: name.to_string(),
                args,
            },
        );
        Ok(())
    }

    pub(crate) fn authorized(&self, parts: &Parts) -> bool {
        match &self.authorizer {
            Some(authorizer) => authorizer(parts),
            None => true,
        }
    }

    /// Create a session, insert it into the table and spawn the
    /// application's callback as its task.
    pub(crate) fn create_session(self: Arc<Self>) -> Result<Arc<Session>, Error> {
        let server = self.clone();
        let close_fn = Box::new(move |sid: Sid| {
            let session = server.sessions.write().unwrap().remove(&sid);
            if let Some(session) = session {
                server.handler.on_disconnect(session);
                debug!(
                    "remaining sessions: {}",
                    server.sessions.read().unwrap().len()
                );
            }
        });
        let session = Session::create(self.config.clone(), close_fn)?;
        {
            let mut sessions = self.sessions.write().unwrap();
            if sessions.contains_key(&session.sid()) {
                // a 16-char collision means the entropy source is broken
                return Err(Error::HttpErrorResponse(
                    http::StatusCode::INTERNAL_SERVER_ERROR,
                ));
            }
            sessions.insert(session.sid(), session.clone());
        }

        let server = self.clone();
        let task_session = session.clone();
        tokio::spawn(async move {
            server.handler.on_connect(task_session.clone()).await;
            task_session.close().await.ok();
            debug!("client {task_session} callback finished");
        });
        Ok(session)
    }

    /// The handshake payload: framing-dependent, written once per session.
    pub(crate) fn handshake_body(&self, sid: Sid) -> Vec<u8> {
        match self.config.framing {
            Framing::Tagged => format!(
                "{sid}:{}:{}:{}",
                self.config.heartbeat_timeout.as_secs(),
                self.config.close_timeout.as_secs(),
                self.transport_names
            )
            .into_bytes(),
            Framing::Delimited => {
                let mut buf = Vec::new();
                Encoder::new(Framing::Delimited)
                    .encode(&Payload::Handshake(sid.to_string()), &mut buf)
                    .ok();
                buf
            }
        }
    }

    /// Check an `Origin` header value against the configured allow-list.
    /// `host` and `port` components match individually, `*` matches
    /// anything; an absent port falls back to the scheme default.
    pub(crate) fn verify_origin(&self, origin: &str) -> bool {
        let Some(allowed) = &self.config.origins else {
            return true;
        };
        let (scheme, rest) = match origin.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => ("", origin),
        };
        let host_port = rest.split('/').next().unwrap_or("");
        if host_port.is_empty() {
            return false;
        }
        let (host, port) = match host_port.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        };

        for entry in allowed {
            let (allowed_host, allowed_port) = match entry.split_once(':') {
                Some((h, p)) => (h, Some(p)),
                None => (entry.as_str(), None),
            };
            if allowed_host != "*" && allowed_host != host {
                continue;
            }
            match allowed_port {
                None | Some("*") => return true,
                Some(allowed_port) => match port {
                    Some(port) => {
                        if port == allowed_port {
                            return true;
                        }
                    }
                    None => {
                        let default = match scheme {
                            "http" | "ws" => "80",
                            "https" | "wss" => "443",
                            _ => "",
                        };
                        if allowed_port == default {
                            return true;
                        }
                    }
                },
            }
        }
        false
    }
}

impl<H: Handler> std::fmt::Debug for Server<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("sessions", &self.session_count())
            .finish()
    }
}
