//! A session is a logical, resumable message channel identified by a [`Sid`].
//! It survives transport detachment: outbound payloads buffer while no
//! transport is attached and are delivered, in order and without re-encoding,
//! once one reconnects. The session destroys itself when the reconnect
//! deadline passes, when a heartbeat goes unanswered, or when either side
//! sends a disconnect.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Instant,
};

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tracing::{debug, warn};

use crate::{
    config::Config,
    errors::Error,
    message::{Message, MessageType, Payload},
    payload::{Decoder, Encoder},
    sid::Sid,
    transport::{Kind, Socket, Transport},
};

/// Signals from transports to the session state machine.
enum Event {
    Attached,
    Detached(u64),
}

struct State {
    queue: VecDeque<Item>,
    socket: Option<Socket>,
    transport: Option<Transport>,
    /// Bumped on every attach so a stale transport cannot detach its
    /// successor.
    generation: u64,
    online: bool,
    disconnected: bool,
    handshaken: bool,
    pending_heartbeat: bool,
    heartbeats_sent: u32,
    last_heartbeat_ack: u32,
    last_connected: Option<Instant>,
    last_disconnected: Option<Instant>,
    remote_addr: Option<SocketAddr>,
    reconnects: u32,
}

struct Item {
    payload: Payload,
    waiter: Option<oneshot::Sender<Result<(), Error>>>,
}

struct Inbox {
    rx: mpsc::Receiver<Bytes>,
    decoder: Decoder,
    pending: VecDeque<Message>,
}

pub struct Session {
    sid: Sid,
    config: Arc<Config>,
    state: Mutex<State>,
    inbox: AsyncMutex<Inbox>,
    incoming_tx: mpsc::Sender<Bytes>,
    events_tx: mpsc::Sender<Event>,
    flush_tx: mpsc::Sender<()>,
    /// Shutdown request; observed by the state machine.
    halt: watch::Sender<bool>,
    /// Set once the session is destroyed.
    shutdown: watch::Sender<bool>,
    close_fn: Box<dyn Fn(Sid) + Send + Sync>,
}

impl Session {
    pub(crate) fn create(
        config: Arc<Config>,
        close_fn: Box<dyn Fn(Sid) + Send + Sync>,
    ) -> Result<Arc<Self>, Error> {
        let sid = Sid::new()?;
        let inbox_capacity = (config.read_buffer_size / 256).max(1);
        let (incoming_tx, incoming_rx) = mpsc::channel(inbox_capacity);
        let (events_tx, events_rx) = mpsc::channel(8);
        let (flush_tx, flush_rx) = mpsc::channel(1);
        let (halt, halt_rx) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);
        let framing = config.framing;

        let session = Arc::new(Session {
            sid,
            config,
            state: Mutex::new(State {
                queue: VecDeque::new(),
                socket: None,
                transport: None,
                generation: 0,
                online: false,
                disconnected: false,
                handshaken: false,
                pending_heartbeat: false,
                heartbeats_sent: 0,
                last_heartbeat_ack: 0,
                last_connected: None,
                last_disconnected: None,
                remote_addr: None,
                reconnects: 0,
            }),
            inbox: AsyncMutex::new(Inbox {
                rx: incoming_rx,
                decoder: Decoder::new(framing),
                pending: VecDeque::new(),
            }),
            incoming_tx,
            events_tx,
            flush_tx,
            halt,
            shutdown,
            close_fn,
        });

        tokio::spawn(session.clone().machine(events_rx, halt_rx));
        tokio::spawn(session.clone().flusher(flush_rx));
        Ok(session)
    }

    pub fn sid(&self) -> Sid {
        self.sid
    }

    /// The transport the session is currently bound to, if any.
    pub fn transport(&self) -> Option<Transport> {
        self.state.lock().unwrap().transport
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.state.lock().unwrap().remote_addr
    }

    /// True while a transport is attached and healthy.
    pub fn is_online(&self) -> bool {
        self.state.lock().unwrap().online
    }

    /// True once the session is shutting down or destroyed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().disconnected
    }

    /// Number of successful transport (re)attachments.
    pub fn reconnects(&self) -> u32 {
        self.state.lock().unwrap().reconnects
    }

    /// When the current transport attached.
    pub fn last_connected(&self) -> Option<Instant> {
        self.state.lock().unwrap().last_connected
    }

    /// When the last transport detached.
    pub fn last_disconnected(&self) -> Option<Instant> {
        self.state.lock().unwrap().last_disconnected
    }

    /// Heartbeats sent and the sequence of the last one acknowledged.
    pub fn heartbeats(&self) -> (u32, u32) {
        let st = self.state.lock().unwrap();
        (st.heartbeats_sent, st.last_heartbeat_ack)
    }

    /// Schedule a payload for delivery.
    ///
    /// Enqueue order is on-wire delivery order. Returns
    /// [`Error::QueueFull`] when the outbound queue is at capacity and
    /// [`Error::Closed`] on a destroyed session.
    pub fn send(&self, payload: impl Into<Payload>) -> Result<(), Error> {
        self.dispatch(payload.into(), None)
    }

    /// Like [`send`](Session::send), but resolves once the flusher has
    /// attempted to write the batch containing this payload, reporting the
    /// write outcome.
    pub async fn send_wait(&self, payload: impl Into<Payload>) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(payload.into(), Some(tx))?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Construct and send an event message.
    ///
    /// A non-array argument value is wrapped in a one-element argument list;
    /// `()` sends an event without arguments.
    pub fn emit(&self, name: &str, args: impl Serialize) -> Result<(), Error> {
        let args = crate::message::args_vec(serde_json::to_value(args)?);
        self.dispatch(
            Payload::Event {
                name: name.to_string(),
                args,
            },
            None,
        )
    }

    /// Acknowledge an inbound message, optionally carrying return arguments;
    /// `()` sends a plain ack.
    pub fn reply(&self, msg: &Message, args: impl Serialize) -> Result<(), Error> {
        let args = match serde_json::to_value(args)? {
            Value::Null => None,
            Value::Array(args) if args.is_empty() => None,
            Value::Array(args) => Some(args),
            value => Some(vec![value]),
        };
        self.dispatch(Payload::Ack { id: msg.id(), args }, None)
    }

    /// Block until the next application-visible message (text, json or
    /// event) arrives.
    ///
    /// Heartbeats, acks, noops, connects and disconnects are consumed
    /// internally. Returns `Ok(None)` once the session is shut down and
    /// `Err` on a decode error; after a decode error the current socket is
    /// closed but the session survives.
    pub async fn recv(&self) -> Result<Option<Message>, Error> {
        let mut inbox = self.inbox.lock().await;
        let mut shutdown = self.shutdown.subscribe();
        loop {
            while let Some(msg) = inbox.pending.pop_front() {
                match msg.typ() {
                    MessageType::Heartbeat => {
                        debug!("[sid={}] recv: heartbeat reply: {msg}", self.sid);
                        let mut st = self.state.lock().unwrap();
                        st.pending_heartbeat = false;
                        st.last_heartbeat_ack =
                            msg.data().parse().unwrap_or(st.heartbeats_sent);
                    }
                    MessageType::Disconnect => {
                        debug!("[sid={}] recv: disconnect received", self.sid);
                        self.halt();
                        return Ok(None);
                    }
                    MessageType::Connect
                    | MessageType::Error
                    | MessageType::Ack
                    | MessageType::Noop => {
                        debug!("[sid={}] recv: consumed internally: {msg}", self.sid);
                    }
                    MessageType::Text | MessageType::Json | MessageType::Event => {
                        if msg.id() > 0 && !msg.ack() {
                            if self.is_closed() {
                                return Ok(None);
                            }
                            debug!("[sid={}] recv: auto-acking {msg}", self.sid);
                            if let Err(e) = self.dispatch(
                                Payload::Ack {
                                    id: msg.id(),
                                    args: None,
                                },
                                None,
                            ) {
                                warn!("[sid={}] recv: unable to ack: {e}", self.sid);
                            }
                        }
                        return Ok(Some(msg));
                    }
                }
            }

            if *shutdown.borrow() {
                return Ok(None);
            }
            let chunk = tokio::select! {
                _ = shutdown.changed() => return Ok(None),
                chunk = inbox.rx.recv() => chunk,
            };
            let Some(chunk) = chunk else {
                return Ok(None);
            };
            inbox.decoder.feed(&chunk);
            match inbox.decoder.decode() {
                Ok(msgs) => inbox.pending.extend(msgs),
                Err(e) => {
                    debug!("[sid={}] recv: decode error: {e}", self.sid);
                    if let Some(socket) = &self.state.lock().unwrap().socket {
                        socket.close().ok();
                    }
                    return Err(e.into());
                }
            }
        }
    }

    /// Send a disconnect message and tear the session down.
    ///
    /// Resolves once the session is destroyed. A second call returns
    /// [`Error::Closed`].
    pub async fn close(&self) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.send(Payload::Disconnect(String::new())).ok();
        let mut done = self.shutdown.subscribe();
        self.halt();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Request shutdown; the state machine performs the teardown.
    pub(crate) fn halt(&self) {
        self.halt.send_replace(true);
    }

    /// Marks the handshake as written. Returns false if it already was.
    pub(crate) fn mark_handshaken(&self) -> bool {
        let mut st = self.state.lock().unwrap();
        if st.handshaken {
            false
        } else {
            st.handshaken = true;
            true
        }
    }

    /// Hand an inbound wire payload to the session's decoder.
    pub(crate) async fn post(&self, payload: Bytes) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.incoming_tx
            .send(payload)
            .await
            .map_err(|_| Error::Closed)
    }

    pub(crate) fn inbound_sender(&self) -> mpsc::Sender<Bytes> {
        self.incoming_tx.clone()
    }

    /// Swap in a freshly hijacked socket. The previous socket, if any, is
    /// closed first; its reader then observes the closure and falls into the
    /// offline path without touching the new attachment.
    pub(crate) async fn attach(&self, transport: Transport, socket: Socket) -> Result<u64, Error> {
        let generation = {
            let mut st = self.state.lock().unwrap();
            if st.disconnected {
                return Err(Error::Closed);
            }
            if let Some(old) = st.socket.take() {
                old.close().ok();
            }
            st.generation += 1;
            st.remote_addr = socket.remote_addr();
            st.socket = Some(socket);
            st.transport = Some(transport);
            st.online = true;
            st.last_connected = Some(Instant::now());
            st.reconnects += 1;
            st.generation
        };
        self.events_tx
            .send(Event::Attached)
            .await
            .map_err(|_| Error::Closed)?;
        debug!("[sid={}] {transport} attached (generation={generation})", self.sid);
        Ok(generation)
    }

    /// Drop the socket of the given attachment generation, if it is still
    /// the current one.
    pub(crate) async fn detach(&self, generation: u64) {
        let cleared = {
            let mut st = self.state.lock().unwrap();
            if st.generation != generation {
                false
            } else {
                if let Some(socket) = st.socket.take() {
                    socket.close().ok();
                }
                st.online = false;
                st.last_disconnected = Some(Instant::now());
                true
            }
        };
        if cleared {
            debug!("[sid={}] transport detached (generation={generation})", self.sid);
            self.events_tx.send(Event::Detached(generation)).await.ok();
        }
    }

    fn dispatch(
        &self,
        payload: Payload,
        waiter: Option<oneshot::Sender<Result<(), Error>>>,
    ) -> Result<(), Error> {
        {
            let mut st = self.state.lock().unwrap();
            if st.disconnected {
                return Err(Error::Closed);
            }
            if st.queue.len() >= self.config.queue_length {
                return Err(Error::QueueFull);
            }
            st.queue.push_back(Item { payload, waiter });
        }
        self.signal_flush();
        Ok(())
    }

    fn signal_flush(&self) {
        self.flush_tx.try_send(()).ok();
    }

    /// Enqueue a heartbeat and arm its reply timeout. A heartbeat that
    /// cannot be enqueued is fatal to the session.
    fn schedule_heartbeat(self: Arc<Self>) -> Result<(), Error> {
        let seq = {
            let mut st = self.state.lock().unwrap();
            st.pending_heartbeat = true;
            st.heartbeats_sent += 1;
            st.heartbeats_sent
        };
        debug!("[sid={}] sending heartbeat {seq} and scheduling timeout", self.sid);
        self.dispatch(Payload::Heartbeat(seq), None).map_err(|e| {
            warn!("[sid={}] unable to enqueue heartbeat: {e}", self.sid);
            e
        })?;

        let session = self.clone();
        let timeout = self.config.heartbeat_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = {
                let st = session.state.lock().unwrap();
                st.pending_heartbeat && !st.disconnected
            };
            if expired {
                debug!("[sid={}] heartbeat timeout fired", session.sid);
                if let Some(socket) = &session.state.lock().unwrap().socket {
                    socket.close().ok();
                }
                session.halt();
            }
        });
        Ok(())
    }

    /// The per-session state machine: reconciles transport attachments with
    /// the heartbeat schedule and the reconnect deadline.
    async fn machine(
        self: Arc<Self>,
        mut events: mpsc::Receiver<Event>,
        mut halt: watch::Receiver<bool>,
    ) {
        if !*halt.borrow_and_update() {
            'life: loop {
                debug!("[sid={}] machine: waiting for connection", self.sid);
                let ev = tokio::select! {
                    _ = halt.changed() => break 'life,
                    ev = events.recv() => match ev {
                        None => break 'life,
                        Some(ev) => ev,
                    },
                    _ = tokio::time::sleep(self.config.close_timeout) => {
                        debug!("[sid={}] machine: close timeout fired", self.sid);
                        break 'life;
                    }
                };
                match ev {
                    Event::Detached(_) => continue 'life,
                    Event::Attached => {}
                }

                let first = {
                    let st = self.state.lock().unwrap();
                    st.reconnects == 1
                };
                if first {
                    if let Err(e) = self.dispatch(Payload::Connect(String::new()), None) {
                        debug!("[sid={}] machine: unable to enqueue connect: {e}", self.sid);
                    }
                } else {
                    self.signal_flush();
                }

                'online: loop {
                    let heartbeat = {
                        let st = self.state.lock().unwrap();
                        st.transport.map(|t| t.kind() == Kind::Streaming).unwrap_or(false)
                            && !self.config.heartbeat_interval.is_zero()
                    };
                    if heartbeat {
                        tokio::select! {
                            _ = halt.changed() => break 'life,
                            ev = events.recv() => match ev {
                                None => break 'life,
                                Some(Event::Attached) => continue 'online,
                                Some(Event::Detached(_)) => {
                                    if self.state.lock().unwrap().socket.is_none() {
                                        break 'online;
                                    }
                                }
                            },
                            _ = tokio::time::sleep(self.config.heartbeat_interval) => {
                                if self.clone().schedule_heartbeat().is_err() {
                                    break 'life;
                                }
                            }
                        }
                    } else {
                        tokio::select! {
                            _ = halt.changed() => break 'life,
                            ev = events.recv() => match ev {
                                None => break 'life,
                                Some(Event::Attached) => continue 'online,
                                Some(Event::Detached(_)) => {
                                    if self.state.lock().unwrap().socket.is_none() {
                                        break 'online;
                                    }
                                }
                            }
                        }
                    }
                }

                {
                    let mut st = self.state.lock().unwrap();
                    st.online = false;
                    st.pending_heartbeat = false;
                    if st.last_disconnected.is_none() {
                        st.last_disconnected = Some(Instant::now());
                    }
                }
                debug!("[sid={}] machine: offline", self.sid);
            }
        }
        self.teardown();
    }

    /// The flush engine. Blocks until signaled, drains the queue into a
    /// batch buffer (encoding each payload exactly once), then writes the
    /// whole buffer to the attached socket. On failure the buffer is kept
    /// and written, without re-encoding, after the next attachment.
    async fn flusher(self: Arc<Self>, mut flush_rx: mpsc::Receiver<()>) {
        let encoder = Encoder::new(self.config.framing);
        let mut shutdown = self.shutdown.subscribe();
        let mut buf: Vec<u8> = Vec::new();
        let mut waiters: Vec<oneshot::Sender<Result<(), Error>>> = Vec::new();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                sig = flush_rx.recv() => if sig.is_none() { break },
            }
            let socket = {
                let mut st = self.state.lock().unwrap();
                if !st.online || st.socket.is_none() {
                    // queue is held for the next attachment
                    continue;
                }
                let mut staged: Vec<u8> = Vec::new();
                let mut staged_waiters = Vec::new();
                let mut encode_failed = false;
                while let Some(item) = st.queue.pop_front() {
                    if let Err(e) = encoder.encode(&item.payload, &mut staged) {
                        warn!("[sid={}] flusher: encode error: {e}", self.sid);
                        encode_failed = true;
                    }
                    if let Some(w) = item.waiter {
                        staged_waiters.push(w);
                    }
                }
                if encode_failed {
                    // drop the whole batch, the session survives
                    for w in staged_waiters {
                        w.send(Err(Error::BatchDropped)).ok();
                    }
                    continue;
                }
                buf.extend_from_slice(&staged);
                waiters.append(&mut staged_waiters);
                match &st.socket {
                    Some(socket) => socket.clone(),
                    None => continue,
                }
            };
            if buf.is_empty() {
                for w in waiters.drain(..) {
                    w.send(Ok(())).ok();
                }
                continue;
            }
            match socket
                .write(Bytes::copy_from_slice(&buf), self.config.write_timeout)
                .await
            {
                Ok(()) => {
                    buf.clear();
                    for w in waiters.drain(..) {
                        w.send(Ok(())).ok();
                    }
                }
                Err(e) => {
                    debug!(
                        "[sid={}] flusher: {} write error: {e}",
                        self.sid,
                        socket.transport()
                    );
                    let timed_out = matches!(e, Error::WriteTimeout);
                    for w in waiters.drain(..) {
                        let err = if timed_out {
                            Error::WriteTimeout
                        } else {
                            Error::NotConnected
                        };
                        w.send(Err(err)).ok();
                    }
                    socket.close().ok();
                }
            }
        }
    }

    /// Final transition into the destroyed state. Runs exactly once.
    fn teardown(&self) {
        {
            let mut st = self.state.lock().unwrap();
            if st.disconnected {
                return;
            }
            st.disconnected = true;
            st.online = false;
            st.pending_heartbeat = false;
            st.transport = None;
            if let Some(socket) = st.socket.take() {
                socket.close().ok();
            }
        }
        debug!("[sid={}] session destroyed", self.sid);
        self.shutdown.send_replace(true);
        (self.close_fn)(self.sid);
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sid)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("sid", &self.sid).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::payload::Framing;

    fn test_config() -> Config {
        Config {
            queue_length: 8,
            heartbeat_interval: Duration::ZERO,
            close_timeout: Duration::from_secs(5),
            polling_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_millis(200),
            framing: Framing::Tagged,
            ..Config::default()
        }
    }

    fn new_session(config: Config) -> Arc<Session> {
        Session::create(Arc::new(config), Box::new(|_| {})).unwrap()
    }

    async fn attach_capture(
        session: &Arc<Session>,
        transport: Transport,
    ) -> (Socket, mpsc::Receiver<Bytes>, u64) {
        let (socket, rx) = Socket::new(transport, 16, None);
        let generation = session.attach(transport, socket.clone()).await.unwrap();
        (socket, rx, generation)
    }

    async fn read_decoded(rx: &mut mpsc::Receiver<Bytes>, n: usize) -> Vec<Message> {
        let mut dec = Decoder::new(Framing::Tagged);
        let mut out = Vec::new();
        while out.len() < n {
            let chunk = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("timed out waiting for outbound batch")
                .expect("socket channel closed");
            dec.feed(&chunk);
            out.extend(dec.decode().unwrap());
        }
        out
    }

    #[tokio::test]
    async fn sends_are_delivered_in_order() {
        let session = new_session(test_config());
        let (_socket, mut rx, _) = attach_capture(&session, Transport::XhrMultipart).await;
        for i in 0..5 {
            session.send(format!("msg-{i}")).unwrap();
        }
        // first frame is the connect message written on first attachment
        let msgs = read_decoded(&mut rx, 6).await;
        assert_eq!(msgs[0].typ(), MessageType::Connect);
        for (i, msg) in msgs[1..].iter().enumerate() {
            assert_eq!(msg.typ(), MessageType::Text);
            assert_eq!(msg.data(), format!("msg-{i}"));
        }
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn queue_survives_reconnect() {
        let session = new_session(test_config());
        let (socket, mut rx, generation) = attach_capture(&session, Transport::XhrMultipart).await;
        let _ = read_decoded(&mut rx, 1).await; // connect frame
        socket.close().ok();
        session.detach(generation).await;

        // queued while offline
        session.send("held-1").unwrap();
        session.send("held-2").unwrap();
        assert!(!session.is_online());
        assert!(!session.is_closed());

        let (_socket2, mut rx2, _) = attach_capture(&session, Transport::XhrMultipart).await;
        let msgs = read_decoded(&mut rx2, 2).await;
        assert_eq!(msgs[0].data(), "held-1");
        assert_eq!(msgs[1].data(), "held-2");
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_on_full_queue_errors() {
        let mut config = test_config();
        config.queue_length = 2;
        let session = new_session(config);
        // no transport attached: the queue holds everything
        session.send("a").unwrap();
        session.send("b").unwrap();
        assert!(matches!(session.send("c"), Err(Error::QueueFull)));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let session = new_session(test_config());
        session.close().await.unwrap();
        assert!(matches!(session.send("x"), Err(Error::Closed)));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let session = new_session(test_config());
        assert!(session.close().await.is_ok());
        assert!(matches!(session.close().await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn close_runs_close_fn_once() {
        let (tx, mut rx) = mpsc::channel::<Sid>(4);
        let session = Session::create(
            Arc::new(test_config()),
            Box::new(move |sid| {
                tx.try_send(sid).unwrap();
            }),
        )
        .unwrap();
        session.close().await.unwrap();
        session.close().await.err().unwrap();
        assert_eq!(rx.recv().await, Some(session.sid()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn handshake_marked_once() {
        let session = new_session(test_config());
        assert!(session.mark_handshaken());
        assert!(!session.mark_handshaken());
        let (socket, _rx, generation) = attach_capture(&session, Transport::XhrPolling).await;
        socket.close().ok();
        session.detach(generation).await;
        let _ = attach_capture(&session, Transport::XhrPolling).await;
        assert!(!session.mark_handshaken());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn recv_surfaces_messages_and_consumes_heartbeats() {
        let session = new_session(test_config());
        session.post(Bytes::from_static(b"2::")).await.unwrap();
        session.post(Bytes::from_static(b"3:::ping")).await.unwrap();
        let msg = session.recv().await.unwrap().unwrap();
        assert_eq!(msg.typ(), MessageType::Text);
        assert_eq!(msg.data(), "ping");
        session.close().await.unwrap();
        assert!(session.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recv_auto_acks_id_messages() {
        let session = new_session(test_config());
        let (_socket, mut rx, _) = attach_capture(&session, Transport::XhrMultipart).await;
        session.post(Bytes::from_static(b"3:7::hello")).await.unwrap();
        let msg = session.recv().await.unwrap().unwrap();
        assert_eq!(msg.id(), 7);
        let msgs = read_decoded(&mut rx, 2).await;
        assert_eq!(msgs[0].typ(), MessageType::Connect);
        assert_eq!(msgs[1].typ(), MessageType::Ack);
        assert_eq!(msgs[1].data(), "7");
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn recv_disconnect_ends_session() {
        let session = new_session(test_config());
        session.post(Bytes::from_static(b"0::")).await.unwrap();
        assert!(session.recv().await.unwrap().is_none());
        // the machine observes the halt request and destroys the session
        tokio::time::timeout(Duration::from_secs(1), async {
            while !session.is_closed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(matches!(session.send("x"), Err(Error::Closed)));
    }

    #[tokio::test]
    async fn recv_decode_error_closes_socket_but_not_session() {
        let session = new_session(test_config());
        let (socket, _rx, _) = attach_capture(&session, Transport::XhrMultipart).await;
        session.post(Bytes::from_static(b"9:::nope")).await.unwrap();
        assert!(session.recv().await.is_err());
        assert!(socket.is_closed());
        assert!(!session.is_closed());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_timeout_destroys_session() {
        let mut config = test_config();
        config.heartbeat_interval = Duration::from_millis(30);
        config.heartbeat_timeout = Duration::from_millis(40);
        let session = new_session(config);
        let (_socket, mut rx, _) = attach_capture(&session, Transport::XhrMultipart).await;
        // connect frame, then the first heartbeat
        let msgs = read_decoded(&mut rx, 2).await;
        assert_eq!(msgs[1].typ(), MessageType::Heartbeat);
        // never answer it
        tokio::time::timeout(Duration::from_secs(1), async {
            while !session.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session should be destroyed by the heartbeat timeout");
        assert!(matches!(session.send("x"), Err(Error::Closed)));
    }

    #[tokio::test]
    async fn heartbeat_on_full_queue_destroys_session() {
        let mut config = test_config();
        config.queue_length = 1;
        config.heartbeat_interval = Duration::from_millis(30);
        config.heartbeat_timeout = Duration::from_millis(40);
        config.write_timeout = Duration::from_millis(500);
        let session = new_session(config);
        // a capacity-1 socket channel that nobody reads: the first write
        // lands in the slot, the next one blocks the flusher
        let (socket, rx) = Socket::new(Transport::XhrMultipart, 1, None);
        session.attach(Transport::XhrMultipart, socket).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await; // connect frame fills the slot
        session.send("stuck").unwrap(); // drained into the blocked flusher
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.send("fill").ok(); // stays queued; the queue is now full
        let _rx = rx;
        tokio::time::timeout(Duration::from_secs(1), async {
            while !session.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("heartbeat enqueue failure should destroy the session");
    }

    #[tokio::test]
    async fn close_timeout_destroys_idle_session() {
        let mut config = test_config();
        config.close_timeout = Duration::from_millis(50);
        let session = new_session(config);
        tokio::time::timeout(Duration::from_secs(1), async {
            while !session.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("unattached session should die after the close timeout");
    }
}
