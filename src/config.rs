use std::time::Duration;

use crate::{payload::Framing, transport::Transport};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of undelivered outbound payloads per session. When the
    /// queue is full, further sends return [`Error::QueueFull`](crate::Error::QueueFull).
    /// Defaults to 10.
    pub queue_length: usize,

    /// Interval between outbound heartbeats on streaming transports. A zero
    /// interval disables heartbeats.
    /// Defaults to 15 seconds.
    pub heartbeat_interval: Duration,

    /// How long a heartbeat may go unanswered before the session is destroyed.
    /// Defaults to 10 seconds.
    pub heartbeat_timeout: Duration,

    /// Maximum offline interval: a session whose transport has detached and
    /// that sees no reconnect within this window is destroyed.
    /// Defaults to 25 seconds.
    pub close_timeout: Duration,

    /// How long a polling GET stays open waiting for an outbound batch.
    /// Defaults to 20 seconds.
    pub polling_timeout: Duration,

    /// Per-write deadline on the underlying connection.
    /// Defaults to 5 seconds.
    pub write_timeout: Duration,

    /// Sizing hint for the inbound payload buffer of a session, in bytes.
    /// Defaults to 2048.
    pub read_buffer_size: usize,

    /// Allowed `Origin` values as `host` or `host:port` entries, `*`
    /// wildcards allowed per component. `None` disables the check.
    /// Defaults to `None`.
    pub origins: Option<Vec<String>>,

    /// Enabled transports, also advertised in the handshake.
    /// Defaults to websocket, xhr-polling, xhr-multipart, htmlfile and
    /// jsonp-polling.
    pub transports: Vec<Transport>,

    /// Wire framing to speak. The two framings are not compatible; one is
    /// chosen per deployment.
    /// Defaults to [`Framing::Tagged`].
    pub framing: Framing,

    /// URL prefix the server answers on.
    /// Defaults to `/socket.io/`.
    pub resource: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_length: 10,
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(25),
            polling_timeout: Duration::from_secs(20),
            write_timeout: Duration::from_secs(5),
            read_buffer_size: 2048,
            origins: None,
            transports: vec![
                Transport::Websocket,
                Transport::XhrPolling,
                Transport::XhrMultipart,
                Transport::Htmlfile,
                Transport::JsonpPolling,
            ],
            framing: Framing::Tagged,
            resource: "/socket.io/".to_string(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub(crate) fn transport_enabled(&self, transport: Transport) -> bool {
        self.transports.contains(&transport)
    }

    /// Comma separated names of the enabled transports, as advertised in the
    /// handshake line.
    pub(crate) fn transport_names(&self) -> String {
        self.transports
            .iter()
            .map(|t| t.name())
            .collect::<Vec<_>>()
            .join(",")
    }
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Maximum number of undelivered outbound payloads per session.
    pub fn queue_length(mut self, queue_length: usize) -> Self {
        self.config.queue_length = queue_length;
        self
    }

    /// Interval between outbound heartbeats on streaming transports.
    pub fn heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.config.heartbeat_interval = heartbeat_interval;
        self
    }

    /// How long a heartbeat may go unanswered before the session is destroyed.
    pub fn heartbeat_timeout(mut self, heartbeat_timeout: Duration) -> Self {
        self.config.heartbeat_timeout = heartbeat_timeout;
        self
    }

    /// Maximum offline interval before session destruction.
    pub fn close_timeout(mut self, close_timeout: Duration) -> Self {
        self.config.close_timeout = close_timeout;
        self
    }

    /// How long a polling GET stays open waiting for an outbound batch.
    pub fn polling_timeout(mut self, polling_timeout: Duration) -> Self {
        self.config.polling_timeout = polling_timeout;
        self
    }

    /// Per-write deadline on the underlying connection.
    pub fn write_timeout(mut self, write_timeout: Duration) -> Self {
        self.config.write_timeout = write_timeout;
        self
    }

    /// Sizing hint for the inbound payload buffer of a session.
    pub fn read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.config.read_buffer_size = read_buffer_size;
        self
    }

    /// Allowed `Origin` values; `None` disables the check.
    pub fn origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.origins = Some(origins.into_iter().map(Into::into).collect());
        self
    }

    /// Enabled transports.
    pub fn transports(mut self, transports: impl IntoIterator<Item = Transport>) -> Self {
        self.config.transports = transports.into_iter().collect();
        self
    }

    /// Wire framing to speak.
    pub fn framing(mut self, framing: Framing) -> Self {
        self.config.framing = framing;
        self
    }

    /// URL prefix the server answers on.
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.config.resource = resource.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
