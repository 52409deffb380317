use tower::Layer;

use crate::{config::Config, handler::Handler, service::SocketIoService};

/// A tower [`Layer`] that wraps an inner service with a
/// [`SocketIoService`].
#[derive(Debug, Clone)]
pub struct SocketIoLayer<H: Handler + Clone> {
    handler: H,
    config: Config,
}

impl<H: Handler + Clone> SocketIoLayer<H> {
    pub fn new(handler: H) -> Self {
        Self::with_config(handler, Config::default())
    }

    pub fn with_config(handler: H, config: Config) -> Self {
        Self { handler, config }
    }
}

impl<S, H: Handler + Clone> Layer<S> for SocketIoLayer<H> {
    type Service = SocketIoService<H, S>;

    fn layer(&self, inner: S) -> Self::Service {
        SocketIoService::with_config_inner(inner, self.handler.clone(), self.config.clone())
    }
}
