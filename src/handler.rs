//! The application-facing callback surface.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;

use crate::session::Session;

/// Implemented by the application to receive sessions.
///
/// `on_connect` is spawned as the session's task right after the session is
/// created; drive [`Session::recv`] in it until it returns `Ok(None)`. When
/// `on_connect` returns, the session is closed.
///
/// ```
/// use std::sync::Arc;
/// use sockio::{async_trait, Handler, Session};
///
/// #[derive(Clone)]
/// struct Echo;
///
/// #[async_trait]
/// impl Handler for Echo {
///     async fn on_connect(&self, session: Arc<Session>) {
///         while let Ok(Some(msg)) = session.recv().await {
///             session.send(msg.data()).ok();
///         }
///     }
///
///     fn on_disconnect(&self, session: Arc<Session>) {
///         println!("client {session} disconnected");
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Called with every newly created session.
    async fn on_connect(&self, session: Arc<Session>);

    /// Called exactly once when a session is destroyed.
    fn on_disconnect(&self, _session: Arc<Session>) {}
}

#[async_trait]
impl<T: Handler> Handler for Arc<T> {
    async fn on_connect(&self, session: Arc<Session>) {
        (**self).on_connect(session).await
    }

    fn on_disconnect(&self, session: Arc<Session>) {
        (**self).on_disconnect(session)
    }
}

/// Adapts a plain async closure into a [`Handler`].
#[derive(Debug, Clone)]
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_connect(&self, session: Arc<Session>) {
        (self.0)(session).await
    }
}
