//! ## A tower [`Service`] front for the server
//!
//! Requests under the configured resource path are routed to the session
//! layer; everything else goes to the inner service (a 404 responder by
//! default). The service also implements [`hyper::service::Service`] so it
//! can be handed straight to hyper's connection builder.
//!
//! URL grammar on the bound resource path:
//!
//! ```text
//! GET  <resource>                              create session, legacy handshake
//! GET  <resource>/<protocol>/                  create session, handshake metadata
//! GET  <resource>/<protocol>/<transport>/<sid> attach a transport
//! POST <resource>/<protocol>/<transport>/<sid> inbound payload
//! OPTIONS *                                    preflight
//! ```

use std::{
    convert::Infallible,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::future::{self, Ready};
use http::{
    header::{
        ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_METHODS,
        ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, ORIGIN,
    },
    request::Parts,
    HeaderValue, Method, Request, Response, StatusCode,
};
use http_body_util::BodyExt;
use tower::Service;
use tracing::{debug, warn};

use crate::{
    body::ResponseBody,
    config::Config,
    errors::Error,
    futures::{http_response, ResponseFuture},
    handler::Handler,
    server::{Authorizer, Server},
    sid::Sid,
    transport::{polling, streaming, ws, Transport},
};

/// The protocol revision spoken on versioned URLs.
pub const PROTOCOL_VERSION: u8 = 1;

/// A [`Service`] that handles realtime messaging requests as a middleware,
/// forwarding everything outside its resource path to the inner service.
pub struct SocketIoService<H: Handler, S = NotFoundService> {
    inner: S,
    server: Arc<Server<H>>,
}

impl<H: Handler> SocketIoService<H, NotFoundService> {
    /// Create a standalone service answering 404 outside the resource path.
    pub fn new(handler: H) -> Self {
        Self::with_config(handler, Config::default())
    }

    pub fn with_config(handler: H, config: Config) -> Self {
        Self::with_config_inner(NotFoundService, handler, config)
    }

    /// Like [`with_config`](Self::with_config), with an application-supplied
    /// request authorization predicate consulted before anything else.
    pub fn with_authorizer(
        handler: H,
        config: Config,
        authorizer: impl Fn(&Parts) -> bool + Send + Sync + 'static,
    ) -> Self {
        let mut server = Server::new(handler, config);
        server.set_authorizer(Box::new(authorizer) as Authorizer);
        Self {
            inner: NotFoundService,
            server: Arc::new(server),
        }
    }
}

impl<H: Handler, S> SocketIoService<H, S> {
    /// Wrap a custom inner service.
    pub fn with_inner(inner: S, handler: H) -> Self {
        Self::with_config_inner(inner, handler, Config::default())
    }

    pub fn with_config_inner(inner: S, handler: H, config: Config) -> Self {
        Self {
            inner,
            server: Arc::new(Server::new(handler, config)),
        }
    }

    pub fn from_server(inner: S, server: Server<H>) -> Self {
        Self {
            inner,
            server: Arc::new(server),
        }
    }

    /// Handle to the server, e.g. for broadcasting.
    pub fn server(&self) -> Arc<Server<H>> {
        self.server.clone()
    }

    /// Convert into a `MakeService`, for use without layers.
    pub fn into_make_service(self) -> MakeSocketIoService<H, S> {
        MakeSocketIoService::new(self)
    }
}

impl<H: Handler, S: Clone> Clone for SocketIoService<H, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            server: self.server.clone(),
        }
    }
}

impl<H: Handler, S> std::fmt::Debug for SocketIoService<H, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketIoService").finish()
    }
}

/// Tower [`Service`] implementation.
impl<ReqBody, ResBody, S, H> Service<Request<ReqBody>> for SocketIoService<H, S>
where
    ReqBody: http_body::Body + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: std::fmt::Debug + Send,
    ResBody: http_body::Body + Send + 'static,
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    H: Handler,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        if strip_resource(req.uri().path(), &self.server.config().resource).is_some() {
            ResponseFuture::boxed(Box::pin(serve(self.server.clone(), req)))
        } else {
            ResponseFuture::inner(self.inner.call(req))
        }
    }
}

/// Hyper [`Service`](hyper::service::Service) implementation, so the service
/// can be passed to `hyper::server::conn::http1::Builder::serve_connection`.
impl<ReqBody, ResBody, S, H> hyper::service::Service<Request<ReqBody>> for SocketIoService<H, S>
where
    ReqBody: http_body::Body + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: std::fmt::Debug + Send,
    ResBody: http_body::Body + Send + 'static,
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone,
    H: Handler,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn call(&self, req: Request<ReqBody>) -> Self::Future {
        if strip_resource(req.uri().path(), &self.server.config().resource).is_some() {
            ResponseFuture::boxed(Box::pin(serve(self.server.clone(), req)))
        } else {
            let mut inner = self.inner.clone();
            ResponseFuture::inner(inner.call(req))
        }
    }
}

/// A MakeService that always returns a clone of the [`SocketIoService`] it
/// was created with.
pub struct MakeSocketIoService<H: Handler, S> {
    svc: SocketIoService<H, S>,
}

impl<H: Handler, S> MakeSocketIoService<H, S> {
    pub fn new(svc: SocketIoService<H, S>) -> Self {
        Self { svc }
    }
}

impl<H: Handler, S: Clone, T> Service<T> for MakeSocketIoService<H, S> {
    type Response = SocketIoService<H, S>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: T) -> Self::Future {
        future::ready(Ok(self.svc.clone()))
    }
}

/// A [`Service`] that always answers 404, the default inner service.
#[derive(Debug, Clone)]
pub struct NotFoundService;

impl<ReqBody> Service<Request<ReqBody>> for NotFoundService {
    type Response = Response<ResponseBody<http_body_util::Empty<Bytes>>>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _: Request<ReqBody>) -> Self::Future {
        future::ready(Ok(Response::builder()
            .status(404)
            .body(ResponseBody::empty())
            .unwrap()))
    }
}

async fn serve<H, ReqBody, B>(
    server: Arc<Server<H>>,
    req: Request<ReqBody>,
) -> Response<ResponseBody<B>>
where
    H: Handler,
    ReqBody: http_body::Body + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: std::fmt::Debug + Send,
    B: Send + 'static,
{
    let origin = req.headers().get(ORIGIN).cloned();
    if let Some(origin) = &origin {
        let allowed = match origin.to_str() {
            Ok(origin) => server.verify_origin(origin),
            Err(_) => server.config().origins.is_none(),
        };
        if !allowed {
            warn!("unauthorized origin: {origin:?}");
            return status_response(StatusCode::UNAUTHORIZED);
        }
    }

    let mut res = match serve_inner(&server, req).await {
        Ok(res) => res,
        Err(e) => e.into(),
    };
    if let Some(origin) = origin {
        let headers = res.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
    res
}

async fn serve_inner<H, ReqBody, B>(
    server: &Arc<Server<H>>,
    req: Request<ReqBody>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: Handler,
    ReqBody: http_body::Body + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: std::fmt::Debug + Send,
    B: Send + 'static,
{
    let (parts, body) = req.into_parts();
    if !server.authorized(&parts) {
        warn!("{} {} unauthorized request", parts.method, parts.uri);
        return Err(Error::HttpErrorResponse(StatusCode::UNAUTHORIZED));
    }

    let info = RequestInfo::parse(&parts, server.config())?;
    match info.route {
        Route::Preflight => Ok(Response::builder()
            .status(StatusCode::OK)
            .header(ACCESS_CONTROL_ALLOW_METHODS, "POST, GET")
            .body(ResponseBody::empty())?),

        Route::Handshake => {
            let session = server.clone().create_session()?;
            session.mark_handshaken();
            debug!("client {session} connected");
            Ok(http_response(
                StatusCode::OK,
                server.handshake_body(session.sid()),
            )?)
        }

        Route::Attach { transport, sid } => {
            let session = server.session(sid).ok_or_else(|| {
                warn!("{} {} bad session id: {sid}", parts.method, parts.uri);
                Error::HttpErrorResponse(StatusCode::INTERNAL_SERVER_ERROR)
            })?;
            debug!("client {session} opening transport {transport}");
            if transport.is_websocket() {
                ws::attach_req(
                    server.config().clone(),
                    transport,
                    session,
                    Request::from_parts(parts, body),
                )
            } else {
                match transport {
                    Transport::XhrPolling | Transport::JsonpPolling => {
                        polling::attach_req(
                            server.config().clone(),
                            transport,
                            session,
                            info.jsonp_index,
                        )
                        .await
                    }
                    _ => streaming::attach_req(transport, session, body).await,
                }
            }
        }

        Route::Post { transport, sid } => {
            let session = server.session(sid).ok_or_else(|| {
                warn!("{} {} bad session id: {sid}", parts.method, parts.uri);
                Error::HttpErrorResponse(StatusCode::INTERNAL_SERVER_ERROR)
            })?;
            if transport.is_websocket() {
                return Err(Error::HttpErrorResponse(StatusCode::BAD_REQUEST));
            }
            let form_encoded = parts
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.starts_with("application/x-www-form-urlencoded"))
                .unwrap_or(false);
            let bytes = body
                .collect()
                .await
                .map_err(|e| {
                    debug!("error aggregating post body: {e:?}");
                    Error::HttpErrorResponse(StatusCode::BAD_REQUEST)
                })?
                .to_bytes();
            polling::post_req(server.config().clone(), transport, session, bytes, form_encoded)
                .await
        }
    }
}

fn status_response<B>(status: StatusCode) -> Response<ResponseBody<B>> {
    Response::builder()
        .status(status)
        .body(ResponseBody::empty())
        .unwrap()
}

/// The part of the path after the resource prefix, with surrounding slashes
/// removed; `None` when the path is outside the resource.
fn strip_resource<'a>(path: &'a str, resource: &str) -> Option<&'a str> {
    let trimmed = resource.trim_end_matches('/');
    let rest = path.strip_prefix(trimmed)?;
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix('/').map(|r| r.trim_end_matches('/'))
    }
}

/// The request information extracted from the request line.
#[derive(Debug)]
struct RequestInfo {
    route: Route,
    /// The jsonp callback index, from the `i` query parameter.
    jsonp_index: Option<u32>,
}

#[derive(Debug, PartialEq)]
enum Route {
    Preflight,
    Handshake,
    Attach { transport: Transport, sid: Sid },
    Post { transport: Transport, sid: Sid },
}

impl RequestInfo {
    fn parse(parts: &Parts, config: &Config) -> Result<Self, Error> {
        let rest = strip_resource(parts.uri.path(), &config.resource)
            .ok_or(Error::HttpErrorResponse(StatusCode::BAD_REQUEST))?;

        let jsonp_index = parts.uri.query().and_then(|query| {
            form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "i")
                .and_then(|(_, value)| value.parse().ok())
        });

        if parts.method == Method::OPTIONS {
            return Ok(RequestInfo {
                route: Route::Preflight,
                jsonp_index,
            });
        }

        let segments: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };

        let route = match (&parts.method, segments.len()) {
            (&Method::GET, 0) => Route::Handshake,
            (&Method::GET, 1) => {
                check_protocol(segments[0])?;
                Route::Handshake
            }
            (method, 3) if *method == Method::GET || *method == Method::POST => {
                check_protocol(segments[0])?;
                let transport: Transport = segments[1].parse().map_err(|_| {
                    warn!("unknown transport: {}", segments[1]);
                    Error::HttpErrorResponse(StatusCode::SERVICE_UNAVAILABLE)
                })?;
                if !config.transport_enabled(transport) {
                    warn!("transport not enabled: {transport}");
                    return Err(Error::HttpErrorResponse(StatusCode::SERVICE_UNAVAILABLE));
                }
                let sid: Sid = segments[2].parse().map_err(|_| {
                    warn!("bad session id: {}", segments[2]);
                    Error::HttpErrorResponse(StatusCode::INTERNAL_SERVER_ERROR)
                })?;
                if *method == Method::POST {
                    Route::Post { transport, sid }
                } else {
                    Route::Attach { transport, sid }
                }
            }
            _ => {
                warn!("{} {} invalid path", parts.method, parts.uri);
                return Err(Error::HttpErrorResponse(StatusCode::BAD_REQUEST));
            }
        };
        Ok(RequestInfo { route, jsonp_index })
    }
}

fn check_protocol(segment: &str) -> Result<(), Error> {
    if segment.parse::<u8>() == Ok(PROTOCOL_VERSION) {
        Ok(())
    } else {
        warn!("protocol version not supported: {segment}");
        Err(Error::HttpErrorResponse(StatusCode::SERVICE_UNAVAILABLE))
    }
}
