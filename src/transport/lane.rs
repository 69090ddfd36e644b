use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::HeaderValue;
use http::Uri;
use http_body::Body;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use parking_lot::Mutex;
use tracing::{trace, Instrument as _};

use super::connect::{Connector, Destination};
use super::stream::HyperIo;
use super::{LaneError, Transport};
use crate::descriptor::Descriptor;
use crate::{BoxError, BoxFuture};

type Slot<B> = Arc<tokio::sync::Mutex<Option<http1::SendRequest<B>>>>;

/// A network transport bound to one route: direct, HTTP proxy, or SOCKS5 proxy.
///
/// A lane opens at most one HTTP/1.1 connection per destination (scheme and
/// authority). Concurrent requests to the same destination through the same
/// lane wait for that connection to finish its current exchange, including
/// reading the response body. A connection which has closed is replaced on
/// the next request.
///
/// Lanes are cheap to clone; clones share connections.
pub struct Lane<B = Full<Bytes>> {
    inner: Arc<LaneRef<B>>,
}

struct LaneRef<B> {
    connector: Connector,
    http1: http1::Builder,
    connections: Mutex<HashMap<Destination, Slot<B>>>,
}

impl<B> Clone for Lane<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B> fmt::Debug for Lane<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lane")
            .field("route", self.inner.connector.route())
            .field("destinations", &self.inner.connections.lock().len())
            .finish()
    }
}

impl<B> Lane<B> {
    pub(super) fn new(connector: Connector, http1: http1::Builder) -> Self {
        Self {
            inner: Arc::new(LaneRef {
                connector,
                http1,
                connections: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The route this lane takes to the network.
    pub fn route(&self) -> &Descriptor {
        self.inner.connector.route()
    }
}

impl<B> Transport<http::Request<B>> for Lane<B>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Response = http::Response<Incoming>;
    type Error = LaneError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn execute(&self, request: http::Request<B>) -> Self::Future {
        let inner = self.inner.clone();
        let span = tracing::trace_span!("lane", route = %inner.connector.route(), uri = %request.uri());
        Box::pin(async move { inner.send(request).await }.instrument(span))
    }
}

impl<B> LaneRef<B>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    async fn send(
        &self,
        mut request: http::Request<B>,
    ) -> Result<http::Response<Incoming>, LaneError> {
        let destination = Destination::from_uri(request.uri())?;
        let slot = self.slot(&destination);

        let response = {
            let mut connection = slot.lock().await;

            // The sender stays in the slot while waiting, so a cancelled
            // request never strands the open connection.
            if let Some(sender) = connection.as_mut() {
                if sender.ready().await.is_err() {
                    trace!(%destination, "connection closed");
                    *connection = None;
                }
            }

            let sender = match connection.as_mut() {
                Some(sender) => {
                    trace!(%destination, "reusing connection");
                    sender
                }
                None => connection.insert(self.connect(&destination).await?),
            };

            self.prepare(&mut request, &destination);
            sender.send_request(request)
        };

        response.await.map_err(LaneError::Request)
    }

    fn slot(&self, destination: &Destination) -> Slot<B> {
        self.connections
            .lock()
            .entry(destination.clone())
            .or_default()
            .clone()
    }

    async fn connect(&self, destination: &Destination) -> Result<http1::SendRequest<B>, LaneError> {
        let stream = self.connector.connect(destination).await?;

        let (sender, conn) = self
            .http1
            .handshake(HyperIo::new(stream))
            .await
            .map_err(LaneError::Handshake)?;

        tokio::spawn(async move {
            if let Err(err) = conn.await {
                if err.is_user() {
                    tracing::error!(err = format!("{err:#}"), "h1 connection driver error");
                } else {
                    tracing::debug!(err = format!("{err:#}"), "h1 connection driver error");
                }
            }
        });

        trace!(%destination, "handshake complete");
        Ok(sender)
    }

    /// Put the request URI into the form this route expects, and make sure it carries a Host header.
    fn prepare(&self, request: &mut http::Request<B>, destination: &Destination) {
        set_host_header(request);

        // HTTP proxies forward plain requests by absolute URI; everything
        // else reaches the origin directly or through a tunnel.
        match self.connector.route() {
            Descriptor::HttpProxy(proxy) if !destination.is_secure() => {
                if let Some(authorization) = proxy.authorization() {
                    request
                        .headers_mut()
                        .entry(http::header::PROXY_AUTHORIZATION)
                        .or_insert_with(|| authorization.clone());
                }
            }
            _ => origin_form(request.uri_mut()),
        }
    }
}

/// Convert the URI to origin-form, if it is not already.
///
/// This form of the URI has no scheme or authority, and contains just
/// the path and query.
fn origin_form(uri: &mut Uri) {
    let path = match uri.path_and_query() {
        Some(path) if path.as_str() != "/" => {
            let mut parts = http::uri::Parts::default();
            parts.path_and_query = Some(path.clone());
            Uri::from_parts(parts).unwrap_or_default()
        }
        _none_or_just_slash => Uri::default(),
    };
    *uri = path
}

/// Returns the port if it is not the default port for the scheme.
fn non_default_port(uri: &Uri) -> Option<u16> {
    let secure = uri.scheme() == Some(&http::uri::Scheme::HTTPS);
    match (uri.port_u16(), secure) {
        (Some(443), true) | (Some(80), false) => None,
        (port, _) => port,
    }
}

/// Set the Host header on the request if it is not already set,
/// using the authority from the URI.
fn set_host_header<B>(request: &mut http::Request<B>) {
    let uri = request.uri().clone();
    let Some(host) = uri.host() else {
        return;
    };

    let value = match non_default_port(&uri) {
        Some(port) => HeaderValue::from_str(&format!("{host}:{port}")),
        None => HeaderValue::from_str(host),
    };

    if let Ok(value) = value {
        request
            .headers_mut()
            .entry(http::header::HOST)
            .or_insert(value);
    }
}
