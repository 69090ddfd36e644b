//! Transports, and the factory which builds them from descriptors.
//!
//! A [`Transport`] executes one exchange at a time on behalf of a policy. The
//! network transport shipped with this crate is the [`Lane`], produced by the
//! [`DefaultTransportFactory`]; any other type can take part by implementing
//! [`Transport`], and any closure `Fn(&str) -> Result<T, FactoryError>` can
//! stand in as a [`TransportFactory`].

use std::fmt;
use std::future::Future;
use std::io;
use std::marker::PhantomData;
#[cfg(feature = "tls")]
use std::sync::Arc;

use bytes::Bytes;
use http::{StatusCode, Uri};
use http_body_util::Full;
use thiserror::Error;

use crate::descriptor::Descriptor;
use crate::error::FactoryError;
use crate::BoxError;

mod connect;
mod lane;
mod stream;
#[cfg(feature = "tls")]
mod tls;

pub use self::lane::Lane;
pub use self::stream::HyperIo;
#[cfg(feature = "tls")]
pub use self::tls::default_tls_config;

/// Something which can execute a single request.
///
/// Policies hand out transports as `Arc<T>`, so `execute` takes `&self`; any
/// per-exchange state must live inside the returned future.
pub trait Transport<Req>: Send + Sync + 'static {
    /// The response produced by a successful exchange.
    type Response: 'static;

    /// Error produced when the exchange fails.
    type Error: Into<BoxError> + 'static;

    /// Future which resolves to the result of the exchange.
    type Future: Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;

    /// Execute one request.
    fn execute(&self, request: Req) -> Self::Future;
}

/// Builds a transport from a connection descriptor.
pub trait TransportFactory {
    /// The transport produced by this factory.
    type Transport: Send + Sync + 'static;

    /// Create a transport for `descriptor`.
    fn create(&self, descriptor: &str) -> Result<Self::Transport, FactoryError>;
}

impl<F, T> TransportFactory for F
where
    F: Fn(&str) -> Result<T, FactoryError>,
    T: Send + Sync + 'static,
{
    type Transport = T;

    fn create(&self, descriptor: &str) -> Result<T, FactoryError> {
        (self)(descriptor)
    }
}

/// Error returned when a [`Lane`] fails to execute a request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LaneError {
    /// The request URI does not name a destination.
    #[error("request uri has no scheme or authority: {0}")]
    InvalidUri(Uri),

    /// The destination scheme cannot be served by this lane.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// Opening a TCP connection failed.
    #[error("connecting to {destination}")]
    Connect {
        /// The destination or proxy being dialed.
        destination: String,

        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The HTTP proxy refused to open a tunnel.
    #[error("proxy refused tunnel to {destination}: {status}")]
    TunnelRefused {
        /// The tunnel destination.
        destination: String,

        /// Status returned by the proxy.
        status: StatusCode,
    },

    /// The HTTP proxy tunnel could not be negotiated.
    #[error("proxy tunnel")]
    Tunnel(#[source] io::Error),

    /// The SOCKS5 proxy could not be negotiated.
    #[error("socks5 proxy")]
    Socks(#[source] tokio_socks::Error),

    /// The destination host is not a valid TLS server name.
    #[cfg(feature = "tls")]
    #[error("invalid tls server name: {0}")]
    InvalidServerName(String),

    /// The TLS handshake failed.
    #[cfg(feature = "tls")]
    #[error("tls handshake with {destination}")]
    Tls {
        /// The destination or proxy being dialed.
        destination: String,

        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The HTTP/1.1 handshake failed.
    #[error("http handshake")]
    Handshake(#[source] hyper::Error),

    /// The request failed on an established connection.
    #[error("sending request")]
    Request(#[source] hyper::Error),
}

/// The factory used unless another is configured.
///
/// Descriptors become [`Lane`]s:
///
/// - `direct://` dials each destination itself.
/// - `http://` and `https://` proxies forward plain HTTP in absolute-form, and
///   tunnel HTTPS with `CONNECT`.
/// - anything else is a SOCKS5 proxy. TLS destinations reached through a
///   SOCKS5 proxy are not certificate-verified.
///
/// Each lane holds at most one connection per destination.
pub struct DefaultTransportFactory<B = Full<Bytes>> {
    http1: hyper::client::conn::http1::Builder,

    #[cfg(feature = "tls")]
    tls: Arc<rustls::ClientConfig>,

    #[cfg(feature = "tls")]
    unverified_tls: Arc<rustls::ClientConfig>,

    body: PhantomData<fn(B)>,
}

impl<B> fmt::Debug for DefaultTransportFactory<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultTransportFactory")
            .field("http1", &self.http1)
            .finish()
    }
}

impl<B> Clone for DefaultTransportFactory<B> {
    fn clone(&self) -> Self {
        Self {
            http1: self.http1.clone(),
            #[cfg(feature = "tls")]
            tls: self.tls.clone(),
            #[cfg(feature = "tls")]
            unverified_tls: self.unverified_tls.clone(),
            body: PhantomData,
        }
    }
}

impl<B> Default for DefaultTransportFactory<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> DefaultTransportFactory<B> {
    /// Create a factory using the platform's root certificates for TLS.
    pub fn new() -> Self {
        Self {
            http1: hyper::client::conn::http1::Builder::new(),
            #[cfg(feature = "tls")]
            tls: Arc::new(default_tls_config()),
            #[cfg(feature = "tls")]
            unverified_tls: Arc::new(self::tls::unverified_tls_config()),
            body: PhantomData,
        }
    }

    /// Use `config` for TLS on direct and HTTP proxy lanes.
    ///
    /// Lanes speak HTTP/1.1 only, so ALPN is restricted to `http/1.1`.
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, mut config: rustls::ClientConfig) -> Self {
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        self.tls = Arc::new(config);
        self
    }

    /// Access the HTTP/1.1 connection settings used by every lane.
    pub fn http1(&mut self) -> &mut hyper::client::conn::http1::Builder {
        &mut self.http1
    }
}

impl<B> TransportFactory for DefaultTransportFactory<B>
where
    B: Send + 'static,
{
    type Transport = Lane<B>;

    fn create(&self, descriptor: &str) -> Result<Lane<B>, FactoryError> {
        let route: Descriptor = descriptor.parse()?;

        #[cfg(feature = "tls")]
        let tls = match &route {
            Descriptor::Socks5(_) => self.unverified_tls.clone(),
            _ => self.tls.clone(),
        };

        #[cfg(feature = "tls")]
        let connector = self::connect::Connector::new(route, tls);
        #[cfg(not(feature = "tls"))]
        let connector = self::connect::Connector::new(route);

        Ok(Lane::new(connector, self.http1.clone()))
    }
}
