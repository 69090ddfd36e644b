//! Dialing a destination through a lane's route.

use std::fmt;
use std::io;
#[cfg(feature = "tls")]
use std::sync::Arc;

use http::header::HeaderValue;
use http::uri::{Authority, Scheme};
use http::{StatusCode, Uri};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tracing::trace;

use super::stream::BoxedIo;
#[cfg(feature = "tls")]
use super::stream::Io;
use super::LaneError;
use crate::descriptor::{Descriptor, Socks5Proxy};

const MAX_TUNNEL_RESPONSE: usize = 8 * 1024;

/// Where a request is headed: the scheme and authority of its URI.
///
/// A lane keeps at most one connection per destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Destination {
    scheme: Scheme,
    authority: Authority,
}

impl Destination {
    pub(crate) fn from_uri(uri: &Uri) -> Result<Self, LaneError> {
        let scheme = uri
            .scheme()
            .ok_or_else(|| LaneError::InvalidUri(uri.clone()))?;
        if *scheme != Scheme::HTTP && *scheme != Scheme::HTTPS {
            return Err(LaneError::UnsupportedScheme(scheme.to_string()));
        }

        let authority = uri
            .authority()
            .ok_or_else(|| LaneError::InvalidUri(uri.clone()))?;

        Ok(Self {
            scheme: scheme.clone(),
            authority: authority.clone(),
        })
    }

    /// Host name or IP address, without IPv6 brackets.
    pub(crate) fn host(&self) -> &str {
        self.authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
    }

    pub(crate) fn port(&self) -> u16 {
        self.authority
            .port_u16()
            .unwrap_or(if self.is_secure() { 443 } else { 80 })
    }

    pub(crate) fn is_secure(&self) -> bool {
        self.scheme == Scheme::HTTPS
    }

    /// `host:port`, as used in a CONNECT request line.
    fn host_port(&self) -> String {
        let host = self.host();
        if host.contains(':') {
            format!("[{host}]:{}", self.port())
        } else {
            format!("{host}:{}", self.port())
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}

/// Opens streams to destinations along one route.
#[derive(Clone)]
pub(crate) struct Connector {
    route: Descriptor,
    #[cfg(feature = "tls")]
    tls: Arc<rustls::ClientConfig>,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("route", &self.route)
            .finish()
    }
}

impl Connector {
    #[cfg(feature = "tls")]
    pub(crate) fn new(route: Descriptor, tls: Arc<rustls::ClientConfig>) -> Self {
        Self { route, tls }
    }

    #[cfg(not(feature = "tls"))]
    pub(crate) fn new(route: Descriptor) -> Self {
        Self { route }
    }

    pub(crate) fn route(&self) -> &Descriptor {
        &self.route
    }

    /// Open a stream to `destination`, ready for HTTP/1.1.
    #[tracing::instrument(level = "trace", skip(self), fields(route = %self.route))]
    pub(crate) async fn connect(&self, destination: &Destination) -> Result<BoxedIo, LaneError> {
        let stream: BoxedIo = match &self.route {
            Descriptor::Direct => Box::new(tcp(destination).await?),
            Descriptor::HttpProxy(proxy) => {
                let address = Destination::from_uri(proxy.uri())?;
                let mut stream: BoxedIo = Box::new(tcp(&address).await?);
                if address.is_secure() {
                    stream = self.tls(stream, &address).await?;
                }

                // Plain HTTP is forwarded in absolute-form, so only TLS needs a tunnel.
                if destination.is_secure() {
                    tunnel(stream, destination, proxy.authorization()).await?
                } else {
                    stream
                }
            }
            Descriptor::Socks5(proxy) => Box::new(socks5(proxy, destination).await?),
        };

        if destination.is_secure() {
            self.tls(stream, destination).await
        } else {
            Ok(stream)
        }
    }

    #[cfg(feature = "tls")]
    async fn tls(&self, stream: impl Io, destination: &Destination) -> Result<BoxedIo, LaneError> {
        let domain = rustls::pki_types::ServerName::try_from(destination.host().to_owned())
            .map_err(|_| LaneError::InvalidServerName(destination.host().to_owned()))?;

        let stream = tokio_rustls::TlsConnector::from(self.tls.clone())
            .connect(domain, stream)
            .await
            .map_err(|source| LaneError::Tls {
                destination: destination.to_string(),
                source,
            })?;
        trace!(%destination, "tls handshake complete");
        Ok(Box::new(stream))
    }

    #[cfg(not(feature = "tls"))]
    async fn tls(&self, _stream: BoxedIo, destination: &Destination) -> Result<BoxedIo, LaneError> {
        Err(LaneError::UnsupportedScheme(destination.scheme.to_string()))
    }
}

async fn tcp(destination: &Destination) -> Result<TcpStream, LaneError> {
    let stream = TcpStream::connect((destination.host(), destination.port()))
        .await
        .map_err(|source| LaneError::Connect {
            destination: destination.to_string(),
            source,
        })?;

    if let Err(error) = stream.set_nodelay(true) {
        tracing::debug!(%error, "unable to set TCP_NODELAY");
    }

    if let Ok(peer) = stream.peer_addr() {
        trace!(peer.addr = %peer, "tcp connected");
    } else {
        trace!("tcp connected");
    }
    Ok(stream)
}

async fn socks5(
    proxy: &Socks5Proxy,
    destination: &Destination,
) -> Result<Socks5Stream<TcpStream>, LaneError> {
    let target = (destination.host(), destination.port());
    let stream = match proxy.credentials() {
        Some((username, password)) => {
            Socks5Stream::connect_with_password(
                (proxy.host(), proxy.port()),
                target,
                username,
                password,
            )
            .await
        }
        None => Socks5Stream::connect((proxy.host(), proxy.port()), target).await,
    }
    .map_err(LaneError::Socks)?;

    trace!(%proxy, %destination, "socks5 tunnel established");
    Ok(stream)
}

/// Ask an HTTP proxy to open a raw tunnel to `destination`.
async fn tunnel(
    mut stream: BoxedIo,
    destination: &Destination,
    authorization: Option<&HeaderValue>,
) -> Result<BoxedIo, LaneError> {
    let target = destination.host_port();
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n").into_bytes();
    if let Some(authorization) = authorization {
        request.extend_from_slice(b"Proxy-Authorization: ");
        request.extend_from_slice(authorization.as_bytes());
        request.extend_from_slice(b"\r\n");
    }
    request.extend_from_slice(b"\r\n");

    stream.write_all(&request).await.map_err(LaneError::Tunnel)?;

    let mut response = Vec::with_capacity(256);
    let mut chunk = [0u8; 512];
    let status = loop {
        let n = stream.read(&mut chunk).await.map_err(LaneError::Tunnel)?;
        if n == 0 {
            return Err(LaneError::Tunnel(io::ErrorKind::UnexpectedEof.into()));
        }
        response.extend_from_slice(&chunk[..n]);

        if let Some(status) = tunnel_status(&response)? {
            break status;
        }

        if response.len() > MAX_TUNNEL_RESPONSE {
            return Err(LaneError::Tunnel(io::Error::new(
                io::ErrorKind::InvalidData,
                "proxy response headers too large",
            )));
        }
    };

    if !status.is_success() {
        return Err(LaneError::TunnelRefused {
            destination: destination.to_string(),
            status,
        });
    }

    trace!(%destination, "proxy tunnel established");
    Ok(stream)
}

/// Status code of a proxy's CONNECT response, once its head is complete.
fn tunnel_status(response: &[u8]) -> Result<Option<StatusCode>, LaneError> {
    let malformed = |reason: String| {
        LaneError::Tunnel(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed proxy response: {reason}"),
        ))
    };

    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Response::new(&mut headers);
    match parsed.parse(response) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(err) => return Err(malformed(err.to_string())),
    }

    parsed
        .code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .map(Some)
        .ok_or_else(|| malformed("missing status code".to_owned()))
}
