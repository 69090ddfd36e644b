//! Local servers for exercising lanes end to end.
#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::body::Incoming;
use laneway::transport::HyperIo;
use laneway::{Dispatcher, Policy, Transport};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What the echo server saw for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Echo {
    pub connection: usize,
    pub uri: String,
    pub host: String,
    pub proxy_authorization: Option<String>,
}

/// An HTTP/1.1 server which answers every request with the index of the
/// connection it arrived on, the request URI, the Host header and any
/// Proxy-Authorization header.
///
/// Pointing a lane at it as an HTTP proxy shows the URI form the lane used.
#[derive(Debug)]
pub struct EchoServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl EchoServer {
    pub async fn start() -> Self {
        Self::start_with_delay(Duration::ZERO).await
    }

    /// Start a server which waits `delay` before answering each request.
    pub async fn start_with_delay(delay: Duration) -> Self {
        Self::spawn(move |stream, connection| {
            tokio::spawn(serve_echo(stream, connection, delay));
        })
        .await
    }

    /// Start a server which speaks HTTPS with a self-signed certificate for
    /// `localhost` and `127.0.0.1`.
    #[cfg(feature = "tls")]
    pub async fn start_tls() -> Self {
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(tls_config()));
        Self::spawn(move |stream, connection| {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                match acceptor.accept(stream).await {
                    Ok(stream) => serve_echo(stream, connection, Duration::ZERO).await,
                    Err(error) => tracing::debug!(%error, "tls accept failed"),
                }
            });
        })
        .await
    }

    async fn spawn<F>(accept: F) -> Self
    where
        F: Fn(TcpStream, usize) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = connections.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                accept(stream, counter.fetch_add(1, Ordering::SeqCst));
            }
        });

        Self {
            addr,
            connections,
            handle,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_echo<I>(stream: I, connection: usize, delay: Duration)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |req: http::Request<Incoming>| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let header = |name: http::header::HeaderName| {
            req.headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-")
                .to_owned()
        };
        let body = format!(
            "{connection}\n{}\n{}\n{}",
            req.uri(),
            header(http::header::HOST),
            header(http::header::PROXY_AUTHORIZATION)
        );
        Ok::<_, Infallible>(http::Response::new(Full::new(Bytes::from(body))))
    });

    let _ = hyper::server::conn::http1::Builder::new()
        .serve_connection(HyperIo::new(stream), service)
        .await;
}

#[cfg(feature = "tls")]
fn tls_config() -> rustls::ServerConfig {
    let (_, cert) = pem_rfc7468::decode_vec(include_bytes!("../certs/cert.pem")).unwrap();
    let (label, key) = pem_rfc7468::decode_vec(include_bytes!("../certs/key.pem")).unwrap();

    let cert = rustls::pki_types::CertificateDer::from(cert);
    let key = match label {
        "PRIVATE KEY" => rustls::pki_types::PrivateKeyDer::Pkcs8(key.into()),
        _ => panic!("unknown key type: {label}"),
    };

    let mut cfg = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();
    cfg.alpn_protocols.push(b"http/1.1".to_vec());
    cfg
}

/// Send a GET for `uri` through `dispatcher` and parse the echo.
pub async fn fetch<P>(dispatcher: &Dispatcher<P>, uri: &str) -> Result<Echo, BoxError>
where
    P: Policy,
    P::Transport: Transport<http::Request<Full<Bytes>>, Response = http::Response<Incoming>>,
{
    let request = http::Request::get(uri).body(Full::new(Bytes::new()))?;
    let response = dispatcher.dispatch(request).await?;
    let body = response.into_body().collect().await?.to_bytes();
    let body = std::str::from_utf8(&body)?;

    let mut lines = body.lines();
    let connection = lines.next().ok_or("missing connection")?.parse()?;
    let uri = lines.next().ok_or("missing uri")?.to_owned();
    let host = lines.next().ok_or("missing host")?.to_owned();
    let proxy_authorization = match lines.next().ok_or("missing proxy authorization")? {
        "-" => None,
        value => Some(value.to_owned()),
    };

    Ok(Echo {
        connection,
        uri,
        host,
        proxy_authorization,
    })
}

/// A minimal SOCKS5 proxy supporting CONNECT, with optional
/// username/password authentication.
#[derive(Debug)]
pub struct Socks5Server {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    logins: Arc<parking_lot::Mutex<Vec<(String, String)>>>,
    handle: JoinHandle<()>,
}

impl Socks5Server {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let logins = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let (counter, seen) = (connections.clone(), logins.clone());
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);

                let seen = seen.clone();
                tokio::spawn(async move {
                    if let Err(error) = serve_socks5(stream, seen).await {
                        tracing::debug!(%error, "socks5 session failed");
                    }
                });
            }
        });

        Self {
            addr,
            connections,
            logins,
            handle,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Username and password pairs presented by clients.
    pub fn logins(&self) -> Vec<(String, String)> {
        self.logins.lock().clone()
    }
}

impl Drop for Socks5Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_socks5(
    mut stream: TcpStream,
    logins: Arc<parking_lot::Mutex<Vec<(String, String)>>>,
) -> Result<(), BoxError> {
    // Greeting: version, method count, methods.
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != 5 {
        return Err("not socks5".into());
    }
    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;

    if methods.contains(&2) {
        stream.write_all(&[5, 2]).await?;

        let mut version = [0u8; 1];
        stream.read_exact(&mut version).await?;
        let username = read_short_string(&mut stream).await?;
        let password = read_short_string(&mut stream).await?;
        logins.lock().push((username, password));

        stream.write_all(&[1, 0]).await?;
    } else {
        stream.write_all(&[5, 0]).await?;
    }

    // Request: version, command, reserved, address type.
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[1] != 1 {
        return Err("only CONNECT is supported".into());
    }

    let host = match request[3] {
        1 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            std::net::Ipv4Addr::from(octets).to_string()
        }
        3 => read_short_string(&mut stream).await?,
        4 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            std::net::Ipv6Addr::from(octets).to_string()
        }
        _ => return Err("unknown address type".into()),
    };
    let port = stream.read_u16().await?;

    let mut upstream = TcpStream::connect((host.as_str(), port)).await?;
    stream.write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0]).await?;

    tokio::io::copy_bidirectional(&mut stream, &mut upstream).await?;
    Ok(())
}

async fn read_short_string(stream: &mut TcpStream) -> Result<String, BoxError> {
    let len = stream.read_u8().await?;
    let mut bytes = vec![0u8; len as usize];
    stream.read_exact(&mut bytes).await?;
    Ok(String::from_utf8(bytes)?)
}
