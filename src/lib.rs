//! Laneway
//!
//! Route every request from a [hyper] client over one of several independent
//! network lanes (direct connections, HTTP proxies, or SOCKS5 proxies), chosen
//! per request by a pluggable [`Policy`].
//!
//! The pieces, from the bottom up:
//!
//! 1. A [`TransportFactory`] turns a connection descriptor such as
//!    `socks5://10.0.0.1:1080`, `http://proxy:3128` or `direct://` into a
//!    [`Transport`] which can execute one HTTP exchange. The default factory
//!    produces [`Lane`]s.
//! 2. A [`Policy`] owns the transports and decides which one serves the next
//!    request: [`RoundRobin`], [`FillHoles`] (least in-flight requests) or
//!    [`LeastResponseTime`] (smallest observed latency, smoothed by a
//!    [`Calculator`]).
//! 3. The [`Dispatcher`] is a [`tower::Service`] which acquires a transport
//!    from the policy, executes the request on it, and releases it again.
//!
//! # Example
//! ```no_run
//! # use laneway::Builder;
//! # use tower::ServiceExt as _;
//! # async fn run() -> Result<(), laneway::BoxError> {
//! let dispatcher = Builder::new(["socks5://127.0.0.1:1080", "http://127.0.0.1:3128"]).fill_holes();
//!
//! let request = http::Request::get("http://example.com/")
//!     .body(http_body_util::Full::new(bytes::Bytes::new()))?;
//! let response = dispatcher.oneshot(request).await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod builder;
pub mod calculator;
pub mod descriptor;
pub mod dispatcher;
mod error;
pub mod policy;
pub mod transport;

pub use self::builder::Builder;
pub use self::calculator::{Calculator, LastValue, MovingAverage, WeightedAverage};
pub use self::descriptor::{direct_descriptors, Descriptor, DIRECT};
pub use self::dispatcher::Dispatcher;
pub use self::error::{CalculatorError, FactoryError, NoTransportsAvailable};
pub use self::policy::{FillHoles, LeastResponseTime, LeastResponseTimeConfig, Policy, RoundRobin};
pub use self::transport::{DefaultTransportFactory, Lane, Transport, TransportFactory};

/// Type-erased error, used wherever errors from different layers meet.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Boxed, sendable future.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
