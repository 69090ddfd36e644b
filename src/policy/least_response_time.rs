use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use super::{first_minimum, Policy};
use crate::calculator::{Calculator, WeightedAverage};
use crate::error::NoTransportsAvailable;
use crate::transport::Transport;
use crate::BoxFuture;

/// Source of timestamps for measuring response times.
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> Instant + Send + Sync>);

impl Clock {
    /// Use `now` to read the current time.
    pub fn new<F>(now: F) -> Self
    where
        F: Fn() -> Instant + Send + Sync + 'static,
    {
        Self(Arc::new(now))
    }

    /// The system monotonic clock.
    pub fn system() -> Self {
        Self::new(Instant::now)
    }

    /// Read the current time.
    pub fn now(&self) -> Instant {
        (self.0)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Clock").finish()
    }
}

/// Options for [`LeastResponseTime`].
///
/// By default the system clock is used, and response times are smoothed with
/// a [`WeightedAverage`] giving 0.75 weight to each new sample.
#[derive(Debug, Clone, Default)]
pub struct LeastResponseTimeConfig<C = WeightedAverage> {
    clock: Clock,
    calculator: C,
}

impl LeastResponseTimeConfig {
    /// Default options: the system clock and a 0.75 weighted average.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C> LeastResponseTimeConfig<C> {
    /// Measure response times with `now`.
    pub fn with_clock<F>(mut self, now: F) -> Self
    where
        F: Fn() -> Instant + Send + Sync + 'static,
    {
        self.clock = Clock::new(now);
        self
    }

    /// Fold samples into estimates with `calculator`.
    ///
    /// Every transport receives its own clone, so `calculator` should be
    /// freshly constructed.
    pub fn with_calculator<C2>(self, calculator: C2) -> LeastResponseTimeConfig<C2> {
        LeastResponseTimeConfig {
            clock: self.clock,
            calculator,
        }
    }
}

struct Estimate<C> {
    current: Duration,
    calculator: C,
}

/// A transport which measures its own response times.
///
/// Every exchange is timed from the call to [`execute`][Transport::execute]
/// until the inner transport resolves, whether it succeeds or fails. The
/// sample is folded into this transport's estimate only once the exchange
/// completes. Exchanges which are dropped before completion are not recorded.
pub struct Timed<T, C = WeightedAverage> {
    transport: T,
    clock: Clock,
    estimate: Arc<Mutex<Estimate<C>>>,
}

impl<T: fmt::Debug, C> fmt::Debug for Timed<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timed")
            .field("transport", &self.transport)
            .field("estimate", &self.estimate())
            .finish()
    }
}

impl<T, C> Timed<T, C> {
    fn new(transport: T, clock: Clock, calculator: C) -> Self {
        Self {
            transport,
            clock,
            estimate: Arc::new(Mutex::new(Estimate {
                current: Duration::ZERO,
                calculator,
            })),
        }
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.transport
    }

    /// Current response time estimate; zero until the first exchange completes.
    pub fn estimate(&self) -> Duration {
        self.estimate.lock().current
    }
}

impl<Req, T, C> Transport<Req> for Timed<T, C>
where
    T: Transport<Req>,
    C: Calculator,
{
    type Response = T::Response;
    type Error = T::Error;
    type Future = BoxFuture<'static, Result<T::Response, T::Error>>;

    fn execute(&self, request: Req) -> Self::Future {
        let clock = self.clock.clone();
        let estimate = self.estimate.clone();

        let start = clock.now();
        let exchange = self.transport.execute(request);

        Box::pin(async move {
            let result = exchange.await;
            let elapsed = clock.now().saturating_duration_since(start);

            let mut estimate = estimate.lock();
            let current = estimate.calculator.observe(elapsed);
            estimate.current = current;
            trace!(
                elapsed = ?elapsed,
                estimate = ?estimate.current,
                "recorded response time"
            );

            result
        })
    }
}

/// Hands out the transport with the lowest estimated response time.
///
/// Transports are wrapped in [`Timed`], which updates each transport's
/// estimate when one of its exchanges completes, so selection only reflects
/// exchanges that have already finished. A transport with no completed
/// exchanges has an estimate of zero and is therefore preferred, which makes
/// every new transport get tried before it can be judged slow. Ties go to the
/// transport listed first. Releasing is a no-op.
pub struct LeastResponseTime<T, C = WeightedAverage> {
    transports: Vec<Arc<Timed<T, C>>>,
}

impl<T, C> fmt::Debug for LeastResponseTime<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeastResponseTime")
            .field("estimates", &self.estimates())
            .finish()
    }
}

impl<T, C> LeastResponseTime<T, C> {
    /// Create a least-response-time policy over `transports`.
    pub fn new(transports: Vec<T>, config: LeastResponseTimeConfig<C>) -> Self
    where
        C: Clone,
    {
        let LeastResponseTimeConfig { clock, calculator } = config;
        Self {
            transports: transports
                .into_iter()
                .map(|transport| {
                    Arc::new(Timed::new(transport, clock.clone(), calculator.clone()))
                })
                .collect(),
        }
    }

    /// The timed transports, in tie-break order.
    pub fn transports(&self) -> &[Arc<Timed<T, C>>] {
        &self.transports
    }

    /// A snapshot of each transport's response time estimate.
    pub fn estimates(&self) -> Vec<Duration> {
        self.transports
            .iter()
            .map(|transport| transport.estimate())
            .collect()
    }
}

impl<T, C> Policy for LeastResponseTime<T, C>
where
    T: Send + Sync + 'static,
    C: Send + 'static,
{
    type Transport = Timed<T, C>;

    fn acquire(&self) -> Result<Arc<Timed<T, C>>, NoTransportsAvailable> {
        let index = first_minimum(self.transports.iter().map(|t| t.estimate()))
            .ok_or(NoTransportsAvailable)?;

        let transport = &self.transports[index];
        trace!(index, estimate = ?transport.estimate(), "least response time selected transport");
        Ok(transport.clone())
    }

    fn release(&self, _transport: &Arc<Timed<T, C>>) {}
}
