//! Build a dispatcher from a list of connection descriptors.

use std::fmt;

use crate::calculator::Calculator;
use crate::descriptor::direct_descriptors;
use crate::dispatcher::Dispatcher;
use crate::policy::{FillHoles, LeastResponseTime, LeastResponseTimeConfig, RoundRobin};
use crate::transport::{DefaultTransportFactory, TransportFactory};

/// Builds a [`Dispatcher`] from an ordered list of connection descriptors.
///
/// Each descriptor is handed to the transport factory in order. Descriptors
/// the factory rejects are logged and skipped, so the resulting policy holds
/// the remaining transports in their original order. If every descriptor is
/// rejected the dispatcher still builds, and each request fails with
/// [`NoTransportsAvailable`][crate::NoTransportsAvailable].
///
/// ```no_run
/// # use laneway::{Builder, LeastResponseTimeConfig, MovingAverage};
/// # fn main() -> Result<(), laneway::CalculatorError> {
/// let config = LeastResponseTimeConfig::new().with_calculator(MovingAverage::new(10)?);
/// let dispatcher = Builder::direct(4).least_response_time_with(config);
/// # Ok(())
/// # }
/// ```
pub struct Builder<F = DefaultTransportFactory> {
    descriptors: Vec<String>,
    factory: F,
}

impl<F> fmt::Debug for Builder<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("descriptors", &self.descriptors)
            .finish()
    }
}

impl Builder {
    /// Create a builder for `descriptors`, using the [`DefaultTransportFactory`].
    pub fn new<I, S>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            descriptors: descriptors.into_iter().map(Into::into).collect(),
            factory: DefaultTransportFactory::new(),
        }
    }

    /// Create a builder for `count` direct lanes.
    ///
    /// Every direct lane keeps its own connection to each destination, so
    /// this fans requests out over `count` connections to the same host.
    pub fn direct(count: usize) -> Self {
        Self::new(direct_descriptors(count))
    }
}

impl<F> Builder<F> {
    /// Build transports with `factory` instead.
    pub fn with_transport_factory<F2>(self, factory: F2) -> Builder<F2>
    where
        F2: TransportFactory,
    {
        Builder {
            descriptors: self.descriptors,
            factory,
        }
    }

    /// Append another descriptor to the list.
    pub fn descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.descriptors.push(descriptor.into());
        self
    }

    /// The descriptors, in order.
    pub fn descriptors(&self) -> &[String] {
        &self.descriptors
    }

    /// Mutable access to the transport factory, e.g. to tune the
    /// [`DefaultTransportFactory`]'s HTTP/1.1 settings.
    pub fn transport_factory(&mut self) -> &mut F {
        &mut self.factory
    }
}

impl<F> Builder<F>
where
    F: TransportFactory,
{
    /// Run every descriptor through the factory, skipping those it rejects.
    pub fn build_transports(&self) -> Vec<F::Transport> {
        let transports: Vec<_> = self
            .descriptors
            .iter()
            .filter_map(|descriptor| match self.factory.create(descriptor) {
                Ok(transport) => Some(transport),
                Err(error) => {
                    tracing::warn!(%descriptor, %error, "skipping descriptor");
                    None
                }
            })
            .collect();

        tracing::debug!(
            descriptors = self.descriptors.len(),
            transports = transports.len(),
            "built transports"
        );
        transports
    }

    /// Dispatch requests to each transport in turn.
    pub fn round_robin(&self) -> Dispatcher<RoundRobin<F::Transport>> {
        Dispatcher::new(RoundRobin::new(self.build_transports()))
    }

    /// Dispatch requests to the transport with the fewest requests in flight.
    pub fn fill_holes(&self) -> Dispatcher<FillHoles<F::Transport>> {
        Dispatcher::new(FillHoles::new(self.build_transports()))
    }

    /// Dispatch requests to the transport with the lowest weighted average
    /// response time, using the system clock.
    pub fn least_response_time(&self) -> Dispatcher<LeastResponseTime<F::Transport>> {
        self.least_response_time_with(LeastResponseTimeConfig::new())
    }

    /// Dispatch requests to the transport with the lowest estimated response
    /// time, measured and smoothed according to `config`.
    pub fn least_response_time_with<C>(
        &self,
        config: LeastResponseTimeConfig<C>,
    ) -> Dispatcher<LeastResponseTime<F::Transport, C>>
    where
        C: Calculator + Clone,
    {
        Dispatcher::new(LeastResponseTime::new(self.build_transports(), config))
    }
}
