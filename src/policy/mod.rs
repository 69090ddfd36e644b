//! Transport selection policies.
//!
//! A [`Policy`] owns a fixed, ordered set of transports and decides which of
//! them serves the next request. The [`Dispatcher`][crate::Dispatcher] pairs
//! every [`acquire`][Policy::acquire] with exactly one
//! [`release`][Policy::release] of the same transport once the exchange ends.
//!
//! Three policies are built in:
//!
//! - [`RoundRobin`] cycles through the transports in order.
//! - [`FillHoles`] picks the transport with the fewest requests in flight.
//! - [`LeastResponseTime`] picks the transport with the lowest estimated
//!   response time.
//!
//! Anything else, e.g. sticky routing or health-aware exclusion, is an
//! ordinary implementation of [`Policy`].

use std::sync::Arc;

use crate::error::NoTransportsAvailable;

mod fill_holes;
mod least_response_time;
mod round_robin;

pub use self::fill_holes::FillHoles;
pub use self::least_response_time::{Clock, LeastResponseTime, LeastResponseTimeConfig, Timed};
pub use self::round_robin::RoundRobin;

/// Chooses which transport serves the next request.
///
/// Policies are shared between concurrent callers, so both methods take
/// `&self` and must synchronize internally. Neither may block waiting for
/// other requests to finish.
pub trait Policy: Send + Sync + 'static {
    /// The transport type handed out by this policy.
    type Transport: ?Sized + Send + Sync + 'static;

    /// Select a transport for one request.
    fn acquire(&self) -> Result<Arc<Self::Transport>, NoTransportsAvailable>;

    /// Report that an exchange on `transport` has finished.
    ///
    /// Releasing a transport which is not currently in flight must not
    /// disturb the policy's bookkeeping.
    fn release(&self, transport: &Arc<Self::Transport>);
}

impl<P> Policy for Arc<P>
where
    P: Policy + ?Sized,
{
    type Transport = P::Transport;

    fn acquire(&self) -> Result<Arc<Self::Transport>, NoTransportsAvailable> {
        (**self).acquire()
    }

    fn release(&self, transport: &Arc<Self::Transport>) {
        (**self).release(transport)
    }
}

impl<P> Policy for Box<P>
where
    P: Policy + ?Sized,
{
    type Transport = P::Transport;

    fn acquire(&self) -> Result<Arc<Self::Transport>, NoTransportsAvailable> {
        (**self).acquire()
    }

    fn release(&self, transport: &Arc<Self::Transport>) {
        (**self).release(transport)
    }
}

/// Index of the smallest key, preferring the earliest on ties.
fn first_minimum<K: Ord>(keys: impl IntoIterator<Item = K>) -> Option<usize> {
    let mut best: Option<(usize, K)> = None;
    for (index, key) in keys.into_iter().enumerate() {
        let smaller = match &best {
            Some((_, current)) => key < *current,
            None => true,
        };
        if smaller {
            best = Some((index, key));
        }
    }
    best.map(|(index, _)| index)
}
