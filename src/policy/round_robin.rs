use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::Policy;
use crate::error::NoTransportsAvailable;

/// Hands out transports in a fixed cyclic order.
///
/// For `k` transports, the `i`-th call to [`acquire`][Policy::acquire] returns
/// transport `i mod k`. Releasing is a no-op, since the order does not depend
/// on load.
pub struct RoundRobin<T> {
    transports: Vec<Arc<T>>,
    last: Mutex<Option<usize>>,
}

impl<T> fmt::Debug for RoundRobin<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundRobin")
            .field("transports", &self.transports.len())
            .field("last", &*self.last.lock())
            .finish()
    }
}

impl<T> RoundRobin<T> {
    /// Create a round-robin policy over `transports`, starting with the first.
    pub fn new(transports: Vec<T>) -> Self {
        Self {
            transports: transports.into_iter().map(Arc::new).collect(),
            last: Mutex::new(None),
        }
    }

    /// The transports, in selection order.
    pub fn transports(&self) -> &[Arc<T>] {
        &self.transports
    }
}

impl<T> Policy for RoundRobin<T>
where
    T: Send + Sync + 'static,
{
    type Transport = T;

    fn acquire(&self) -> Result<Arc<T>, NoTransportsAvailable> {
        if self.transports.is_empty() {
            return Err(NoTransportsAvailable);
        }

        let mut last = self.last.lock();
        let index = last.map_or(0, |last| (last + 1) % self.transports.len());
        *last = Some(index);

        trace!(index, "round robin selected transport");
        Ok(self.transports[index].clone())
    }

    fn release(&self, _transport: &Arc<T>) {}
}
