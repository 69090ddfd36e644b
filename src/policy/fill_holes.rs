use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::{first_minimum, Policy};
use crate::error::NoTransportsAvailable;

/// Hands out the transport with the fewest requests in flight.
///
/// Each transport carries a counter which [`acquire`][Policy::acquire]
/// increments and [`release`][Policy::release] decrements, never below zero.
/// Ties go to the transport listed first. Selection and increment happen
/// under one lock, so concurrent callers never pick against a stale count.
pub struct FillHoles<T> {
    transports: Vec<Arc<T>>,
    in_flight: Mutex<Vec<usize>>,
}

impl<T> fmt::Debug for FillHoles<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FillHoles")
            .field("in_flight", &*self.in_flight.lock())
            .finish()
    }
}

impl<T> FillHoles<T> {
    /// Create a fill-holes policy over `transports`, all initially idle.
    pub fn new(transports: Vec<T>) -> Self {
        let in_flight = vec![0; transports.len()];
        Self {
            transports: transports.into_iter().map(Arc::new).collect(),
            in_flight: Mutex::new(in_flight),
        }
    }

    /// The transports, in tie-break order.
    pub fn transports(&self) -> &[Arc<T>] {
        &self.transports
    }

    /// A snapshot of the in-flight count of each transport.
    pub fn in_flight(&self) -> Vec<usize> {
        self.in_flight.lock().clone()
    }
}

impl<T> Policy for FillHoles<T>
where
    T: Send + Sync + 'static,
{
    type Transport = T;

    fn acquire(&self) -> Result<Arc<T>, NoTransportsAvailable> {
        let mut in_flight = self.in_flight.lock();
        let index = first_minimum(in_flight.iter().copied()).ok_or(NoTransportsAvailable)?;
        in_flight[index] += 1;

        trace!(index, in_flight = in_flight[index], "fill holes selected transport");
        Ok(self.transports[index].clone())
    }

    fn release(&self, transport: &Arc<T>) {
        let Some(index) = self
            .transports
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, transport))
        else {
            trace!("released a transport this policy does not own");
            return;
        };

        let mut in_flight = self.in_flight.lock();
        in_flight[index] = in_flight[index].saturating_sub(1);
        trace!(index, in_flight = in_flight[index], "fill holes released transport");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::mock::{transports, MockTransport};

    use static_assertions::assert_impl_all;

    assert_impl_all!(FillHoles<MockTransport>: Policy, Send, Sync);

    #[test]
    fn fills_the_least_loaded() {
        let policy = FillHoles::new(transports(&["A", "B", "C"]));

        let picked: Vec<_> = (0..4).map(|_| policy.acquire().unwrap().0).collect();
        assert_eq!(picked, vec!["A", "B", "C", "A"]);

        let next = policy.acquire().unwrap();
        assert_eq!(next.0, "B");
        assert_eq!(policy.in_flight(), vec![2, 2, 1]);
    }

    #[test]
    fn release_reopens_a_hole() {
        let policy = FillHoles::new(transports(&["A", "B", "C"]));

        let a = policy.acquire().unwrap();
        let _b = policy.acquire().unwrap();
        let _c = policy.acquire().unwrap();

        policy.release(&a);
        assert_eq!(policy.in_flight(), vec![0, 1, 1]);
        assert_eq!(policy.acquire().unwrap().0, "A");
    }

    #[test]
    fn release_is_floored_at_zero() {
        let policy = FillHoles::new(transports(&["A", "B"]));

        let a = policy.acquire().unwrap();
        policy.release(&a);
        policy.release(&a);
        policy.release(&a);
        assert_eq!(policy.in_flight(), vec![0, 0]);

        assert_eq!(policy.acquire().unwrap().0, "A");
        assert_eq!(policy.in_flight(), vec![1, 0]);
    }

    #[test]
    fn release_of_foreign_transport_is_ignored() {
        let policy = FillHoles::new(transports(&["A"]));
        let _a = policy.acquire().unwrap();

        policy.release(&Arc::new(MockTransport("A")));
        assert_eq!(policy.in_flight(), vec![1]);
    }

    #[test]
    fn counts_track_acquires_minus_releases() {
        let policy = FillHoles::new(transports(&["A", "B", "C"]));
        let mut held = Vec::new();
        let mut model = [0usize; 3];

        // Interleave acquires with releases of the oldest held transport.
        for step in 0..40 {
            if step % 3 == 2 && !held.is_empty() {
                let transport: Arc<MockTransport> = held.remove(0);
                let index = policy
                    .transports()
                    .iter()
                    .position(|t| Arc::ptr_eq(t, &transport))
                    .unwrap();
                model[index] -= 1;
                policy.release(&transport);
            } else {
                let before = policy.in_flight();
                let transport = policy.acquire().unwrap();
                let index = policy
                    .transports()
                    .iter()
                    .position(|t| Arc::ptr_eq(t, &transport))
                    .unwrap();
                assert!(before.iter().all(|&count| before[index] <= count));
                model[index] += 1;
                held.push(transport);
            }

            assert_eq!(policy.in_flight(), model.to_vec());
        }
    }

    #[test]
    fn empty() {
        let policy = FillHoles::<MockTransport>::new(Vec::new());
        assert_eq!(policy.acquire().unwrap_err(), NoTransportsAvailable);
        assert!(policy.in_flight().is_empty());
    }

    #[test]
    fn concurrent_acquire_and_release_balance_out() {
        let policy = Arc::new(FillHoles::new(transports(&["A", "B", "C"])));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let policy = policy.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let transport = policy.acquire().unwrap();
                        policy.release(&transport);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(policy.in_flight(), vec![0, 0, 0]);
    }
}
