//! The dispatcher: a [`tower::Service`] which routes each request through a
//! transport chosen by a [`Policy`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use pin_project::pin_project;
use tower::Service;

use crate::error::NoTransportsAvailable;
use crate::policy::Policy;
use crate::transport::Transport;
use crate::BoxError;

/// Routes requests across the transports owned by a [`Policy`].
///
/// Every call acquires one transport, executes the request on it, and
/// releases the transport exactly once when the exchange ends, whether it
/// succeeds, fails, panics, or is dropped before completion. The response
/// or error from the transport is passed through unchanged; the only error
/// the dispatcher adds is [`NoTransportsAvailable`].
///
/// The dispatcher is always ready, and clones share the same policy.
#[derive(Debug)]
pub struct Dispatcher<P> {
    policy: Arc<P>,
}

impl<P> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
        }
    }
}

impl<P> Dispatcher<P>
where
    P: Policy,
{
    /// Dispatch requests using `policy`.
    pub fn new(policy: P) -> Self {
        Self::from_shared(Arc::new(policy))
    }

    /// Dispatch requests using a policy which is shared elsewhere.
    pub fn from_shared(policy: Arc<P>) -> Self {
        Self { policy }
    }

    /// The policy choosing transports for this dispatcher.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Execute `request` on a transport chosen by the policy.
    ///
    /// The transport is acquired immediately, so it counts as in flight from
    /// this call until the returned future completes or is dropped.
    pub fn dispatch<Req>(
        &self,
        request: Req,
    ) -> ResponseFuture<P, <P::Transport as Transport<Req>>::Future>
    where
        P::Transport: Transport<Req>,
    {
        let transport = match self.policy.acquire() {
            Ok(transport) => transport,
            Err(error) => {
                tracing::debug!("no transports available");
                return ResponseFuture::unavailable(error);
            }
        };

        // Constructed before executing, so a panic inside `execute` still releases.
        let checkout = Checkout {
            policy: self.policy.clone(),
            transport,
        };
        let future = checkout.transport.execute(request);
        ResponseFuture::exchange(future, checkout)
    }
}

impl<P, Req> Service<Req> for Dispatcher<P>
where
    P: Policy,
    P::Transport: Transport<Req>,
{
    type Response = <P::Transport as Transport<Req>>::Response;
    type Error = BoxError;
    type Future = ResponseFuture<P, <P::Transport as Transport<Req>>::Future>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Req) -> Self::Future {
        self.dispatch(request)
    }
}

/// A transport on loan from a policy, released when dropped.
struct Checkout<P: Policy> {
    policy: Arc<P>,
    transport: Arc<P::Transport>,
}

impl<P: Policy> Drop for Checkout<P> {
    fn drop(&mut self) {
        self.policy.release(&self.transport);
        tracing::trace!("released transport");
    }
}

/// Future returned by [`Dispatcher`], resolving to the transport's response.
#[pin_project]
pub struct ResponseFuture<P: Policy, F> {
    #[pin]
    state: State<P, F>,
}

#[pin_project(project = StateProj)]
enum State<P: Policy, F> {
    Exchange {
        #[pin]
        future: F,
        checkout: Option<Checkout<P>>,
    },
    Unavailable {
        error: NoTransportsAvailable,
    },
}

impl<P: Policy, F> ResponseFuture<P, F> {
    fn exchange(future: F, checkout: Checkout<P>) -> Self {
        Self {
            state: State::Exchange {
                future,
                checkout: Some(checkout),
            },
        }
    }

    fn unavailable(error: NoTransportsAvailable) -> Self {
        Self {
            state: State::Unavailable { error },
        }
    }
}

impl<P: Policy, F> fmt::Debug for ResponseFuture<P, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Exchange { checkout, .. } if checkout.is_some() => "Exchange",
            State::Exchange { .. } => "Complete",
            State::Unavailable { .. } => "Unavailable",
        };
        f.debug_struct("ResponseFuture")
            .field("state", &state)
            .finish()
    }
}

impl<P, F, R, E> Future for ResponseFuture<P, F>
where
    P: Policy,
    F: Future<Output = Result<R, E>>,
    E: Into<BoxError>,
{
    type Output = Result<R, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().state.project() {
            StateProj::Exchange { future, checkout } => {
                let result = ready!(future.poll(cx));
                checkout.take();
                Poll::Ready(result.map_err(Into::into))
            }
            StateProj::Unavailable { error } => Poll::Ready(Err((*error).into())),
        }
    }
}
