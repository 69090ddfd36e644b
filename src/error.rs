use thiserror::Error;

use crate::BoxError;

/// A policy was asked for a transport, but holds none.
///
/// This usually means every descriptor handed to the [`TransportFactory`][crate::TransportFactory]
/// failed to produce a transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("no transports available")]
pub struct NoTransportsAvailable;

/// Errors raised while turning a descriptor into a transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FactoryError {
    /// The descriptor could not be parsed.
    #[error("invalid descriptor {descriptor:?}: {reason}")]
    InvalidDescriptor {
        /// The descriptor which was rejected.
        descriptor: String,

        /// Why it was rejected.
        reason: String,
    },

    /// The SOCKS5 dialer for the descriptor could not be built.
    #[error("building socks5 dialer for {descriptor:?}")]
    DialerConstruction {
        /// The descriptor which was rejected.
        descriptor: String,

        /// The underlying problem.
        #[source]
        source: BoxError,
    },
}

impl FactoryError {
    pub(crate) fn invalid(descriptor: &str, reason: impl ToString) -> Self {
        FactoryError::InvalidDescriptor {
            descriptor: descriptor.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn dialer(descriptor: &str, source: impl Into<BoxError>) -> Self {
        FactoryError::DialerConstruction {
            descriptor: descriptor.to_owned(),
            source: source.into(),
        }
    }
}

/// Errors raised when configuring a response time [`Calculator`][crate::Calculator].
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[non_exhaustive]
pub enum CalculatorError {
    /// Weighted averages need a weight in `[0, 1]`.
    #[error("weight must be between 0 and 1, got {0}")]
    InvalidWeight(f64),

    /// Moving averages need a window of at least one sample, and at most `u32::MAX`.
    #[error("window size must be between 1 and 4294967295, got {0}")]
    InvalidWindowSize(usize),
}
