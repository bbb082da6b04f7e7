use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};

use crate::error::Error;

/// Outcome of consulting one interceptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterceptionAction {
    /// Propagate the outcome to the caller unchanged.
    Continue,
    /// Resend the same frozen request descriptor after the delay.
    Retry { delay: Duration },
}

/// A finished, non-success attempt as seen by interceptors. Read-only: an
/// interceptor can trigger a resend but never mutate the request.
#[derive(Debug)]
pub struct AttemptRecord<'a> {
    pub method: &'a Method,
    pub uri: &'a str,
    pub status: Option<StatusCode>,
    pub body: Option<&'a Bytes>,
    pub error: &'a Error,
    /// Retries already performed for this logical request; lets an
    /// interceptor cap its own resends.
    pub retry_count: usize,
}

/// Post-outcome hook consulted in registration order on non-success outcomes.
/// The first `Retry` wins and stops consultation for that attempt.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, attempt: &AttemptRecord<'_>) -> InterceptionAction;
}

impl<F> Interceptor for F
where
    F: Fn(&AttemptRecord<'_>) -> InterceptionAction + Send + Sync,
{
    fn intercept(&self, attempt: &AttemptRecord<'_>) -> InterceptionAction {
        self(attempt)
    }
}

pub(crate) fn consult(
    chain: &[Arc<dyn Interceptor>],
    attempt: &AttemptRecord<'_>,
) -> InterceptionAction {
    for interceptor in chain {
        if let InterceptionAction::Retry { delay } = interceptor.intercept(attempt) {
            return InterceptionAction::Retry { delay };
        }
    }
    InterceptionAction::Continue
}
