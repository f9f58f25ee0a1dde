//! Races an attempt against an optional deadline.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project::pin_project;
use tokio::time::Sleep;

/// The deadline passed before the inner future completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Elapsed;

/// A future which resolves to the output of `inner`, or to [`Elapsed`] if the
/// timer fires first.
///
/// When the timer fires, `inner` is dropped in place before the error is
/// returned. After either outcome the future must not be polled again.
#[derive(Debug)]
#[pin_project]
pub(crate) struct Timeout<F> {
    #[pin]
    inner: Option<F>,

    #[pin]
    sleep: Option<Sleep>,
}

impl<F> Timeout<F> {
    pub(crate) fn new(inner: F, timeout: Option<Duration>) -> Self {
        Self {
            inner: Some(inner),
            sleep: timeout.map(tokio::time::sleep),
        }
    }
}

impl<F> Future for Timeout<F>
where
    F: Future,
{
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        let Some(inner) = this.inner.as_mut().as_pin_mut() else {
            return Poll::Ready(Err(Elapsed));
        };

        if let Poll::Ready(output) = inner.poll(cx) {
            this.sleep.set(None);
            return Poll::Ready(Ok(output));
        }

        match this.sleep.as_mut().as_pin_mut().map(|sleep| sleep.poll(cx)) {
            Some(Poll::Ready(())) => {
                this.inner.set(None);
                this.sleep.set(None);
                Poll::Ready(Err(Elapsed))
            }
            _ => Poll::Pending,
        }
    }
}
