//! Transports carry a single request to a server and return its response.
//!
//! A transport is any [`tower::Service`] from [`HttpRequest`] to
//! [`HttpResponse`] which is `Clone + Send + Sync`. The request URI is always
//! absolute; the transport is responsible for connecting to its authority.
//!
//! Dropping the future returned by [`tower::Service::call`] aborts the call.
//! The engine relies on this to cancel attempts which time out.

use std::fmt;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tower::util::BoxCloneSyncService;
use tower::Service as _;
use tower::ServiceExt as _;

use crate::body::{HttpRequest, HttpResponse};
use crate::BoxError;

#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub mod io;
#[cfg(any(test, feature = "mocks"))]
pub mod mock;

/// A service which can carry requests for the engine.
pub trait Transport: Clone + Send + Sync + 'static {
    /// Erase the transport type.
    fn into_shared(self) -> SharedTransport;
}

impl<S> Transport for S
where
    S: tower::Service<HttpRequest, Response = HttpResponse> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
{
    fn into_shared(self) -> SharedTransport {
        SharedTransport {
            inner: BoxCloneSyncService::new(self.map_err(|error: S::Error| error.into())),
        }
    }
}

/// A type-erased, cloneable [`Transport`].
#[derive(Clone)]
pub struct SharedTransport {
    inner: BoxCloneSyncService<HttpRequest, HttpResponse, BoxError>,
}

impl fmt::Debug for SharedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedTransport").finish()
    }
}

impl tower::Service<HttpRequest> for SharedTransport {
    type Response = HttpResponse;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<HttpResponse, BoxError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: HttpRequest) -> Self::Future {
        self.inner.call(request)
    }
}

/// Transport used when a client is built without one and the `http` feature
/// is disabled. Every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

/// Error returned by [`Unavailable`].
#[derive(Debug, thiserror::Error)]
#[error("no transport configured")]
pub struct UnavailableError;

impl tower::Service<HttpRequest> for Unavailable {
    type Response = HttpResponse;
    type Error = UnavailableError;
    type Future = std::future::Ready<Result<HttpResponse, UnavailableError>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _: HttpRequest) -> Self::Future {
        std::future::ready(Err(UnavailableError))
    }
}

pub(crate) fn default_transport() -> SharedTransport {
    #[cfg(feature = "http")]
    {
        self::http::HttpTransport::default().into_shared()
    }

    #[cfg(not(feature = "http"))]
    {
        Unavailable.into_shared()
    }
}
