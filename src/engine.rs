//! The execution engine: runs a [`Request`] through middleware, the
//! transport, redirect hops and response decoding.
//!
//! Each physical attempt goes
//! `Sending -> AwaitingResponse -> (Redirecting | Completed | Failed | TimedOut)`,
//! and a redirect loops back to `Sending` with a fresh copy of the request.
//! The timeout, when set, applies to each attempt separately.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::header::{ACCEPT_ENCODING, LOCATION, USER_AGENT};
use http::{HeaderValue, Uri};
use http_body::Body as _;
use http_body_util::BodyExt as _;
use tower::ServiceExt as _;
use tracing::{debug, trace, Instrument as _};
use url::Url;

use crate::decode::{Decoded, Encoding};
use crate::middleware::{self, capability, Phase};
use crate::request::{IntoUrl as _, ACCEPT_COMPRESSED};
use crate::response::{Accumulator, Head, Response, ResponseBody};
use crate::timeout::{Elapsed, Timeout};
use crate::{Body, Client, Error, Request};

/// Future returned by [`Request::send`].
///
/// Resolves to the terminal [`Response`] of the redirect chain. Dropping it
/// drops the in-flight attempt.
#[must_use = "requests do nothing unless awaited"]
pub struct ResponseFuture {
    inner: BoxFuture<'static, Result<Response, Error>>,
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture").finish()
    }
}

impl ResponseFuture {
    pub(crate) fn new(request: Request) -> Self {
        let span = tracing::debug_span!(
            "request",
            method = %request.method(),
            url = %request.url()
        );
        Self {
            inner: Box::pin(execute(request).instrument(span)),
        }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Configured,
    Sending,
    AwaitingResponse,
    Redirecting,
    Completed,
    Failed,
    TimedOut,
}

#[derive(Debug)]
struct Machine {
    state: State,
}

impl Machine {
    fn new() -> Self {
        Self {
            state: State::Configured,
        }
    }

    fn to(&mut self, next: State) {
        trace!(from = ?self.state, to = ?next, "transition");
        self.state = next;
    }
}

enum Outcome {
    Redirect(Url),
    Complete(Response),
}

async fn execute(request: Request) -> Result<Response, Error> {
    let client = request.client().clone();
    let method = request.method();
    let url = request.url().clone();

    let result = run(&client, request).await;
    if let Err(error) = &result {
        if client.registry().has(capability::LOGGER) {
            tracing::error!("Request to \"{method} {url}\" failed: {error}");
        } else {
            debug!("request failed: {error}");
        }
    }
    result
}

async fn run(client: &Client, request: Request) -> Result<Response, Error> {
    let registry = client.registry();
    let limit = registry.redirect_limit();

    let mut machine = Machine::new();
    let mut current = request;
    let mut hop = 0;

    loop {
        machine.to(State::Sending);
        let timeout = current.timeout();
        let outcome = Timeout::new(attempt(client, &current, hop, &mut machine), timeout).await;

        match outcome {
            Ok(Ok(Outcome::Redirect(next))) => {
                if hop >= limit {
                    machine.to(State::Failed);
                    return Err(Error::TooManyRedirects { url: next, limit });
                }

                machine.to(State::Redirecting);
                debug!(hop, from = %current.url(), to = %next, "following redirect");
                current = current.redirected(next);
                hop += 1;
            }
            Ok(Ok(Outcome::Complete(response))) => {
                let cx = middleware::Context::new(
                    current.method(),
                    current.url(),
                    hop,
                    Some(response.status()),
                    registry,
                );
                for middleware in registry.filter(Phase::PostCompletion) {
                    middleware.intertwine(&cx).map_err(Error::Middleware)?;
                }

                machine.to(State::Completed);
                return Ok(response);
            }
            Ok(Err(error)) => {
                machine.to(State::Failed);
                return Err(error);
            }
            Err(Elapsed) => {
                machine.to(State::TimedOut);
                trace!("attempt aborted");
                return Err(Error::Timeout {
                    url: current.url().clone(),
                    timeout: timeout.unwrap_or_default(),
                });
            }
        }
    }
}

async fn attempt(
    client: &Client,
    request: &Request,
    hop: usize,
    machine: &mut Machine,
) -> Result<Outcome, Error> {
    let registry = client.registry();
    let method = request.method();

    let cx = middleware::Context::new(method, request.url(), hop, None, registry);
    for middleware in registry.filter(Phase::PreSend) {
        middleware.intertwine(&cx).map_err(Error::Middleware)?;
    }

    let compress = request.compresses() || registry.always_on(capability::COMPRESS);
    let streaming = request.streams() || registry.always_on(capability::STREAM);

    let mut headers = request.headers().clone();
    if !headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, client.config().user_agent.clone());
    }
    if compress {
        headers
            .entry(ACCEPT_ENCODING)
            .or_insert(HeaderValue::from_static(ACCEPT_COMPRESSED));
    }

    let body = request.body().clone().resolve(registry, &mut headers).await?;

    let transport_error = |source: crate::BoxError| Error::Transport {
        method,
        url: request.url().clone(),
        source,
    };

    let mut target = request.url().clone();
    target.set_fragment(None);
    let uri: Uri = target
        .as_str()
        .parse()
        .map_err(|error: http::uri::InvalidUri| transport_error(error.into()))?;

    let mut outbound = http::Request::new(body);
    *outbound.method_mut() = method.into();
    *outbound.uri_mut() = uri;
    *outbound.headers_mut() = headers;

    let response = client
        .transport()
        .clone()
        .oneshot(outbound)
        .await
        .map_err(transport_error)?;

    machine.to(State::AwaitingResponse);
    let (parts, body) = response.into_parts();
    trace!(status = %parts.status, "received response head");

    let body = match compress
        .then(|| Encoding::from_headers(&parts.headers))
        .flatten()
        .filter(|_| !body.is_end_stream())
    {
        Some(encoding) => {
            trace!(?encoding, "decoding response body");
            Body::wrap(Decoded::new(body, encoding))
        }
        None => body,
    };

    if request.follows_redirects() {
        if let Some(location) = parts.headers.get(LOCATION) {
            let location = location.to_str().map_err(|error| Error::InvalidHeader {
                name: LOCATION.to_string(),
                message: error.to_string(),
            })?;
            let next = request
                .url()
                .join(location)
                .map_err(|source| Error::InvalidUrl {
                    input: location.to_owned(),
                    source,
                })?
                .into_url()?;

            drain(body).await;
            return Ok(Outcome::Redirect(next));
        }
    }

    let status_text = parts
        .extensions
        .get::<hyper::ext::ReasonPhrase>()
        .and_then(|reason| std::str::from_utf8(reason.as_bytes()).ok())
        .or_else(|| parts.status.canonical_reason())
        .unwrap_or_default()
        .to_owned();

    let head = Head {
        status: parts.status,
        status_text,
        headers: parts.headers,
        url: request.url().clone(),
        redirects: hop,
    };

    if streaming {
        check_status(&head)?;
        return Ok(Outcome::Complete(Response::new(
            head,
            ResponseBody::Streaming(body),
        )));
    }

    let mut accumulator = Accumulator::new(registry.has(capability::BLOB));
    let mut body = body;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(Error::serialization)?;
        if let Ok(data) = frame.into_data() {
            accumulator.push(&data);
        }
    }

    check_status(&head)?;
    let body = accumulator.finish(&head.headers);
    Ok(Outcome::Complete(Response::new(head, body)))
}

fn check_status(head: &Head) -> Result<(), Error> {
    if head.status.is_success() {
        return Ok(());
    }

    Err(Error::Status {
        status: head.status,
        reason: head.status_text.clone(),
        url: head.url.clone(),
    })
}

async fn drain(mut body: Body) {
    while let Some(frame) = body.frame().await {
        if let Err(error) = frame {
            trace!("error draining redirect body: {error}");
            break;
        }
    }
}
