//! A scripted in-memory transport, suitable for testing engine behavior
//! without a network.
//!
//! Responses are registered per URL. Each call records the request it
//! received, so tests can assert what was sent over the wire.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use ::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt as _;
use http_body::Frame;
use http_body_util::{BodyExt as _, StreamBody};
use parking_lot::Mutex;
use thiserror::Error;

use crate::body::{Body, HttpRequest, HttpResponse};
use crate::BoxError;

/// Error produced by a scripted failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct MockError(String);

impl MockError {
    /// Create an error with a message.
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self(message.into())
    }
}

/// A scripted response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    chunks: Vec<Result<Bytes, MockError>>,
    stall_body: bool,
    delay: Option<Duration>,
    hang: bool,
    fail: Option<MockError>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl MockResponse {
    /// An empty response with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            headers: HeaderMap::new(),
            chunks: Vec::new(),
            stall_body: false,
            delay: None,
            hang: false,
            fail: None,
        }
    }

    /// A `200 OK` response.
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// A redirect to `location` with the given status.
    pub fn redirect(status: StatusCode, location: &str) -> Self {
        Self::new(status).with_header("location", location)
    }

    /// A call which fails at the transport level.
    pub fn failure<S: Into<String>>(message: S) -> Self {
        Self {
            fail: Some(MockError::new(message)),
            ..Self::default()
        }
    }

    /// A call which never produces a response.
    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    /// Send a custom reason phrase on the status line.
    pub fn with_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Add a response header.
    ///
    /// Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name),
            HeaderValue::try_from(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Append a body chunk.
    pub fn with_chunk<B: Into<Bytes>>(mut self, chunk: B) -> Self {
        self.chunks.push(Ok(chunk.into()));
        self
    }

    /// Set the whole body as a single chunk.
    pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.chunks = vec![Ok(body.into())];
        self
    }

    /// Append a chunk which fails when read.
    pub fn with_body_error<S: Into<String>>(mut self, message: S) -> Self {
        self.chunks.push(Err(MockError::new(message)));
        self
    }

    /// After the scripted chunks, the body never ends.
    pub fn with_stalled_body(mut self) -> Self {
        self.stall_body = true;
        self
    }

    /// Wait before producing the response head.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn into_http(self) -> HttpResponse {
        let body = if self.chunks.is_empty() && !self.stall_body {
            Body::empty()
        } else {
            let frames = futures_util::stream::iter(self.chunks)
                .map(|chunk| chunk.map(Frame::data).map_err(BoxError::from));
            if self.stall_body {
                Body::wrap(StreamBody::new(
                    frames.chain(futures_util::stream::pending()),
                ))
            } else {
                Body::wrap(StreamBody::new(frames))
            }
        };

        let mut response = HttpResponse::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;

        if let Some(reason) = self.reason {
            match hyper::ext::ReasonPhrase::try_from(reason) {
                Ok(reason) => {
                    response.extensions_mut().insert(reason);
                }
                Err(_) => tracing::warn!("ignoring invalid mock reason phrase"),
            }
        }

        response
    }
}

/// A request as observed by a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method.
    pub method: Method,
    /// Absolute request URI.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// The collected request body.
    pub body: Bytes,
}

impl RecordedRequest {
    /// The body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback {
    NotFound,
    Ok,
}

#[derive(Debug)]
struct State {
    queued: HashMap<String, VecDeque<MockResponse>>,
    routes: HashMap<String, MockResponse>,
    fallback: Fallback,
    requests: Vec<RecordedRequest>,
    aborted: usize,
}

impl State {
    fn next(&mut self, key: &str) -> MockResponse {
        if let Some(response) = self.queued.get_mut(key).and_then(VecDeque::pop_front) {
            return response;
        }

        if let Some(response) = self.routes.get(key) {
            return response.clone();
        }

        match self.fallback {
            Fallback::NotFound => MockResponse::new(StatusCode::NOT_FOUND),
            Fallback::Ok => MockResponse::ok(),
        }
    }
}

/// A transport which answers requests from a script.
///
/// Clones share their script and their record of requests.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockTransport")
            .field("routes", &state.routes.len())
            .field("requests", &state.requests.len())
            .finish()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A transport which answers `404 Not Found` for unknown URLs.
    pub fn new() -> Self {
        Self::with_fallback(Fallback::NotFound)
    }

    /// A transport which answers `200 OK` with an empty body for unknown URLs.
    pub fn permissive() -> Self {
        Self::with_fallback(Fallback::Ok)
    }

    fn with_fallback(fallback: Fallback) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                queued: HashMap::new(),
                routes: HashMap::new(),
                fallback,
                requests: Vec::new(),
                aborted: 0,
            })),
        }
    }

    /// Answer every request to `url` with `response`.
    pub fn route(self, url: &str, response: MockResponse) -> Self {
        self.state.lock().routes.insert(normalize(url), response);
        self
    }

    /// Answer the next request to `url` with `response`. Queued responses are
    /// used in order before any routed response.
    pub fn enqueue(self, url: &str, response: MockResponse) -> Self {
        self.state
            .lock()
            .queued
            .entry(normalize(url))
            .or_default()
            .push_back(response);
        self
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of requests received.
    pub fn calls(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Number of calls which were dropped before producing a response.
    pub fn aborted(&self) -> usize {
        self.state.lock().aborted
    }
}

fn normalize(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.into()
        }
        Err(_) => url.to_owned(),
    }
}

/// Counts the call as aborted unless disarmed before it is dropped.
struct AbortGuard {
    state: Arc<Mutex<State>>,
    armed: bool,
}

impl AbortGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::trace!("mock call aborted");
            self.state.lock().aborted += 1;
        }
    }
}

impl tower::Service<HttpRequest> for MockTransport {
    type Response = HttpResponse;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<HttpResponse, BoxError>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: HttpRequest) -> Self::Future {
        let state = self.state.clone();
        Box::pin(async move {
            let (parts, body) = request.into_parts();
            let body = body.collect().await?.to_bytes();

            let response = {
                let mut state = state.lock();
                state.requests.push(RecordedRequest {
                    method: parts.method,
                    uri: parts.uri.clone(),
                    headers: parts.headers,
                    body,
                });
                state.next(&normalize(&parts.uri.to_string()))
            };

            let guard = AbortGuard {
                state,
                armed: true,
            };

            if let Some(delay) = response.delay {
                tokio::time::sleep(delay).await;
            }

            if response.hang {
                std::future::pending::<()>().await;
            }

            guard.disarm();
            match response.fail.clone() {
                Some(error) => Err(error.into()),
                None => Ok(response.into_http()),
            }
        })
    }
}

#[cfg(test)]
mod tests {

    use http_body_util::BodyExt;
    use static_assertions::assert_impl_all;
    use tower::ServiceExt;

    use super::*;

    assert_impl_all!(MockTransport: crate::transport::Transport, Send, Sync);

    fn get(uri: &str) -> HttpRequest {
        ::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let transport = MockTransport::new();
        let response = transport.oneshot(get("http://example.com/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let transport = MockTransport::permissive();
        let response = transport.oneshot(get("http://example.com/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn queued_before_routed() {
        let transport = MockTransport::new()
            .route("http://example.com", MockResponse::ok().with_body("routed"))
            .enqueue(
                "http://example.com/",
                MockResponse::new(StatusCode::ACCEPTED).with_body("queued"),
            );

        let first = transport
            .clone()
            .oneshot(get("http://example.com/"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let body = first.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "queued");

        let second = transport
            .clone()
            .oneshot(get("http://example.com/"))
            .await
            .unwrap();
        let body = second.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "routed");

        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn records_requests() {
        let transport = MockTransport::permissive();
        let request = ::http::Request::builder()
            .method(Method::POST)
            .uri("http://example.com/submit")
            .header("x-test", "1")
            .body(Body::from("payload"))
            .unwrap();
        transport.clone().oneshot(request).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::POST);
        assert_eq!(requests[0].headers["x-test"], "1");
        assert_eq!(requests[0].text(), "payload");
    }

    #[tokio::test]
    async fn scripted_failure() {
        let transport =
            MockTransport::new().route("http://example.com/", MockResponse::failure("refused"));
        let error = transport
            .clone()
            .oneshot(get("http://example.com/"))
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "refused");
        assert_eq!(transport.aborted(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_call_counts_as_aborted() {
        let transport = MockTransport::new().route("http://example.com/", MockResponse::hang());
        let call = transport.clone().oneshot(get("http://example.com/"));

        let result = tokio::time::timeout(Duration::from_millis(10), call).await;
        assert!(result.is_err());
        assert_eq!(transport.aborted(), 1);
    }

    #[tokio::test]
    async fn body_chunks_and_errors() {
        let transport = MockTransport::new().route(
            "http://example.com/",
            MockResponse::ok()
                .with_chunk("a")
                .with_chunk("b")
                .with_body_error("reset"),
        );
        let response = transport.oneshot(get("http://example.com/")).await.unwrap();
        let mut body = response.into_body();

        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert_eq!(first, "a");
        let second = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert_eq!(second, "b");
        let error = body.frame().await.unwrap().unwrap_err();
        assert_eq!(error.to_string(), "reset");
    }

    #[tokio::test]
    async fn reason_phrase_extension() {
        let transport = MockTransport::new().route(
            "http://example.com/",
            MockResponse::new(StatusCode::IM_A_TEAPOT).with_reason("Short And Stout"),
        );
        let response = transport.oneshot(get("http://example.com/")).await.unwrap();
        let reason = response
            .extensions()
            .get::<hyper::ext::ReasonPhrase>()
            .unwrap();
        assert_eq!(reason.as_bytes(), b"Short And Stout");
    }
}
