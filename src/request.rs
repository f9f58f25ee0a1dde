//! Request configuration.
//!
//! A [`Request`] is an immutable snapshot: each fluent call consumes the
//! snapshot and returns the next one. Executing a request consumes it too, so
//! a snapshot can only run once; a redirect hop is a fresh copy with only the
//! URL replaced.

use std::fmt;
use std::future::IntoFuture;
use std::time::Duration;

use http::header::{ACCEPT_ENCODING, CONTENT_LENGTH};
use http::{HeaderMap, HeaderName, HeaderValue};
use url::{form_urlencoded, Url};

use crate::engine::ResponseFuture;
use crate::middleware::capability;
use crate::payload::{self, EncodedBody, Payload};
use crate::Client;
use crate::Error;
use crate::Method;

/// Value of `accept-encoding` set when compression is enabled.
pub const ACCEPT_COMPRESSED: &str = "gzip, deflate";

/// Conversion into an absolute [`Url`].
pub trait IntoUrl {
    /// Parse or validate the URL.
    fn into_url(self) -> Result<Url, Error>;
}

impl IntoUrl for Url {
    fn into_url(self) -> Result<Url, Error> {
        match self.scheme() {
            "http" | "https" if self.has_host() => Ok(self),
            _ => Err(Error::UnsupportedScheme(self)),
        }
    }
}

impl IntoUrl for &Url {
    fn into_url(self) -> Result<Url, Error> {
        self.clone().into_url()
    }
}

impl IntoUrl for &str {
    fn into_url(self) -> Result<Url, Error> {
        Url::parse(self)
            .map_err(|source| Error::InvalidUrl {
                input: self.to_owned(),
                source,
            })?
            .into_url()
    }
}

impl IntoUrl for String {
    fn into_url(self) -> Result<Url, Error> {
        self.as_str().into_url()
    }
}

impl IntoUrl for &String {
    fn into_url(self) -> Result<Url, Error> {
        self.as_str().into_url()
    }
}

/// Options-bag form of a request, for configuration driven callers.
///
/// Every field is validated exactly as the equivalent fluent call would be.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// The URL to make the request to.
    pub url: String,

    /// Method name, case-insensitive. Defaults to `GET`.
    pub method: Option<String>,

    /// Headers to add.
    pub headers: Vec<(String, String)>,

    /// Body to send.
    pub data: Option<Payload>,

    /// Timeout for each attempt.
    pub timeout: Option<Duration>,

    /// Follow `location` headers. Requires the `redirect` middleware.
    pub follow_redirects: bool,

    /// Decode compressed responses. Requires the `compress` middleware.
    pub compress: bool,

    /// Return a live response body. Requires the `stream` middleware.
    pub stream: bool,
}

/// An outbound HTTP request.
#[derive(Clone)]
pub struct Request {
    client: Client,
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: EncodedBody,
    timeout: Option<Duration>,
    follow_redirects: bool,
    compress: bool,
    streaming: bool,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &crate::DebugLiteral(&self.url))
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("timeout", &self.timeout)
            .field("follow_redirects", &self.follow_redirects)
            .field("compress", &self.compress)
            .field("streaming", &self.streaming)
            .finish()
    }
}

impl Request {
    /// Create a request for `client`.
    ///
    /// Fails with [`ErrorKind::InvalidArgument`][crate::ErrorKind::InvalidArgument]
    /// if the URL is malformed or not an `http`/`https` URL, or if the
    /// client's default timeout is zero.
    pub fn new<U: IntoUrl>(client: &Client, method: Method, url: U) -> Result<Self, Error> {
        let request = Self {
            client: client.clone(),
            method,
            url: url.into_url()?,
            headers: HeaderMap::new(),
            body: EncodedBody::Empty,
            timeout: None,
            follow_redirects: false,
            compress: false,
            streaming: false,
        };

        match client.config().timeout {
            Some(timeout) => request.with_timeout(timeout),
            None => Ok(request),
        }
    }

    /// Create a request from an options bag.
    pub fn from_options(client: &Client, options: RequestOptions) -> Result<Self, Error> {
        let method = match options.method.as_deref() {
            Some(method) => method.parse()?,
            None => Method::default(),
        };

        let mut request = Self::new(client, method, options.url)?.with_headers(options.headers)?;

        if let Some(timeout) = options.timeout {
            request = request.with_timeout(timeout)?;
        }
        if options.follow_redirects {
            request = request.enable_redirect_following()?;
        }
        if options.compress {
            request = request.enable_compression()?;
        }
        if options.stream {
            request = request.enable_streaming()?;
        }
        if let Some(data) = options.data {
            request = request.with_body(data)?;
        }

        Ok(request)
    }

    /// Set a query parameter. An existing parameter with the same name is
    /// replaced, keeping its position. Other parameters are left exactly as
    /// they were written.
    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        let pair = form_urlencoded::Serializer::new(String::new())
            .append_pair(name, value)
            .finish();

        let mut replaced = false;
        let mut segments = Vec::new();
        for segment in self.url.query().unwrap_or_default().split('&') {
            if segment.is_empty() {
                continue;
            }

            let matches = form_urlencoded::parse(segment.as_bytes())
                .next()
                .is_some_and(|(key, _)| key == name);
            if !matches {
                segments.push(segment.to_owned());
            } else if !replaced {
                segments.push(pair.clone());
                replaced = true;
            }
        }
        if !replaced {
            segments.push(pair);
        }

        self.url.set_query(Some(&segments.join("&")));
        self
    }

    /// Set several query parameters, in order.
    pub fn with_queries<I, K, V>(self, queries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        queries.into_iter().fold(self, |request, (name, value)| {
            request.with_query(name.as_ref(), value.as_ref())
        })
    }

    /// Set a header, replacing any earlier value.
    pub fn with_header<K, V>(mut self, name: K, value: V) -> Result<Self, Error>
    where
        K: TryInto<HeaderName> + AsRef<str>,
        K::Error: fmt::Display,
        V: TryInto<HeaderValue>,
        V::Error: fmt::Display,
    {
        let label = name.as_ref().to_owned();
        let name = name.try_into().map_err(|error| Error::InvalidHeader {
            name: label.clone(),
            message: error.to_string(),
        })?;
        let value = value.try_into().map_err(|error| Error::InvalidHeader {
            name: label,
            message: error.to_string(),
        })?;

        self.headers.insert(name, value);
        Ok(self)
    }

    /// Set several headers, in order.
    pub fn with_headers<I, K, V>(self, headers: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: TryInto<HeaderName> + AsRef<str>,
        K::Error: fmt::Display,
        V: TryInto<HeaderValue>,
        V::Error: fmt::Display,
    {
        headers
            .into_iter()
            .try_fold(self, |request, (name, value)| request.with_header(name, value))
    }

    /// Attach a body, replacing any earlier one.
    ///
    /// Form bodies need the [`Forms`][crate::middleware::Forms] middleware.
    pub fn with_body<P: Into<Payload>>(mut self, payload: P) -> Result<Self, Error> {
        let mut headers = self.headers.clone();
        if self.body.is_multipart() {
            headers.remove(CONTENT_LENGTH);
        }

        self.body = payload::encode(payload.into(), self.client.registry(), &mut headers)?;
        self.headers = headers;
        Ok(self)
    }

    /// Time out each attempt after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, Error> {
        if timeout.is_zero() {
            return Err(Error::InvalidTimeout(format!("{timeout:?}")));
        }

        self.timeout = Some(timeout);
        Ok(self)
    }

    /// Time out each attempt after `millis` milliseconds.
    pub fn with_timeout_millis(self, millis: f64) -> Result<Self, Error> {
        if !millis.is_finite() || millis <= 0.0 {
            return Err(Error::InvalidTimeout(millis.to_string()));
        }

        let nanos = millis * 1_000_000.0;
        if nanos >= u64::MAX as f64 {
            return Err(Error::InvalidTimeout(millis.to_string()));
        }

        self.with_timeout(Duration::from_nanos(nanos as u64))
    }

    /// Follow `location` headers. Needs the [`Redirects`][crate::middleware::Redirects] middleware.
    pub fn enable_redirect_following(mut self) -> Result<Self, Error> {
        self.client.registry().require(capability::REDIRECT)?;
        self.follow_redirects = true;
        Ok(self)
    }

    /// Decode `gzip`/`deflate` responses. Needs the
    /// [`Compression`][crate::middleware::Compression] middleware.
    ///
    /// Also sets `accept-encoding: gzip, deflate` unless the request already
    /// carries an `accept-encoding` header.
    pub fn enable_compression(mut self) -> Result<Self, Error> {
        self.client.registry().require(capability::COMPRESS)?;
        self.headers
            .entry(ACCEPT_ENCODING)
            .or_insert(HeaderValue::from_static(ACCEPT_COMPRESSED));
        self.compress = true;
        Ok(self)
    }

    /// Return the response body as a live stream. Needs the
    /// [`Streams`][crate::middleware::Streams] middleware.
    pub fn enable_streaming(mut self) -> Result<Self, Error> {
        self.client.registry().require(capability::STREAM)?;
        self.streaming = true;
        Ok(self)
    }

    /// The client this request belongs to.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The absolute request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The request headers, before any headers derived at send time.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The encoded request body.
    pub fn body(&self) -> &EncodedBody {
        &self.body
    }

    /// The timeout for each attempt.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether redirects are followed.
    pub fn follows_redirects(&self) -> bool {
        self.follow_redirects
    }

    /// Whether compressed responses are decoded.
    pub fn compresses(&self) -> bool {
        self.compress
    }

    /// Whether the response body is streamed.
    pub fn streams(&self) -> bool {
        self.streaming
    }

    /// A copy of this request sent to `url` instead.
    pub fn redirected(&self, url: Url) -> Self {
        Self {
            url,
            ..self.clone()
        }
    }

    /// Execute the request.
    pub fn send(self) -> ResponseFuture {
        ResponseFuture::new(self)
    }
}

impl IntoFuture for Request {
    type Output = <ResponseFuture as std::future::Future>::Output;
    type IntoFuture = ResponseFuture;

    fn into_future(self) -> Self::IntoFuture {
        self.send()
    }
}
