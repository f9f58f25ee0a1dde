//! The client: a middleware registry, a transport and default settings.
//!
//! Clients are cheap to clone and can be shared across tasks. The
//! [`Registry`] is frozen when [`Builder::build`] is called, so registering
//! middleware never races with executing requests.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderValue;

use crate::middleware::{Middleware, Registry};
use crate::request::{IntoUrl, Request};
use crate::transport::{SharedTransport, Transport};
use crate::Error;
use crate::Method;

/// Client-wide defaults applied to every request.
#[derive(Debug, Clone)]
pub struct Config {
    /// Value of the `user-agent` header when a request does not set one.
    pub user_agent: HeaderValue,

    /// Timeout given to new requests. Requests can override it with
    /// [`Request::with_timeout`].
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            )),
            timeout: None,
        }
    }
}

struct ClientRef {
    registry: Registry,
    transport: SharedTransport,
    config: Config,
}

/// A high-level async HTTP client.
///
/// # Example
/// ```no_run
/// # use hyperpost::Client;
/// # async fn run() -> Result<(), hyperpost::Error> {
/// let client = Client::new();
/// let response = client.get("http://example.com")?.await?;
/// println!("Response: {:?}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientRef>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("registry", &self.inner.registry)
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(feature = "http")]
impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Create a new, empty builder for clients.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Create a client with the default HTTP transport and no middleware.
    #[cfg(feature = "http")]
    pub fn new() -> Self {
        Builder::new().build()
    }

    /// The middleware registered on this client.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Client-wide defaults.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn transport(&self) -> &SharedTransport {
        &self.inner.transport
    }

    /// Start building a request.
    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> Result<Request, Error> {
        Request::new(self, method, url)
    }

    /// Start building a `GET` request.
    pub fn get<U: IntoUrl>(&self, url: U) -> Result<Request, Error> {
        self.request(Method::Get, url)
    }

    /// Start building a `HEAD` request.
    pub fn head<U: IntoUrl>(&self, url: U) -> Result<Request, Error> {
        self.request(Method::Head, url)
    }

    /// Start building a `POST` request.
    pub fn post<U: IntoUrl>(&self, url: U) -> Result<Request, Error> {
        self.request(Method::Post, url)
    }

    /// Start building a `PUT` request.
    pub fn put<U: IntoUrl>(&self, url: U) -> Result<Request, Error> {
        self.request(Method::Put, url)
    }

    /// Start building a `DELETE` request.
    pub fn delete<U: IntoUrl>(&self, url: U) -> Result<Request, Error> {
        self.request(Method::Delete, url)
    }
}

/// A builder for a client.
#[derive(Debug, Default)]
pub struct Builder {
    registry: Registry,
    transport: Option<SharedTransport>,
    config: Config,
}

impl Builder {
    /// Create a new, empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a middleware.
    ///
    /// Pre-send and post-completion middleware run in the order they are
    /// registered.
    pub fn with_middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.registry.add(middleware);
        self
    }

    /// Access the registry under construction.
    pub fn registry(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Provide a custom transport
    pub fn with_transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Some(transport.into_shared());
        self
    }

    /// Set the User-Agent header.
    pub fn with_user_agent(mut self, user_agent: HeaderValue) -> Self {
        self.config.user_agent = user_agent;
        self
    }

    /// Set the default timeout for requests.
    ///
    /// The timeout must be positive: with a zero timeout, every request
    /// fails to build with [`ErrorKind::InvalidArgument`][crate::ErrorKind::InvalidArgument].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Replace the client configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Get a mutable reference to the client configuration
    pub fn config(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Build the client.
    ///
    /// Without a custom transport, the client uses
    #[cfg_attr(feature = "http", doc = "[`HttpTransport`][crate::transport::http::HttpTransport].")]
    #[cfg_attr(
        not(feature = "http"),
        doc = "a transport which fails every call."
    )]
    pub fn build(self) -> Client {
        let transport = self.transport.unwrap_or_else(crate::transport::default_transport);
        tracing::debug!(registry = ?self.registry, "built client");
        Client {
            inner: Arc::new(ClientRef {
                registry: self.registry,
                transport,
                config: self.config,
            }),
        }
    }
}

#[cfg(test)]
mod tests {

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::middleware::{Compression, Logger};
    use crate::transport::mock::MockTransport;

    assert_impl_all!(Client: Send, Sync, Clone);

    #[test]
    fn builder_registers_middleware() {
        let client = Client::builder()
            .with_middleware(Logger::new())
            .with_middleware(Compression::new())
            .with_transport(MockTransport::new())
            .build();

        assert!(client.registry().has("logger"));
        assert!(client.registry().has("compress"));
        assert!(!client.registry().has("stream"));
    }

    #[test]
    fn default_user_agent() {
        let config = Config::default();
        assert!(config
            .user_agent
            .to_str()
            .unwrap()
            .starts_with("hyperpost/"));
        assert!(config.timeout.is_none());
    }

    #[test]
    fn default_timeout_reaches_requests() {
        let client = Client::builder()
            .with_transport(MockTransport::new())
            .with_timeout(Duration::from_secs(3))
            .build();

        let request = client.get("http://example.com/").unwrap();
        assert_eq!(request.timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn zero_default_timeout_is_rejected() {
        let client = Client::builder()
            .with_transport(MockTransport::new())
            .with_timeout(Duration::ZERO)
            .build();

        let error = client.get("http://example.com/").unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::InvalidArgument);
        assert!(matches!(error, Error::InvalidTimeout(_)));
    }
}
