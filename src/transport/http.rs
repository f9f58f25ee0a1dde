//! The default transport: one HTTP/1.1 connection per request.
//!
//! [`HttpTransport`] resolves and connects to the request authority over TCP,
//! performs a hyper HTTP/1 handshake and sends the request in origin form.
#![cfg_attr(
    feature = "tls",
    doc = "`https` URLs are carried over TLS using [`rustls`] and the platform's native roots."
)]
//!
//! Dropping the response future closes the connection.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use ::http::header::{HeaderValue, HOST};
use ::http::uri::{PathAndQuery, Scheme, Uri};
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, trace, Instrument as _};

use super::io::TokioIo;
use crate::body::{Body, HttpRequest, HttpResponse};

/// Error returned by [`HttpTransport`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HttpTransportError {
    /// The request URI has no host.
    #[error("request uri {0} has no host")]
    MissingHost(Uri),

    /// The request URI scheme is not carried by this transport.
    #[error("scheme {0} is not supported")]
    UnsupportedScheme(String),

    /// The TCP connection could not be established.
    #[error("tcp connect error: {0}")]
    Connect(#[source] io::Error),

    /// The TCP connection was not established in time.
    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The TLS session could not be established.
    #[cfg(feature = "tls")]
    #[error("tls handshake error: {0}")]
    Tls(#[source] io::Error),

    /// The host is not a valid TLS server name.
    #[cfg(feature = "tls")]
    #[error("invalid tls server name: {0}")]
    InvalidServerName(String),

    /// The HTTP protocol failed.
    #[error(transparent)]
    Protocol(#[from] hyper::Error),
}

/// Settings for connections made by an [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// The timeout for establishing the TCP connection.
    pub connect_timeout: Option<Duration>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            nodelay: true,
        }
    }
}

/// A [`tower::Service`] which sends each request over a fresh HTTP/1.1
/// connection.
#[derive(Clone, Default)]
pub struct HttpTransport {
    config: Arc<HttpTransportConfig>,

    #[cfg(feature = "tls")]
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport with the given connection settings.
    pub fn new(config: HttpTransportConfig) -> Self {
        Self {
            config: Arc::new(config),
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    /// Connection settings.
    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    /// Use a custom TLS configuration for `https` URLs.
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, config: rustls::ClientConfig) -> Self {
        self.tls = Some(Arc::new(config));
        self
    }
}

impl tower::Service<HttpRequest> for HttpTransport {
    type Response = HttpResponse;
    type Error = HttpTransportError;
    type Future = BoxFuture<'static, Result<HttpResponse, HttpTransportError>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: HttpRequest) -> Self::Future {
        let transport = self.clone();
        let span = tracing::debug_span!("http", uri = %request.uri());
        Box::pin(async move { transport.send(request).await }.instrument(span))
    }
}

impl HttpTransport {
    async fn send(self, request: HttpRequest) -> Result<HttpResponse, HttpTransportError> {
        let target = Target::from_uri(request.uri())?;
        let stream = connect(&target, &self.config).await?;

        match target.secure {
            false => handshake(stream, request).await,
            #[cfg(feature = "tls")]
            true => {
                let stream = self.tls_connect(&target, stream).await?;
                handshake(stream, request).await
            }
            #[cfg(not(feature = "tls"))]
            true => Err(HttpTransportError::UnsupportedScheme("https".into())),
        }
    }

    #[cfg(feature = "tls")]
    async fn tls_connect(
        &self,
        target: &Target,
        stream: TcpStream,
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, HttpTransportError> {
        let config = match &self.tls {
            Some(config) => config.clone(),
            None => native_tls_config(),
        };

        let domain = rustls::pki_types::ServerName::try_from(target.host.as_ref())
            .map_err(|_| HttpTransportError::InvalidServerName(target.host.to_string()))?
            .to_owned();

        tokio_rustls::TlsConnector::from(config)
            .connect(domain, stream)
            .await
            .map_err(HttpTransportError::Tls)
    }
}

#[cfg(feature = "tls")]
fn native_tls_config() -> Arc<rustls::ClientConfig> {
    static CONFIG: std::sync::OnceLock<Arc<rustls::ClientConfig>> = std::sync::OnceLock::new();

    CONFIG
        .get_or_init(|| {
            let mut roots = rustls::RootCertStore::empty();
            let native = rustls_native_certs::load_native_certs();
            for error in &native.errors {
                tracing::warn!("unable to load a native certificate: {error}");
            }
            let (added, ignored) = roots.add_parsable_certificates(native.certs);
            trace!(added, ignored, "loaded native certificates");

            let mut config = rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            config.alpn_protocols.push(b"http/1.1".to_vec());
            Arc::new(config)
        })
        .clone()
}

#[derive(Debug, PartialEq, Eq)]
struct Target {
    host: Box<str>,
    port: u16,
    secure: bool,
}

impl Target {
    fn from_uri(uri: &Uri) -> Result<Self, HttpTransportError> {
        let host = uri
            .host()
            .ok_or_else(|| HttpTransportError::MissingHost(uri.clone()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');

        let secure = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            Some(other) => return Err(HttpTransportError::UnsupportedScheme(other.into())),
            None => return Err(HttpTransportError::UnsupportedScheme(String::new())),
        };

        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });

        Ok(Self {
            host: host.into(),
            port,
            secure,
        })
    }
}

async fn connect(
    target: &Target,
    config: &HttpTransportConfig,
) -> Result<TcpStream, HttpTransportError> {
    let connect = TcpStream::connect((target.host.as_ref(), target.port));
    let stream = match config.connect_timeout {
        Some(timeout) => tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| {
                trace!(?timeout, "connection timed out");
                HttpTransportError::ConnectTimeout(timeout)
            })?,
        None => connect.await,
    }
    .map_err(HttpTransportError::Connect)?;

    if config.nodelay {
        if let Err(error) = stream.set_nodelay(true) {
            tracing::warn!("tcp set_nodelay error: {error}");
        }
    }

    trace!(host = %target.host, port = target.port, "connected");
    Ok(stream)
}

async fn handshake<IO>(
    stream: IO,
    mut request: HttpRequest,
) -> Result<HttpResponse, HttpTransportError>
where
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut sender, connection) =
        hyper::client::conn::http1::handshake::<_, Body>(TokioIo::new(stream)).await?;

    tokio::spawn(
        async move {
            if let Err(error) = connection.await {
                debug!("connection closed with error: {error}");
            }
        }
        .in_current_span(),
    );

    origin_form(&mut request);
    let response = sender.send_request(request).await?;
    Ok(response.map(Body::from))
}

/// Set the `host` header from the absolute URI and strip the URI down to its
/// path and query. `CONNECT` requests use the authority form `host:port`.
fn origin_form(request: &mut HttpRequest) {
    let host = request.uri().authority().map(|authority| {
        let host = authority.as_str().rsplit('@').next().unwrap_or_default();
        host.to_owned()
    });

    if let Some(host) = host.as_deref() {
        if !request.headers().contains_key(HOST) {
            if let Ok(value) = HeaderValue::from_str(host) {
                request.headers_mut().insert(HOST, value);
            }
        }
    }

    if request.method() == ::http::Method::CONNECT {
        if let Some(host) = host {
            let authority = match request.uri().port_u16() {
                Some(_) => host,
                None if request.uri().scheme() == Some(&Scheme::HTTPS) => format!("{host}:443"),
                None => format!("{host}:80"),
            };
            if let Ok(uri) = Uri::try_from(authority) {
                *request.uri_mut() = uri;
                return;
            }
        }
    }

    let path = request
        .uri()
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    *request.uri_mut() = Uri::from(path);
}
