//! Hyperpost
//!
//! Declarative outbound HTTP requests with a pluggable middleware pipeline.
//!
//! Requests are built fluently from a [`Client`], which owns the middleware
//! [`Registry`][middleware::Registry] and the [transport][transport]. Each
//! fluent call returns a new, immutable snapshot of the request, and awaiting
//! the request runs it through the execution engine: pre-send middleware,
//! the transport call (optionally raced against a timeout), redirect
//! following, response decoding and post-completion middleware.
//!
//! ```no_run
//! # use hyperpost::Client;
//! # use hyperpost::middleware::{Compression, Logger, Redirects};
//! # async fn run() -> Result<(), hyperpost::Error> {
//! let client = Client::builder()
//!     .with_middleware(Logger::new())
//!     .with_middleware(Compression::new())
//!     .with_middleware(Redirects::new())
//!     .build();
//!
//! let response = client
//!     .get("http://example.com/")?
//!     .with_query("q", "rust")
//!     .enable_compression()?
//!     .enable_redirect_following()?
//!     .await?;
//!
//! println!("{}", response.status());
//! println!("{}", response.text().await?);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::fmt;

pub mod body;
pub use body::Body;
pub mod client;
pub use client::Client;
pub(crate) mod decode;
mod engine;
pub use engine::ResponseFuture;
pub mod error;
pub use error::{Error, ErrorKind};
mod method;
pub use method::Method;
pub mod middleware;
pub mod multipart;
pub use multipart::Form;
pub mod payload;
pub use payload::{Blob, Payload};
pub mod request;
pub use request::{IntoUrl, Request, RequestOptions};
pub mod response;
pub use response::Response;
mod timeout;
pub mod transport;

/// Boxed error type used at the transport and middleware seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub(crate) struct DebugLiteral<T: fmt::Display>(T);

impl<T: fmt::Display> fmt::Debug for DebugLiteral<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
