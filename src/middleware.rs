//! Middleware and the registry which holds it.
//!
//! A middleware is identified by its [name][Middleware::name]. Registering a
//! middleware does two things:
//!
//! 1. It enables the capability of the same name. Requests can only turn on
//!    streaming, compression, redirect following or form bodies when the
//!    matching middleware ([`Streams`], [`Compression`], [`Redirects`],
//!    [`Forms`]) is present.
//! 2. If the middleware declares a [`Phase`], its
//!    [`intertwine`][Middleware::intertwine] hook runs at that point of every
//!    request: once per attempt for [`Phase::PreSend`] (so once per redirect
//!    hop), and once per successful call chain for [`Phase::PostCompletion`].
//!
//! The [`Registry`] is assembled by the [client builder][crate::client::Builder]
//! and is read-only once requests start executing.

use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, info};
use url::Url;

use crate::BoxError;
use crate::Method;

/// Points in the execution of a request where middleware runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before every physical attempt, including every redirect hop.
    PreSend,

    /// After the terminal response of a call chain, only when it succeeded.
    PostCompletion,
}

/// Names of the capabilities the engine checks for.
pub mod capability {
    /// Live, unbuffered response bodies.
    pub const STREAM: &str = "stream";

    /// `gzip` / `deflate` response decoding.
    pub const COMPRESS: &str = "compress";

    /// `multipart/form-data` request bodies.
    pub const FORM: &str = "form";

    /// Responses decoded into a [`Blob`][crate::Blob].
    pub const BLOB: &str = "blob";

    /// Request logging.
    pub const LOGGER: &str = "logger";

    /// Following `location` headers.
    pub const REDIRECT: &str = "redirect";
}

/// What a middleware hook can see about the request being executed.
#[derive(Debug)]
pub struct Context<'a> {
    method: Method,
    url: &'a Url,
    hop: usize,
    status: Option<StatusCode>,
    registry: &'a Registry,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        method: Method,
        url: &'a Url,
        hop: usize,
        status: Option<StatusCode>,
        registry: &'a Registry,
    ) -> Self {
        Self {
            method,
            url,
            hop,
            status,
            registry,
        }
    }

    /// Method of the current attempt.
    pub fn method(&self) -> Method {
        self.method
    }

    /// URL of the current attempt.
    pub fn url(&self) -> &Url {
        self.url
    }

    /// Number of redirects followed before this attempt.
    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Terminal status, only available after completion.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// The registry the middleware belongs to.
    pub fn registry(&self) -> &Registry {
        self.registry
    }
}

/// A named piece of behaviour which can be registered with a client.
pub trait Middleware: Send + Sync + 'static {
    /// Unique name of this middleware, and of the capability it enables.
    fn name(&self) -> &'static str;

    /// The phase in which [`intertwine`][Middleware::intertwine] runs.
    ///
    /// `None` means the middleware only enables a capability.
    fn phase(&self) -> Option<Phase> {
        None
    }

    /// Whether this capability applies to every request, regardless of the
    /// per-request flag.
    fn always_on(&self) -> bool {
        false
    }

    /// Run the middleware hook.
    ///
    /// Errors are returned to the caller as-is, as
    /// [`Error::Middleware`][crate::Error::Middleware].
    fn intertwine(&self, cx: &Context<'_>) -> Result<(), BoxError> {
        let _ = cx;
        Ok(())
    }

    /// The redirect hop limit, for middleware which enables redirects.
    fn redirect_limit(&self) -> Option<usize> {
        None
    }
}

/// Ordered collection of registered middleware.
#[derive(Clone, Default)]
pub struct Registry {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.middleware.iter().map(|m| m.name()))
            .finish()
    }
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a middleware.
    ///
    /// A middleware with the same name replaces the earlier registration in
    /// place, keeping its position in the dispatch order.
    pub fn add<M: Middleware>(&mut self, middleware: M) {
        self.add_shared(Arc::new(middleware));
    }

    /// Register a shared middleware.
    pub fn add_shared(&mut self, middleware: Arc<dyn Middleware>) {
        let name = middleware.name();
        debug!(%name, phase = ?middleware.phase(), "registered middleware");
        if let Some(slot) = self.middleware.iter_mut().find(|m| m.name() == name) {
            *slot = middleware;
        } else {
            self.middleware.push(middleware);
        }
    }

    /// Whether a middleware with this name is registered.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Look up a middleware by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Middleware>> {
        self.middleware.iter().find(|m| m.name() == name)
    }

    /// Middleware participating in `phase`, in registration order.
    pub fn filter(&self, phase: Phase) -> impl Iterator<Item = &Arc<dyn Middleware>> + '_ {
        self.middleware
            .iter()
            .filter(move |m| m.phase() == Some(phase))
    }

    /// Whether the named capability is forced on for every request.
    pub fn always_on(&self, name: &str) -> bool {
        self.get(name).is_some_and(|m| m.always_on())
    }

    /// Number of registered middleware.
    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    /// Whether no middleware is registered.
    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    pub(crate) fn require(&self, name: &'static str) -> Result<(), crate::Error> {
        if self.has(name) {
            Ok(())
        } else {
            Err(crate::Error::MissingCapability { name })
        }
    }

    pub(crate) fn redirect_limit(&self) -> usize {
        self.get(capability::REDIRECT)
            .and_then(|m| m.redirect_limit())
            .unwrap_or(Redirects::DEFAULT_LIMIT)
    }
}

/// Logs every attempt at `info` level, and failures at `error` level.
#[derive(Debug, Default, Clone)]
pub struct Logger {
    _priv: (),
}

impl Logger {
    /// Create the logging middleware.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Middleware for Logger {
    fn name(&self) -> &'static str {
        capability::LOGGER
    }

    fn phase(&self) -> Option<Phase> {
        Some(Phase::PreSend)
    }

    fn intertwine(&self, cx: &Context<'_>) -> Result<(), BoxError> {
        info!("Attempting to make a request to \"{} {}\"", cx.method(), cx.url());
        Ok(())
    }
}

macro_rules! capability_middleware {
    ($(#[$doc:meta])* $ty:ident => $name:expr) => {
        $(#[$doc])*
        #[derive(Debug, Default, Clone)]
        pub struct $ty {
            always: bool,
        }

        impl $ty {
            /// Enable the capability for requests which opt in.
            pub fn new() -> Self {
                Self::default()
            }

            /// Enable the capability for every request.
            pub fn always() -> Self {
                Self { always: true }
            }
        }

        impl Middleware for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn always_on(&self) -> bool {
                self.always
            }
        }
    };
}

capability_middleware!(
    /// Enables decoding of `gzip` and `deflate` response bodies.
    Compression => capability::COMPRESS
);

capability_middleware!(
    /// Enables live, unbuffered response bodies.
    Streams => capability::STREAM
);

capability_middleware!(
    /// Enables `multipart/form-data` request bodies.
    Forms => capability::FORM
);

capability_middleware!(
    /// Decodes buffered responses into a [`Blob`][crate::Blob].
    Blobs => capability::BLOB
);

/// Enables following `location` headers, up to a hop limit.
#[derive(Debug, Clone)]
pub struct Redirects {
    limit: usize,
}

impl Default for Redirects {
    fn default() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

impl Redirects {
    /// Hop limit used when none is configured.
    pub const DEFAULT_LIMIT: usize = 20;

    /// Follow up to [`DEFAULT_LIMIT`][Self::DEFAULT_LIMIT] redirects.
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow up to `limit` redirects.
    pub fn with_limit(limit: usize) -> Self {
        Self { limit }
    }
}

impl Middleware for Redirects {
    fn name(&self) -> &'static str {
        capability::REDIRECT
    }

    fn redirect_limit(&self) -> Option<usize> {
        Some(self.limit)
    }
}

type HookFn = dyn Fn(&Context<'_>) -> Result<(), BoxError> + Send + Sync;

/// Middleware built from a closure.
///
/// ```
/// # use hyperpost::middleware::Hook;
/// let hook = Hook::post_completion("audit", |cx| {
///     println!("{} finished with {:?}", cx.url(), cx.status());
///     Ok(())
/// });
/// ```
pub struct Hook {
    name: &'static str,
    phase: Phase,
    hook: Box<HookFn>,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .finish()
    }
}

impl Hook {
    /// Create a hook for the given phase.
    pub fn new<F>(name: &'static str, phase: Phase, hook: F) -> Self
    where
        F: Fn(&Context<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            name,
            phase,
            hook: Box::new(hook),
        }
    }

    /// Create a hook which runs before every attempt.
    pub fn pre_send<F>(name: &'static str, hook: F) -> Self
    where
        F: Fn(&Context<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::new(name, Phase::PreSend, hook)
    }

    /// Create a hook which runs after a successful call chain.
    pub fn post_completion<F>(name: &'static str, hook: F) -> Self
    where
        F: Fn(&Context<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::new(name, Phase::PostCompletion, hook)
    }
}

impl Middleware for Hook {
    fn name(&self) -> &'static str {
        self.name
    }

    fn phase(&self) -> Option<Phase> {
        Some(self.phase)
    }

    fn intertwine(&self, cx: &Context<'_>) -> Result<(), BoxError> {
        (self.hook)(cx)
    }
}
