//! Request payloads and their encoding.
//!
//! A [`Payload`] is whatever the caller hands to
//! [`Request::with_body`][crate::Request::with_body]. It is encoded in two
//! passes:
//!
//! - The early pass, [`encode`], runs when the body is attached. It unwraps
//!   blobs, validates and encodes multipart forms, and records the closed
//!   [`EncodedBody`] variant. Nothing is serialised to JSON yet.
//! - The late pass, [`EncodedBody::resolve`], runs once per attempt after all
//!   headers are merged. It awaits pending payloads, decides `content-type`
//!   and produces the wire [`Body`].

use std::fmt;
use std::future::Future;

use bytes::{Bytes, BytesMut};
use futures_util::future::{BoxFuture, FutureExt as _, Shared};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;

use crate::middleware::{capability, Registry};
use crate::multipart::{Form, Multipart};
use crate::Body;
use crate::Error;

/// Raw binary data with an optional MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob {
    data: Bytes,
    mime: Option<String>,
}

impl Blob {
    /// Create a blob from raw data.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            mime: None,
        }
    }

    /// Attach a MIME type to this blob.
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// The raw bytes of this blob.
    pub fn raw(&self) -> Bytes {
        self.data.clone()
    }

    /// The MIME type of this blob, if known.
    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the blob holds no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A payload which will be available later.
///
/// The underlying future is shared, so a pending payload survives being
/// copied onto redirect hops and is only computed once.
#[derive(Clone)]
pub struct Pending(Shared<BoxFuture<'static, Payload>>);

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pending").finish()
    }
}

/// A request body, as supplied by the caller.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    /// No body.
    #[default]
    Empty,

    /// UTF-8 text, sent as-is.
    Text(String),

    /// Raw bytes, sent as-is.
    Bytes(Bytes),

    /// A JSON document. Objects are sent as `application/json`.
    Json(Value),

    /// A binary blob, sent as its raw bytes.
    Blob(Blob),

    /// A `multipart/form-data` form. Requires the `form` middleware.
    Form(Form),

    /// A payload which is awaited before the request is sent.
    Pending(Pending),
}

impl Payload {
    /// Serialize a value into a JSON payload.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        serde_json::to_value(value)
            .map(Payload::Json)
            .map_err(Error::serialization)
    }

    /// A payload produced by a future.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Payload> + Send + 'static,
    {
        Payload::Pending(Pending(future.boxed().shared()))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_owned())
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Bytes(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(value.into())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<Blob> for Payload {
    fn from(value: Blob) -> Self {
        Payload::Blob(value)
    }
}

impl From<Form> for Payload {
    fn from(value: Form) -> Self {
        Payload::Form(value)
    }
}

/// The canonical encoded form of a request body.
#[derive(Debug, Clone, Default)]
pub enum EncodedBody {
    /// No body.
    #[default]
    Empty,

    /// Raw bytes.
    Bytes(Bytes),

    /// Raw text.
    Text(String),

    /// A JSON object or array, serialised at send time.
    Json(Value),

    /// An encoded multipart form.
    Multipart(Multipart),

    /// A payload still to be awaited.
    Pending(Pending),
}

impl EncodedBody {
    /// Whether this body is a multipart form.
    pub fn is_multipart(&self) -> bool {
        matches!(self, EncodedBody::Multipart(_))
    }

    /// Late pass: produce the wire body and set `content-type`.
    ///
    /// Headers are overwritten rather than appended, so resolving the same
    /// body against the same headers twice gives the same result.
    pub async fn resolve(self, registry: &Registry, headers: &mut HeaderMap) -> Result<Body, Error> {
        let mut encoded = self;
        loop {
            encoded = match encoded {
                EncodedBody::Pending(Pending(pending)) => encode(pending.await, registry, headers)?,
                EncodedBody::Empty => return Ok(Body::empty()),
                EncodedBody::Bytes(data) => return Ok(Body::full(data)),
                EncodedBody::Text(text) => return Ok(Body::full(text)),
                EncodedBody::Multipart(form) => {
                    let content_type = HeaderValue::from_str(form.content_type()).map_err(|error| {
                        Error::InvalidHeader {
                            name: CONTENT_TYPE.to_string(),
                            message: error.to_string(),
                        }
                    })?;
                    headers.insert(CONTENT_TYPE, content_type);
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(form.len()));
                    return Ok(Body::full(form.data().clone()));
                }
                EncodedBody::Json(value @ Value::Object(_)) => {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                    let data = serde_json::to_vec(&value).map_err(Error::serialization)?;
                    return Ok(Body::full(data));
                }
                EncodedBody::Json(Value::Array(items)) => {
                    let mut data = BytesMut::new();
                    for item in &items {
                        let chunk = serde_json::to_vec(item).map_err(Error::serialization)?;
                        data.extend_from_slice(&chunk);
                    }
                    return Ok(Body::full(data.freeze()));
                }
                EncodedBody::Json(_) => return Ok(Body::empty()),
            };
        }
    }
}

/// Early pass: turn a payload into its [`EncodedBody`].
///
/// Multipart forms need the `form` capability, and set `content-length`
/// when the caller has not already chosen one.
pub fn encode(
    payload: Payload,
    registry: &Registry,
    headers: &mut HeaderMap,
) -> Result<EncodedBody, Error> {
    Ok(match payload {
        Payload::Empty => EncodedBody::Empty,
        Payload::Text(text) => EncodedBody::Text(text),
        Payload::Bytes(data) => EncodedBody::Bytes(data),
        Payload::Blob(blob) => EncodedBody::Bytes(blob.raw()),
        Payload::Form(form) => {
            registry.require(capability::FORM)?;
            let encoded = Multipart::from(&form);
            if !headers.contains_key(CONTENT_LENGTH) {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(encoded.len()));
            }
            EncodedBody::Multipart(encoded)
        }
        Payload::Json(Value::String(text)) => EncodedBody::Text(text),
        Payload::Json(value @ (Value::Object(_) | Value::Array(_))) => EncodedBody::Json(value),
        Payload::Json(_) => EncodedBody::Empty,
        Payload::Pending(pending) => EncodedBody::Pending(pending),
    })
}

#[cfg(test)]
mod tests {

    use http_body_util::BodyExt as _;
    use serde_json::json;

    use super::*;
    use crate::middleware::Forms;

    async fn collect(body: Body) -> Bytes {
        body.collect().await.unwrap().to_bytes()
    }

    fn forms() -> Registry {
        let mut registry = Registry::new();
        registry.add(Forms::new());
        registry
    }

    #[test]
    fn text_and_bytes_pass_through() {
        let mut headers = HeaderMap::new();
        let registry = Registry::new();

        assert!(matches!(
            encode("hello".into(), &registry, &mut headers).unwrap(),
            EncodedBody::Text(text) if text == "hello"
        ));
        assert!(matches!(
            encode(Blob::new("raw").into(), &registry, &mut headers).unwrap(),
            EncodedBody::Bytes(data) if data == "raw"
        ));
        assert!(headers.is_empty());
    }

    #[test]
    fn forms_require_capability() {
        let mut headers = HeaderMap::new();
        let error = encode(Form::new().text("a", "b").into(), &Registry::new(), &mut headers)
            .unwrap_err();
        assert!(matches!(error, Error::MissingCapability { name: "form" }));
        assert!(headers.is_empty());
    }

    #[test]
    fn forms_set_content_length_once() {
        let form = Form::new().text("a", "b");
        let expected = form.encode().len();

        let mut headers = HeaderMap::new();
        encode(form.clone().into(), &forms(), &mut headers).unwrap();
        assert_eq!(headers[CONTENT_LENGTH], expected.to_string().as_str());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("7"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        encode(form.into(), &forms(), &mut headers).unwrap();
        assert_eq!(headers[CONTENT_LENGTH], "7");
    }

    #[test]
    fn json_scalars_are_dropped() {
        let mut headers = HeaderMap::new();
        let registry = Registry::new();
        assert!(matches!(
            encode(json!(12).into(), &registry, &mut headers).unwrap(),
            EncodedBody::Empty
        ));
        assert!(matches!(
            encode(json!("text").into(), &registry, &mut headers).unwrap(),
            EncodedBody::Text(_)
        ));
    }

    #[tokio::test]
    async fn objects_become_json() {
        let value = json!({"name": "hyperpost", "tags": ["a", "b"]});
        let registry = Registry::new();
        let mut headers = HeaderMap::new();

        let encoded = encode(value.clone().into(), &registry, &mut headers).unwrap();
        assert!(headers.is_empty(), "early pass must not set content-type");

        let body = encoded.clone().resolve(&registry, &mut headers).await.unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(collect(body).await, serde_json::to_vec(&value).unwrap());

        encoded.resolve(&registry, &mut headers).await.unwrap();
        assert_eq!(headers.get_all(CONTENT_TYPE).iter().count(), 1);
    }

    #[tokio::test]
    async fn arrays_are_written_element_by_element() {
        let registry = Registry::new();
        let mut headers = HeaderMap::new();
        let encoded = encode(json!([{"a": 1}, 2]).into(), &registry, &mut headers).unwrap();

        let body = encoded.resolve(&registry, &mut headers).await.unwrap();
        assert!(!headers.contains_key(CONTENT_TYPE));
        assert_eq!(collect(body).await, Bytes::from_static(b"{\"a\":1}2"));
    }

    #[tokio::test]
    async fn multipart_claims_content_type() {
        let registry = forms();
        let form = Form::new().text("field", "value");
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let encoded = encode(form.clone().into(), &registry, &mut headers).unwrap();
        let body = encoded.resolve(&registry, &mut headers).await.unwrap();

        assert_eq!(headers[CONTENT_TYPE], form.content_type().as_str());
        assert_eq!(collect(body).await, form.encode());
    }

    #[tokio::test]
    async fn pending_payloads_are_awaited() {
        let registry = Registry::new();
        let mut headers = HeaderMap::new();
        let payload = Payload::pending(async { Payload::Json(json!({"late": true})) });

        let encoded = encode(payload, &registry, &mut headers).unwrap();
        assert!(matches!(encoded, EncodedBody::Pending(_)));

        let body = encoded.clone().resolve(&registry, &mut headers).await.unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(collect(body).await, Bytes::from_static(b"{\"late\":true}"));

        // The shared future resolves again for a second attempt.
        let body = encoded.resolve(&registry, &mut headers).await.unwrap();
        assert_eq!(collect(body).await, Bytes::from_static(b"{\"late\":true}"));
    }

    #[test]
    fn json_helper_serializes() {
        #[derive(Serialize)]
        struct User {
            name: &'static str,
        }

        let payload = Payload::json(&User { name: "ferris" }).unwrap();
        assert!(matches!(payload, Payload::Json(Value::Object(_))));
    }
}
