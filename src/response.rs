//! Responses returned by the engine.

use std::fmt;

use bytes::{Bytes, BytesMut};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use http_body_util::BodyExt as _;
use serde::de::DeserializeOwned;
use url::Url;

use crate::payload::Blob;
use crate::{Body, Error};

/// The body of a [`Response`].
pub enum ResponseBody {
    /// The whole body, read before the response was returned.
    Buffered(Bytes),

    /// A live body. Only returned when streaming is enabled.
    Streaming(Body),

    /// The whole body as a blob. Returned when the `blob` middleware is
    /// registered and streaming is off.
    Blob(Blob),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Buffered(data) => f.debug_tuple("Buffered").field(&data.len()).finish(),
            ResponseBody::Streaming(_) => f.debug_tuple("Streaming").finish(),
            ResponseBody::Blob(blob) => f.debug_tuple("Blob").field(blob).finish(),
        }
    }
}

/// Status line and headers of the terminal response, plus where it came from.
#[derive(Debug, Clone)]
pub(crate) struct Head {
    pub(crate) status: StatusCode,
    pub(crate) status_text: String,
    pub(crate) headers: HeaderMap,
    pub(crate) url: Url,
    pub(crate) redirects: usize,
}

/// A completed response.
#[derive(Debug)]
pub struct Response {
    head: Head,
    body: ResponseBody,
}

impl Response {
    pub(crate) fn new(head: Head, body: ResponseBody) -> Self {
        Self { head, body }
    }

    /// The response status code.
    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    /// The reason phrase sent by the server, or the canonical one for the
    /// status code.
    pub fn status_text(&self) -> &str {
        &self.head.status_text
    }

    /// Whether the status is in the `2xx` range.
    pub fn successful(&self) -> bool {
        self.head.status.is_success()
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// The URL of the final hop.
    pub fn url(&self) -> &Url {
        &self.head.url
    }

    /// How many redirects were followed.
    pub fn redirects(&self) -> usize {
        self.head.redirects
    }

    /// The body.
    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Take the body.
    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// The body as a blob, if the response was decoded in blob mode.
    pub fn blob(&self) -> Option<&Blob> {
        match &self.body {
            ResponseBody::Blob(blob) => Some(blob),
            _ => None,
        }
    }

    /// The whole body. A streaming body is read to the end.
    pub async fn bytes(self) -> Result<Bytes, Error> {
        match self.body {
            ResponseBody::Buffered(data) => Ok(data),
            ResponseBody::Blob(blob) => Ok(blob.raw()),
            ResponseBody::Streaming(body) => Ok(body
                .collect()
                .await
                .map_err(Error::serialization)?
                .to_bytes()),
        }
    }

    /// The whole body as UTF-8 text.
    pub async fn text(self) -> Result<String, Error> {
        let data = self.bytes().await?;
        String::from_utf8(data.into()).map_err(Error::serialization)
    }

    /// The whole body parsed as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, Error> {
        let data = self.bytes().await?;
        serde_json::from_slice(&data).map_err(Error::serialization)
    }
}

/// Collects a buffered body in arrival order.
#[derive(Debug)]
pub(crate) struct Accumulator {
    data: BytesMut,
    blob: bool,
}

impl Accumulator {
    pub(crate) fn new(blob: bool) -> Self {
        Self {
            data: BytesMut::new(),
            blob,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
    }

    pub(crate) fn finish(self, headers: &HeaderMap) -> ResponseBody {
        let data = self.data.freeze();
        if !self.blob {
            return ResponseBody::Buffered(data);
        }

        let blob = Blob::new(data);
        match headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()) {
            Some(mime) => ResponseBody::Blob(blob.with_mime(mime)),
            None => ResponseBody::Blob(blob),
        }
    }
}
