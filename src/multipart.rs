//! `multipart/form-data` payloads.
//!
//! Forms are only accepted as request bodies when the
//! [`Forms`][crate::middleware::Forms] middleware is registered.

use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone)]
enum Part {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        filename: String,
        mime: String,
        data: Bytes,
    },
}

/// A `multipart/form-data` form.
#[derive(Debug, Clone)]
pub struct Form {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for Form {
    fn default() -> Self {
        Self::new()
    }
}

impl Form {
    /// Create an empty form with a random boundary.
    pub fn new() -> Self {
        Self {
            boundary: format!("--------------------------{}", uuid::Uuid::new_v4().simple()),
            parts: Vec::new(),
        }
    }

    /// Add a text field.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Add a file part.
    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        mime: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(Part::File {
            name: name.into(),
            filename: filename.into(),
            mime: mime.into(),
            data: data.into(),
        });
        self
    }

    /// The boundary separating parts.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The `content-type` header value for this form.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Encode the form into a single buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for part in &self.parts {
            buf.put_slice(b"--");
            buf.put_slice(self.boundary.as_bytes());
            buf.put_slice(b"\r\n");

            match part {
                Part::Text { name, value } => {
                    buf.put_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", escape(name))
                            .as_bytes(),
                    );
                    buf.put_slice(value.as_bytes());
                }
                Part::File {
                    name,
                    filename,
                    mime,
                    data,
                } => {
                    buf.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                            escape(name),
                            escape(filename)
                        )
                        .as_bytes(),
                    );
                    buf.put_slice(format!("Content-Type: {mime}\r\n\r\n").as_bytes());
                    buf.put_slice(data);
                }
            }
            buf.put_slice(b"\r\n");
        }

        buf.put_slice(b"--");
        buf.put_slice(self.boundary.as_bytes());
        buf.put_slice(b"--\r\n");
        buf.freeze()
    }
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// A form which has been encoded for transmission.
#[derive(Debug, Clone)]
pub struct Multipart {
    content_type: String,
    data: Bytes,
}

impl Multipart {
    /// The `content-type` header value, including the boundary.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The encoded form.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Length of the encoded form in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the encoded form is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<&Form> for Multipart {
    fn from(form: &Form) -> Self {
        Self {
            content_type: form.content_type(),
            data: form.encode(),
        }
    }
}
