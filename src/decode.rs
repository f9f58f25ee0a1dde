//! Streaming decompression of response bodies.

use std::io::{self, Write as _};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};
use http::header::CONTENT_ENCODING;
use http::HeaderMap;
use http_body::Body as _;
use http_body::Frame;
use pin_project::pin_project;

use crate::BoxError;

/// A content coding this crate can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Encoding {
    Gzip,
    Deflate,
}

impl Encoding {
    /// The coding named by the last `content-encoding` header, if it is one
    /// we decode.
    pub(crate) fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get_all(CONTENT_ENCODING).iter().last()?;
        let value = value.to_str().ok()?.trim();

        if value.eq_ignore_ascii_case("gzip") || value.eq_ignore_ascii_case("x-gzip") {
            Some(Encoding::Gzip)
        } else if value.eq_ignore_ascii_case("deflate") {
            Some(Encoding::Deflate)
        } else {
            None
        }
    }
}

enum Inner {
    Gzip(GzDecoder<Vec<u8>>),
    Zlib(ZlibDecoder<Vec<u8>>),
    Raw(DeflateDecoder<Vec<u8>>),

    // `deflate` is zlib-wrapped by the standard, but some servers send raw
    // deflate data. Bytes are held until the header can be checked.
    Sniffing(Vec<u8>),
}

/// Incremental decoder for a single body.
pub(crate) struct Decoder {
    inner: Inner,
    fed: bool,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.inner {
            Inner::Gzip(_) => "gzip",
            Inner::Zlib(_) => "zlib",
            Inner::Raw(_) => "deflate",
            Inner::Sniffing(_) => "deflate?",
        };
        f.debug_tuple("Decoder").field(&name).finish()
    }
}

fn is_zlib_header(data: &[u8]) -> bool {
    match data {
        [cmf, flg, ..] => cmf & 0x0F == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}

impl Decoder {
    pub(crate) fn new(encoding: Encoding) -> Self {
        let inner = match encoding {
            Encoding::Gzip => Inner::Gzip(GzDecoder::new(Vec::new())),
            Encoding::Deflate => Inner::Sniffing(Vec::new()),
        };
        Self { inner, fed: false }
    }

    /// Feed compressed bytes, returning whatever output is ready.
    pub(crate) fn decode(&mut self, data: &[u8]) -> io::Result<Bytes> {
        self.fed |= !data.is_empty();
        if let Inner::Sniffing(held) = &mut self.inner {
            held.extend_from_slice(data);
            if held.len() < 2 {
                return Ok(Bytes::new());
            }

            let held = std::mem::take(held);
            self.inner = if is_zlib_header(&held) {
                Inner::Zlib(ZlibDecoder::new(Vec::new()))
            } else {
                tracing::trace!("deflate body has no zlib header, decoding raw");
                Inner::Raw(DeflateDecoder::new(Vec::new()))
            };
            return self.decode(&held);
        }

        let output = match &mut self.inner {
            Inner::Gzip(decoder) => {
                decoder.write_all(data)?;
                std::mem::take(decoder.get_mut())
            }
            Inner::Zlib(decoder) => {
                decoder.write_all(data)?;
                std::mem::take(decoder.get_mut())
            }
            Inner::Raw(decoder) => {
                decoder.write_all(data)?;
                std::mem::take(decoder.get_mut())
            }
            Inner::Sniffing(_) => Vec::new(),
        };

        Ok(output.into())
    }

    /// Flush the decoder at the end of the body.
    ///
    /// A body with no bytes at all (`HEAD`, `204`, `304`) decodes to nothing.
    pub(crate) fn finish(self) -> io::Result<Bytes> {
        if !self.fed {
            return Ok(Bytes::new());
        }

        let output = match self.inner {
            Inner::Gzip(decoder) => decoder.finish()?,
            Inner::Zlib(decoder) => decoder.finish()?,
            Inner::Raw(decoder) => decoder.finish()?,
            Inner::Sniffing(held) => {
                let mut decoder = DeflateDecoder::new(Vec::new());
                decoder.write_all(&held)?;
                decoder.finish()?
            }
        };
        Ok(output.into())
    }
}

/// A body which decompresses the data frames of `B`.
#[derive(Debug)]
#[pin_project]
pub(crate) struct Decoded<B> {
    #[pin]
    inner: B,
    decoder: Option<Decoder>,
}

impl<B> Decoded<B> {
    pub(crate) fn new(inner: B, encoding: Encoding) -> Self {
        Self {
            inner,
            decoder: Some(Decoder::new(encoding)),
        }
    }
}

impl<B> http_body::Body for Decoded<B>
where
    B: http_body::Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        loop {
            match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => {
                        let Some(decoder) = this.decoder.as_mut() else {
                            return Poll::Ready(Some(Ok(Frame::data(data))));
                        };
                        let output = decoder.decode(&data)?;
                        if !output.is_empty() {
                            return Poll::Ready(Some(Ok(Frame::data(output))));
                        }
                    }
                    Err(frame) => return Poll::Ready(Some(Ok(frame))),
                },
                Some(Err(error)) => return Poll::Ready(Some(Err(error.into()))),
                None => {
                    if let Some(decoder) = this.decoder.take() {
                        let output = decoder.finish()?;
                        if !output.is_empty() {
                            return Poll::Ready(Some(Ok(Frame::data(output))));
                        }
                    }
                    return Poll::Ready(None);
                }
            }
        }
    }
}
