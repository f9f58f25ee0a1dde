//! Adapts tokio streams to hyper's I/O traits.
//!
//! [`TokioIo`] wraps anything implementing tokio's [`AsyncRead`] and
//! [`AsyncWrite`] so that it can be handed to a hyper connection, on either
//! the client or the server side.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A tokio stream usable as hyper I/O.
#[derive(Debug)]
#[pin_project::pin_project]
pub struct TokioIo<T> {
    #[pin]
    stream: T,
}

impl<T> TokioIo<T> {
    /// Wrap a tokio stream.
    pub fn new(stream: T) -> Self {
        Self { stream }
    }

    /// Unwrap the stream.
    pub fn into_inner(self) -> T {
        self.stream
    }
}

impl<T: AsyncRead> hyper::rt::Read for TokioIo<T> {
    #[allow(unsafe_code)]
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        mut buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        // SAFETY: tokio's ReadBuf never de-initializes memory, and only the
        // bytes it reports as filled are committed to hyper's cursor.
        let filled = unsafe {
            let mut target = ReadBuf::uninit(buf.as_mut());
            match self.project().stream.poll_read(cx, &mut target) {
                Poll::Ready(Ok(())) => target.filled().len(),
                other => return other,
            }
        };

        unsafe { buf.advance(filled) };
        Poll::Ready(Ok(()))
    }
}

impl<T: AsyncWrite> hyper::rt::Write for TokioIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().stream.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.project().stream.poll_write_vectored(cx, bufs)
    }
}
