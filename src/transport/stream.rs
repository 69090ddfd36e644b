//! Stream types shared by every lane, and the bridge into hyper's I/O traits.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite};

/// Any byte stream a lane can speak HTTP over.
pub(crate) trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A connected stream, after any proxy tunnelling and TLS.
pub(crate) type BoxedIo = Box<dyn Io>;

/// Presents a tokio stream through hyper's `Read` and `Write` traits.
///
/// Lanes use this to hand their connections to hyper; it is public so that
/// custom transports and servers can do the same.
#[derive(Debug)]
#[pin_project::pin_project]
pub struct HyperIo<T> {
    #[pin]
    inner: T,
}

impl<T> HyperIo<T> {
    /// Wrap a tokio stream.
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Unwrap the tokio stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[allow(unsafe_code)]
impl<T> hyper::rt::Read for HyperIo<T>
where
    T: AsyncRead,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        mut buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<Result<(), io::Error>> {
        // SAFETY: tokio's `ReadBuf` only ever writes initialized bytes into the
        // uninitialized region it is given, and reports how many it filled.
        let filled = unsafe {
            let mut tbuf = tokio::io::ReadBuf::uninit(buf.as_mut());
            match self.project().inner.poll_read(cx, &mut tbuf) {
                Poll::Ready(Ok(())) => tbuf.filled().len(),
                other => return other,
            }
        };

        // SAFETY: exactly `filled` bytes were initialized above.
        unsafe {
            buf.advance(filled);
        }
        Poll::Ready(Ok(()))
    }
}

impl<T> hyper::rt::Write for HyperIo<T>
where
    T: AsyncWrite,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        self.project().inner.poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<Result<usize, io::Error>> {
        self.project().inner.poll_write_vectored(cx, bufs)
    }
}
