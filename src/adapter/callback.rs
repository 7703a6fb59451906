use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

type WriteCallback = Box<dyn FnOnce(Result<(), &io::Error>) + Send + Sync>;

pin_project! {
    /// Stream wrapper that reports the outcome of the first completed write.
    ///
    /// Many upstream protocols only fail once the handshake is flushed, so a
    /// successful dial alone does not prove the upstream is healthy.
    pub struct FirstWriteCallbackConn<S> {
        #[pin]
        inner: S,
        callback: Option<WriteCallback>,
    }
}

impl<S> FirstWriteCallbackConn<S> {
    pub fn new<F>(inner: S, callback: F) -> Self
    where
        F: FnOnce(Result<(), &io::Error>) + Send + Sync + 'static,
    {
        Self {
            inner,
            callback: Some(Box::new(callback)),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead> AsyncRead for FirstWriteCallbackConn<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl<S: AsyncWrite> AsyncWrite for FirstWriteCallbackConn<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let result = this.inner.poll_write(cx, buf);
        if let Poll::Ready(ref r) = result {
            if let Some(callback) = this.callback.take() {
                match r {
                    Ok(_) => callback(Ok(())),
                    Err(e) => callback(Err(e)),
                }
            }
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
