//! Bounded access to the body of a single frame.
//!
//! Frames are read back to back from one stream, so a body must be fully
//! consumed or explicitly skipped before the next header can be read.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{BufMut, Bytes};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf, Take};

use super::frame_errors::FrameError;
use super::FrameHeader;

/// A reader over exactly `header.length` bytes of the underlying stream.
///
/// Any read attempted once the window is exhausted fails with
/// [`io::ErrorKind::InvalidInput`] instead of silently consuming the next
/// frame. End of stream before the window is exhausted fails with
/// [`io::ErrorKind::UnexpectedEof`].
pub struct BodyWindow<'a, R> {
    inner: Take<&'a mut R>,
    length: usize,
}

impl<'a, R: AsyncRead + Unpin> BodyWindow<'a, R> {
    pub fn new(reader: &'a mut R, length: usize) -> Self {
        Self {
            inner: reader.take(length as u64),
            length,
        }
    }

    /// Number of body bytes not read yet.
    pub fn remaining(&self) -> usize {
        self.inner.limit() as usize
    }

    pub fn is_exhausted(&self) -> bool {
        self.inner.limit() == 0
    }

    /// Reads the rest of the window into memory.
    pub async fn read_to_bytes(mut self) -> Result<Bytes, FrameError> {
        let remaining = self.remaining();
        let mut raw_body = Vec::with_capacity(remaining).limit(remaining);
        while raw_body.has_remaining_mut() {
            let n = self.inner.read_buf(&mut raw_body).await?;
            if n == 0 {
                // EOF, too early
                return Err(FrameError::ConnectionClosed(
                    raw_body.remaining_mut(),
                    self.length,
                ));
            }
        }
        Ok(raw_body.into_inner().into())
    }

    /// Discards the unread part of the body so the stream is positioned on
    /// the next frame header.
    pub async fn skip(mut self) -> Result<(), FrameError> {
        let remaining = self.remaining();
        let skipped = tokio::io::copy(&mut self.inner, &mut tokio::io::sink()).await? as usize;
        if skipped < remaining {
            return Err(FrameError::ConnectionClosed(
                remaining - skipped,
                self.length,
            ));
        }
        Ok(())
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for BodyWindow<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        if this.inner.limit() == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "read past the end of the frame body",
            )));
        }

        let filled_before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == filled_before => {
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame body",
                )))
            }
            other => other,
        }
    }
}

/// A frame body, either already in memory or still on the stream.
pub enum FrameBody<'a, R> {
    Buffered(Bytes),
    Streaming(BodyWindow<'a, R>),
}

/// Gives access to the body announced by `header`.
///
/// With `streaming` set, the caller gets a [`BodyWindow`] and must drain or
/// skip it; otherwise the whole body is read into memory through the window.
pub async fn read_body<'a, R: AsyncRead + Unpin>(
    header: &FrameHeader,
    reader: &'a mut R,
    streaming: bool,
) -> Result<FrameBody<'a, R>, FrameError> {
    let window = BodyWindow::new(reader, header.length as usize);
    if streaming {
        Ok(FrameBody::Streaming(window))
    } else {
        Ok(FrameBody::Buffered(window.read_to_bytes().await?))
    }
}
