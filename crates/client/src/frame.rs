//! Length-prefixed framing
//!
//! Control messages and tunnel payload share the same framing: a big-endian
//! `u32` length followed by that many bytes. Once a tunnel is established,
//! data coming back from the destination arrives as a sequence of such
//! fragments; [`FramedStream`] strips the prefixes so callers read a plain
//! byte stream. Writes go out unframed.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Largest frame accepted on read
pub const MAX_FRAME_LEN: usize = 1 << 20;

const HEADER_LEN: usize = 4;
const SCRATCH_LEN: usize = 16 * 1024;

/// Write one frame and flush
pub async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame too large: {} bytes", payload.len()),
        ));
    }
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    writer.write_all(&buf).await?;
    writer.flush().await
}

/// Read one frame
pub async fn read_frame<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", len),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Decodes framed fragments on read, passes writes through
pub struct FramedStream<S> {
    inner: S,
    header: [u8; HEADER_LEN],
    header_filled: usize,
    /// Payload bytes left in the current fragment
    remaining: usize,
    scratch: Box<[u8]>,
}

impl<S> std::fmt::Debug for FramedStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedStream")
            .field("header_filled", &self.header_filled)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

impl<S> FramedStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            header: [0; HEADER_LEN],
            header_filled: 0,
            remaining: 0,
            scratch: vec![0u8; SCRATCH_LEN].into_boxed_slice(),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for FramedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            if this.remaining > 0 {
                let want = this.remaining.min(buf.remaining()).min(this.scratch.len());
                let mut chunk = ReadBuf::new(&mut this.scratch[..want]);
                ready!(Pin::new(&mut this.inner).poll_read(cx, &mut chunk))?;
                let n = chunk.filled().len();
                if n == 0 {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream closed inside a fragment",
                    )));
                }
                buf.put_slice(chunk.filled());
                this.remaining -= n;
                if this.remaining == 0 {
                    this.header_filled = 0;
                }
                return Poll::Ready(Ok(()));
            }

            let mut header = ReadBuf::new(&mut this.header[this.header_filled..]);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut header))?;
            let n = header.filled().len();
            if n == 0 {
                if this.header_filled == 0 {
                    // clean end of stream
                    return Poll::Ready(Ok(()));
                }
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed inside a fragment header",
                )));
            }
            this.header_filled += n;
            if this.header_filled < HEADER_LEN {
                continue;
            }

            let len = u32::from_be_bytes(this.header) as usize;
            if len > MAX_FRAME_LEN {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("fragment too large: {} bytes", len),
                )));
            }
            this.remaining = len;
            if len == 0 {
                this.header_filled = 0;
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for FramedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
