//! Framed stream decoder.
//!
//! Bulk uploads arrive as a sequence of length-prefixed chunks terminated by a
//! zero-length chunk. `FramedReader` turns that sequence back into one
//! continuous `AsyncRead` without knowing the total size in advance.
//!
//! Each chunk is buffered completely before any of its bytes are handed out.
//! Once the terminating chunk has been seen the reader reports end-of-stream
//! forever and never touches the underlying source again, so whatever follows
//! the payload on the wire stays available to the caller.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tracing::trace;

/// Largest chunk accepted from a peer
pub const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

#[derive(Debug)]
enum State {
    /// Reading the 8-byte length of the next chunk
    Header { buf: [u8; 8], filled: usize },
    /// Copying a chunk body into the pending buffer
    Body { buf: Vec<u8>, filled: usize },
    /// Handing out a buffered chunk
    Pending { buf: Vec<u8>, pos: usize },
}

impl State {
    fn header() -> Self {
        State::Header {
            buf: [0u8; 8],
            filled: 0,
        }
    }
}

/// Decoder for a chunked payload embedded in a byte stream.
#[derive(Debug)]
pub struct FramedReader<R> {
    inner: R,
    state: State,
    eof: bool,
}

impl<R> FramedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: State::header(),
            eof: false,
        }
    }

    /// True once the terminating chunk (or a clean end of the source) was read.
    pub fn is_finished(&self) -> bool {
        self.eof
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for FramedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.eof {
                return Poll::Ready(Ok(()));
            }

            match &mut this.state {
                State::Pending { buf, pos } => {
                    if *pos == buf.len() {
                        this.state = State::header();
                        continue;
                    }
                    let n = out.remaining().min(buf.len() - *pos);
                    out.put_slice(&buf[*pos..*pos + n]);
                    *pos += n;
                    if *pos == buf.len() {
                        this.state = State::header();
                    }
                    return Poll::Ready(Ok(()));
                }
                State::Header { buf, filled } => {
                    while *filled < buf.len() {
                        let mut rb = ReadBuf::new(&mut buf[*filled..]);
                        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut rb))?;
                        let n = rb.filled().len();
                        if n == 0 {
                            if *filled == 0 {
                                // End of source on a chunk boundary ends the payload.
                                this.eof = true;
                                return Poll::Ready(Ok(()));
                            }
                            return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
                        }
                        *filled += n;
                    }

                    let size = u64::from_le_bytes(*buf);
                    trace!(size, "framed chunk header");
                    if size == 0 {
                        this.eof = true;
                        return Poll::Ready(Ok(()));
                    }
                    if size > MAX_FRAME_LEN {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("frame of {size} bytes exceeds {MAX_FRAME_LEN}"),
                        )));
                    }
                    this.state = State::Body {
                        buf: vec![0u8; size as usize],
                        filled: 0,
                    };
                }
                State::Body { buf, filled } => {
                    while *filled < buf.len() {
                        let mut rb = ReadBuf::new(&mut buf[*filled..]);
                        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut rb))?;
                        let n = rb.filled().len();
                        if n == 0 {
                            return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
                        }
                        *filled += n;
                    }
                    let buf = std::mem::take(buf);
                    this.state = State::Pending { buf, pos: 0 };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};
    use tokio::io::AsyncReadExt;

    fn frame(chunks: &[&[u8]]) -> BytesMut {
        let mut buf = BytesMut::new();
        for chunk in chunks {
            buf.put_u64_le(chunk.len() as u64);
            buf.put_slice(chunk);
        }
        buf.put_u64_le(0);
        buf
    }

    #[tokio::test]
    async fn chunks_are_concatenated() {
        let wire = frame(&[b"hello ", b"framed ", b"world"]);
        let mut reader = FramedReader::new(&wire[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello framed world");
        assert!(reader.is_finished());
    }

    #[tokio::test]
    async fn zero_length_first_chunk_is_empty_stream() {
        let wire = frame(&[]);
        let mut reader = FramedReader::new(&wire[..]);
        let mut out = Vec::new();
        assert_eq!(reader.read_to_end(&mut out).await.unwrap(), 0);
        assert!(reader.is_finished());
    }

    #[tokio::test]
    async fn bytes_after_terminator_are_left_in_source() {
        let mut wire = frame(&[b"payload"]);
        wire.put_u64_le(42);

        let mut source = &wire[..];
        let mut reader = FramedReader::new(&mut source);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        // Further reads stay at end-of-stream without consuming the source.
        let mut extra = [0u8; 4];
        assert_eq!(reader.read(&mut extra).await.unwrap(), 0);

        assert_eq!(source.read_u64_le().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn small_reads_drain_a_chunk_across_calls() {
        let wire = frame(&[b"abcdefgh"]);
        let mut reader = FramedReader::new(&wire[..]);
        let mut first = [0u8; 3];
        reader.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"abc");
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"defgh");
    }

    #[tokio::test]
    async fn truncated_chunk_body_is_an_error() {
        let mut wire = BytesMut::new();
        wire.put_u64_le(10);
        wire.put_slice(b"abc");
        let mut reader = FramedReader::new(&wire[..]);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn end_of_source_at_header_boundary_ends_stream() {
        let mut wire = BytesMut::new();
        wire.put_u64_le(2);
        wire.put_slice(b"ok");
        let mut reader = FramedReader::new(&wire[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"ok");
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut wire = BytesMut::new();
        wire.put_u64_le(MAX_FRAME_LEN + 1);
        let mut reader = FramedReader::new(&wire[..]);
        let mut out = [0u8; 8];
        let err = reader.read(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
