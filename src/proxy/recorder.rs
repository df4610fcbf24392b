//! Recording stream wrapper
//!
//! While recording, every byte read from the inner stream is also kept in a
//! buffer and writes are swallowed. This lets a TLS parser inspect the
//! Client Hello (and attempt to answer it) without the client seeing any
//! reply. Once recording stops, reads replay the buffer before reaching the
//! inner stream again, so the upstream receives the exact original bytes.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Byte stream that can capture and later replay what was read from it
#[derive(Debug)]
pub struct Recorder<S> {
    inner: S,
    recording: bool,
    buf: Vec<u8>,
    pos: usize,
}

impl<S> Recorder<S> {
    /// Wrap `inner` in recording mode
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            recording: true,
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Wrap `inner` in recording mode, with `prefix` read back first.
    ///
    /// The prefix counts as recorded and is replayed again after
    /// [`stop_recording`](Self::stop_recording).
    pub fn with_prefix(inner: S, prefix: Vec<u8>) -> Self {
        Self {
            inner,
            recording: true,
            buf: prefix,
            pos: 0,
        }
    }

    /// Wrap `inner` with `bytes` already queued for replay.
    ///
    /// Used when bytes were consumed from the stream before it was wrapped.
    pub fn replaying(inner: S, bytes: Vec<u8>) -> Self {
        Self {
            inner,
            recording: false,
            buf: bytes,
            pos: 0,
        }
    }

    /// Stop capturing. Subsequent reads drain the buffer first, and writes
    /// reach the inner stream.
    pub fn stop_recording(&mut self) {
        if self.recording {
            self.recording = false;
            self.pos = 0;
        }
    }

    /// Whether reads are still being captured
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Bytes that will be replayed before the inner stream is read again
    pub fn pending(&self) -> &[u8] {
        if self.recording {
            &self.buf
        } else {
            &self.buf[self.pos..]
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Recorder<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        // While recording, `pos` tracks how much of `buf` the reader has
        // seen. Afterwards it is the replay cursor.
        if this.pos < this.buf.len() {
            let n = out.remaining().min(this.buf.len() - this.pos);
            out.put_slice(&this.buf[this.pos..this.pos + n]);
            this.pos += n;
            if !this.recording && this.pos == this.buf.len() {
                this.buf = Vec::new();
                this.pos = 0;
            }
            return Poll::Ready(Ok(()));
        }

        let before = out.filled().len();
        let res = Pin::new(&mut this.inner).poll_read(cx, out);
        if this.recording {
            if let Poll::Ready(Ok(())) = res {
                this.buf.extend_from_slice(&out.filled()[before..]);
                this.pos = this.buf.len();
            }
        }
        res
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Recorder<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.recording {
            return Poll::Ready(Ok(data.len()));
        }
        Pin::new(&mut this.inner).poll_write(cx, data)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.recording {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.recording {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // --- Recording ---

    #[tokio::test]
    async fn test_recording_captures_reads() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"hello").await.unwrap();

        let mut rec = Recorder::new(server);
        let mut buf = [0u8; 5];
        rec.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(rec.pending(), b"hello");
        assert!(rec.is_recording());
    }

    #[tokio::test]
    async fn test_writes_swallowed_while_recording() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut rec = Recorder::new(server);

        rec.write_all(b"alert").await.unwrap();
        rec.flush().await.unwrap();
        rec.stop_recording();
        rec.write_all(b"data").await.unwrap();

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"data");
    }

    // --- Replay ---

    #[tokio::test]
    async fn test_replay_then_passthrough() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"abc").await.unwrap();

        let mut rec = Recorder::new(server);
        let mut first = [0u8; 3];
        rec.read_exact(&mut first).await.unwrap();
        rec.stop_recording();

        client.write_all(b"def").await.unwrap();
        drop(client);

        let mut all = Vec::new();
        rec.read_to_end(&mut all).await.unwrap();
        assert_eq!(all, b"abcdef");
        assert!(rec.pending().is_empty());
    }

    #[tokio::test]
    async fn test_replay_into_small_buffer() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);

        let mut rec = Recorder::replaying(server, b"0123456789".to_vec());
        let mut chunk = [0u8; 4];
        let n = rec.read(&mut chunk).await.unwrap();
        assert_eq!(&chunk[..n], b"0123");

        let mut rest = Vec::new();
        rec.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"456789");
    }

    #[tokio::test]
    async fn test_prefix_read_then_replayed() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"cd").await.unwrap();
        drop(client);

        let mut rec = Recorder::with_prefix(server, b"ab".to_vec());
        let mut first = [0u8; 4];
        rec.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"abcd");
        assert_eq!(rec.pending(), b"abcd");

        rec.stop_recording();
        let mut replayed = Vec::new();
        rec.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(replayed, b"abcd");
    }

    #[tokio::test]
    async fn test_replaying_is_not_recording() {
        let (_client, server) = tokio::io::duplex(8);
        let rec = Recorder::replaying(server, vec![1, 2, 3]);
        assert!(!rec.is_recording());
        assert_eq!(rec.pending(), &[1, 2, 3]);
    }
}
