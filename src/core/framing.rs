//! Inter-byte timeout framing
//!
//! Scanners do not reliably terminate their output, so a frame is whatever
//! arrives before the line goes quiet for `inter_byte_timeout`. Each chunk
//! restarts the silence timer; a frame is cut only by a gap, never by total
//! elapsed time. Stream end flushes whatever is buffered.

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::ops::Deref;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

const READ_CHUNK: usize = 4096;

/// One silence-delimited burst of scanner output
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    /// Wrap raw bytes
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Raw bytes
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Consume into raw bytes
    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Lossy UTF-8 text with surrounding whitespace trimmed
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).trim().to_string()
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("hex", &hex::encode(&self.data))
            .finish()
    }
}

impl From<&[u8]> for Frame {
    fn from(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// Buffer plus a single silence deadline
///
/// The assembler is clock-agnostic: callers pass `now` in and arm a timer
/// for [`FrameAssembler::deadline`]. With tokio's paused clock this makes
/// timing fully deterministic in tests.
#[derive(Debug)]
pub struct FrameAssembler {
    timeout: Duration,
    buffer: BytesMut,
    deadline: Option<Instant>,
}

impl FrameAssembler {
    /// Create an assembler cutting frames after `timeout` of silence
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            buffer: BytesMut::new(),
            deadline: None,
        }
    }

    /// Configured silence interval
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Append a chunk and restart the silence timer
    pub fn push(&mut self, chunk: &[u8], now: Instant) {
        self.buffer.extend_from_slice(chunk);
        self.deadline = Some(now + self.timeout);
    }

    /// When the pending timer fires, if one is armed
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Bytes waiting for the next cut
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Handle timer expiry
    ///
    /// Returns the buffered frame once `now` has reached the deadline. Before
    /// that, or with nothing buffered, returns `None`.
    pub fn poll_expired(&mut self, now: Instant) -> Option<Frame> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.take()
            }
            _ => None,
        }
    }

    /// Emit any buffered bytes immediately, bypassing the timer
    pub fn flush(&mut self) -> Option<Frame> {
        self.deadline = None;
        self.take()
    }

    fn take(&mut self) -> Option<Frame> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(Frame::new(self.buffer.split().freeze()))
        }
    }
}

/// Drives a [`FrameAssembler`] from an async byte stream
///
/// `next_frame` is cancel safe as long as the underlying reader's `read` is:
/// buffered bytes live in the assembler, not in the future.
pub struct FrameReader<R> {
    reader: R,
    assembler: FrameAssembler,
    chunk: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader
    pub fn new(reader: R, timeout: Duration) -> Self {
        Self {
            reader,
            assembler: FrameAssembler::new(timeout),
            chunk: vec![0u8; READ_CHUNK],
            eof: false,
        }
    }

    /// Next complete frame; `Ok(None)` once the stream has ended and the
    /// final partial frame (if any) has been returned
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Frame>> {
        loop {
            if self.eof {
                return Ok(self.assembler.flush());
            }

            let deadline = self.assembler.deadline();
            tokio::select! {
                biased;
                _ = sleep_until(deadline) => {
                    if let Some(frame) = self.assembler.poll_expired(Instant::now()) {
                        return Ok(Some(frame));
                    }
                }
                read = self.reader.read(&mut self.chunk) => {
                    match read? {
                        0 => {
                            self.eof = true;
                            tracing::debug!(pending = self.assembler.pending(), "Byte stream ended");
                        }
                        n => {
                            tracing::trace!(bytes = n, "Chunk received");
                            self.assembler.push(&self.chunk[..n], Instant::now());
                        }
                    }
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(100);

    #[test]
    fn test_chunks_within_interval_coalesce() {
        let start = Instant::now();
        let mut assembler = FrameAssembler::new(T);

        assembler.push(b"4601", start);
        assembler.push(b"2345", start + Duration::from_millis(60));
        assembler.push(b"67890", start + Duration::from_millis(120));

        // Deadline follows the last chunk, not the first
        assert!(assembler.poll_expired(start + Duration::from_millis(200)).is_none());
        let frame = assembler.poll_expired(start + Duration::from_millis(220)).unwrap();
        assert_eq!(&frame[..], b"4601234567890");
        assert_eq!(assembler.pending(), 0);
        assert!(assembler.deadline().is_none());
    }

    #[test]
    fn test_gap_splits_frames() {
        let start = Instant::now();
        let mut assembler = FrameAssembler::new(T);

        assembler.push(b"first", start);
        let first = assembler.poll_expired(start + T).unwrap();
        assembler.push(b"second", start + T);
        let second = assembler.poll_expired(start + T * 2).unwrap();

        assert_eq!(&first[..], b"first");
        assert_eq!(&second[..], b"second");
    }

    #[test]
    fn test_flush() {
        let mut assembler = FrameAssembler::new(T);
        assert!(assembler.flush().is_none());

        assembler.push(b"tail", Instant::now());
        assert_eq!(&assembler.flush().unwrap()[..], b"tail");
        assert!(assembler.flush().is_none());
        assert!(assembler.deadline().is_none());
    }

    #[test]
    fn test_frame_text_is_trimmed() {
        let frame = Frame::from(&b"  4601234567890\r\n"[..]);
        assert_eq!(frame.text(), "4601234567890");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_splits_on_silence() {
        let mock = tokio_test::io::Builder::new()
            .read(b"46012")
            .wait(Duration::from_millis(50))
            .read(b"34567890\r\n")
            .wait(Duration::from_millis(250))
            .read(b"000000000000123456789012")
            .build();

        let mut reader = FrameReader::new(mock, T);
        let first = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(&first[..], b"4601234567890\r\n");

        let second = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(&second[..], b"000000000000123456789012");

        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_flushes_at_stream_end() {
        let mock = tokio_test::io::Builder::new().read(b"partial").build();
        let mut reader = FrameReader::new(mock, Duration::from_secs(60));

        let started = Instant::now();
        let frame = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(&frame[..], b"partial");
        assert!(started.elapsed() < Duration::from_secs(60));
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_empty_stream() {
        let mock = tokio_test::io::Builder::new().build();
        let mut reader = FrameReader::new(mock, T);
        assert!(reader.next_frame().await.unwrap().is_none());
    }
}
