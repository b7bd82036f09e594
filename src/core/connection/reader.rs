//! Read path: transport bytes to frames to parsed scans

use crate::core::framing::{Frame, FrameReader};
use crate::core::transport::{ByteStream, TransportError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why the read loop stopped
#[derive(Debug)]
pub enum ReadExit {
    /// Transport reported end of stream; any partial frame was flushed
    EndOfStream,
    /// Cancelled by the user; no synthetic data is emitted
    Cancelled,
    /// Transport read failure
    Failed(TransportError),
}

/// Pump frames from `stream` into `on_frame` until it ends, fails or is cancelled
///
/// Frames are handed over strictly in arrival order; `on_frame` runs to
/// completion before the next read is issued.
pub async fn read_frames<F>(
    stream: ByteStream,
    inter_byte_timeout: Duration,
    cancel: &CancellationToken,
    mut on_frame: F,
) -> ReadExit
where
    F: FnMut(Frame),
{
    let mut frames = FrameReader::new(stream, inter_byte_timeout);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ReadExit::Cancelled,
            next = frames.next_frame() => next,
        };

        match next {
            Ok(Some(frame)) => {
                tracing::debug!(bytes = frame.len(), "Frame received");
                on_frame(frame);
            }
            Ok(None) => return ReadExit::EndOfStream,
            Err(e) => return ReadExit::Failed(TransportError::Read(e.to_string())),
        }
    }
}
