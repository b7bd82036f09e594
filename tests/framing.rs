//! Silence-delimited framing through the public API

use scanlink_core::{FrameAssembler, FrameReader};
use std::time::Duration;
use tokio::time::Instant;

const TIMEOUT: Duration = Duration::from_millis(100);

#[test]
fn test_chunks_within_timeout_join() {
    let start = Instant::now();
    let mut assembler = FrameAssembler::new(TIMEOUT);

    assembler.push(b"4601", start);
    assembler.push(b"234567890", start + Duration::from_millis(80));
    assert!(assembler.poll_expired(start + Duration::from_millis(150)).is_none());

    let frame = assembler.poll_expired(start + Duration::from_millis(180)).unwrap();
    assert_eq!(frame.text(), "4601234567890");
    assert_eq!(assembler.pending(), 0);
    assert!(assembler.deadline().is_none());
}

#[test]
fn test_flush_emits_partial_frame() {
    let mut assembler = FrameAssembler::new(TIMEOUT);
    assert!(assembler.flush().is_none());
    assembler.push(b"partial", Instant::now());
    assert_eq!(&*assembler.flush().unwrap(), b"partial");
}

#[tokio::test(start_paused = true)]
async fn test_reader_splits_on_silence() {
    let stream = tokio_test::io::Builder::new()
        .read(b"4601234")
        .read(b"567890")
        .wait(Duration::from_millis(300))
        .read(b"00046012345678901234")
        .build();

    let mut reader = FrameReader::new(stream, TIMEOUT);
    assert_eq!(reader.next_frame().await.unwrap().unwrap().text(), "4601234567890");
    assert_eq!(reader.next_frame().await.unwrap().unwrap().text(), "00046012345678901234");
    assert!(reader.next_frame().await.unwrap().is_none());
}
