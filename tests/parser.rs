//! Barcode classification through the public API

use scanlink_core::core::parser::compute_mark;
use scanlink_core::{Barcode, BarcodeKind, BarcodeParser, Frame, FrameParser, ParseResult};

fn classify(raw: &[u8]) -> ParseResult {
    BarcodeParser::new().parse_frame(&Frame::from(raw)).result
}

#[test]
fn test_sscc_strips_leading_zeros() {
    assert_eq!(
        classify(b"00046012345678901234\r\n"),
        ParseResult::Parsed {
            barcode: Barcode::Sscc {
                sscc: "046012345678901234".into()
            }
        }
    );
}

#[test]
fn test_ean13_and_unknown() {
    assert_eq!(classify(b"4601234567890").kind(), Some(BarcodeKind::Ean13));
    assert_eq!(classify(b"hello world"), ParseResult::UnknownFormat);
}

#[test]
fn test_prescription() {
    assert_eq!(classify(b"pQWxhZGRpbg==").kind(), Some(BarcodeKind::Prescription));
}

#[test]
fn test_mdlp_mark_covers_frame_without_crlf() {
    let raw = b"0104601234567893215AbCdEfGhIjKl\x1d91EE06\r\n";
    match classify(raw) {
        ParseResult::Parsed {
            barcode: Barcode::Mdlp { sgtin, mark, .. },
        } => {
            assert_eq!(sgtin, "046012345678935AbCdEfGhIjKl");
            assert_eq!(mark, compute_mark(&raw[..raw.len() - 2]).unwrap());
        }
        other => panic!("expected MDLP record, got {other:?}"),
    }
}

#[test]
fn test_stx_prefix_is_omc() {
    assert_eq!(classify(b"\x02\x10\x20binary").kind(), Some(BarcodeKind::Omc));
}

#[test]
fn test_sscc_capture_keeps_eighteen_digits() {
    assert_eq!(
        classify(b"000000000000123456789012"),
        ParseResult::Parsed {
            barcode: Barcode::Sscc {
                sscc: "000000123456789012".into()
            }
        }
    );
}
