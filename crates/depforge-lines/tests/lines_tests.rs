// SPDX-License-Identifier: MIT OR Apache-2.0
//! Line extraction tests for `depforge-lines`.
//!
//! Covers terminator collapsing, incremental feeding across chunk
//! boundaries, finish-time draining, and the three supported encodings.

use depforge_lines::{Encoding, LineBuffer};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn collect(buf: &mut LineBuffer, finished: bool) -> Vec<String> {
    let mut lines = Vec::new();
    buf.next_lines(finished, |line| lines.push(line));
    lines
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

// ---------------------------------------------------------------------------
// Terminator handling
// ---------------------------------------------------------------------------

#[test]
fn crlf_and_mixed_terminators_collapse() {
    let mut buf = LineBuffer::new(Encoding::Utf8);
    buf.add(b"line1\r\nline2\n\rline3");
    assert_eq!(collect(&mut buf, true), ["line1", "line2", "line3"]);
}

#[test]
fn consecutive_terminators_never_emit_empty_lines() {
    let mut buf = LineBuffer::new(Encoding::Utf8);
    buf.add(b"a\n\n\n\nb\r\r\nc\n");
    assert_eq!(collect(&mut buf, true), ["a", "b", "c"]);
}

#[test]
fn leading_terminators_are_skipped() {
    let mut buf = LineBuffer::new(Encoding::Utf8);
    buf.add(b"\n\r\nfirst\nsecond\n");
    assert_eq!(collect(&mut buf, true), ["first", "second"]);
}

#[test]
fn terminator_run_split_across_chunks_collapses() {
    let mut buf = LineBuffer::new(Encoding::Utf8);
    buf.add(b"one\r");
    assert_eq!(collect(&mut buf, false), ["one"]);
    // the \n completing the \r\n pair arrives in the next chunk
    buf.add(b"\ntwo\n");
    assert_eq!(collect(&mut buf, false), ["two"]);
    assert!(collect(&mut buf, true).is_empty());
}

// ---------------------------------------------------------------------------
// Incremental feeding
// ---------------------------------------------------------------------------

#[test]
fn pending_line_completes_after_later_add() {
    let mut buf = LineBuffer::new(Encoding::Utf8);
    buf.add(b"par");
    assert!(collect(&mut buf, false).is_empty());
    buf.add(b"tial\nrest");
    assert_eq!(collect(&mut buf, false), ["partial"]);
    assert_eq!(collect(&mut buf, true), ["rest"]);
}

#[test]
fn no_new_data_never_emits_or_advances() {
    let mut buf = LineBuffer::new(Encoding::Utf8);
    buf.add(b"dangling");
    assert!(collect(&mut buf, false).is_empty());
    assert!(collect(&mut buf, false).is_empty());
    // the pending tail is still intact
    assert_eq!(collect(&mut buf, true), ["dangling"]);
}

#[test]
fn finish_drains_terminator_free_remainder_as_one_line() {
    let mut buf = LineBuffer::new(Encoding::Utf8);
    buf.add(b"no newline at end");
    assert_eq!(collect(&mut buf, true), ["no newline at end"]);
    // fully consumed, a second finished pass finds nothing
    assert!(collect(&mut buf, true).is_empty());
}

#[test]
fn finish_on_empty_buffer_is_a_no_op() {
    let mut buf = LineBuffer::new(Encoding::Utf8);
    assert!(collect(&mut buf, true).is_empty());
}

// ---------------------------------------------------------------------------
// Encodings
// ---------------------------------------------------------------------------

#[test]
fn utf16le_lines_convert_to_utf8() {
    let mut buf = LineBuffer::new(Encoding::Utf16Le);
    buf.add(&utf16le("héllo\r\nwörld\n"));
    assert_eq!(collect(&mut buf, true), ["héllo", "wörld"]);
}

#[test]
fn utf16le_chunk_boundary_inside_code_unit() {
    let bytes = utf16le("alpha\nbeta");
    let mut buf = LineBuffer::new(Encoding::Utf16Le);
    // split on an odd offset, right through a code unit
    buf.add(&bytes[..7]);
    assert!(collect(&mut buf, false).is_empty());
    buf.add(&bytes[7..]);
    assert_eq!(collect(&mut buf, false), ["alpha"]);
    assert_eq!(collect(&mut buf, true), ["beta"]);
}

#[test]
fn utf16le_odd_trailing_byte_dropped_at_finish() {
    let mut bytes = utf16le("tail\n");
    bytes.extend_from_slice(&utf16le("x")[..1]);
    let mut buf = LineBuffer::new(Encoding::Utf16Le);
    buf.add(&bytes);
    assert_eq!(collect(&mut buf, true), ["tail"]);
    assert!(collect(&mut buf, true).is_empty());
}

#[test]
fn latin1_bytes_map_to_unicode_scalars() {
    let mut buf = LineBuffer::new(Encoding::Latin1);
    buf.add(&[b'c', b'a', b'f', 0xE9, b'\n']);
    assert_eq!(collect(&mut buf, true), ["café"]);
}

#[test]
fn invalid_utf8_degrades_to_replacement_characters() {
    let mut buf = LineBuffer::new(Encoding::Utf8);
    buf.add(&[b'o', b'k', 0xFF, 0xFE, b'\n']);
    let lines = collect(&mut buf, true);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("ok"));
    assert!(lines[0].contains('\u{FFFD}'));
}

// ---------------------------------------------------------------------------
// Whole-buffer decoding
// ---------------------------------------------------------------------------

#[test]
fn text_decodes_everything_including_consumed_bytes() {
    let mut buf = LineBuffer::new(Encoding::Utf8);
    buf.add(b"first\nsecond");
    let _ = collect(&mut buf, false);
    assert_eq!(buf.text(), "first\nsecond");
}

#[test]
fn text_on_utf16le_ignores_odd_trailing_byte() {
    let mut bytes = utf16le("ab");
    bytes.push(0x41);
    let mut buf = LineBuffer::new(Encoding::Utf16Le);
    buf.add(&bytes);
    assert_eq!(buf.text(), "ab");
}
