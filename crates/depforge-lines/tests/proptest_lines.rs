// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property-based tests for `depforge-lines`.
//!
//! The central property: however a byte stream is chopped into chunks —
//! including boundaries inside a UTF-16 code unit — the emitted lines are
//! identical to feeding the whole stream at once.

use depforge_lines::{Encoding, LineBuffer};
use proptest::prelude::*;

// ── Strategies ──────────────────────────────────────────────────────────

/// Text with a healthy density of terminators and multi-byte characters.
fn arb_text() -> impl Strategy<Value = String> {
    proptest::collection::vec(
        prop_oneof![
            4 => "[a-z0-9 ]{1,8}",
            2 => Just("\n".to_string()),
            2 => Just("\r\n".to_string()),
            1 => Just("\r".to_string()),
            1 => Just("é猫".to_string()),
        ],
        0..12,
    )
    .prop_map(|parts| parts.concat())
}

fn arb_encoding() -> impl Strategy<Value = Encoding> {
    prop_oneof![Just(Encoding::Utf8), Just(Encoding::Utf16Le)]
}

fn encode(text: &str, encoding: Encoding) -> Vec<u8> {
    match encoding {
        Encoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        _ => text.as_bytes().to_vec(),
    }
}

/// Split `len` bytes at arbitrary positions, chosen independently of any
/// code-unit or character boundary.
fn arb_cuts(len: usize) -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::vec(0..=len, 0..6).prop_map(|mut cuts| {
        cuts.sort_unstable();
        cuts
    })
}

fn feed_in_chunks(bytes: &[u8], cuts: &[usize], encoding: Encoding) -> Vec<String> {
    let mut buf = LineBuffer::new(encoding);
    let mut lines = Vec::new();
    let mut prev = 0;
    for &cut in cuts {
        buf.add(&bytes[prev..cut]);
        buf.next_lines(false, |line| lines.push(line));
        prev = cut;
    }
    buf.add(&bytes[prev..]);
    buf.next_lines(true, |line| lines.push(line));
    lines
}

// ── Properties ──────────────────────────────────────────────────────────

proptest! {
    /// Chunk boundaries never change the emitted lines.
    #[test]
    fn chunking_is_transparent(
        (text, encoding, cuts) in (arb_text(), arb_encoding()).prop_flat_map(|(text, encoding)| {
            let len = encode(&text, encoding).len();
            (Just(text), Just(encoding), arb_cuts(len))
        })
    ) {
        let bytes = encode(&text, encoding);
        let single = feed_in_chunks(&bytes, &[], encoding);
        let chunked = feed_in_chunks(&bytes, &cuts, encoding);
        prop_assert_eq!(single, chunked);
    }

    /// No emitted line is empty or contains a terminator.
    #[test]
    fn lines_are_nonempty_and_terminator_free(
        (text, cuts) in arb_text().prop_flat_map(|text| {
            let len = text.len();
            (Just(text), arb_cuts(len))
        })
    ) {
        let bytes = encode(&text, Encoding::Utf8);
        for line in feed_in_chunks(&bytes, &cuts, Encoding::Utf8) {
            prop_assert!(!line.is_empty());
            prop_assert!(!line.contains(['\n', '\r']));
        }
    }

    /// Repeated no-data calls are idempotent: nothing is emitted and the
    /// pending tail is preserved verbatim.
    #[test]
    fn unfinished_calls_are_idempotent(text in "[a-z ]{0,20}") {
        let mut buf = LineBuffer::new(Encoding::Utf8);
        buf.add(text.as_bytes());
        for _ in 0..3 {
            let mut emitted = Vec::new();
            buf.next_lines(false, |line| emitted.push(line));
            prop_assert!(emitted.is_empty());
        }
        let mut drained = Vec::new();
        buf.next_lines(true, |line| drained.push(line));
        if text.is_empty() {
            prop_assert!(drained.is_empty());
        } else {
            prop_assert_eq!(drained, vec![text.clone()]);
        }
    }

    /// A terminator-free stream drains as exactly one line at finish.
    #[test]
    fn terminator_free_stream_is_one_line(text in "[a-z0-9 ]{1,40}") {
        let bytes = encode(&text, Encoding::Utf8);
        let lines = feed_in_chunks(&bytes, &[bytes.len() / 2], Encoding::Utf8);
        prop_assert_eq!(lines, vec![text]);
    }
}
