// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

const NL: u16 = b'\n' as u16;
const CR: u16 = b'\r' as u16;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Text encoding of a captured output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// UTF-8, decoded lossily. Also the right pick when the encoding is
    /// unknown, since invalid sequences degrade to replacement characters
    /// instead of failing.
    #[default]
    Utf8,
    /// UTF-16 little-endian, two-byte code units. Windows-native build tools
    /// emit this when asked for unicode output.
    Utf16Le,
    /// Single-byte legacy code page; each byte maps to the Unicode scalar
    /// with the same value.
    Latin1,
}

impl Encoding {
    /// Width in bytes of one code unit.
    fn unit(self) -> usize {
        match self {
            Encoding::Utf16Le => 2,
            Encoding::Utf8 | Encoding::Latin1 => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// LineBuffer
// ---------------------------------------------------------------------------

/// Accumulates raw bytes in a declared [`Encoding`] and yields complete,
/// UTF-8 text lines as data arrives incrementally.
///
/// A line boundary is any run of `\n`/`\r` code units; consecutive
/// terminators collapse into a single boundary, so `\r\n` and `\n\n` never
/// produce empty lines. Consumed bytes are never re-scanned; an incomplete
/// trailing line stays pending until more bytes arrive or the stream is
/// declared finished, at which point the remainder is drained as one final
/// line.
#[derive(Debug, Clone, Default)]
pub struct LineBuffer {
    encoding: Encoding,
    bytes: Vec<u8>,
    consumed: usize,
}

impl LineBuffer {
    /// Create an empty buffer for the given encoding.
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            bytes: Vec::new(),
            consumed: 0,
        }
    }

    /// The declared encoding.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Returns `true` if no bytes have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Append raw bytes to the accumulator.
    pub fn add(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Extract every complete line from the unconsumed region, invoking
    /// `emit` with UTF-8 text for each.
    ///
    /// With `finished` set, a terminator-less remainder is emitted as one
    /// final line and the buffer is fully consumed; for [`Encoding::Utf16Le`]
    /// an odd trailing byte is dropped at that point. With `finished` unset
    /// and no complete line available, nothing is emitted and the consumed
    /// offset is left unchanged so a later [`add`](Self::add) can complete
    /// the pending line.
    pub fn next_lines<F>(&mut self, finished: bool, mut emit: F)
    where
        F: FnMut(String),
    {
        while let Some((start, end)) = self.next_line(finished) {
            emit(self.decode(start, end));
        }
    }

    /// Decode the entire accumulated byte buffer, consumed or not, as one
    /// UTF-8 string. Used for captured-output retrieval and failure dumps.
    #[must_use]
    pub fn text(&self) -> String {
        let mut end = self.bytes.len();
        if self.encoding.unit() == 2 {
            end &= !1;
        }
        self.decode(0, end)
    }

    /// Find the byte range of the next complete line and advance the
    /// consumed offset past it and its terminator run. Returns `None` when
    /// no further line can be extracted.
    fn next_line(&mut self, finished: bool) -> Option<(usize, usize)> {
        let unit = self.encoding.unit();

        // an odd trailing byte may be half of a code unit still in flight;
        // keep it out of the scan window until more data arrives
        let mut size = self.bytes.len();
        if unit == 2 {
            size &= !1;
        }

        if self.consumed >= size {
            if finished {
                self.consumed = self.bytes.len();
            }
            return None;
        }

        fn is_terminator(bytes: &[u8], unit: usize, i: usize) -> bool {
            let c = if unit == 2 {
                u16::from_le_bytes([bytes[i], bytes[i + 1]])
            } else {
                u16::from(bytes[i])
            };
            c == NL || c == CR
        }

        let mut start = self.consumed;
        let mut p = self.consumed;
        let mut line: Option<(usize, usize)> = None;

        while p < size {
            if is_terminator(&self.bytes, unit, p) {
                let end = p;

                while p < size && is_terminator(&self.bytes, unit, p) {
                    p += unit;
                }

                if end > start {
                    line = Some((start, end));
                    break;
                }

                // terminator run with nothing before it, restart past it
                start = p;
            } else {
                p += unit;
            }
        }

        match line {
            Some(range) => {
                self.consumed = p;
                debug_assert!(self.consumed <= self.bytes.len());
                Some(range)
            }
            None => {
                if finished {
                    // drain the remainder as one final line, past any leading
                    // terminator run so chunk boundaries stay transparent
                    let range = (start, size);
                    self.consumed = self.bytes.len();
                    (range.1 > range.0).then_some(range)
                } else {
                    None
                }
            }
        }
    }

    fn decode(&self, start: usize, end: usize) -> String {
        let bytes = &self.bytes[start..end];
        match self.encoding {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Encoding::Utf16Le => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
        }
    }
}
