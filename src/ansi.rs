//! Removal of ANSI escape sequences from captured terminal output.

use regex::Regex;
use std::sync::LazyLock;

// 7-bit C1 Fe escapes (except CSI) and complete CSI sequences.
static ANSI_ESCAPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("static ANSI regex")
});

const ESC: u8 = 0x1B;

/// An unterminated escape older than this many bytes is released as text.
const MAX_ESCAPE_LEN: usize = 64;

/// Strip colour, cursor and other control sequences, keeping plain text.
pub fn strip(text: &str) -> String {
    ANSI_ESCAPES.replace_all(text, "").into_owned()
}

/// Incremental [`strip`] over a byte stream.
///
/// Each chunk is decoded once and appended to [`text`](Self::text). A UTF-8
/// character or escape sequence cut off at the end of a chunk is held back
/// until the rest of it arrives.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    text: String,
    carry: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything decoded so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Decode `chunk` and return the text it added.
    pub fn push(&mut self, chunk: &[u8]) -> &str {
        self.carry.extend_from_slice(chunk);
        let cut = complete_prefix(&self.carry);
        let head: Vec<u8> = self.carry.drain(..cut).collect();
        self.append(&head)
    }

    /// Decode whatever is still held back, complete or not.
    pub fn finish(&mut self) -> &str {
        let rest = std::mem::take(&mut self.carry);
        self.append(&rest)
    }

    fn append(&mut self, bytes: &[u8]) -> &str {
        let start = self.text.len();
        self.text.push_str(&strip(&String::from_utf8_lossy(bytes)));
        &self.text[start..]
    }
}

/// Length of the prefix of `bytes` that ends neither inside an escape
/// sequence nor inside a UTF-8 character.
fn complete_prefix(bytes: &[u8]) -> usize {
    let mut cut = bytes.len();
    if let Some(esc) = bytes.iter().rposition(|&b| b == ESC) {
        if cut - esc < MAX_ESCAPE_LEN && !escape_complete(&bytes[esc..]) {
            cut = esc;
        }
    }

    // back up over a trailing partial character
    let tail_start = cut.saturating_sub(3);
    for i in (tail_start..cut).rev() {
        let b = bytes[i];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let width = match b {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        if cut - i < width {
            cut = i;
        }
        break;
    }
    cut
}

/// Whether `seq`, starting at an ESC, holds a whole escape sequence.
fn escape_complete(seq: &[u8]) -> bool {
    match seq.get(1) {
        None => false,
        Some(b'[') => seq[2..].iter().any(|b| (0x40..=0x7E).contains(b)),
        Some(_) => true,
    }
}
