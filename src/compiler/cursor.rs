//! Character stream cursor over an in-memory source buffer

use crate::error::SourcePos;
use flate2::read::GzDecoder;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Maximum `#INCLUDE` nesting
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// Seekable byte cursor with line/column tracking
#[derive(Debug, Clone)]
pub struct Cursor {
    name: String,
    path: Option<PathBuf>,
    data: Vec<u8>,
    pos: usize,
    line: usize,
    column: usize,
    /// Line/column before each consumed byte, for ungetch
    history: Vec<(usize, usize)>,
    /// Bytes before this index were spliced in by insert_string
    synthetic_end: usize,
    /// End offsets of spliced regions still being read, outermost first
    splices: Vec<usize>,
    /// Bytes skipped by the last skip_whitespace
    last_skip: usize,
    base: u32,
    float: bool,
}

impl Cursor {
    pub fn new(name: impl Into<String>, text: &str) -> Self {
        Self::from_bytes(name, text.as_bytes().to_vec())
    }

    pub fn from_bytes(name: impl Into<String>, mut data: Vec<u8>) -> Self {
        if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
            data.drain(..3);
        }
        Self {
            name: name.into(),
            path: None,
            data,
            pos: 0,
            line: 1,
            column: 1,
            history: Vec::new(),
            synthetic_end: 0,
            splices: Vec::new(),
            last_skip: 0,
            base: 10,
            float: false,
        }
    }

    /// Open a source file, decompressing gzip data when the magic matches
    pub fn open(path: &Path) -> io::Result<Self> {
        let raw = std::fs::read(path)?;
        let data = if raw.len() >= 2 && raw[0] == 0x1f && raw[1] == 0x8b {
            let mut decoder = GzDecoder::new(raw.as_slice());
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            out
        } else {
            raw
        };
        let mut cursor = Self::from_bytes(path.display().to_string(), data);
        cursor.path = Some(path.to_path_buf());
        Ok(cursor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory of the file this cursor reads, if it came from disk
    pub fn dir(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn position(&self) -> SourcePos {
        SourcePos {
            file: self.name.clone(),
            line: self.line,
            column: self.column,
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn getch(&mut self) -> Option<u8> {
        let c = *self.data.get(self.pos)?;
        self.history.push((self.line, self.column));
        if self.pos >= self.synthetic_end {
            if c == b'\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.pos += 1;
        Some(c)
    }

    pub fn ungetch(&mut self) {
        if let Some((line, column)) = self.history.pop() {
            self.pos -= 1;
            self.line = line;
            self.column = column;
        }
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }

    /// Up to `n` upcoming bytes without consuming them
    pub fn peek_string(&self, n: usize) -> String {
        let end = (self.pos + n).min(self.data.len());
        String::from_utf8_lossy(&self.data[self.pos..end]).into_owned()
    }

    pub fn peek_bytes(&self, n: usize) -> &[u8] {
        let end = (self.pos + n).min(self.data.len());
        &self.data[self.pos..end]
    }

    pub fn skip_n(&mut self, n: usize) {
        for _ in 0..n {
            if self.getch().is_none() {
                break;
            }
        }
    }

    /// Consume the rest of the input (`#EOF`)
    pub fn skip_to_end(&mut self) {
        while self.getch().is_some() {}
    }

    /// Skip whitespace and return how many bytes were skipped
    pub fn skip_whitespace(&mut self) -> usize {
        let mut n = 0;
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.getch();
            n += 1;
        }
        self.last_skip = n;
        n
    }

    /// Skip spaces and tabs, staying on the current line
    pub fn skip_blanks(&mut self) -> usize {
        let mut n = 0;
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r')) {
            self.getch();
            n += 1;
        }
        self.last_skip = n;
        n
    }

    /// Rewind over the whitespace skipped by the last skip call
    pub fn unskip_whitespace(&mut self) {
        for _ in 0..self.last_skip {
            self.ungetch();
        }
        self.last_skip = 0;
    }

    /// Read up to (not including) one of `delims` or the end of input
    pub fn get_string_until(&mut self, delims: &[u8]) -> String {
        let mut out = Vec::new();
        while let Some(c) = self.peek() {
            if delims.contains(&c) {
                break;
            }
            out.push(c);
            self.getch();
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Read while `accept` holds
    pub fn get_string_in_range(&mut self, accept: impl Fn(u8) -> bool) -> String {
        let mut out = Vec::new();
        while let Some(c) = self.peek() {
            if !accept(c) {
                break;
            }
            out.push(c);
            self.getch();
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Read an identifier (`[A-Za-z0-9_-]`, not starting with a digit)
    pub fn get_identifier(&mut self) -> String {
        if matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            return String::new();
        }
        self.get_string_in_range(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'-')
    }

    /// Use `base` for the next numeric token only
    pub fn set_base(&mut self, base: u32) {
        self.base = base;
    }

    /// Accept a fractional part in the next numeric token only
    pub fn allow_float(&mut self) {
        self.float = true;
    }

    /// Scan a numeric token
    ///
    /// Accepts a leading `-`, a `0x`/`0d` radix prefix and, when enabled for
    /// this call, a fractional part. Tokens scanned under a one-shot base of
    /// 16 are returned with an explicit `0x` prefix. Returns an empty string
    /// when no digits follow.
    pub fn get_numeric_string(&mut self) -> String {
        let mut base = std::mem::replace(&mut self.base, 10);
        let float = std::mem::replace(&mut self.float, false);
        let start_pos = self.pos;
        let mut out = String::new();

        if self.peek() == Some(b'-') {
            self.getch();
            out.push('-');
        }

        let mut prefixed = false;
        if self.peek() == Some(b'0') {
            match self.peek_at(1) {
                Some(b'x' | b'X') if self.peek_at(2).is_some_and(|c| c.is_ascii_hexdigit()) => {
                    self.skip_n(2);
                    base = 16;
                    prefixed = true;
                }
                Some(b'd' | b'D') if self.peek_at(2).is_some_and(|c| c.is_ascii_digit()) => {
                    self.skip_n(2);
                    base = 10;
                    prefixed = true;
                }
                _ => {}
            }
        }
        if base == 16 {
            out.push_str("0x");
        }

        let digits = self.get_string_in_range(|c| (c as char).is_digit(base));
        if digits.is_empty() {
            // Nothing numeric here; leave the stream untouched
            while self.pos > start_pos {
                self.ungetch();
            }
            return String::new();
        }
        out.push_str(&digits);

        if float && !prefixed && base == 10 && self.peek() == Some(b'.') {
            if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                self.getch();
                out.push('.');
                out.push_str(&self.get_string_in_range(|c| c.is_ascii_digit()));
            }
        }

        out
    }

    /// Scan and parse an integer token
    pub fn get_int(&mut self) -> Option<i64> {
        let token = self.get_numeric_string();
        parse_int(&token)
    }

    /// Splice `text` in at the current position
    pub fn insert_string(&mut self, text: &str) {
        let bytes = text.as_bytes();
        self.data.splice(self.pos..self.pos, bytes.iter().copied());
        if self.pos < self.synthetic_end {
            self.synthetic_end += bytes.len();
        } else {
            self.synthetic_end = self.pos + bytes.len();
        }
        let pos = self.pos;
        self.splices.retain(|&end| end >= pos);
        for end in &mut self.splices {
            *end += bytes.len();
        }
        self.splices.push(pos + bytes.len());
    }

    /// Spliced regions enclosing the current position
    ///
    /// A region whose last byte was just read still counts, so text spliced
    /// at the very end of another splice nests inside it.
    pub fn splice_depth(&self) -> usize {
        self.splices.iter().filter(|&&end| end >= self.pos).count()
    }
}

/// Parse a token produced by [`Cursor::get_numeric_string`]
pub fn parse_int(token: &str) -> Option<i64> {
    let (neg, body) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let value = if let Some(hex) = body.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()?
    } else {
        body.parse::<i64>().ok()?
    };
    Some(if neg { -value } else { value })
}

/// Parse a token that may carry a fractional part
pub fn parse_float(token: &str) -> Option<f64> {
    if token.contains("0x") {
        return parse_int(token).map(|v| v as f64);
    }
    token.parse::<f64>().ok()
}

/// Stack of cursors, one per open include file
#[derive(Debug, Default)]
pub struct CursorStack {
    cursors: Vec<Cursor>,
}

impl CursorStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the nesting limit is reached
    pub fn push(&mut self, cursor: Cursor) -> bool {
        if self.cursors.len() >= MAX_INCLUDE_DEPTH {
            return false;
        }
        self.cursors.push(cursor);
        true
    }

    pub fn pop(&mut self) -> Option<Cursor> {
        self.cursors.pop()
    }

    pub fn depth(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn current(&self) -> Option<&Cursor> {
        self.cursors.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut Cursor> {
        self.cursors.last_mut()
    }

    /// True if `name` is already open somewhere in the stack
    pub fn contains(&self, name: &str) -> bool {
        self.cursors.iter().any(|c| c.name == name)
    }
}
