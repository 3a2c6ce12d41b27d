//! Bracketed parameter lists (`{1 2 3 | 4 5}`, `{0:15'2}*2`, ...)

use super::cursor::{parse_int, Cursor};
use serde::Serialize;

/// Largest accepted trailing `'n` repeat; larger ones are ignored
pub const MAX_TRAILING_REPEAT: i64 = 100;

/// Most values one list may expand to
pub const MAX_LIST_LEN: usize = 2048;

/// One list element
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Str(String),
    /// `WT<n>` reference to a waveform definition
    WaveRef(u32),
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            ParamValue::Int(v) => Some(v),
            _ => None,
        }
    }
}

/// A list split at the loop separator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParamList {
    pub main: Vec<ParamValue>,
    /// Values after `|`, repeated for as long as the effect runs
    pub looped: Vec<ParamValue>,
}

impl ParamList {
    pub fn from_ints(main: &[i64], looped: &[i64]) -> Self {
        Self {
            main: main.iter().map(|&v| ParamValue::Int(v)).collect(),
            looped: looped.iter().map(|&v| ParamValue::Int(v)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_empty() && self.looped.is_empty()
    }

    pub fn len(&self) -> usize {
        self.main.len() + self.looped.len()
    }

    pub fn has_loop(&self) -> bool {
        !self.looped.is_empty()
    }

    /// All values, main part first
    pub fn values(&self) -> impl Iterator<Item = &ParamValue> {
        self.main.iter().chain(self.looped.iter())
    }

    /// Integer values of the main part, or `None` if any element is not an integer
    pub fn main_ints(&self) -> Option<Vec<i64>> {
        self.main.iter().map(ParamValue::as_int).collect()
    }

    /// Apply `f` to every integer; `None` means the result left the i64 range
    fn try_map_ints(&mut self, f: impl Fn(i64) -> Option<i64>) -> Result<(), i64> {
        for v in self.main.iter_mut().chain(self.looped.iter_mut()) {
            if let ParamValue::Int(n) = v {
                *n = f(*n).ok_or(*n)?;
            }
        }
        Ok(())
    }

    fn repeat_each(&mut self, n: usize) {
        for part in [&mut self.main, &mut self.looped] {
            *part = part
                .drain(..)
                .flat_map(|v| std::iter::repeat(v).take(n))
                .collect();
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ListError {
    #[error("Expected '{0}'")]
    MissingDelimiter(char),

    #[error("Empty list")]
    Empty,

    #[error("Bad interval: {0}")]
    BadInterval(String),

    #[error("Unexpected character in list: '{0}'")]
    Unexpected(char),

    #[error("Unterminated list")]
    Unterminated,

    #[error("Unterminated string")]
    UnterminatedString,

    #[error("Only one loop point allowed per list")]
    DoubleLoop,

    #[error("Repeat count must be 1 or more: {0}")]
    BadRepeat(i64),

    #[error("Value out of range: {0}")]
    Overflow(String),

    #[error("List is too long (max {0} values)")]
    TooLong(usize),
}

/// Delimiters and accepted element forms
#[derive(Debug, Clone, Copy)]
pub struct ListOptions {
    pub open: u8,
    pub close: u8,
    pub allow_wave_refs: bool,
    /// Radix of plain numbers (`#BASE`)
    pub base: u32,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            open: b'{',
            close: b'}',
            allow_wave_refs: false,
            base: 10,
        }
    }
}

impl ListOptions {
    pub fn parens() -> Self {
        Self {
            open: b'(',
            close: b')',
            ..Self::default()
        }
    }
}

/// Parsed list and the non-fatal problems found while parsing it
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedList {
    pub list: ParamList,
    pub warnings: Vec<String>,
}

fn read_number(cursor: &mut Cursor, base: u32) -> Option<i64> {
    if base == 16 {
        cursor.set_base(16);
    }
    let token = cursor.get_numeric_string();
    parse_int(&token)
}

fn expand_interval(
    from: i64,
    to: i64,
    step: Option<i64>,
    warnings: &mut Vec<String>,
) -> Result<Vec<i64>, ListError> {
    let step = match step {
        None => {
            if to >= from {
                1
            } else {
                -1
            }
        }
        Some(0) => return Err(ListError::BadInterval(format!("{}:{}:0", from, to))),
        Some(s) if (to > from && s < 0) || (to < from && s > 0) => {
            warnings.push(format!(
                "Interval step {} does not match direction of {}:{}, using {}",
                s, from, to, -s
            ));
            -s
        }
        Some(s) => s,
    };

    let count = (to as i128 - from as i128) / step as i128 + 1;
    if count > MAX_LIST_LEN as i128 {
        return Err(ListError::TooLong(MAX_LIST_LEN));
    }
    let mut out = Vec::with_capacity(count as usize);
    let mut v = Some(from);
    while let Some(n) = v.filter(|&n| (step > 0 && n <= to) || (step < 0 && n >= to)) {
        out.push(n);
        v = n.checked_add(step);
    }
    Ok(out)
}

/// Parse a list starting at the opening delimiter
pub fn parse_list(cursor: &mut Cursor, opts: &ListOptions) -> Result<ParsedList, ListError> {
    let mut list = ParamList::default();
    let mut warnings = Vec::new();
    let mut in_loop = false;

    cursor.skip_whitespace();
    if cursor.peek() != Some(opts.open) {
        return Err(ListError::MissingDelimiter(opts.open as char));
    }
    cursor.getch();

    loop {
        cursor.skip_whitespace();
        let c = cursor.peek().ok_or(ListError::Unterminated)?;
        let part = if in_loop { &mut list.looped } else { &mut list.main };

        if c == opts.close {
            cursor.getch();
            break;
        }
        match c {
            b',' => {
                cursor.getch();
            }
            b'|' => {
                cursor.getch();
                if in_loop {
                    return Err(ListError::DoubleLoop);
                }
                in_loop = true;
            }
            b'"' => {
                cursor.getch();
                let text = cursor.get_string_until(b"\"\n");
                if cursor.getch() != Some(b'"') {
                    return Err(ListError::UnterminatedString);
                }
                part.push(ParamValue::Str(text));
            }
            b'W' if opts.allow_wave_refs && cursor.peek_string(2) == "WT" => {
                cursor.skip_n(2);
                let n = read_number(cursor, 10)
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or(ListError::Unexpected('W'))?;
                part.push(ParamValue::WaveRef(n));
            }
            c if c == b'-' || c.is_ascii_digit() || (opts.base == 16 && c.is_ascii_hexdigit()) => {
                let from = read_number(cursor, opts.base).ok_or(ListError::Unexpected(c as char))?;
                let mut values = if cursor.peek() == Some(b':') {
                    cursor.getch();
                    let to = read_number(cursor, opts.base)
                        .ok_or_else(|| ListError::BadInterval(format!("{}:", from)))?;
                    let step = if cursor.peek() == Some(b':') {
                        cursor.getch();
                        Some(
                            read_number(cursor, opts.base)
                                .ok_or_else(|| ListError::BadInterval(format!("{}:{}:", from, to)))?,
                        )
                    } else {
                        None
                    };
                    expand_interval(from, to, step, &mut warnings)?
                } else {
                    vec![from]
                };

                if cursor.peek() == Some(b'\'') {
                    cursor.getch();
                    let n = read_number(cursor, 10).ok_or(ListError::Unexpected('\''))?;
                    if n < 1 {
                        return Err(ListError::BadRepeat(n));
                    }
                    if n as u128 * values.len() as u128 > MAX_LIST_LEN as u128 {
                        return Err(ListError::TooLong(MAX_LIST_LEN));
                    }
                    values = values
                        .into_iter()
                        .flat_map(|v| std::iter::repeat(v).take(n as usize))
                        .collect();
                }
                part.extend(values.into_iter().map(ParamValue::Int));
                if list.len() > MAX_LIST_LEN {
                    return Err(ListError::TooLong(MAX_LIST_LEN));
                }
            }
            other => return Err(ListError::Unexpected(other as char)),
        }
    }

    if list.is_empty() {
        return Err(ListError::Empty);
    }

    apply_trailing_ops(cursor, &mut list, &mut warnings)?;

    Ok(ParsedList { list, warnings })
}

fn apply_trailing_ops(
    cursor: &mut Cursor,
    list: &mut ParamList,
    warnings: &mut Vec<String>,
) -> Result<(), ListError> {
    loop {
        cursor.skip_blanks();
        let op = match cursor.peek() {
            Some(op @ (b'+' | b'-' | b'*' | b'\'')) => op,
            _ => {
                cursor.unskip_whitespace();
                return Ok(());
            }
        };
        cursor.getch();
        let n = match read_number(cursor, 10) {
            Some(n) => n,
            None => {
                cursor.ungetch();
                cursor.unskip_whitespace();
                return Ok(());
            }
        };
        let mapped = match op {
            b'+' => list.try_map_ints(|v| v.checked_add(n)),
            b'-' => list.try_map_ints(|v| v.checked_sub(n)),
            b'*' => list.try_map_ints(|v| v.checked_mul(n)),
            _ => {
                if n < 1 {
                    return Err(ListError::BadRepeat(n));
                }
                if n > MAX_TRAILING_REPEAT {
                    warnings.push(format!("Repeat count {} is too large, ignoring", n));
                } else if list.len() * n as usize > MAX_LIST_LEN {
                    return Err(ListError::TooLong(MAX_LIST_LEN));
                } else {
                    list.repeat_each(n as usize);
                }
                Ok(())
            }
        };
        if let Err(v) = mapped {
            return Err(ListError::Overflow(format!("{}{}{}", v, op as char, n)));
        }
    }
}
