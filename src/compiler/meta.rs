//! `#` directives and conditional compilation

/// Frame states of the conditional stack
pub mod cond {
    pub const COMPILING: u32 = 0;
    /// No branch taken yet
    pub const WAITING: u32 = 1;
    /// A branch was already taken
    pub const TAKEN: u32 = 2;
    /// An enclosing block is suppressed
    pub const PARENT: u32 = 4;
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum MetaError {
    #[error("ENDIF with no matching IFDEF")]
    UnmatchedEndif,

    #[error("ELSE with no matching IFDEF")]
    UnmatchedElse,

    #[error("ELSIFDEF with no matching IFDEF")]
    UnmatchedElsif,

    #[error("Multiple ELSE for one IFDEF")]
    MultipleElse,

    #[error("ELSIFDEF after ELSE")]
    ElsifAfterElse,

    #[error("Unterminated IFDEF")]
    UnterminatedIf,

    #[error("Bad condition: {0}")]
    BadCondition(String),

    #[error("Bad song number: {0}")]
    BadSongNumber(i64),

    #[error("Song {0} is already defined")]
    DuplicateSong(u32),

    #[error("Bad base: {0} (expected 10 or 16)")]
    BadBase(i64),

    #[error("Bad value for {name}: {value}")]
    BadFlag { name: String, value: String },

    #[error("Bad value for {name}: {value} (valid range {min}..{max})")]
    BadTunable { name: String, value: i64, min: i64, max: i64 },

    #[error("{0} requires an argument")]
    MissingArgument(String),

    #[error("Include nesting too deep")]
    IncludeTooDeep,

    #[error("Recursive include of {0}")]
    RecursiveInclude(String),

    #[error("Unable to open {file}: {reason}")]
    BadInclude { file: String, reason: String },
}

/// Nested `#IFDEF` state
#[derive(Debug, Clone)]
pub struct ConditionalStack {
    frames: Vec<u32>,
    has_else: Vec<bool>,
}

impl Default for ConditionalStack {
    fn default() -> Self {
        Self {
            frames: vec![cond::COMPILING],
            has_else: vec![false],
        }
    }
}

impl ConditionalStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while input is being skipped
    pub fn suppressed(&self) -> bool {
        self.frames.last().is_some_and(|&f| f != cond::COMPILING)
    }

    /// Open blocks, not counting the sentinel
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn push_if(&mut self, condition: bool) {
        let frame = if self.suppressed() {
            cond::PARENT
        } else if condition {
            cond::COMPILING
        } else {
            cond::WAITING
        };
        self.frames.push(frame);
        self.has_else.push(false);
    }

    pub fn elsif(&mut self, condition: bool) -> Result<(), MetaError> {
        if self.depth() == 0 {
            return Err(MetaError::UnmatchedElsif);
        }
        if self.has_else.last().copied().unwrap_or(false) {
            return Err(MetaError::ElsifAfterElse);
        }
        if let Some(top) = self.frames.last_mut() {
            *top = match *top {
                cond::COMPILING => cond::TAKEN,
                cond::WAITING if condition => cond::COMPILING,
                other => other,
            };
        }
        Ok(())
    }

    pub fn else_branch(&mut self) -> Result<(), MetaError> {
        if self.depth() == 0 {
            return Err(MetaError::UnmatchedElse);
        }
        if let Some(has_else) = self.has_else.last_mut() {
            if *has_else {
                return Err(MetaError::MultipleElse);
            }
            *has_else = true;
        }
        if let Some(top) = self.frames.last_mut() {
            *top = match *top {
                cond::COMPILING => cond::TAKEN,
                cond::WAITING => cond::COMPILING,
                other => other,
            };
        }
        Ok(())
    }

    pub fn endif(&mut self) -> Result<(), MetaError> {
        if self.depth() == 0 {
            return Err(MetaError::UnmatchedEndif);
        }
        self.frames.pop();
        self.has_else.pop();
        Ok(())
    }
}

/// Evaluate `A & B | C` left to right
pub fn eval_condition(expr: &str, is_defined: impl Fn(&str) -> bool) -> Result<bool, MetaError> {
    let bad = || MetaError::BadCondition(expr.trim().to_string());
    let mut value: Option<bool> = None;
    let mut op: Option<char> = None;
    let mut chars = expr.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '&' | '|' => {
                if value.is_none() || op.is_some() {
                    return Err(bad());
                }
                op = Some(c);
                chars.next();
            }
            _ => {
                let mut end = expr.len();
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_whitespace() || c == '&' || c == '|' {
                        end = j;
                        break;
                    }
                    chars.next();
                }
                let defined = is_defined(&expr[i..end]);
                value = Some(match (value, op.take()) {
                    (None, None) => defined,
                    (Some(v), Some('&')) => v && defined,
                    (Some(v), Some(_)) => v || defined,
                    _ => return Err(bad()),
                });
            }
        }
    }

    match (value, op) {
        (Some(v), None) => Ok(v),
        _ => Err(bad()),
    }
}

/// Parse a `0`/`1` flag argument
pub fn parse_flag(name: &str, arg: &str) -> Result<bool, MetaError> {
    match arg.trim() {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(MetaError::BadFlag {
            name: name.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Strip optional surrounding quotes from a directive argument
pub fn unquote(arg: &str) -> &str {
    let arg = arg.trim();
    arg.strip_prefix('"')
        .and_then(|a| a.strip_suffix('"'))
        .unwrap_or(arg)
}
