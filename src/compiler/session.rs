//! Per-compilation state shared by the driver and the directive handlers

use super::cursor::{Cursor, CursorStack};
use super::meta::ConditionalStack;
use crate::error::{Error, SourcePos};
use std::collections::BTreeSet;
use std::fmt;

/// A non-fatal diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub pos: SourcePos,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] Warning: {}", self.pos, self.message)
    }
}

#[derive(Debug, Default)]
pub struct Session {
    pub cursors: CursorStack,
    pub conditions: ConditionalStack,
    defines: BTreeSet<String>,
    warnings_as_errors: bool,
    warnings: Vec<Warning>,
    /// Radix of numbers in lists (`#BASE`)
    pub base: u32,
    /// `#OCTAVE-REV 1` swaps `<` and `>`
    pub octave_rev: bool,
    /// `#EN-REV 1` negates arpeggio definitions
    pub en_rev: bool,
}

impl Session {
    pub fn new(defines: &[String], warnings_as_errors: bool) -> Self {
        Self {
            defines: defines.iter().cloned().collect(),
            warnings_as_errors,
            base: 10,
            ..Self::default()
        }
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursors.current()
    }

    pub fn pos(&self) -> SourcePos {
        self.cursors
            .current()
            .map(Cursor::position)
            .unwrap_or_default()
    }

    /// Positioned fatal error at the current location
    pub fn error(&self, message: impl fmt::Display) -> Error {
        Error::Compile {
            pos: self.pos(),
            message: message.to_string(),
        }
    }

    /// Record a warning, or fail when warnings are errors
    pub fn warn(&mut self, message: impl fmt::Display) -> Result<(), Error> {
        let warning = Warning {
            pos: self.pos(),
            message: message.to_string(),
        };
        if self.warnings_as_errors {
            return Err(Error::Compile {
                pos: warning.pos,
                message: warning.message,
            });
        }
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
        Ok(())
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn define(&mut self, symbol: &str) {
        self.defines.insert(symbol.to_string());
    }

    pub fn undef(&mut self, symbol: &str) {
        self.defines.remove(symbol);
    }

    pub fn is_defined(&self, symbol: &str) -> bool {
        self.defines.contains(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_format() {
        let mut session = Session::new(&[], false);
        session.cursors.push(Cursor::new("song.mml", "abc"));
        session.warn("No active channels").unwrap();
        assert_eq!(
            session.warnings()[0].to_string(),
            "[song.mml:1,1] Warning: No active channels"
        );
    }

    #[test]
    fn test_warnings_as_errors() {
        let mut session = Session::new(&[], true);
        session.cursors.push(Cursor::new("song.mml", "abc"));
        let err = session.warn("oops").unwrap_err();
        assert_eq!(err.to_string(), "[song.mml:1,1] Error: oops");
        assert!(session.warnings().is_empty());
    }

    #[test]
    fn test_defines() {
        let mut session = Session::new(&["PAL".to_string()], false);
        assert!(session.is_defined("PAL"));
        session.define("X");
        session.undef("PAL");
        assert!(!session.is_defined("PAL"));
        assert!(session.is_defined("X"));
    }
}
