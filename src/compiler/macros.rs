//! Text macros (`$name(a, b=2){...}`)
//!
//! A macro body is kept as text with `%n%` argument slots. Invoking a macro
//! produces plain text which the driver splices back into the input.

use std::collections::HashMap;

/// Deepest nesting of expansions still being read
pub const MAX_MACRO_DEPTH: usize = 64;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum MacroError {
    #[error("Undefined macro: {0}")]
    Undefined(String),

    #[error("Macro redefinition: {0}")]
    Redefined(String),

    #[error("Macro {name} takes {max} arguments, got {found}")]
    TooManyArgs { name: String, max: usize, found: usize },

    #[error("Missing argument {index} for macro {name}")]
    MissingArg { name: String, index: usize },

    #[error("Argument %{index}% out of range in macro {name}")]
    BadSlot { name: String, index: usize },

    #[error("Macro {name} nested too deeply (max {max})")]
    TooDeep { name: String, max: usize },
}

/// Piece of a macro body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroToken {
    Text(String),
    /// 1-based argument index
    Arg(usize),
}

/// A defined macro
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    pub name: String,
    /// Default text for each parameter, if any
    pub params: Vec<Option<String>>,
    pub body: Vec<MacroToken>,
}

impl Macro {
    pub fn new(name: &str, params: Vec<Option<String>>, body: &str) -> Result<Self, MacroError> {
        let body = tokenize(body);
        for token in &body {
            if let MacroToken::Arg(index) = *token {
                if index == 0 || index > params.len() {
                    return Err(MacroError::BadSlot {
                        name: name.to_string(),
                        index,
                    });
                }
            }
        }
        Ok(Self {
            name: name.to_string(),
            params,
            body,
        })
    }

    /// Substitute `args`, falling back to defaults for missing ones
    pub fn expand(&self, args: &[String]) -> Result<String, MacroError> {
        if args.len() > self.params.len() {
            return Err(MacroError::TooManyArgs {
                name: self.name.clone(),
                max: self.params.len(),
                found: args.len(),
            });
        }
        let mut values = Vec::with_capacity(self.params.len());
        for (i, default) in self.params.iter().enumerate() {
            let value = match args.get(i).filter(|a| !a.is_empty()) {
                Some(arg) => arg.clone(),
                None => default.clone().ok_or_else(|| MacroError::MissingArg {
                    name: self.name.clone(),
                    index: i + 1,
                })?,
            };
            values.push(value);
        }

        let mut out = String::new();
        for token in &self.body {
            match token {
                MacroToken::Text(text) => out.push_str(text),
                MacroToken::Arg(index) => out.push_str(&values[index - 1]),
            }
        }
        Ok(out)
    }
}

/// Split a body at `%n%` references; other `%` are literal
fn tokenize(body: &str) -> Vec<MacroToken> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut rest = body;

    while let Some(start) = rest.find('%') {
        text.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && after.as_bytes().get(digits) == Some(&b'%') {
            if let Ok(index) = after[..digits].parse() {
                if !text.is_empty() {
                    tokens.push(MacroToken::Text(std::mem::take(&mut text)));
                }
                tokens.push(MacroToken::Arg(index));
                rest = &after[digits + 1..];
                continue;
            }
        }
        text.push('%');
        rest = after;
    }
    text.push_str(rest);
    if !text.is_empty() {
        tokens.push(MacroToken::Text(text));
    }
    tokens
}

#[derive(Debug, Default)]
pub struct MacroTable {
    macros: HashMap<String, Macro>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, m: Macro) -> Result<(), MacroError> {
        if self.macros.contains_key(&m.name) {
            return Err(MacroError::Redefined(m.name));
        }
        self.macros.insert(m.name.clone(), m);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    /// Expand `name` from inside `depth` unfinished expansions
    pub fn expand(&self, name: &str, args: &[String], depth: usize) -> Result<String, MacroError> {
        let m = self
            .macros
            .get(name)
            .ok_or_else(|| MacroError::Undefined(name.to_string()))?;
        if depth >= MAX_MACRO_DEPTH {
            return Err(MacroError::TooDeep {
                name: name.to_string(),
                max: MAX_MACRO_DEPTH,
            });
        }
        m.expand(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("c%1% d%2%e 50%"),
            vec![
                MacroToken::Text("c".into()),
                MacroToken::Arg(1),
                MacroToken::Text(" d".into()),
                MacroToken::Arg(2),
                MacroToken::Text("e 50%".into()),
            ]
        );
        assert_eq!(tokenize("%x%"), vec![MacroToken::Text("%x%".into())]);
    }

    #[test]
    fn test_expand_with_defaults() {
        let m = Macro::new("arp", vec![None, Some("8".into())], "o%1% c%2% e%2%").unwrap();
        assert_eq!(m.expand(&["4".into()]).unwrap(), "o4 c8 e8");
        assert_eq!(m.expand(&["5".into(), "16".into()]).unwrap(), "o5 c16 e16");
        assert_eq!(
            m.expand(&[]),
            Err(MacroError::MissingArg { name: "arp".into(), index: 1 })
        );
        assert!(matches!(
            m.expand(&["1".into(), "2".into(), "3".into()]),
            Err(MacroError::TooManyArgs { max: 2, found: 3, .. })
        ));
    }

    #[test]
    fn test_bad_slot() {
        assert!(matches!(
            Macro::new("m", vec![None], "%2%"),
            Err(MacroError::BadSlot { index: 2, .. })
        ));
    }

    #[test]
    fn test_table() {
        let mut table = MacroTable::new();
        table.define(Macro::new("x", vec![], "cde").unwrap()).unwrap();
        assert_eq!(
            table.define(Macro::new("x", vec![], "c").unwrap()),
            Err(MacroError::Redefined("x".into()))
        );
        assert_eq!(table.expand("x", &[], 0).unwrap(), "cde");
        assert_eq!(table.expand("y", &[], 0), Err(MacroError::Undefined("y".into())));
        assert_eq!(table.expand("x", &[], MAX_MACRO_DEPTH - 1).unwrap(), "cde");
        assert!(matches!(
            table.expand("x", &[], MAX_MACRO_DEPTH),
            Err(MacroError::TooDeep { max: MAX_MACRO_DEPTH, .. })
        ));
    }
}
