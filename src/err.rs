//! Error interfaces for this crate.
//!
//! Every diagnostic raised while reading, tokenizing, or assembling a program set
//! is collected into an [`ErrorList`], which holds [`ErrorMessage`]s in the order they were raised.
//! Simulation faults are reported separately (see [`SimFault`]).
//!
//! [`SimFault`]: crate::sim::SimFault

use std::borrow::Cow;
use std::sync::Arc;

pub use crate::asm::{AsmWarning, EncodeErr, SymbolErr};
pub use crate::asm::macros::MacroErr;
pub use crate::parse::lex::LexErr;
pub use crate::program::ReadErr;
pub use crate::sim::SimErr;

/// Unified error interface for all errors in this crate.
///
/// Note that the [`Display`] implementation is used for a brief message,
/// where as [`Error::help`] is used for any clarifying messages.
///
/// [`Display`]: std::fmt::Display
pub trait Error: std::error::Error {
    /// A clarifying message to help aid someone in how to fix the message.
    ///
    /// If there is none to add, this can be set to `None`.
    fn help(&self) -> Option<Cow<str>>;
}

/// The category of a diagnostic.
#[derive(Debug)]
pub enum ErrorKind {
    /// Source file could not be read.
    Read(ReadErr),
    /// A token could not be lexed.
    Lex(LexErr),
    /// A macro could not be defined or expanded.
    Macro(MacroErr),
    /// A label was defined twice or could not be resolved.
    Symbol(SymbolErr),
    /// An instruction or directive could not be encoded.
    Encode(EncodeErr),
    /// A warning. These never block assembly unless escalated.
    Warning(AsmWarning),
}
impl ErrorKind {
    fn as_error(&self) -> &dyn Error {
        match self {
            ErrorKind::Read(e)    => e,
            ErrorKind::Lex(e)     => e,
            ErrorKind::Macro(e)   => e,
            ErrorKind::Symbol(e)  => e,
            ErrorKind::Encode(e)  => e,
            ErrorKind::Warning(e) => e,
        }
    }
}
impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self.as_error(), f)
    }
}
macro_rules! kind_from {
    ($($Err:ident => $Variant:ident),+) => {
        $(
            impl From<$Err> for ErrorKind {
                fn from(value: $Err) -> Self {
                    ErrorKind::$Variant(value)
                }
            }
        )+
    }
}
kind_from! {
    ReadErr => Read,
    LexErr => Lex,
    MacroErr => Macro,
    SymbolErr => Symbol,
    EncodeErr => Encode,
    AsmWarning => Warning
}

/// A single diagnostic, tied to a location in a source file.
#[derive(Debug)]
pub struct ErrorMessage {
    /// What went wrong.
    pub kind: ErrorKind,
    /// The file the diagnostic points into.
    pub file: Arc<str>,
    /// The 1-based line number (0 if the diagnostic applies to the whole file).
    pub line: usize,
    /// The 1-based column (0 if unknown).
    pub column: usize,
}
impl ErrorMessage {
    /// Creates a new diagnostic.
    pub fn new(kind: impl Into<ErrorKind>, file: Arc<str>, line: usize, column: usize) -> Self {
        Self { kind: kind.into(), file, line, column }
    }

    /// Whether this diagnostic is a warning.
    pub fn is_warning(&self) -> bool {
        matches!(self.kind, ErrorKind::Warning(_))
    }

    /// A clarifying message for this diagnostic, if one exists.
    pub fn help(&self) -> Option<Cow<str>> {
        self.kind.as_error().help()
    }
}
impl std::fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.is_warning() {
            true  => "warning",
            false => "error",
        };

        write!(f, "{}", self.file)?;
        if self.line != 0 {
            write!(f, ":{}", self.line)?;
            if self.column != 0 {
                write!(f, ":{}", self.column)?;
            }
        }
        write!(f, ": {severity}: {}", self.kind)
    }
}

/// The diagnostics from one assembly attempt (or one read/tokenize step).
///
/// Messages are kept in the order in which they were raised.
#[derive(Debug, Default)]
pub struct ErrorList {
    messages: Vec<ErrorMessage>,
}
impl ErrorList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a diagnostic to the list.
    pub fn push(&mut self, msg: ErrorMessage) {
        self.messages.push(msg);
    }

    /// Adds a diagnostic to the list from its parts.
    pub fn add(&mut self, kind: impl Into<ErrorKind>, file: &Arc<str>, line: usize, column: usize) {
        self.push(ErrorMessage::new(kind, Arc::clone(file), line, column));
    }

    /// Number of diagnostics (errors and warnings).
    pub fn len(&self) -> usize {
        self.messages.len()
    }
    /// Whether there are no diagnostics at all.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
    /// Number of diagnostics that are not warnings.
    pub fn error_count(&self) -> usize {
        self.messages.iter().filter(|m| !m.is_warning()).count()
    }
    /// Number of warnings.
    pub fn warning_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_warning()).count()
    }
    /// Whether there is at least one diagnostic which is not a warning.
    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| !m.is_warning())
    }

    /// Iterates over all diagnostics in order.
    pub fn iter(&self) -> std::slice::Iter<'_, ErrorMessage> {
        self.messages.iter()
    }
    /// Iterates over diagnostics which are not warnings.
    pub fn errors(&self) -> impl Iterator<Item=&ErrorMessage> + '_ {
        self.iter().filter(|m| !m.is_warning())
    }
    /// Iterates over warnings.
    pub fn warnings(&self) -> impl Iterator<Item=&ErrorMessage> + '_ {
        self.iter().filter(|m| m.is_warning())
    }
}
impl Extend<ErrorMessage> for ErrorList {
    fn extend<T: IntoIterator<Item = ErrorMessage>>(&mut self, iter: T) {
        self.messages.extend(iter);
    }
}
impl IntoIterator for ErrorList {
    type Item = ErrorMessage;
    type IntoIter = std::vec::IntoIter<ErrorMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}
impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a ErrorMessage;
    type IntoIter = std::slice::Iter<'a, ErrorMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
impl std::fmt::Display for ErrorList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for msg in &self.messages {
            writeln!(f, "{msg}")?;
        }
        Ok(())
    }
}
impl std::error::Error for ErrorList {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{AsmWarning, ErrorList, ErrorMessage, LexErr};

    #[test]
    fn test_counts() {
        let file: Arc<str> = Arc::from("a.s");
        let mut errs = ErrorList::new();
        assert!(errs.is_empty());

        errs.add(AsmWarning::SetIgnored, &file, 3, 1);
        assert!(!errs.has_errors());
        assert_eq!(errs.warning_count(), 1);

        errs.add(LexErr::InvalidSymbol, &file, 4, 7);
        assert!(errs.has_errors());
        assert_eq!(errs.error_count(), 1);
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn test_display() {
        let msg = ErrorMessage::new(LexErr::InvalidReg, Arc::from("main.s"), 12, 5);
        assert_eq!(msg.to_string(), "main.s:12:5: error: invalid register");

        let msg = ErrorMessage::new(AsmWarning::SetIgnored, Arc::from("main.s"), 2, 0);
        assert!(msg.to_string().starts_with("main.s:2: warning:"));
    }
}
