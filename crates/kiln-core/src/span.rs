//! Source positions consumed from the front end.
//!
//! The code generator never looks at source text. It only needs to know where
//! a construct starts so that instructions can be correlated with the line
//! that produced them.

use std::fmt;

/// Position of a construct in its source file.
///
/// Lines and columns are 1-based. A zero line means "no position known",
/// which is what synthesized nodes report.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Line number (1-indexed).
    pub line: u32,
    /// Column number (1-indexed).
    pub column: u32,
}

impl Span {
    #[inline]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// A span that only knows its line.
    #[inline]
    pub fn line(line: u32) -> Self {
        Self { line, column: 1 }
    }

    /// Whether this span carries a real position.
    #[inline]
    pub fn is_known(&self) -> bool {
        self.line != 0
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_display() {
        assert_eq!(Span::new(3, 15).to_string(), "3:15");
    }

    #[test]
    fn default_span_is_unknown() {
        assert!(!Span::default().is_known());
        assert!(Span::line(1).is_known());
    }
}
