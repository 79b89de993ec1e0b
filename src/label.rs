//! Labels name addresses symbolically. As with all strings in this codebase, label names are
//! interned, so clones are cheap and comparisons are pointer comparisons.

use std::fmt::{Display, Formatter};

use string_cache::DefaultAtom;

pub type Label = DefaultAtom;

/// Interns a label name.
pub fn label(name: &str) -> Label {
  DefaultAtom::from(name)
}

/**
  The position in source code an instruction came from. Front ends attach one to an instruction
  so that diagnostics can point at it and so that a debugger can step over whole source lines.
*/
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SourceToken {
  /// 1-based line number.
  pub line   : u32,
  /// 1-based column number.
  pub column : u32,
  /// Length of the token in bytes.
  pub length : u32,
}

impl SourceToken {
  pub fn new(line: u32, column: u32, length: u32) -> SourceToken {
    SourceToken { line, column, length }
  }
}

impl Display for SourceToken {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}", self.line, self.column)
  }
}
