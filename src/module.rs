/*!
  A `Module` is the unit every front end produces: one compiled source file's instructions and
  static literals, plus the labels it exports and imports. Modules are built once with a
  `Builder` and never mutated afterward.
*/

use std::collections::HashSet;
use std::convert::TryFrom;
use std::fmt::{Display, Formatter};

use num_enum::{TryFromPrimitive, IntoPrimitive};

use crate::bytecode::Instruction;
use crate::error::BuildError;
use crate::label::{label, Label, SourceToken};

/// An instruction with the labels bound to its address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LabeledInstruction {
  pub instruction : Instruction,
  pub labels      : Vec<Label>,
  pub token       : Option<SourceToken>,
}

/// The width of a static literal in bytes. Literals are aligned to their width.
#[derive(TryFromPrimitive, IntoPrimitive, Clone, Copy, Eq, PartialEq, Debug, Hash)]
#[repr(u8)]
pub enum ValueSize {
  Byte = 1,
  Half = 2,
  Word = 4,
}

impl ValueSize {
  pub fn bytes(&self) -> u32 {
    Into::<u8>::into(*self) as u32
  }

  pub fn from_bytes(bytes: u8) -> Option<ValueSize> {
    ValueSize::try_from(bytes).ok()
  }
}

/// The content of a static literal: a number, or the address of a label.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Literal {
  Int(i32),
  Label(Label),
}

impl From<i32> for Literal {
  fn from(i: i32) -> Literal {
    Literal::Int(i)
  }
}

impl Display for Literal {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Literal::Int(i)   => write!(f, "{}", i),
      Literal::Label(l) => write!(f, "@{}", l),
    }
  }
}

/// A static literal with the labels bound to its address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LabeledValue {
  pub value  : Literal,
  pub size   : ValueSize,
  pub labels : Vec<Label>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Module {
  pub name            : String,
  pub instructions    : Vec<LabeledInstruction>,
  pub values          : Vec<LabeledValue>,
  pub exports         : Vec<Label>,
  pub imports         : Vec<Label>,
  pub has_entry_point : bool,
}

impl Module {
  /// Every label the module defines, in layout order: instructions first, then literals.
  pub fn defined_labels(&self) -> impl Iterator<Item = &Label> {
    self.instructions
        .iter()
        .flat_map(|i| i.labels.iter())
        .chain(self.values.iter().flat_map(|v| v.labels.iter()))
  }
}

/**
  Append-only accumulator for a `Module`. Front ends drive it in source order.

  Labels declared with `declare_label` are queued and bind to whichever instruction or literal is
  appended *next*, not to the position of the label statement itself. Several queued labels bind
  to the same address. Likewise a token attached with `attach_source_token` belongs to the next
  appended instruction.
*/
pub struct Builder {
  name            : String,
  instructions    : Vec<LabeledInstruction>,
  values          : Vec<LabeledValue>,
  exports         : Vec<Label>,
  imports         : Vec<Label>,
  has_entry_point : bool,
  pending_labels  : Vec<Label>,
  pending_token   : Option<SourceToken>,
}

impl Builder {

  pub fn new(name: &str) -> Builder {
    Builder {
      name            : name.to_string(),
      instructions    : Vec::new(),
      values          : Vec::new(),
      exports         : Vec::new(),
      imports         : Vec::new(),
      has_entry_point : false,
      pending_labels  : Vec::new(),
      pending_token   : None,
    }
  }

  pub fn append_instruction(&mut self, instruction: Instruction) {
    self.instructions.push(
      LabeledInstruction {
        instruction,
        labels : std::mem::take(&mut self.pending_labels),
        token  : self.pending_token.take(),
      }
    );
  }

  pub fn declare_label(&mut self, name: &str) {
    self.pending_labels.push(label(name));
  }

  pub fn declare_literal(&mut self, value: Literal, size: ValueSize) {
    self.values.push(
      LabeledValue {
        value,
        size,
        labels: std::mem::take(&mut self.pending_labels),
      }
    );
  }

  pub fn declare_import(&mut self, name: &str) {
    let name = label(name);
    if !self.imports.contains(&name) {
      self.imports.push(name);
    }
  }

  pub fn declare_export(&mut self, name: &str) {
    let name = label(name);
    if !self.exports.contains(&name) {
      self.exports.push(name);
    }
  }

  pub fn mark_has_entry_point(&mut self) {
    self.has_entry_point = true;
  }

  pub fn attach_source_token(&mut self, token: SourceToken) {
    self.pending_token = Some(token);
  }

  /**
    Consumes the builder and returns the finished module. Fails if labels were queued with
    nothing after them to bind to, if an instruction's opcode is not of its variant's family (or
    is a `Trap`), or if a label is both imported and defined locally.

    Duplicate local labels are left for the linker to report, since it reports them with the
    module name and alongside every other link problem.
  */
  pub fn build(self) -> Result<Module, BuildError> {
    if !self.pending_labels.is_empty() {
      return Err(BuildError::DanglingLabels { labels: self.pending_labels });
    }

    let malformed =
      self.instructions
          .iter()
          .enumerate()
          .find(|(_, labeled)| !labeled.instruction.is_well_formed());
    if let Some((position, labeled)) = malformed {
      return Err(BuildError::MalformedInstruction {
        position,
        instruction: labeled.instruction.clone()
      });
    }

    let module = Module {
      name            : self.name,
      instructions    : self.instructions,
      values          : self.values,
      exports         : self.exports,
      imports         : self.imports,
      has_entry_point : self.has_entry_point,
    };

    let shadowed = {
      let defined: HashSet<&Label> = module.defined_labels().collect();
      module.imports.iter().find(|i| defined.contains(i)).cloned()
    };
    if let Some(shadowed) = shadowed {
      return Err(BuildError::ImportDefinedLocally { label: shadowed });
    }

    Ok(module)
  }
}
