//! Error types for every stage: building a module, reading assembly, linking, and execution.
//!
//! Nothing here is raised with `?` past a stage boundary. Link errors and run-time faults are
//! collected into lists of `Diagnostic`s so that every problem surfaces at once.

use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::address::Address;
use crate::bytecode::Instruction;
use crate::label::{Label, SourceToken};

/// Problems detected by `Builder::build`.
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum BuildError {
  #[error("labels {labels:?} are not followed by an instruction or literal")]
  DanglingLabels { labels: Vec<Label> },

  #[error("`{label}` is both imported and defined locally")]
  ImportDefinedLocally { label: Label },

  #[error("instruction {position} (`{instruction}`) does not match its opcode's family")]
  MalformedInstruction { position: usize, instruction: Instruction },
}

/// Problems detected by the assembly reader. Line numbers are 1-based.
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum AssemblyError {
  #[error("line {line}: could not parse `{text}`")]
  Syntax { line: u32, text: String },

  #[error("line {line}: `{name}` is not an operation")]
  NotAnOperation { line: u32, name: String },

  #[error("line {line}: `{name}` is not a comparison relation")]
  NotARelation { line: u32, name: String },

  #[error("line {line}: {operation} requires {expected} operands but was given {given}")]
  WrongArity { line: u32, operation: String, expected: usize, given: usize },

  #[error("line {line}: operand {position} of {operation} must be writable")]
  NotWritable { line: u32, operation: String, position: usize },

  #[error("line {line}: {error}")]
  Build { line: u32, error: BuildError },
}

/// Structural problems found while linking.
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum LinkError {
  #[error("no module has an entry point")]
  NoEntryPoint,

  #[error("more than one module has an entry point: {}", modules.join(", "))]
  MultipleEntryPoints { modules: Vec<String> },

  #[error("label `{label}` is defined more than once in module `{module}`")]
  DuplicateLabel { module: String, label: Label },

  #[error("label `{label}` is exported by both `{first}` and `{second}`")]
  DuplicateExport { label: Label, first: String, second: String },

  #[error("module `{module}` exports `{label}`, which it does not define")]
  UndefinedExport { module: String, label: Label },

  #[error("module `{module}` imports `{label}`, which no module exports")]
  UnresolvedImport { module: String, label: Label },

  #[error("module `{module}` imports `{label}` but also defines it")]
  ImportDefinedLocally { module: String, label: Label },

  #[error("module `{module}` does not fit in a single page")]
  ModuleTooLarge { module: String },

  #[error("too many modules to fit in the address space")]
  TooManyModules,
}

/// Fatal run-time errors. Any one of these halts the engine in the error state.
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum Fault {
  #[error("invalid program counter address {address:#010x}")]
  InvalidAddress { address: Address },

  #[error("`{instruction}` does not match its opcode's family")]
  MalformedInstruction { instruction: Instruction },

  #[error("undefined label `{label}`")]
  UndefinedLabel { label: Label },

  #[error("stack imbalance at outermost return: f5 is {actual:#010x}, expected {expected:#010x}")]
  StackImbalance { expected: Address, actual: Address },

  #[error("no program is loaded")]
  NotLoaded,
}

/// Non-fatal run-time conditions. Execution continues.
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum Warning {
  #[error("unaligned {width}-byte access at {address:#010x}")]
  Unaligned { address: Address, width: u32 },

  #[error("read of uninitialized memory at {address:#010x}")]
  Uninitialized { address: Address },
}

/// An issue paired with the source position it is attributed to, if any.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Diagnostic<E> {
  pub issue : E,
  pub token : Option<SourceToken>,
}

impl<E> Diagnostic<E> {
  pub fn new(issue: E, token: Option<SourceToken>) -> Diagnostic<E> {
    Diagnostic { issue, token }
  }
}

impl<E: Display> Display for Diagnostic<E> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match &self.token {
      Some(token) => write!(f, "{}: {}", token, self.issue),
      None        => write!(f, "{}", self.issue)
    }
  }
}
