/*!
  The human readable textual form of a module is called assembly. This module reads assembly into
  a `Module` using the `strum` derives of the instruction related enums for mnemonics.

  One statement per line, optionally preceded by any number of `name:` labels. Everything after a
  `;` is a comment.

  ```text
          .entry
          .import print
          .export table
  start:  mov f0, [@table+f1+4]
          cmp.ltu f0, #0x10
          movc xx, @start
  table:  .word 7
          .half -1
          .byte 0xFF
          .word @start
  ```

  Operands are registers (`f0`-`f3`, `f5`, `xx`), immediates (`#12`, `#-3`, `#0xFFFFFF00`),
  label addresses (`@name`), and memory references: `[r]`, `[r+4]`, `[r-4]`, `[r+r]`, `[@l]`,
  `[@l+4]`, `[@l+r]`, `[@l+r+4]`.

  Errors do not stop the reader. Every bad line is reported, and a module is produced only if
  there are none.
*/

use std::collections::HashMap;
use std::str::FromStr;

use nom::{
  IResult,
  branch::alt,
  bytes::complete::{tag, tag_no_case},
  character::complete::{
    alpha1,
    alphanumeric1,
    char as one_char,
    digit1,
    hex_digit1,
    one_of,
    space0,
    space1
  },
  combinator::{map, map_opt, map_res, opt, recognize},
  multi::{many0, separated_list, separated_nonempty_list},
  sequence::{delimited, pair, preceded, terminated, tuple}
};
use tracing::debug;

use crate::bytecode::{Family, Instruction, Operation, Relation, Value, Writable};
use crate::error::{AssemblyError, BuildError};
use crate::label::{label, Label, SourceToken};
use crate::module::{Builder, Literal, Module, ValueSize};
use crate::register::Register;

enum Statement<'a> {
  Entry,
  Import(Vec<&'a str>),
  Export(Vec<&'a str>),
  Literal(ValueSize, Literal),
  Instruction {
    mnemonic : &'a str,
    operands : Vec<Value>
  },
}

enum Base {
  Reg(Register),
  Label(Label),
}

// region Parsers

fn ws<'a, O, F>(inner: F) -> impl Fn(&'a str) -> IResult<&'a str, O>
  where F: Fn(&'a str) -> IResult<&'a str, O>
{
  delimited(space0, inner, space0)
}

fn identifier(input: &str) -> IResult<&str, &str> {
  recognize(
    pair(
      alt((alpha1, tag("_"))),
      many0(alt((alphanumeric1, tag("_"))))
    )
  )(input)
}

/// A mnemonic, with the relation suffix of a compare: `cmp.ltu`.
fn mnemonic(input: &str) -> IResult<&str, &str> {
  recognize(pair(alpha1, opt(pair(one_char('.'), alpha1))))(input)
}

/// Decimal literals may be anything from `i32::MIN` to `u32::MAX`; the bits are kept.
fn parse_decimal(text: &str) -> Result<i32, std::num::ParseIntError> {
  text
    .parse::<i32>()
    .or_else(|error| text.parse::<u32>().map(|n| n as i32).map_err(|_| error))
}

fn integer(input: &str) -> IResult<&str, i32> {
  alt((
    map_res(
      preceded(tag_no_case("0x"), hex_digit1),
      |digits: &str| u32::from_str_radix(digits, 16).map(|n| n as i32)
    ),
    map_res(recognize(pair(opt(one_char('-')), digit1)), parse_decimal)
  ))(input)
}

fn register(input: &str) -> IResult<&str, Register> {
  map_res(alphanumeric1, Register::from_str)(input)
}

fn label_reference(input: &str) -> IResult<&str, Label> {
  map(preceded(one_char('@'), identifier), label)(input)
}

fn displacement(input: &str) -> IResult<&str, i32> {
  map(
    pair(ws(one_of("+-")), integer),
    |(sign, offset)| match sign {
      '-' => offset.wrapping_neg(),
      _   => offset
    }
  )(input)
}

fn indirect(input: &str) -> IResult<&str, Writable> {
  map_opt(
    delimited(
      terminated(one_char('['), space0),
      tuple((
        alt((map(label_reference, Base::Label), map(register, Base::Reg))),
        opt(preceded(ws(one_char('+')), register)),
        opt(displacement)
      )),
      preceded(space0, one_char(']'))
    ),
    |(base, index, offset)| {
      let writable =
        match (base, index, offset) {
          (Base::Reg(r),   None,     None)    => Writable::IndReg(r),
          (Base::Reg(r),   None,     Some(d)) => Writable::IndRegDisp(r, d),
          (Base::Reg(r),   Some(i),  None)    => Writable::IndRegReg(r, i),
          (Base::Reg(_),   Some(_),  Some(_)) => return None,
          (Base::Label(l), None,     None)    => Writable::IndLabel(l),
          (Base::Label(l), None,     Some(d)) => Writable::IndLabelDisp(l, d),
          (Base::Label(l), Some(r),  None)    => Writable::IndLabelReg(l, r),
          (Base::Label(l), Some(r),  Some(d)) => Writable::IndLabelRegDisp(l, r, d),
        };
      Some(writable)
    }
  )(input)
}

fn operand(input: &str) -> IResult<&str, Value> {
  alt((
    map(preceded(one_char('#'), integer), Value::Imm),
    map(label_reference, Value::Label),
    map(indirect, Value::Writable),
    map(register, |r| Value::Writable(Writable::Reg(r)))
  ))(input)
}

fn names(input: &str) -> IResult<&str, Vec<&str>> {
  separated_nonempty_list(ws(one_char(',')), identifier)(input)
}

fn literal(input: &str) -> IResult<&str, Literal> {
  alt((
    map(label_reference, Literal::Label),
    map(preceded(opt(one_char('#')), integer), Literal::Int)
  ))(input)
}

fn value_size(input: &str) -> IResult<&str, ValueSize> {
  alt((
    map(tag(".word"), |_| ValueSize::Word),
    map(tag(".half"), |_| ValueSize::Half),
    map(tag(".byte"), |_| ValueSize::Byte)
  ))(input)
}

fn statement(input: &str) -> IResult<&str, Statement> {
  alt((
    map(tag(".entry"), |_| Statement::Entry),
    map(preceded(terminated(tag(".import"), space1), names), Statement::Import),
    map(preceded(terminated(tag(".export"), space1), names), Statement::Export),
    map(
      pair(terminated(value_size, space1), literal),
      |(size, value)| Statement::Literal(size, value)
    ),
    map(
      pair(mnemonic, opt(preceded(space1, separated_list(ws(one_char(',')), operand)))),
      |(mnemonic, operands)| Statement::Instruction {
        mnemonic,
        operands: operands.unwrap_or_default()
      }
    )
  ))(input)
}

fn line_labels(input: &str) -> IResult<&str, Vec<&str>> {
  many0(terminated(ws(identifier), one_char(':')))(input)
}

// endregion

/// Checks an instruction's operands against its opcode's family and builds it.
fn assemble(line: u32, mnemonic: &str, operands: &[Value]) -> Result<Instruction, AssemblyError> {
  let (name, suffix) =
    match mnemonic.find('.') {
      Some(dot) => (&mnemonic[..dot], Some(&mnemonic[dot + 1..])),
      None      => (mnemonic, None)
    };
  let not_an_operation = || AssemblyError::NotAnOperation { line, name: mnemonic.to_string() };

  let opcode = Operation::from_str(name).map_err(|_| not_an_operation())?;
  let relation =
    match (opcode.family(), suffix) {
      (Family::Compare, Some(suffix)) => {
        Relation::from_str(suffix)
          .map_err(|_| AssemblyError::NotARelation { line, name: suffix.to_string() })?
      }
      (Family::Compare, None) | (_, Some(_)) => return Err(not_an_operation()),
      // Unused outside the compare family.
      (_, None) => Relation::Equal,
    };

  let writable = |value: &Value, position: usize| {
    match value.as_writable() {
      Some(w) => Ok(w.clone()),
      None    => Err(AssemblyError::NotWritable { line, operation: mnemonic.to_string(), position })
    }
  };

  let instruction =
    match (opcode.family(), operands) {
      (Family::Nullary, []) => Instruction::Nullary(opcode),

      (Family::Unary, [dst]) => Instruction::Unary { opcode, dst: writable(dst, 1)? },

      (Family::Binary, [dst, src]) => {
        Instruction::Binary { opcode, dst: writable(dst, 1)?, src: src.clone() }
      }

      (Family::Ternary, [a, b, c]) => {
        Instruction::Ternary { opcode, a: a.clone(), b: writable(b, 2)?, c: writable(c, 3)? }
      }

      (Family::Compare, [left, right]) => {
        Instruction::Compare { relation, left: left.clone(), right: right.clone() }
      }

      _ => {
        return Err(AssemblyError::WrongArity {
          line,
          operation : mnemonic.to_string(),
          expected  : opcode.arity(),
          given     : operands.len()
        });
      }
    };

  Ok(instruction)
}

struct Reader {
  builder         : Builder,
  errors          : Vec<AssemblyError>,
  last_label_line : u32,
  import_lines    : HashMap<Label, u32>,
}

impl Reader {

  fn new(name: &str) -> Reader {
    Reader {
      builder         : Builder::new(name),
      errors          : Vec::new(),
      last_label_line : 0,
      import_lines    : HashMap::new(),
    }
  }

  fn read_line(&mut self, number: u32, line: &str) {
    let code =
      match line.find(';') {
        Some(start) => &line[..start],
        None        => line
      };

    let (rest, labels) = line_labels(code).unwrap_or((code, Vec::new()));
    for name in labels {
      self.builder.declare_label(name);
      self.last_label_line = number;
    }

    let rest   = rest.trim_start();
    let source = rest.trim_end();
    if source.is_empty() {
      return;
    }
    let column = (code.len() - rest.len()) as u32 + 1;

    match statement(source) {
      Ok((remaining, statement)) if remaining.trim().is_empty() => {
        self.apply(statement, SourceToken::new(number, column, source.len() as u32));
      }
      _ => {
        self.errors.push(AssemblyError::Syntax { line: number, text: source.to_string() });
      }
    }
  }

  fn apply(&mut self, statement: Statement, token: SourceToken) {
    match statement {

      Statement::Entry => self.builder.mark_has_entry_point(),

      Statement::Import(names) => {
        for name in names {
          self.builder.declare_import(name);
          self.import_lines.entry(label(name)).or_insert(token.line);
        }
      }

      Statement::Export(names) => {
        for name in names {
          self.builder.declare_export(name);
        }
      }

      Statement::Literal(size, value) => self.builder.declare_literal(value, size),

      Statement::Instruction { mnemonic, operands } => {
        match assemble(token.line, mnemonic, &operands) {
          Ok(instruction) => {
            self.builder.attach_source_token(token);
            self.builder.append_instruction(instruction);
          }
          Err(error) => self.errors.push(error)
        }
      }

    }
  }

  fn finish(self) -> Result<Module, Vec<AssemblyError>> {
    if !self.errors.is_empty() {
      return Err(self.errors);
    }

    let Reader { builder, last_label_line, import_lines, .. } = self;
    builder.build().map_err(|error| {
      let line =
        match &error {
          BuildError::DanglingLabels { .. }         => last_label_line,
          BuildError::ImportDefinedLocally { label } => import_lines.get(label).copied().unwrap_or(0),
          // `assemble` only produces well formed instructions.
          BuildError::MalformedInstruction { .. }    => 0,
        };
      vec![AssemblyError::Build { line, error }]
    })
  }
}

/// Reads the assembly `text` of the module called `name`.
pub fn parse_assembly(name: &str, text: &str) -> Result<Module, Vec<AssemblyError>> {
  let mut reader = Reader::new(name);
  for (index, line) in text.lines().enumerate() {
    reader.read_line(index as u32 + 1, line);
  }

  let result = reader.finish();
  match &result {
    Ok(module) => {
      debug!(
        "read module `{}`: {} instructions, {} literals",
        name, module.instructions.len(), module.values.len()
      );
    }
    Err(errors) => debug!("module `{}` has {} assembly errors", name, errors.len()),
  }
  result
}
