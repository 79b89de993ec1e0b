/*!
  Operands. A `Value` is anything an instruction can read; a `Writable` is the subset of values
  with a settable location. Immediates and bare labels are values but have no location.

  Labels are bound late: every read of a label operand resolves the name against the page of the
  *current* program counter, so the same symbolic operand can mean different addresses on
  different pages.
*/

use std::fmt::{Display, Formatter};

use crate::address::Address;
use crate::error::Fault;
use crate::hardware::Hardware;
use crate::label::Label;
use crate::linker::Program;
use crate::register::Register;

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Writable {
  /// The register itself.
  Reg(Register),
  /// Memory at `[r]`.
  IndReg(Register),
  /// Memory at `[r + offset]`.
  IndRegDisp(Register, i32),
  /// Memory at `[r1 + r2]`.
  IndRegReg(Register, Register),
  /// Memory at `[label]`.
  IndLabel(Label),
  /// Memory at `[label + offset]`.
  IndLabelDisp(Label, i32),
  /// Memory at `[label + r]`.
  IndLabelReg(Label, Register),
  /// Memory at `[label + r + offset]`.
  IndLabelRegDisp(Label, Register, i32),
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Value {
  Imm(i32),
  /// The address the label resolves to.
  Label(Label),
  Writable(Writable),
}

/// Resolves `label` in the context of the page the program counter is on.
fn resolve(label: &Label, hw: &Hardware, program: &Program) -> Result<Address, Fault> {
  program
    .resolve_label(hw.cpu.nx, label)
    .ok_or_else(|| Fault::UndefinedLabel { label: label.clone() })
}

/// Where a `Writable` lives once registers and labels are evaluated.
enum Location {
  Register(Register),
  Memory(Address),
}

impl Writable {

  fn locate(&self, hw: &Hardware, program: &Program) -> Result<Location, Fault> {
    let register = |r: &Register| hw.cpu.get(*r) as u32;

    let address =
      match self {
        Writable::Reg(r)                    => return Ok(Location::Register(*r)),
        Writable::IndReg(r)                 => register(r),
        Writable::IndRegDisp(r, offset)     => register(r).wrapping_add(*offset as u32),
        Writable::IndRegReg(r1, r2)         => register(r1).wrapping_add(register(r2)),
        Writable::IndLabel(l)               => resolve(l, hw, program)?,
        Writable::IndLabelDisp(l, offset)   => resolve(l, hw, program)?.wrapping_add(*offset as u32),
        Writable::IndLabelReg(l, r)         => resolve(l, hw, program)?.wrapping_add(register(r)),
        Writable::IndLabelRegDisp(l, r, offset) => {
          resolve(l, hw, program)?
            .wrapping_add(register(r))
            .wrapping_add(*offset as u32)
        }
      };

    Ok(Location::Memory(address))
  }

  /// The memory address this operand designates, or `None` for a bare register.
  pub fn effective_address(&self, hw: &Hardware, program: &Program)
    -> Result<Option<Address>, Fault>
  {
    match self.locate(hw, program)? {
      Location::Register(_)     => Ok(None),
      Location::Memory(address) => Ok(Some(address))
    }
  }

  pub fn get(&self, hw: &mut Hardware, program: &Program) -> Result<i32, Fault> {
    match self.locate(hw, program)? {
      Location::Register(r)     => Ok(hw.cpu.get(r)),
      Location::Memory(address) => Ok(hw.memory.read(address))
    }
  }

  pub fn set(&self, value: i32, hw: &mut Hardware, program: &Program) -> Result<(), Fault> {
    match self.locate(hw, program)? {
      Location::Register(r)     => hw.cpu.set(r, value),
      Location::Memory(address) => hw.memory.write(address, value)
    }
    Ok(())
  }
}

impl Value {
  pub fn get(&self, hw: &mut Hardware, program: &Program) -> Result<i32, Fault> {
    match self {
      Value::Imm(i)      => Ok(*i),
      Value::Label(l)    => resolve(l, hw, program).map(|address| address as i32),
      Value::Writable(w) => w.get(hw, program),
    }
  }

  /// The writable location of this value, if it has one.
  pub fn as_writable(&self) -> Option<&Writable> {
    match self {
      Value::Writable(w) => Some(w),
      _                  => None
    }
  }
}

// region Conversions

impl From<Register> for Writable {
  fn from(r: Register) -> Writable {
    Writable::Reg(r)
  }
}

impl From<Register> for Value {
  fn from(r: Register) -> Value {
    Value::Writable(Writable::Reg(r))
  }
}

impl From<Writable> for Value {
  fn from(w: Writable) -> Value {
    Value::Writable(w)
  }
}

impl From<i32> for Value {
  fn from(i: i32) -> Value {
    Value::Imm(i)
  }
}

// endregion

// region Display

fn write_displacement(f: &mut Formatter<'_>, offset: i32) -> std::fmt::Result {
  match offset < 0 {
    true  => write!(f, "-{}", (offset as i64).abs()),
    false => write!(f, "+{}", offset)
  }
}

impl Display for Writable {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Writable::Reg(r)             => write!(f, "{}", r),
      Writable::IndReg(r)          => write!(f, "[{}]", r),
      Writable::IndRegDisp(r, d)   => {
        write!(f, "[{}", r)?;
        write_displacement(f, *d)?;
        write!(f, "]")
      }
      Writable::IndRegReg(r1, r2)  => write!(f, "[{}+{}]", r1, r2),
      Writable::IndLabel(l)        => write!(f, "[@{}]", l),
      Writable::IndLabelDisp(l, d) => {
        write!(f, "[@{}", l)?;
        write_displacement(f, *d)?;
        write!(f, "]")
      }
      Writable::IndLabelReg(l, r)  => write!(f, "[@{}+{}]", l, r),
      Writable::IndLabelRegDisp(l, r, d) => {
        write!(f, "[@{}+{}", l, r)?;
        write_displacement(f, *d)?;
        write!(f, "]")
      }
    }
  }
}

impl Display for Value {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Value::Imm(i)      => write!(f, "#{}", i),
      Value::Label(l)    => write!(f, "@{}", l),
      Value::Writable(w) => write!(f, "{}", w),
    }
  }
}

// endregion

#[cfg(test)]
mod tests {
  use super::*;
  use crate::label::label;
  use crate::module::Builder;
  use crate::bytecode::{Instruction, Operation};
  use crate::linker::link;
  use crate::register::Register::*;

  fn program_with_data() -> Program {
    let mut builder = Builder::new("data");
    builder.mark_has_entry_point();
    builder.append_instruction(Instruction::Nullary(Operation::Fence));
    builder.declare_label("table");
    builder.declare_literal(7.into(), crate::module::ValueSize::Word);
    builder.declare_literal(9.into(), crate::module::ValueSize::Word);
    let linkage = link(&[builder.build().unwrap()]);
    assert!(linkage.diagnostics.is_empty());
    linkage.program
  }

  fn loaded(program: &Program) -> Hardware {
    let mut hw = Hardware::new(Default::default());
    hw.cpu.nx = program.entry_address();
    program.initialize_memory(&mut hw.memory);
    hw
  }

  #[test]
  fn register_indirect_forms(){
    let program = program_with_data();
    let mut hw = loaded(&program);
    hw.cpu.set(F0, 0x1000);
    hw.cpu.set(F1, 8);

    Writable::IndRegDisp(F0, -4).set(11, &mut hw, &program).unwrap();
    assert_eq!(hw.memory.read(0x0FFC), 11);
    Writable::IndRegReg(F0, F1).set(12, &mut hw, &program).unwrap();
    assert_eq!(Writable::IndRegDisp(F0, 8).get(&mut hw, &program), Ok(12));
    Writable::Reg(F2).set(-1, &mut hw, &program).unwrap();
    assert_eq!(Value::from(F2).get(&mut hw, &program), Ok(-1));
  }

  #[test]
  fn label_forms(){
    let program = program_with_data();
    let mut hw = loaded(&program);
    let table = program.entry_address() + 4;
    hw.cpu.set(F1, 4);

    assert_eq!(Value::Label(label("table")).get(&mut hw, &program), Ok(table as i32));
    assert_eq!(Writable::IndLabel(label("table")).get(&mut hw, &program), Ok(7));
    assert_eq!(Writable::IndLabelDisp(label("table"), 4).get(&mut hw, &program), Ok(9));
    assert_eq!(Writable::IndLabelReg(label("table"), F1).get(&mut hw, &program), Ok(9));
    assert_eq!(
      Writable::IndLabelRegDisp(label("table"), F1, -4).get(&mut hw, &program),
      Ok(7)
    );
  }

  #[test]
  fn undefined_label_is_a_fault(){
    let program = program_with_data();
    let mut hw = loaded(&program);
    assert_eq!(
      Value::Label(label("nowhere")).get(&mut hw, &program),
      Err(Fault::UndefinedLabel { label: label("nowhere") })
    );
  }

  #[test]
  fn display(){
    assert_eq!(Value::Imm(-3).to_string(), "#-3");
    assert_eq!(Writable::IndRegDisp(F5, -8).to_string(), "[f5-8]");
    assert_eq!(Writable::IndLabelRegDisp(label("t"), F0, 4).to_string(), "[@t+f0+4]");
  }
}
