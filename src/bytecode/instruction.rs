use std::fmt::{Display, Formatter};

use strum_macros::{Display as StrumDisplay, EnumString, IntoStaticStr};
use num_enum::{TryFromPrimitive, IntoPrimitive};

use crate::error::Fault;
use crate::hardware::Hardware;
use crate::linker::Program;
use super::operand::{Value, Writable};

/**
  Opcodes of the virtual machine.

  The opcodes are grouped by instruction family, so the family of an opcode can be determined
  with a trivial comparison of its code. Consequently, the order the opcodes are listed below is
  significant.
  Order-dependencies:
      ```
      Operation::family()
      ```
*/
#[derive(
StrumDisplay, IntoStaticStr, EnumString, TryFromPrimitive, IntoPrimitive,
Clone,        Copy,          Eq,         PartialEq,        Debug,         Hash
)]
#[repr(u8)]
pub enum Operation {
  // Nullary //
  #[strum(to_string = "nop")]  Fence,        // nop
  // Opcode 1

  // Unary //
  #[strum(to_string = "not")]  Not,          // not( dst )
  // Opcode 2

  // Binary //
  #[strum(to_string = "mov")]  Move,         // mov( dst, src )
  #[strum(to_string = "movc")] MoveIf,       // movc( dst, src )
  #[strum(to_string = "add")]  Add,
  #[strum(to_string = "sub")]  Sub,
  #[strum(to_string = "mul")]  Mul,
  #[strum(to_string = "and")]  And,
  #[strum(to_string = "or")]   Or,
  #[strum(to_string = "xor")]  Xor,
  #[strum(to_string = "nand")] Nand,
  #[strum(to_string = "nor")]  Nor,
  #[strum(to_string = "shl")]  ShiftLeft,
  #[strum(to_string = "shr")]  ShiftRight,
  #[strum(to_string = "sar")]  ShiftRightArithmetic,
  // Opcode 15

  // Ternary //
  #[strum(to_string = "mulu")] MulDoubleUnsigned, // mulu( src, dst_low, dst_high )
  #[strum(to_string = "muls")] MulDoubleSigned,   // muls( src, dst_low, dst_high )
  #[strum(to_string = "xchg")] Exchange,          // xchg( a, b, c )
  // Opcode 18

  // Compare //
  #[strum(to_string = "cmp")]  Compare,           // cmp.rel( left, right )
}

pub const MAX_NULLARY_OPCODE: u8 = 1u8;
pub const MAX_UNARY_OPCODE: u8 = 2u8;
pub const MAX_BINARY_OPCODE: u8 = 15u8;
pub const MAX_TERNARY_OPCODE: u8 = 18u8;

/// The instruction family an opcode belongs to, which fixes its operand shape.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Family {
  Nullary,
  Unary,
  Binary,
  Ternary,
  Compare,
}

impl Operation {
  pub fn code(&self) -> u8 {
    Into::<u8>::into(*self)
  }

  pub fn family(&self) -> Family {
    match self.code() {
      value if value < MAX_NULLARY_OPCODE => Family::Nullary,
      value if value < MAX_UNARY_OPCODE   => Family::Unary,
      value if value < MAX_BINARY_OPCODE  => Family::Binary,
      value if value < MAX_TERNARY_OPCODE => Family::Ternary,
      _value                              => Family::Compare
    }
  }

  /// The number of operands the opcode takes.
  pub fn arity(&self) -> usize {
    match self.family() {
      Family::Nullary => 0,
      Family::Unary   => 1,
      Family::Binary  => 2,
      Family::Ternary => 3,
      Family::Compare => 2,
    }
  }
}

/**
  The orderings a compare instruction can test. The unsigned relations compare the operands'
  bit patterns as unsigned 32 bit integers.
*/
#[derive(
StrumDisplay, IntoStaticStr, EnumString, TryFromPrimitive, IntoPrimitive,
Clone,        Copy,          Eq,         PartialEq,        Debug,         Hash
)]
#[repr(u8)]
pub enum Relation {
  #[strum(to_string = "eq")]  Equal,
  #[strum(to_string = "ne")]  NotEqual,
  #[strum(to_string = "lt")]  Less,
  #[strum(to_string = "le")]  LessEqual,
  #[strum(to_string = "gt")]  Greater,
  #[strum(to_string = "ge")]  GreaterEqual,
  #[strum(to_string = "ltu")] LessUnsigned,
  #[strum(to_string = "leu")] LessEqualUnsigned,
  #[strum(to_string = "gtu")] GreaterUnsigned,
  #[strum(to_string = "geu")] GreaterEqualUnsigned,
}

/// Indexed by `Relation` code. Columns are (less, equal, greater).
const TRUTH_TABLE: [[bool; 3]; 10] = [
  [false, true,  false], // eq
  [true,  false, true ], // ne
  [true,  false, false], // lt
  [true,  true,  false], // le
  [false, false, true ], // gt
  [false, true,  true ], // ge
  [true,  false, false], // ltu
  [true,  true,  false], // leu
  [false, false, true ], // gtu
  [false, true,  true ], // geu
];

impl Relation {
  pub fn is_unsigned(&self) -> bool {
    Into::<u8>::into(*self) >= Into::<u8>::into(Relation::LessUnsigned)
  }

  pub fn holds(&self, left: i32, right: i32) -> bool {
    let ordering =
      match self.is_unsigned() {
        true  => (left as u32).cmp(&(right as u32)),
        false => left.cmp(&right)
      };
    let row = &TRUTH_TABLE[Into::<u8>::into(*self) as usize];
    row[(ordering as i8 + 1) as usize]
  }
}

/// The engine's reserved addresses, as seen through `Program::read_instruction`.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum Trap {
  OutermostReturn,
  DebugOutput,
}

/// Holds an opcode together with its typed operands.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Instruction {
  Nullary(Operation),
  Unary {
    opcode : Operation,
    dst    : Writable
  },
  Binary {
    opcode : Operation,
    dst    : Writable,
    src    : Value
  },
  Ternary {
    opcode : Operation,
    a      : Value,
    b      : Writable,
    c      : Writable
  },
  Compare {
    relation : Relation,
    left     : Value,
    right    : Value
  },
  /// Never produced by a front end. Fetching a trap address yields one of these.
  Trap(Trap),
}

impl Instruction {

  /**
    Whether the opcode belongs to the family of the variant holding it. `Trap` is never well
    formed: only the engine's trap addresses produce one.
  */
  pub fn is_well_formed(&self) -> bool {
    match self {
      Instruction::Nullary(opcode)        => opcode.family() == Family::Nullary,
      Instruction::Unary { opcode, .. }   => opcode.family() == Family::Unary,
      Instruction::Binary { opcode, .. }  => opcode.family() == Family::Binary,
      Instruction::Ternary { opcode, .. } => opcode.family() == Family::Ternary,
      Instruction::Compare { .. }         => true,
      Instruction::Trap(_)                => false,
    }
  }

  /**
    Executes the instruction's effect. Malformed instructions fault without touching any state,
    and so does `Trap`, which the engine handles before it gets here.
  */
  pub fn execute(&self, hw: &mut Hardware, program: &Program) -> Result<(), Fault> {
    if !self.is_well_formed() {
      return Err(Fault::MalformedInstruction { instruction: self.clone() });
    }

    match self {
      Instruction::Nullary(_)                   => Ok(()),
      Instruction::Unary { opcode, dst }        => exec_unary(*opcode, dst, hw, program),
      Instruction::Binary { opcode, dst, src }  => exec_binary(*opcode, dst, src, hw, program),
      Instruction::Ternary { opcode, a, b, c }  => exec_ternary(*opcode, a, b, c, hw, program),
      Instruction::Compare { relation, left, right } => {
        exec_compare(*relation, left, right, hw, program)
      }
      Instruction::Trap(_)                      => {
        Err(Fault::MalformedInstruction { instruction: self.clone() })
      }
    }
  }

  pub fn operation(&self) -> Option<Operation> {
    match self {
      | Instruction::Nullary(opcode)
      | Instruction::Unary { opcode, .. }
      | Instruction::Binary { opcode, .. }
      | Instruction::Ternary { opcode, .. } => Some(*opcode),
      Instruction::Compare { .. }           => Some(Operation::Compare),
      Instruction::Trap(_)                  => None
    }
  }
}

// region Dispatch

fn exec_unary(opcode: Operation, dst: &Writable, hw: &mut Hardware, program: &Program)
  -> Result<(), Fault>
{
  match opcode {
    // NAND with all ones
    Operation::Not => {
      let value = dst.get(hw, program)?;
      dst.set(!(value & -1), hw, program)
    }
    _ => Err(Fault::MalformedInstruction { instruction: Instruction::Unary { opcode, dst: dst.clone() } })
  }
}

/// The result of a binary arithmetic, bitwise, or shift opcode, or `None` for any other opcode.
pub fn binary_result(opcode: Operation, dst: i32, src: i32) -> Option<i32> {
  let shift = src as u32;
  let result =
    match opcode {
      Operation::Add        => dst.wrapping_add(src),
      Operation::Sub        => dst.wrapping_sub(src),
      Operation::Mul        => dst.wrapping_mul(src),
      Operation::And        => dst & src,
      Operation::Or         => dst | src,
      Operation::Xor        => dst ^ src,
      Operation::Nand       => !(dst & src),
      Operation::Nor        => !(dst | src),
      // Amounts outside 0..=31 shift everything out.
      Operation::ShiftLeft  if shift < 32 => ((dst as u32) << shift) as i32,
      Operation::ShiftRight if shift < 32 => ((dst as u32) >> shift) as i32,
      Operation::ShiftRightArithmetic if shift < 32 => dst >> shift,
      Operation::ShiftLeft
      | Operation::ShiftRight
      | Operation::ShiftRightArithmetic => 0,
      _ => return None
    };
  Some(result)
}

fn exec_binary(
  opcode  : Operation,
  dst     : &Writable,
  src     : &Value,
  hw      : &mut Hardware,
  program : &Program
) -> Result<(), Fault>
{
  match opcode {

    Operation::Move => {
      let value = src.get(hw, program)?;
      dst.set(value, hw, program)
    }

    Operation::MoveIf => {
      if hw.cpu.flag {
        let value = src.get(hw, program)?;
        dst.set(value, hw, program)?;
      }
      Ok(())
    }

    _ => {
      let right = src.get(hw, program)?;
      let left  = dst.get(hw, program)?;
      match binary_result(opcode, left, right) {
        Some(result) => dst.set(result, hw, program),
        None => {
          Err(Fault::MalformedInstruction {
            instruction: Instruction::Binary { opcode, dst: dst.clone(), src: src.clone() }
          })
        }
      }
    }

  }
}

fn exec_ternary(
  opcode  : Operation,
  a       : &Value,
  b       : &Writable,
  c       : &Writable,
  hw      : &mut Hardware,
  program : &Program
) -> Result<(), Fault>
{
  let first  = a.get(hw, program)?;
  let second = b.get(hw, program)?;

  match opcode {

    Operation::MulDoubleUnsigned => {
      let product = (first as u32 as u64) * (second as u32 as u64);
      b.set(product as u32 as i32, hw, program)?;
      c.set((product >> 32) as u32 as i32, hw, program)
    }

    Operation::MulDoubleSigned => {
      let product = (first as i64) * (second as i64);
      b.set(product as i32, hw, program)?;
      c.set((product >> 32) as i32, hw, program)
    }

    // `b` receives `a`, `c` receives the old `b`. With `b = xx` this is a call.
    Operation::Exchange => {
      b.set(first, hw, program)?;
      c.set(second, hw, program)
    }

    _ => {
      Err(Fault::MalformedInstruction {
        instruction: Instruction::Ternary { opcode, a: a.clone(), b: b.clone(), c: c.clone() }
      })
    }
  }
}

fn exec_compare(
  relation : Relation,
  left     : &Value,
  right    : &Value,
  hw       : &mut Hardware,
  program  : &Program
) -> Result<(), Fault>
{
  let left  = left.get(hw, program)?;
  let right = right.get(hw, program)?;
  hw.cpu.flag = relation.holds(left, right);
  Ok(())
}

// endregion

impl Display for Instruction {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {

      Instruction::Nullary(opcode) => {
        write!(f, "{}", opcode)
      }

      Instruction::Unary { opcode, dst } => {
        write!(f, "{} {}", opcode, dst)
      }

      Instruction::Binary { opcode, dst, src } => {
        write!(f, "{} {}, {}", opcode, dst, src)
      }

      Instruction::Ternary { opcode, a, b, c } => {
        write!(f, "{} {}, {}, {}", opcode, a, b, c)
      }

      Instruction::Compare { relation, left, right } => {
        write!(f, "{}.{} {}, {}", Operation::Compare, relation, left, right)
      }

      Instruction::Trap(Trap::OutermostReturn) => {
        write!(f, "<outermost return>")
      }

      Instruction::Trap(Trap::DebugOutput) => {
        write!(f, "<debug output>")
      }

    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::str::FromStr;

  #[test]
  fn families(){
    assert_eq!(Operation::Fence.family(), Family::Nullary);
    assert_eq!(Operation::Not.family(), Family::Unary);
    assert_eq!(Operation::Move.family(), Family::Binary);
    assert_eq!(Operation::ShiftRightArithmetic.family(), Family::Binary);
    assert_eq!(Operation::MulDoubleUnsigned.family(), Family::Ternary);
    assert_eq!(Operation::Exchange.family(), Family::Ternary);
    assert_eq!(Operation::Compare.family(), Family::Compare);
    assert_eq!(Operation::Exchange.arity(), 3);
  }

  #[test]
  fn mnemonics(){
    assert_eq!(Operation::from_str("movc").unwrap(), Operation::MoveIf);
    assert_eq!(Operation::ShiftRightArithmetic.to_string(), "sar");
    assert_eq!(Relation::from_str("geu").unwrap(), Relation::GreaterEqualUnsigned);
    assert!(Operation::from_str("jmp").is_err());
  }

  #[test]
  fn wraparound(){
    let samples = [0, 1, -1, i32::MAX, i32::MIN, 0x1234_5678, -0x0F0F_0F0F];
    for &a in samples.iter() {
      for &b in samples.iter() {
        let sum = binary_result(Operation::Add, a, b).unwrap();
        assert_eq!(binary_result(Operation::Sub, sum, b), Some(a));
      }
    }
    assert_eq!(binary_result(Operation::Add, i32::MAX, 1), Some(i32::MIN));
  }

  #[test]
  fn shifts(){
    assert_eq!(binary_result(Operation::ShiftLeft, 1, 31), Some(i32::MIN));
    assert_eq!(binary_result(Operation::ShiftRight, -1, 28), Some(0xF));
    assert_eq!(binary_result(Operation::ShiftRightArithmetic, -16, 2), Some(-4));
    assert_eq!(binary_result(Operation::ShiftLeft, 1, 32), Some(0));
    assert_eq!(binary_result(Operation::ShiftRightArithmetic, -1, 33), Some(0));
    // Low five bits are 1, but a higher bit is set.
    assert_eq!(binary_result(Operation::ShiftRight, -1, 0x21), Some(0));
    assert_eq!(binary_result(Operation::ShiftLeft, 1, -1), Some(0));
  }

  #[test]
  fn bitwise(){
    assert_eq!(binary_result(Operation::Nand, 0b1100, 0b1010), Some(!0b1000));
    assert_eq!(binary_result(Operation::Nor, 0, 0), Some(-1));
    assert_eq!(binary_result(Operation::Xor, 0b1100, 0b1010), Some(0b0110));
    assert_eq!(binary_result(Operation::Move, 1, 2), None);
  }

  #[test]
  fn mismatched_families_fault(){
    use crate::register::Register::*;
    let program = Program::default();
    let mut hw  = Hardware::new(Default::default());
    let malformed = [
      Instruction::Binary { opcode: Operation::Exchange, dst: Writable::Reg(F0), src: Value::Imm(1) },
      Instruction::Unary { opcode: Operation::Move, dst: Writable::Reg(F0) },
      Instruction::Nullary(Operation::Add),
      Instruction::Ternary {
        opcode : Operation::Add,
        a      : Value::Imm(1),
        b      : Writable::Reg(F0),
        c      : Writable::Reg(F1)
      },
      Instruction::Trap(Trap::DebugOutput),
    ];

    for instruction in malformed.iter() {
      assert!(!instruction.is_well_formed());
      assert_eq!(
        instruction.execute(&mut hw, &program),
        Err(Fault::MalformedInstruction { instruction: instruction.clone() })
      );
    }
    assert_eq!(hw.cpu.get(F0), crate::address::GARBAGE);
    assert!(Instruction::Nullary(Operation::Fence).is_well_formed());
  }
  #[test]
  fn relations(){
    assert!(Relation::Less.holds(-1, 0));
    assert!(!Relation::LessUnsigned.holds(-1, 0));
    assert!(Relation::GreaterUnsigned.holds(-1, 0));
    assert!(Relation::LessEqual.holds(3, 3));
    assert!(Relation::GreaterEqualUnsigned.holds(3, 3));
    assert!(Relation::NotEqual.holds(3, 4));
    assert!(!Relation::Equal.holds(3, 4));
    assert!(Relation::Greater.holds(i32::MAX, i32::MIN));
  }

  #[test]
  fn display(){
    use crate::register::Register::*;
    let cmp = Instruction::Compare {
      relation : Relation::LessUnsigned,
      left     : F0.into(),
      right    : Value::Imm(3)
    };
    assert_eq!(cmp.to_string(), "cmp.ltu f0, #3");
    let xchg = Instruction::Ternary {
      opcode : Operation::Exchange,
      a      : Value::Label(crate::label::label("f")),
      b      : Writable::Reg(Xx),
      c      : Writable::IndReg(F5)
    };
    assert_eq!(xchg.to_string(), "xchg @f, xx, [f5]");
  }
}
