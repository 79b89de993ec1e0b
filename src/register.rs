use strum_macros::{Display as StrumDisplay, EnumString, IntoStaticStr};
use num_enum::{TryFromPrimitive, IntoPrimitive};

/**
  The addressable register file. The program counter `nx` is deliberately absent: it can only be
  changed by writing `xx`, which the engine copies into `nx` at the end of every step.

  The discriminant doubles as the index into `Cpu::registers`.
*/
#[derive(
  StrumDisplay, IntoStaticStr, EnumString, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,         PartialEq,        Debug,         Hash
)]
#[repr(u8)]
pub enum Register {
  #[strum(to_string = "f0")] F0,
  #[strum(to_string = "f1")] F1,
  #[strum(to_string = "f2")] F2,
  #[strum(to_string = "f3")] F3,
  /// Frame/stack pointer.
  #[strum(to_string = "f5")] F5,
  /// Staging register for the next program counter.
  #[strum(to_string = "xx")] Xx,
}

pub const REGISTER_COUNT: usize = 6;

impl Register {
  pub const ALL: [Register; REGISTER_COUNT] =
    [Register::F0, Register::F1, Register::F2, Register::F3, Register::F5, Register::Xx];

  pub fn idx(&self) -> usize {
    u8::from(*self) as usize
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::convert::TryFrom;
  use std::str::FromStr;

  #[test]
  fn names(){
    assert_eq!(Register::from_str("f5").unwrap(), Register::F5);
    assert_eq!(Register::Xx.to_string(), "xx");
    assert!(Register::from_str("f4").is_err());
    assert!(Register::from_str("nx").is_err());
  }

  #[test]
  fn indices(){
    for (i, r) in Register::ALL.iter().enumerate() {
      assert_eq!(r.idx(), i);
      assert_eq!(Register::try_from(i as u8).unwrap(), *r);
    }
  }
}
