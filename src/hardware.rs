//! The mutable machine state of one execution run: the CPU's registers and flag, and memory.

use std::fmt::{Display, Formatter};

use prettytable::Table;

use crate::address::{Address, GARBAGE, INITIAL_STACK, PROGRAM_BASE};
use crate::memory::Memory;
use crate::register::{Register, REGISTER_COUNT};
use crate::TABLE_DISPLAY_FORMAT;

/// Initial machine state. The defaults are the sentinels in `crate::address`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
  /// Initial value of f0-f3 and xx.
  pub garbage       : i32,
  /// Initial value of f5.
  pub initial_stack : Address,
}

impl Default for Config {
  fn default() -> Config {
    Config {
      garbage       : GARBAGE,
      initial_stack : INITIAL_STACK,
    }
  }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cpu {
  registers : [i32; REGISTER_COUNT],
  /// The program counter. Only the engine writes it, by copying `xx`.
  pub nx    : Address,
  /// Set by compare instructions, read by conditional moves.
  pub flag  : bool,
}

impl Cpu {

  pub fn new(config: &Config) -> Cpu {
    let mut registers = [config.garbage; REGISTER_COUNT];
    registers[Register::F5.idx()] = config.initial_stack as i32;
    Cpu {
      registers,
      nx   : PROGRAM_BASE,
      flag : false,
    }
  }

  pub fn get(&self, register: Register) -> i32 {
    self.registers[register.idx()]
  }

  pub fn set(&mut self, register: Register, value: i32) {
    self.registers[register.idx()] = value;
  }
}

impl Display for Cpu {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let mut table = Table::new();

    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->"Register", ubl->"Contents"]);

    for register in Register::ALL.iter() {
      let value = self.get(*register);
      table.add_row(row![r->format!("{} =", register), format!("{:#010x} ({})", value, value)]);
    }
    table.add_row(row![r->"nx =", format!("{:#010x}", self.nx)]);
    table.add_row(row![r->"flag =", format!("{}", self.flag)]);

    write!(f, "{}", table)
  }
}

/// One run's CPU and memory. Never shared between runs.
pub struct Hardware {
  pub cpu    : Cpu,
  pub memory : Memory,
}

impl Hardware {
  pub fn new(config: Config) -> Hardware {
    Hardware {
      cpu    : Cpu::new(&config),
      memory : Memory::new(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sentinels(){
    let cpu = Cpu::new(&Config::default());
    assert_eq!(cpu.get(Register::F0), GARBAGE);
    assert_eq!(cpu.get(Register::Xx), GARBAGE);
    assert_eq!(cpu.get(Register::F5) as u32, INITIAL_STACK);
    assert_ne!(GARBAGE, 0);
    assert!(!cpu.flag);
  }

  #[test]
  fn custom_config(){
    let config = Config { garbage: 7, initial_stack: 0x1000 };
    let mut cpu = Cpu::new(&config);
    assert_eq!(cpu.get(Register::F3), 7);
    cpu.set(Register::F3, -2);
    assert_eq!(cpu.get(Register::F3), -2);
    assert_eq!(cpu.get(Register::F5), 0x1000);
  }

  #[test]
  fn display_lists_registers(){
    let mut cpu = Cpu::new(&Config::default());
    cpu.set(Register::F1, 42);
    cpu.flag = true;

    let table = cpu.to_string();
    assert!(table.contains("Register"));
    assert!(table.contains("f1 ="));
    assert!(table.contains("0x0000002a (42)"));
    assert!(table.contains("f5 ="));
    assert!(table.contains("0x7fffff00"));
    assert!(table.contains("nx ="));
    assert!(table.contains("0x00400000"));
    assert!(table.contains("true"));
  }
}
