/*!
  Sparse byte-addressable memory. Multi-byte values are stored big-endian.

  Two conditions that would be undefined on real hardware are modeled as warnings instead:

   1. An unaligned 2 or 4 byte access proceeds at the address as given. It is reported once per
      address.
   2. Reading a byte that was never written synthesizes a random byte and stores it, so every
      later read of the same address sees the same value. It is reported once, on the access
      that first touches the byte.
*/

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::ops::RangeInclusive;

use prettytable::Table;
use rand_core::{OsRng, RngCore};
use tracing::warn;

use crate::address::Address;
use crate::error::Warning;
use crate::TABLE_DISPLAY_FORMAT;

/// Granularity of the touched-address index.
pub const BLOCK_SIZE: u32 = 0x100;

pub struct Memory {
  bytes      : HashMap<Address, u8>,
  /// Base addresses of blocks containing at least one stored byte.
  touched    : BTreeSet<Address>,
  /// Addresses already reported as unaligned.
  misaligned : HashSet<Address>,
  warnings   : Vec<Warning>,
  rng        : Box<dyn RngCore>,
}

impl Memory {

  pub fn new() -> Memory {
    Memory::with_rng(Box::new(OsRng))
  }

  /// Uses `rng` to synthesize the contents of uninitialized memory.
  pub fn with_rng(rng: Box<dyn RngCore>) -> Memory {
    Memory {
      bytes      : HashMap::new(),
      touched    : BTreeSet::new(),
      misaligned : HashSet::new(),
      warnings   : Vec::new(),
      rng,
    }
  }

  // region Byte level

  fn store(&mut self, address: Address, byte: u8) {
    self.bytes.insert(address, byte);
    self.touched.insert(address & !(BLOCK_SIZE - 1));
  }

  /// Reads `width` consecutive bytes, synthesizing any that were never written.
  fn load(&mut self, address: Address, width: u32) -> Vec<u8> {
    let mut uninitialized = false;
    let mut result = Vec::with_capacity(width as usize);

    for i in 0..width {
      let a = address.wrapping_add(i);
      let byte =
        match self.bytes.get(&a) {
          Some(byte) => *byte,
          None => {
            uninitialized = true;
            let byte = (self.rng.next_u32() & 0xFF) as u8;
            self.store(a, byte);
            byte
          }
        };
      result.push(byte);
    }

    if uninitialized {
      self.warn(Warning::Uninitialized { address });
    }
    result
  }

  fn check_alignment(&mut self, address: Address, width: u32) {
    if address % width != 0 && self.misaligned.insert(address) {
      self.warn(Warning::Unaligned { address, width });
    }
  }

  fn warn(&mut self, warning: Warning) {
    warn!("{}", warning);
    self.warnings.push(warning);
  }

  // endregion

  // region Typed access

  pub fn write(&mut self, address: Address, value: i32) {
    self.check_alignment(address, 4);
    for (i, byte) in value.to_be_bytes().iter().enumerate() {
      self.store(address.wrapping_add(i as u32), *byte);
    }
  }

  pub fn read(&mut self, address: Address) -> i32 {
    self.check_alignment(address, 4);
    let bytes = self.load(address, 4);
    i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
  }

  pub fn write16(&mut self, address: Address, value: i32) {
    self.check_alignment(address, 2);
    self.store(address, (value >> 8) as u8);
    self.store(address.wrapping_add(1), value as u8);
  }

  /// The high byte is sign extended and shifted into place; the low byte is added as an
  /// unsigned quantity.
  pub fn read16(&mut self, address: Address) -> i32 {
    self.check_alignment(address, 2);
    let bytes = self.load(address, 2);
    ((bytes[0] as i8 as i32) << 8) + bytes[1] as i32
  }

  pub fn write8(&mut self, address: Address, value: i32) {
    self.store(address, value as u8);
  }

  pub fn read8(&mut self, address: Address) -> i32 {
    self.load(address, 1)[0] as i8 as i32
  }

  // endregion

  // region Inspection

  pub fn is_initialized(&self, address: Address) -> bool {
    self.bytes.contains_key(&address)
  }

  /// The stored bytes at `addresses`, without synthesizing or reporting anything.
  pub fn dump<R>(&self, addresses: R) -> Vec<Option<u8>>
    where R: IntoIterator<Item = Address>
  {
    addresses.into_iter().map(|a| self.bytes.get(&a).copied()).collect()
  }

  /**
    Contiguous address ranges that contain at least one stored byte, at block granularity. The
    ranges are inclusive so that the block holding `Address::MAX` can be represented.
  */
  pub fn touched_ranges(&self) -> Vec<RangeInclusive<Address>> {
    let mut bounds: Vec<(Address, Address)> = Vec::new();
    for &block in self.touched.iter() {
      let last_byte = block + (BLOCK_SIZE - 1);
      match bounds.last_mut() {
        Some((_, end)) if end.checked_add(1) == Some(block) => *end = last_byte,
        _                                                   => bounds.push((block, last_byte))
      }
    }
    bounds.into_iter().map(|(start, end)| start..=end).collect()
  }

  pub fn warnings(&self) -> &[Warning] {
    &self.warnings
  }

  /// Removes and returns the warnings raised since the last call.
  pub fn take_warnings(&mut self) -> Vec<Warning> {
    std::mem::take(&mut self.warnings)
  }

  // endregion
}

impl Default for Memory {
  fn default() -> Memory {
    Memory::new()
  }
}

impl Display for Memory {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let mut table = Table::new();

    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->"Address", ubl->"Contents"]);

    for range in self.touched_ranges() {
      // Rows of 16 bytes. The arithmetic is done in u64 so the last row can end at Address::MAX.
      let end = *range.end() as u64;
      let mut line = *range.start() as u64;
      while line <= end {
        let row_bytes = self.dump(line as Address..=(line + 15).min(end) as Address);
        if row_bytes.iter().any(Option::is_some) {
          let text =
            row_bytes
              .iter()
              .map(|b| match b {
                Some(b) => format!("{:02x}", b),
                None    => "..".to_string()
              })
              .collect::<Vec<String>>()
              .join(" ");
          table.add_row(row![r->format!("{:#010x}", line), text]);
        }
        line += 16;
      }
    }

    write!(f, "{}", table)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn aligned_round_trip(){
    let mut memory = Memory::new();
    memory.write(0x100, -123456789);
    assert_eq!(memory.read(0x100), -123456789);
    assert!(memory.warnings().is_empty());
  }

  #[test]
  fn big_endian(){
    let mut memory = Memory::new();
    memory.write(0x100, 0x0102_0304);
    assert_eq!(memory.dump(0x100..0x104), vec![Some(1), Some(2), Some(3), Some(4)]);
    assert_eq!(memory.read8(0x103), 4);
    assert_eq!(memory.read16(0x100), 0x0102);
  }

  #[test]
  fn misaligned_round_trip(){
    let mut memory = Memory::new();
    memory.write(0x101, 0x7654_3210);
    assert_eq!(memory.read(0x101), 0x7654_3210);
    assert_eq!(memory.warnings(), &[Warning::Unaligned { address: 0x101, width: 4 }]);
  }

  #[test]
  fn uninitialized_reads_are_stable(){
    let mut memory = Memory::new();
    let first  = memory.read8(0x2000);
    let second = memory.read8(0x2000);
    assert_eq!(first, second);
    assert_eq!(memory.warnings(), &[Warning::Uninitialized { address: 0x2000 }]);
    assert!(memory.is_initialized(0x2000));
  }

  #[test]
  fn partially_initialized_word(){
    let mut memory = Memory::new();
    memory.write8(0x300, 0x7F);
    let word = memory.read(0x300);
    assert_eq!((word >> 24) & 0xFF, 0x7F);
    assert_eq!(memory.take_warnings(), vec![Warning::Uninitialized { address: 0x300 }]);
    assert_eq!(memory.read(0x300), word);
    assert!(memory.warnings().is_empty());
  }

  #[test]
  fn sign_extension(){
    let mut memory = Memory::new();
    memory.write8(0x10, 0xFF);
    assert_eq!(memory.read8(0x10), -1);
    memory.write16(0x20, 0x80FF);
    assert_eq!(memory.read16(0x20), -0x7F01);
    memory.write16(0x22, 0x7F80);
    assert_eq!(memory.read16(0x22), 0x7F80);
  }

  #[test]
  fn addresses_wrap(){
    let mut memory = Memory::new();
    memory.write(0xFFFF_FFFE, 0x1122_3344);
    assert_eq!(memory.dump(0..2), vec![Some(0x33), Some(0x44)]);
    assert_eq!(memory.read(0xFFFF_FFFE), 0x1122_3344);
  }

  #[test]
  fn touched_ranges_merge(){
    let mut memory = Memory::new();
    memory.write(0x1FC, 1);
    memory.write(0x204, 2);
    memory.write8(0x1000, 3);
    assert_eq!(memory.touched_ranges(), vec![0x100..=0x2FF, 0x1000..=0x10FF]);
  }

  #[test]
  fn top_of_address_space(){
    let mut memory = Memory::new();
    memory.write8(0xFFFF_FFFF, 0xAB);
    assert_eq!(memory.touched_ranges(), vec![0xFFFF_FF00..=0xFFFF_FFFF]);
    assert_eq!(memory.dump(0xFFFF_FFFE..=0xFFFF_FFFF), vec![None, Some(0xAB)]);

    let table = memory.to_string();
    assert!(table.contains("0xfffffff0"));
    assert!(table.contains(".. ab"));
  }

  #[test]
  fn display_lists_stored_bytes(){
    let mut memory = Memory::new();
    memory.write(0x100, 0x0102_03AB);
    memory.write8(0x2000, 0x7F);

    let table = memory.to_string();
    assert!(table.contains("Address"));
    assert!(table.contains("0x00000100"));
    assert!(table.contains("01 02 03 ab .."));
    assert!(table.contains("0x00002000"));
    assert!(table.contains("7f"));
    assert!(!table.contains("0x00000110"));
  }
}
