//! Addresses in the machine are plain 32 bit byte addresses. This module fixes the geometry of
//! the address space: where pages live, how big they are, and which addresses are reserved for
//! the engine's traps and register sentinels.

/// A byte address. All address arithmetic wraps at 32 bits.
pub type Address = u32;

/// Identifies one linked module's page. Page 0 always holds the entry point module.
pub type PageId = u32;

/// Every linked module gets exactly one page of this many bytes.
pub const PAGE_SIZE: u32 = 0x1_0000;
/// Base address of page 0.
pub const PROGRAM_BASE: Address = 0x0040_0000;
/// Instructions are laid out at a fixed stride.
pub const INSTRUCTION_SIZE: u32 = 4;

/// Highest page id that still fits below the stack and trap region.
pub const MAX_PAGE: PageId = (INITIAL_STACK - PROGRAM_BASE) / PAGE_SIZE - 1;

// region Sentinels

/// Reaching this address through `nx` means the call stack has fully unwound.
pub const OUTERMOST_RETURN: Address = 0xFFFF_FF00;
/// Reaching this address through `nx` prints the word at `[f5 + DEBUG_ARGUMENT_OFFSET]`.
pub const DEBUG_OUTPUT: Address = 0xFFFF_FF10;
/// Offset above `f5` of the debug output trap's argument.
pub const DEBUG_ARGUMENT_OFFSET: u32 = 4;
/// Offset above `f5` of the return address slot.
pub const RETURN_ADDRESS_OFFSET: u32 = 0;

/// Initial value of `f5`.
pub const INITIAL_STACK: Address = 0x7FFF_FF00;
/// Initial value of the general purpose registers and `xx`.
pub const GARBAGE: i32 = 0xCDCD_CDCDu32 as i32;

// endregion

/// The base address of the given page.
pub fn page_base(page: PageId) -> Address {
  PROGRAM_BASE.wrapping_add(page.wrapping_mul(PAGE_SIZE))
}

/// The page containing `address`, or `None` if the address lies outside the program region.
pub fn page_of(address: Address) -> Option<PageId> {
  if address < PROGRAM_BASE {
    return None;
  }
  let page = (address - PROGRAM_BASE) / PAGE_SIZE;
  match page <= MAX_PAGE {
    true  => Some(page),
    false => None
  }
}

/// Whether the address is one of the engine's trap addresses.
pub fn is_trap(address: Address) -> bool {
  address == OUTERMOST_RETURN || address == DEBUG_OUTPUT
}

/// Rounds `offset` up to the next multiple of `alignment`, which must be a power of two.
pub fn align_up(offset: u32, alignment: u32) -> u32 {
  (offset + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pages_round_trip(){
    assert_eq!(page_of(page_base(0)), Some(0));
    assert_eq!(page_of(page_base(3) + PAGE_SIZE - 1), Some(3));
    assert_eq!(page_of(PROGRAM_BASE - 1), None);
  }

  #[test]
  fn traps_and_stack_are_outside_pages(){
    assert_eq!(page_of(OUTERMOST_RETURN), None);
    assert_eq!(page_of(DEBUG_OUTPUT), None);
    assert_eq!(page_of(INITIAL_STACK), None);
    assert!(is_trap(DEBUG_OUTPUT));
    assert!(!is_trap(PROGRAM_BASE));
  }

  #[test]
  fn alignment(){
    assert_eq!(align_up(5, 4), 8);
    assert_eq!(align_up(8, 4), 8);
    assert_eq!(align_up(7, 2), 8);
    assert_eq!(align_up(7, 1), 7);
  }
}
