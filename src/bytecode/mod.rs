/*!

  The machine's instruction set. Every instruction occupies a fixed 4 byte slot of address space
  once linked, but instructions are never encoded: the linked program maps each slot's address
  directly to an `Instruction` value, and the engine dispatches on that value.

  Instructions are stored as enum variants with one variant per instruction family rather than
  one per opcode. The opcode selects the operation within a family, and the variant fixes the
  operand shape, so each family has exactly one dispatch function and the compiler checks that
  every family is handled.

  Operands are `Value`s or, where the instruction writes, `Writable`s. Label operands are
  resolved when they are read, against the page of the current program counter.

*/

mod operand;
mod instruction;
pub mod assembly;

pub use operand::{Value, Writable};
pub use instruction::{Instruction, Operation, Relation, Trap, Family, binary_result};
pub use assembly::parse_assembly;
