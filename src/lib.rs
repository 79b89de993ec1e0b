/*!
  A toolchain core for a family of small assembly languages: an in-memory module representation
  built by front ends, a linker that places modules on pages of a flat address space, and an
  execution engine with byte-addressable memory and trap-based termination.

  The usual flow is `parse_assembly` (or a `Builder`) per module, `link` over all modules, and
  `Engine::load` followed by `Engine::run_to_completion`.
*/

#[macro_use] extern crate prettytable;
#[macro_use] extern crate lazy_static;

pub mod address;
pub mod label;
pub mod register;
pub mod bytecode;
pub mod module;
pub mod symboltable;
pub mod linker;
pub mod memory;
pub mod hardware;
pub mod engine;
pub mod error;

use prettytable::format as TableFormat;

pub use bytecode::parse_assembly;
pub use engine::{Config, Engine, Outcome, Scheduler, State, StepBudget};
pub use linker::{link, Linkage, Program};
pub use module::{Builder, Module};

lazy_static! {
  pub(crate) static ref TABLE_DISPLAY_FORMAT: TableFormat::TableFormat =
    TableFormat::FormatBuilder::new()
      .column_separator('│')
      .borders(' ')
      .separator(
        TableFormat::LinePosition::Title,
        TableFormat::LineSeparator::new('─', '┼', ' ', ' ')
      )
      .separator(
        TableFormat::LinePosition::Bottom,
        TableFormat::LineSeparator::new('─', '┴', ' ', ' ')
      )
      .padding(1, 1)
      .build();
}
