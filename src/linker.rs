/*!
  The linker combines modules into one addressable `Program`.

  Each module gets its own fixed-size page of address space. The entry point module always gets
  page 0; the rest get pages 1, 2, ... in input order. Within a page, instructions are laid out
  first at a fixed 4 byte stride, followed by the static literals, each aligned to its own width.

  Labels are resolved in two tiers. A page's own labels shadow everything; a label that is not
  local is looked up in the global export table, but only if the page imports it.

  Linking is best-effort. Every structural problem is collected into the diagnostics list and
  linking continues with the modules that are not affected, so that a single call surfaces all
  problems at once. A `Program` linked with diagnostics must not be executed.
*/

use std::collections::{BTreeMap, HashSet};
use std::fmt::{Display, Formatter};

use prettytable::Table;
use tracing::{debug, error};

use crate::address::*;
use crate::bytecode::{Instruction, Trap};
use crate::error::{Diagnostic, LinkError};
use crate::label::{Label, SourceToken};
use crate::memory::Memory;
use crate::module::{Literal, Module, ValueSize};
use crate::symboltable::SymbolTable;
use crate::TABLE_DISPLAY_FORMAT;

/// An instruction at its final address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadedInstruction {
  pub address     : Address,
  /// The address of the next instruction in layout order. The engine stages it in `xx`.
  pub successor   : Address,
  pub instruction : Instruction,
  pub token       : Option<SourceToken>,
}

/// A static literal at its final address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlacedValue {
  pub address : Address,
  pub value   : Literal,
  pub size    : ValueSize,
}

/// One module's slice of the address space.
#[derive(Clone, Debug)]
pub struct Page {
  pub id           : PageId,
  pub module       : String,
  pub instructions : BTreeMap<Address, LoadedInstruction>,
  pub values       : Vec<PlacedValue>,
  pub labels       : SymbolTable,
  pub imports      : HashSet<Label>,
}

impl Page {
  fn new(id: PageId, module: &Module) -> Page {
    Page {
      id,
      module       : module.name.clone(),
      instructions : BTreeMap::new(),
      values       : Vec::new(),
      labels       : SymbolTable::new(),
      imports      : module.imports.iter().cloned().collect(),
    }
  }

  pub fn base(&self) -> Address {
    page_base(self.id)
  }
}

lazy_static! {
  static ref OUTERMOST_RETURN_TRAP: LoadedInstruction = LoadedInstruction {
    address     : OUTERMOST_RETURN,
    successor   : OUTERMOST_RETURN,
    instruction : Instruction::Trap(Trap::OutermostReturn),
    token       : None,
  };
  static ref DEBUG_OUTPUT_TRAP: LoadedInstruction = LoadedInstruction {
    address     : DEBUG_OUTPUT,
    successor   : DEBUG_OUTPUT,
    instruction : Instruction::Trap(Trap::DebugOutput),
    token       : None,
  };
}

/// The linked program. Read-only once built, so one program may be run any number of times.
#[derive(Clone, Debug, Default)]
pub struct Program {
  pages   : BTreeMap<PageId, Page>,
  exports : SymbolTable,
}

impl Program {

  /// The address execution starts at: the base of page 0.
  pub fn entry_address(&self) -> Address {
    page_base(0)
  }

  pub fn has_entry_page(&self) -> bool {
    self.pages.contains_key(&0)
  }

  pub fn page(&self, id: PageId) -> Option<&Page> {
    self.pages.get(&id)
  }

  pub fn pages(&self) -> impl Iterator<Item = &Page> {
    self.pages.values()
  }

  pub fn exports(&self) -> &SymbolTable {
    &self.exports
  }

  /// The page containing `address`, if one is linked there.
  pub fn page_of(&self, address: Address) -> Option<&Page> {
    page_of(address).and_then(|id| self.pages.get(&id))
  }

  /**
    The instruction mapped at `address`. The two trap addresses yield `Instruction::Trap`
    pseudo-instructions; any other unmapped address yields `None`.
  */
  pub fn read_instruction(&self, address: Address) -> Option<&LoadedInstruction> {
    match address {
      OUTERMOST_RETURN => Some(&*OUTERMOST_RETURN_TRAP),
      DEBUG_OUTPUT     => Some(&*DEBUG_OUTPUT_TRAP),
      _                => self.page_of(address)?.instructions.get(&address)
    }
  }

  /**
    Resolves `label` as seen from the page containing `current`. Local labels come first; an
    imported label falls back to the global export table.
  */
  pub fn resolve_label(&self, current: Address, label: &Label) -> Option<Address> {
    let page = self.page_of(current)?;
    match page.labels.get_address(label) {
      Some(address) => Some(address),
      None if page.imports.contains(label) => self.exports.get_address(label),
      None => None
    }
  }

  /// Every label bound to `address`, local or exported.
  pub fn labels_at(&self, address: Address) -> Vec<Label> {
    match self.page_of(address) {
      Some(page) => page.labels.labels_at(address),
      None       => Vec::new()
    }
  }

  /**
    Writes every static literal into `memory`. Literals holding a label are resolved from the
    literal's own page. Unresolvable labels are skipped; linking has already reported them.
  */
  pub fn initialize_memory(&self, memory: &mut Memory) {
    for page in self.pages.values() {
      for placed in page.values.iter() {
        let value =
          match &placed.value {
            Literal::Int(i)   => *i,
            Literal::Label(l) => {
              match self.resolve_label(placed.address, l) {
                Some(address) => address as i32,
                None          => continue
              }
            }
          };

        match placed.size {
          ValueSize::Byte => memory.write8(placed.address, value),
          ValueSize::Half => memory.write16(placed.address, value),
          ValueSize::Word => memory.write(placed.address, value),
        }
      }
    }
  }
}

/// The result of linking: the program and every problem found while building it.
pub struct Linkage {
  pub program     : Program,
  pub diagnostics : Vec<Diagnostic<LinkError>>,
}

impl Linkage {
  /// Whether the program may be executed.
  pub fn is_runnable(&self) -> bool {
    self.diagnostics.is_empty() && self.program.has_entry_page()
  }
}

/// Accumulates state during a single call to `link`.
struct Linker {
  program     : Program,
  diagnostics : Vec<Diagnostic<LinkError>>,
}

/// Links `modules` into a program.
pub fn link(modules: &[Module]) -> Linkage {
  let mut linker = Linker {
    program     : Program::default(),
    diagnostics : Vec::new(),
  };

  for (page, module) in linker.assign_pages(modules) {
    linker.lay_out(page, module);
  }
  linker.check_imports();

  for diagnostic in linker.diagnostics.iter() {
    error!("link: {}", diagnostic);
  }

  Linkage {
    program     : linker.program,
    diagnostics : linker.diagnostics,
  }
}

impl Linker {

  fn report(&mut self, error: LinkError, token: Option<SourceToken>) {
    self.diagnostics.push(Diagnostic::new(error, token));
  }

  /// Places the (first) entry point module on page 0 and the rest on pages 1.. in input order.
  fn assign_pages<'m>(&mut self, modules: &'m [Module]) -> Vec<(PageId, &'m Module)> {
    let entries: Vec<usize> =
      modules
        .iter()
        .enumerate()
        .filter(|(_, m)| m.has_entry_point)
        .map(|(i, _)| i)
        .collect();

    match entries.len() {
      0 => self.report(LinkError::NoEntryPoint, None),
      1 => {}
      _ => {
        let names = entries.iter().map(|i| modules[*i].name.clone()).collect();
        self.report(LinkError::MultipleEntryPoints { modules: names }, None);
      }
    }

    let mut assignment = Vec::with_capacity(modules.len());
    if let Some(&entry) = entries.first() {
      assignment.push((0, &modules[entry]));
    }

    let mut next_page: PageId = 1;
    for (i, module) in modules.iter().enumerate() {
      if entries.first() == Some(&i) {
        continue;
      }
      if next_page > MAX_PAGE {
        self.report(LinkError::TooManyModules, None);
        break;
      }
      assignment.push((next_page, module));
      next_page += 1;
    }

    assignment
  }

  fn define(&mut self, page: &mut Page, labels: &[Label], address: Address, token: Option<SourceToken>) {
    for label in labels {
      if page.labels.insert(label.clone(), address).is_err() {
        self.report(
          LinkError::DuplicateLabel { module: page.module.clone(), label: label.clone() },
          token
        );
      }
    }
  }

  /// Lays out one module on its page and records its exports.
  fn lay_out(&mut self, id: PageId, module: &Module) {
    let mut page = Page::new(id, module);
    let base     = page.base();
    let mut offset: u32 = 0;
    let mut fits = true;

    debug!("link: module `{}` on page {} at {:#010x}", module.name, id, base);

    for labeled in module.instructions.iter() {
      if offset + INSTRUCTION_SIZE > PAGE_SIZE {
        fits = false;
        break;
      }
      let address = base + offset;
      self.define(&mut page, &labeled.labels, address, labeled.token);
      page.instructions.insert(
        address,
        LoadedInstruction {
          address,
          successor   : address.wrapping_add(INSTRUCTION_SIZE),
          instruction : labeled.instruction.clone(),
          token       : labeled.token,
        }
      );
      offset += INSTRUCTION_SIZE;
    }

    if fits {
      for labeled in module.values.iter() {
        let size = labeled.size.bytes();
        offset = align_up(offset, size);
        if offset + size > PAGE_SIZE {
          fits = false;
          break;
        }
        let address = base + offset;
        self.define(&mut page, &labeled.labels, address, None);
        page.values.push(PlacedValue { address, value: labeled.value.clone(), size: labeled.size });
        offset += size;
      }
    }

    if !fits {
      self.report(LinkError::ModuleTooLarge { module: module.name.clone() }, None);
    }

    for import in module.imports.iter() {
      if page.labels.contains(import) {
        self.report(
          LinkError::ImportDefinedLocally { module: module.name.clone(), label: import.clone() },
          None
        );
      }
    }

    for export in module.exports.iter() {
      let address =
        match page.labels.get_address(export) {
          Some(address) => address,
          None => {
            // A truncated module may have lost the definition; that is already reported.
            if fits {
              self.report(
                LinkError::UndefinedExport { module: module.name.clone(), label: export.clone() },
                None
              );
            }
            continue;
          }
        };

      if let Err(existing) = self.program.exports.insert(export.clone(), address) {
        let first =
          self.program
              .page_of(existing)
              .map(|p| p.module.clone())
              .unwrap_or_default();
        self.report(
          LinkError::DuplicateExport {
            label  : export.clone(),
            first,
            second : module.name.clone()
          },
          None
        );
      }
    }

    self.program.pages.insert(id, page);
  }

  fn check_imports(&mut self) {
    let mut unresolved = Vec::new();
    for page in self.program.pages.values() {
      let mut imports: Vec<&Label> = page.imports.iter().collect();
      imports.sort_by(|a, b| (***a).cmp(&***b));
      for import in imports {
        if !page.labels.contains(import) && !self.program.exports.contains(import) {
          unresolved.push(
            LinkError::UnresolvedImport { module: page.module.clone(), label: import.clone() }
          );
        }
      }
    }
    for error in unresolved {
      self.report(error, None);
    }
  }
}

impl Display for Program {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let mut table = Table::new();

    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->"Address", ubl->"Labels", ubl->"Contents", ubl->"Source"]);

    for page in self.pages.values() {
      table.add_row(row![r->format!("{:#010x}", page.base()), b->format!("; {}", page.module), "", ""]);

      for loaded in page.instructions.values() {
        table.add_row(row![
          r->format!("{:#010x}", loaded.address),
          labels_text(&page.labels.labels_at(loaded.address)),
          format!("{}", loaded.instruction),
          loaded.token.map(|t| t.to_string()).unwrap_or_default()
        ]);
      }

      for placed in page.values.iter() {
        let directive =
          match placed.size {
            ValueSize::Byte => "byte",
            ValueSize::Half => "half",
            ValueSize::Word => "word",
          };
        table.add_row(row![
          r->format!("{:#010x}", placed.address),
          labels_text(&page.labels.labels_at(placed.address)),
          format!(".{} {}", directive, placed.value),
          ""
        ]);
      }
    }

    write!(f, "{}", table)
  }
}

fn labels_text(labels: &[Label]) -> String {
  labels
    .iter()
    .map(|l| format!("{}:", l))
    .collect::<Vec<String>>()
    .join(" ")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bytecode::{Operation, Value, Writable};
  use crate::label::label;
  use crate::module::Builder;
  use crate::register::Register;

  fn nop() -> Instruction {
    Instruction::Nullary(Operation::Fence)
  }

  fn jump_to(name: &str) -> Instruction {
    Instruction::Binary {
      opcode : Operation::Move,
      dst    : Writable::Reg(Register::Xx),
      src    : Value::Label(label(name))
    }
  }

  fn library() -> Module {
    let mut builder = Builder::new("library");
    builder.declare_export("helper");
    builder.append_instruction(nop());
    builder.declare_label("helper");
    builder.append_instruction(nop());
    builder.build().unwrap()
  }

  fn main_module() -> Module {
    let mut builder = Builder::new("main");
    builder.mark_has_entry_point();
    builder.declare_import("helper");
    builder.append_instruction(jump_to("helper"));
    builder.build().unwrap()
  }

  #[test]
  fn entry_module_goes_on_page_zero(){
    let linkage = link(&[library(), main_module()]);
    assert!(linkage.is_runnable(), "{:?}", linkage.diagnostics);
    let program = &linkage.program;

    assert_eq!(program.page(0).unwrap().module, "main");
    assert_eq!(program.page(1).unwrap().module, "library");
    let entry = program.read_instruction(program.entry_address()).unwrap();
    assert_eq!(entry.instruction, jump_to("helper"));
    assert_eq!(entry.successor, PROGRAM_BASE + 4);
  }

  #[test]
  fn imports_resolve_through_exports(){
    let linkage = link(&[library(), main_module()]);
    let program = &linkage.program;
    let helper  = page_base(1) + 4;

    assert_eq!(program.resolve_label(PROGRAM_BASE, &label("helper")), Some(helper));
    assert_eq!(program.exports().get_address(&label("helper")), Some(helper));
    assert_eq!(program.labels_at(helper), vec![label("helper")]);
  }

  #[test]
  fn labels_are_page_local(){
    let mut other = Builder::new("other");
    other.declare_label("helper");
    other.append_instruction(nop());
    let linkage = link(&[main_module(), library(), other.build().unwrap()]);
    assert!(linkage.is_runnable());
    let program = &linkage.program;

    // Page 2's own `helper` shadows the export, and page 0 sees the export.
    assert_eq!(program.resolve_label(page_base(2), &label("helper")), Some(page_base(2)));
    assert_eq!(program.resolve_label(page_base(0), &label("helper")), Some(page_base(1) + 4));
  }

  #[test]
  fn unimported_labels_do_not_resolve(){
    let mut builder = Builder::new("main");
    builder.mark_has_entry_point();
    builder.append_instruction(jump_to("helper"));
    let linkage = link(&[builder.build().unwrap(), library()]);
    assert!(linkage.is_runnable());
    assert_eq!(linkage.program.resolve_label(PROGRAM_BASE, &label("helper")), None);
  }

  #[test]
  fn no_entry_point(){
    let linkage = link(&[library()]);
    assert!(!linkage.is_runnable());
    assert_eq!(linkage.diagnostics[0].issue, LinkError::NoEntryPoint);
    assert!(!linkage.program.has_entry_page());
  }

  #[test]
  fn multiple_entry_points(){
    let mut second = Builder::new("second");
    second.mark_has_entry_point();
    second.append_instruction(nop());
    let linkage = link(&[main_module(), library(), second.build().unwrap()]);
    assert!(!linkage.is_runnable());
    assert_eq!(
      linkage.diagnostics[0].issue,
      LinkError::MultipleEntryPoints { modules: vec!["main".to_string(), "second".to_string()] }
    );
    assert_eq!(linkage.program.page(0).unwrap().module, "main");
    assert_eq!(linkage.program.page(2).unwrap().module, "second");
  }

  #[test]
  fn duplicate_label(){
    let mut builder = Builder::new("main");
    builder.mark_has_entry_point();
    builder.declare_label("here");
    builder.append_instruction(nop());
    builder.attach_source_token(SourceToken::new(2, 1, 4));
    builder.declare_label("here");
    builder.append_instruction(nop());
    let linkage = link(&[builder.build().unwrap()]);

    assert_eq!(linkage.diagnostics.len(), 1);
    assert_eq!(
      linkage.diagnostics[0],
      Diagnostic::new(
        LinkError::DuplicateLabel { module: "main".to_string(), label: label("here") },
        Some(SourceToken::new(2, 1, 4))
      )
    );
    // The first definition wins.
    assert_eq!(linkage.program.resolve_label(PROGRAM_BASE, &label("here")), Some(PROGRAM_BASE));
  }

  #[test]
  fn duplicate_export(){
    let mut twin = Builder::new("twin");
    twin.declare_export("helper");
    twin.declare_label("helper");
    twin.append_instruction(nop());
    let linkage = link(&[main_module(), library(), twin.build().unwrap()]);

    assert_eq!(
      linkage.diagnostics,
      vec![Diagnostic::new(
        LinkError::DuplicateExport {
          label  : label("helper"),
          first  : "library".to_string(),
          second : "twin".to_string()
        },
        None
      )]
    );
  }

  #[test]
  fn unresolved_and_undefined(){
    let mut builder = Builder::new("main");
    builder.mark_has_entry_point();
    builder.declare_import("missing");
    builder.declare_export("ghost");
    builder.append_instruction(nop());
    let linkage = link(&[builder.build().unwrap()]);

    let issues: Vec<LinkError> = linkage.diagnostics.into_iter().map(|d| d.issue).collect();
    assert_eq!(
      issues,
      vec![
        LinkError::UndefinedExport { module: "main".to_string(), label: label("ghost") },
        LinkError::UnresolvedImport { module: "main".to_string(), label: label("missing") },
      ]
    );
  }

  #[test]
  fn import_defined_locally(){
    let module = Module {
      name            : "main".to_string(),
      instructions    : vec![crate::module::LabeledInstruction {
        instruction : nop(),
        labels      : vec![label("f")],
        token       : None
      }],
      values          : vec![],
      exports         : vec![],
      imports         : vec![label("f")],
      has_entry_point : true,
    };
    let linkage = link(&[module]);
    assert_eq!(
      linkage.diagnostics[0].issue,
      LinkError::ImportDefinedLocally { module: "main".to_string(), label: label("f") }
    );
  }

  #[test]
  fn literals_are_aligned(){
    let mut builder = Builder::new("main");
    builder.mark_has_entry_point();
    builder.append_instruction(nop());
    builder.declare_label("b");
    builder.declare_literal(Literal::Int(1), ValueSize::Byte);
    builder.declare_label("w");
    builder.declare_literal(Literal::Label(label("b")), ValueSize::Word);
    builder.declare_label("h");
    builder.declare_literal(Literal::Int(-2), ValueSize::Half);
    let linkage = link(&[builder.build().unwrap()]);
    let program = &linkage.program;

    assert_eq!(program.resolve_label(PROGRAM_BASE, &label("b")), Some(PROGRAM_BASE + 4));
    assert_eq!(program.resolve_label(PROGRAM_BASE, &label("w")), Some(PROGRAM_BASE + 8));
    assert_eq!(program.resolve_label(PROGRAM_BASE, &label("h")), Some(PROGRAM_BASE + 12));

    let mut memory = Memory::new();
    program.initialize_memory(&mut memory);
    assert_eq!(memory.read8(PROGRAM_BASE + 4), 1);
    assert_eq!(memory.read(PROGRAM_BASE + 8), (PROGRAM_BASE + 4) as i32);
    assert_eq!(memory.read16(PROGRAM_BASE + 12), -2);
    assert!(memory.warnings().is_empty());
  }

  #[test]
  fn unresolved_literal_is_skipped(){
    let mut builder = Builder::new("main");
    builder.mark_has_entry_point();
    builder.append_instruction(nop());
    builder.declare_literal(Literal::Label(label("nowhere")), ValueSize::Word);
    let linkage = link(&[builder.build().unwrap()]);

    let mut memory = Memory::new();
    linkage.program.initialize_memory(&mut memory);
    assert!(!memory.is_initialized(PROGRAM_BASE + 4));
  }

  #[test]
  fn module_too_large(){
    let mut big = Builder::new("big");
    for _ in 0..(PAGE_SIZE / INSTRUCTION_SIZE) {
      big.append_instruction(nop());
    }
    big.declare_literal(Literal::Int(0), ValueSize::Byte);
    let linkage = link(&[main_module(), big.build().unwrap(), library()]);

    let issues: Vec<LinkError> = linkage.diagnostics.iter().map(|d| d.issue.clone()).collect();
    assert_eq!(issues, vec![LinkError::ModuleTooLarge { module: "big".to_string() }]);
    // The other modules are still laid out.
    assert_eq!(linkage.program.page(2).unwrap().instructions.len(), 2);
    assert_eq!(
      linkage.program.page(1).unwrap().instructions.len() as u32,
      PAGE_SIZE / INSTRUCTION_SIZE
    );
  }

  #[test]
  fn traps_are_readable(){
    let linkage = link(&[main_module(), library()]);
    let program = &linkage.program;
    assert_eq!(
      program.read_instruction(OUTERMOST_RETURN).unwrap().instruction,
      Instruction::Trap(Trap::OutermostReturn)
    );
    assert_eq!(
      program.read_instruction(DEBUG_OUTPUT).unwrap().instruction,
      Instruction::Trap(Trap::DebugOutput)
    );
    assert!(program.read_instruction(PROGRAM_BASE + 4).is_none());
    assert!(program.read_instruction(PROGRAM_BASE + 2).is_none());
  }

  #[test]
  fn listing(){
    let mut main = Builder::new("main");
    main.mark_has_entry_point();
    main.declare_import("helper");
    main.attach_source_token(SourceToken::new(3, 5, 15));
    main.append_instruction(jump_to("helper"));
    main.declare_label("answer");
    main.declare_literal(Literal::Int(42), ValueSize::Word);
    let linkage = link(&[main.build().unwrap(), library()]);

    let listing = linkage.program.to_string();
    assert!(listing.contains("; main"));
    assert!(listing.contains("; library"));
    assert!(listing.contains("0x00400000"));
    assert!(listing.contains("mov xx, @helper"));
    assert!(listing.contains("3:5"));
    assert!(listing.contains("answer:"));
    assert!(listing.contains(".word 42"));
    assert!(listing.contains("0x00410004"));
    assert!(listing.contains("helper:"));
  }
}
