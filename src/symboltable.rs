use std::collections::{BTreeMap, HashMap};

use crate::address::Address;
use crate::label::Label;

/**
  A symbol table maps labels to their absolute address. The linker keeps one per page for the
  page's local labels and one global table for exports.

  Several labels may share an address, so this is not a bijection. The reverse index keeps every
  address's labels sorted by name.
*/
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
  table   : HashMap<Label, Address>,
  reverse : BTreeMap<Address, Vec<Label>>,
}

impl SymbolTable {

  pub fn new() -> SymbolTable {
    SymbolTable {
      table   : HashMap::new(),
      reverse : BTreeMap::new(),
    }
  }

  pub fn get_address(&self, label: &Label) -> Option<Address> {
    self.table.get(label).copied()
  }

  /// All labels bound to `address`, sorted by name.
  pub fn labels_at(&self, address: Address) -> Vec<Label> {
    self.reverse.get(&address).cloned().unwrap_or_default()
  }

  pub fn contains(&self, label: &Label) -> bool {
    self.table.contains_key(label)
  }

  /// Inserts the binding unless the label is already bound, in which case the existing address
  /// is returned as the error.
  pub fn insert(&mut self, label: Label, address: Address) -> Result<(), Address> {
    match self.table.get(&label) {
      Some(existing) => Err(*existing),
      None => {
        let aliases = self.reverse.entry(address).or_insert_with(Vec::new);
        let position =
          aliases
            .binary_search_by(|existing| (**existing).cmp(&*label))
            .unwrap_or_else(|position| position);
        aliases.insert(position, label.clone());
        self.table.insert(label, address);
        Ok(())
      }
    }
  }

  pub fn len(&self) -> usize {
    self.table.len()
  }

  pub fn is_empty(&self) -> bool {
    self.table.is_empty()
  }
}
