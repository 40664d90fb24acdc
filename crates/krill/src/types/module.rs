//! Module objects: a flat namespace of named top-level variables.
//!
//! Variable names and values are two parallel insertion-ordered sequences.
//! A variable referenced before its definition is *forward-declared*: the
//! slot records the line of the first reference, and defining the variable
//! later overwrites the slot in place, so bytecode that already embeds the
//! index stays valid.

use crate::{intern::SymbolTable, value::Value};

/// A module-variable slot.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ModuleVar {
    /// The variable has a definition (at compile time the placeholder value
    /// is `Null`; the emitted code stores the real value when it runs).
    Defined(Value),
    /// Referenced but not yet defined; `line` is where the first reference
    /// happened, for the end-of-module diagnostic.
    ForwardDeclared { line: u32 },
}

/// A module: an optional name (the core module has none) plus the parallel
/// name/value sequences.
#[derive(Debug)]
pub struct ObjModule {
    name: Option<String>,
    var_names: SymbolTable,
    var_values: Vec<ModuleVar>,
}

impl ObjModule {
    #[must_use]
    pub fn new(name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_owned),
            var_names: SymbolTable::new(),
            var_values: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn var_count(&self) -> usize {
        self.var_values.len()
    }

    #[must_use]
    pub fn var_name(&self, index: u32) -> &str {
        self.var_names.name(index)
    }

    #[must_use]
    pub fn var_value(&self, index: u32) -> ModuleVar {
        self.var_values[index as usize]
    }

    pub fn set_var_value(&mut self, index: u32, value: Value) {
        self.var_values[index as usize] = ModuleVar::Defined(value);
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.var_names.index_of(name)
    }

    /// Defines `name`:
    /// - absent → appended, new index returned;
    /// - forward-declared → slot resolved in place, index returned;
    /// - already defined → `None` (redefinition).
    pub fn define_var(&mut self, name: &str, value: Value) -> Option<u32> {
        match self.var_names.index_of(name) {
            None => {
                let index = self.var_names.add(name);
                self.var_values.push(ModuleVar::Defined(value));
                Some(index)
            }
            Some(index) => match self.var_values[index as usize] {
                ModuleVar::ForwardDeclared { .. } => {
                    self.var_values[index as usize] = ModuleVar::Defined(value);
                    Some(index)
                }
                ModuleVar::Defined(_) => None,
            },
        }
    }

    /// Returns the index of `name`, forward-declaring it at `line` if the
    /// module has never seen it.
    pub fn declare_var(&mut self, name: &str, line: u32) -> u32 {
        match self.var_names.index_of(name) {
            Some(index) => index,
            None => {
                let index = self.var_names.add(name);
                self.var_values.push(ModuleVar::ForwardDeclared { line });
                index
            }
        }
    }

    /// The names and lines of every variable still forward-declared; used by
    /// the module loader's end-of-compile check.
    #[must_use]
    pub fn undefined_vars(&self) -> Vec<(&str, u32)> {
        self.var_values
            .iter()
            .enumerate()
            .filter_map(|(i, var)| match var {
                ModuleVar::ForwardDeclared { line } => Some((self.var_names.name(i as u32), *line)),
                ModuleVar::Defined(_) => None,
            })
            .collect()
    }
}
