//! Insertion-ordered symbol tables.
//!
//! A symbol table maps strings to dense `u32` indices. Indices are handed
//! out in insertion order and are permanent: the table is append-only, so an
//! index may be embedded in bytecode without fear of invalidation. The VM
//! owns one global table interning canonical method signatures; every module
//! owns one for its variable names; every class body uses one for its
//! fields.

use ahash::AHashMap;

/// An insertion-ordered set of strings with index lookup.
///
/// `add` appends unconditionally (no duplicate check) to mirror the
/// module-variable tables, which may intentionally carry a name before its
/// definition resolves; the reverse index always points at the first
/// occurrence.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    names: Vec<String>,
    index: AHashMap<String, u32>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of the first occurrence of `name`, if present.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.index.get(name).copied()
    }

    /// Appends `name` and returns its index. No duplicate check.
    pub fn add(&mut self, name: &str) -> u32 {
        let index = u32::try_from(self.names.len()).expect("symbol table exceeds u32 indices");
        self.names.push(name.to_owned());
        self.index.entry(name.to_owned()).or_insert(index);
        index
    }

    /// Returns the index of `name`, adding it first if absent.
    pub fn ensure(&mut self, name: &str) -> u32 {
        match self.index_of(name) {
            Some(index) => index,
            None => self.add(name),
        }
    }

    /// The name at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` was never handed out by this table.
    #[must_use]
    pub fn name(&self, index: u32) -> &str {
        &self.names[index as usize]
    }

    /// Iterates names in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_insertion_order() {
        let mut table = SymbolTable::new();
        assert_eq!(table.add("a"), 0);
        assert_eq!(table.add("b"), 1);
        assert_eq!(table.index_of("a"), Some(0));
        assert_eq!(table.index_of("c"), None);
        assert_eq!(table.ensure("b"), 1);
        assert_eq!(table.ensure("c"), 2);
        assert_eq!(table.name(2), "c");
    }

    #[test]
    fn add_permits_duplicates_but_lookup_finds_first() {
        let mut table = SymbolTable::new();
        assert_eq!(table.add("x"), 0);
        assert_eq!(table.add("x"), 1);
        assert_eq!(table.index_of("x"), Some(0));
        assert_eq!(table.len(), 2);
    }
}
