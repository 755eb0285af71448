//! Symbol interning over the bucket map.
//!
//! The compiler's symbol tables intern identifier strings once and pass
//! 32-bit [`Symbol`]s around. The table owns the strings; the
//! [`BucketMap`] holds only tags and indices into it.

use std::fmt;
use std::hash::BuildHasher;

use rustc_hash::FxBuildHasher;

use crate::map::BucketMap;

/// An interned string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    /// Raw index into the owning table.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A string interner.
#[derive(Default)]
pub struct SymbolTable {
    map: BucketMap,
    names: Vec<Box<str>>,
    hasher: FxBuildHasher,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of interned symbols.
    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Intern `name`, returning the same symbol for equal strings.
    pub fn intern(&mut self, name: &str) -> Symbol {
        let hash = self.hasher.hash_one(name);
        let names = &self.names;
        if let Some(index) = self.map.find(hash, |i| &*names[i as usize] == name) {
            return Symbol(index);
        }

        let index = self.names.len() as u32;
        self.names.push(name.into());

        if self.map.needs_grow() {
            let (map, names, hasher) = (&mut self.map, &self.names, &self.hasher);
            map.grow(|i| hasher.hash_one(&*names[i as usize]));
        }
        self.map.insert(hash, index);
        Symbol(index)
    }

    /// Look up a symbol without interning.
    pub fn get(&self, name: &str) -> Option<Symbol> {
        let hash = self.hasher.hash_one(name);
        self.map
            .find(hash, |i| &*self.names[i as usize] == name)
            .map(Symbol)
    }

    /// The string behind a symbol.
    #[inline]
    pub fn resolve(&self, symbol: Symbol) -> &str {
        &self.names[symbol.0 as usize]
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolTable")
            .field("symbols", &self.names.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_deduplicates() {
        let mut table = SymbolTable::new();
        let a = table.intern("alloc");
        let b = table.intern("free");
        let a2 = table.intern("alloc");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve(a), "alloc");
        assert_eq!(table.resolve(b), "free");
    }

    #[test]
    fn test_get_does_not_intern() {
        let mut table = SymbolTable::new();
        assert!(table.get("missing").is_none());
        let s = table.intern("present");
        assert_eq!(table.get("present"), Some(s));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_interning_many_symbols_grows() {
        let mut table = SymbolTable::new();
        let symbols: Vec<_> = (0..2000).map(|i| table.intern(&format!("sym_{i}"))).collect();

        for (i, &s) in symbols.iter().enumerate() {
            assert_eq!(table.resolve(s), format!("sym_{i}"));
            assert_eq!(table.intern(&format!("sym_{i}")), s);
        }
        assert_eq!(table.len(), 2000);
    }

    #[test]
    fn test_empty_string_interns() {
        let mut table = SymbolTable::new();
        let e = table.intern("");
        assert_eq!(table.resolve(e), "");
        assert_eq!(table.intern(""), e);
    }
}
