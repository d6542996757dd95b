// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Two-way interning of symbols (strings) to tuple-element identifiers.

use rustc_hash::FxHashMap;

use crate::domain::RamDomain;

/// Encodes symbols to dense identifiers and decodes them back. Identifiers
/// are handed out in first-seen order, starting at zero.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    by_name: FxHashMap<String, RamDomain>,
    by_id: Vec<String>,
}

impl SymbolTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table pre-seeded with the given symbols.
    #[must_use]
    pub fn with_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for s in symbols {
            table.encode(&s.into());
        }
        table
    }

    /// The number of interned symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no symbol has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Whether the symbol is already interned.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.by_name.contains_key(symbol)
    }

    /// The identifier of `symbol`, interning it on first sight.
    pub fn encode(&mut self, symbol: &str) -> RamDomain {
        self.find_or_insert(symbol).0
    }

    /// Like [`encode`](Self::encode), additionally reporting whether the
    /// symbol was newly interned.
    pub fn find_or_insert(&mut self, symbol: &str) -> (RamDomain, bool) {
        if let Some(&id) = self.by_name.get(symbol) {
            return (id, false);
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let id = self.by_id.len() as RamDomain;
        self.by_name.insert(symbol.to_owned(), id);
        self.by_id.push(symbol.to_owned());
        (id, true)
    }

    /// The identifier of `symbol`, if interned.
    #[must_use]
    pub fn lookup(&self, symbol: &str) -> Option<RamDomain> {
        self.by_name.get(symbol).copied()
    }

    /// The symbol behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was never handed out by this table.
    #[must_use]
    pub fn decode(&self, id: RamDomain) -> &str {
        self.try_decode(id).expect("unknown symbol id")
    }

    /// The symbol behind `id`, or `None` for foreign identifiers.
    #[must_use]
    pub fn try_decode(&self, id: RamDomain) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.by_id.get(i))
            .map(String::as_str)
    }

    /// Iterates over all `(symbol, id)` pairs in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, RamDomain)> {
        self.by_id.iter().enumerate().map(|(i, s)| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let id = i as RamDomain;
            (s.as_str(), id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interns_and_round_trips() {
        let mut table = SymbolTable::new();
        let a = table.encode("alice");
        let b = table.encode("bob");
        assert_ne!(a, b);
        assert_eq!(table.encode("alice"), a);
        assert_eq!(table.decode(a), "alice");
        assert_eq!(table.decode(b), "bob");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn find_or_insert_reports_novelty() {
        let mut table = SymbolTable::new();
        let (id, added) = table.find_or_insert("x");
        assert!(added);
        let (again, added) = table.find_or_insert("x");
        assert!(!added);
        assert_eq!(id, again);
    }

    #[test]
    fn lookup_and_decode_misses() {
        let table = SymbolTable::with_symbols(["a"]);
        assert!(table.lookup("b").is_none());
        assert!(table.try_decode(99).is_none());
        assert!(table.try_decode(-1).is_none());
    }

    #[test]
    fn iterates_in_id_order() {
        let table = SymbolTable::with_symbols(["x", "y", "z"]);
        let pairs: Vec<_> = table.iter().collect();
        assert_eq!(pairs, vec![("x", 0), ("y", 1), ("z", 2)]);
    }
}
