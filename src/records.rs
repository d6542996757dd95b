// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Packing of value vectors (records) into single identifiers.
//!
//! Identifiers are handed out from one shared space regardless of arity, so
//! a record reference can be inverted without carrying its arity alongside;
//! the arity-checked [`unpack`](RecordTable::unpack) is the strict variant.
//! Identifier 0 is reserved for the nil record.

use rustc_hash::FxHashMap;

use crate::domain::RamDomain;

/// The identifier of the nil record.
pub const NIL_RECORD: RamDomain = 0;

/// Maps records to identifiers and back.
#[derive(Debug, Default, Clone)]
pub struct RecordTable {
    by_value: FxHashMap<Vec<RamDomain>, RamDomain>,
    by_id: Vec<Vec<RamDomain>>,
}

impl RecordTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The identifier of the given record, registering it on first sight.
    pub fn pack(&mut self, values: &[RamDomain]) -> RamDomain {
        if let Some(&id) = self.by_value.get(values) {
            return id;
        }
        // id 0 stays nil
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let id = (self.by_id.len() + 1) as RamDomain;
        self.by_value.insert(values.to_vec(), id);
        self.by_id.push(values.to_vec());
        id
    }

    /// The record behind `id`, required to have the given arity. `None` for
    /// nil, foreign identifiers and arity mismatches.
    #[must_use]
    pub fn unpack(&self, id: RamDomain, arity: usize) -> Option<&[RamDomain]> {
        self.unpack_any(id).filter(|values| values.len() == arity)
    }

    /// The record behind `id` at whatever arity it was packed with.
    #[must_use]
    pub fn unpack_any(&self, id: RamDomain) -> Option<&[RamDomain]> {
        if id == NIL_RECORD {
            return None;
        }
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        self.by_id.get(idx).map(Vec::as_slice)
    }

    /// The number of registered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no record has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks() {
        let mut table = RecordTable::new();
        let id = table.pack(&[1, 2, 3]);
        assert_ne!(id, NIL_RECORD);
        assert_eq!(table.unpack(id, 3), Some(&[1, 2, 3][..]));
        assert_eq!(table.unpack(id, 2), None);
        assert_eq!(table.unpack_any(id), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn deduplicates() {
        let mut table = RecordTable::new();
        let a = table.pack(&[5, 6]);
        let b = table.pack(&[5, 6]);
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn nested_records_pack_by_reference() {
        let mut table = RecordTable::new();
        let inner = table.pack(&[1, 2]);
        let outer = table.pack(&[inner, 9]);
        let values = table.unpack_any(outer).unwrap().to_vec();
        assert_eq!(table.unpack_any(values[0]), Some(&[1, 2][..]));
    }

    #[test]
    fn nil_is_reserved() {
        let table = RecordTable::new();
        assert!(table.unpack_any(NIL_RECORD).is_none());
        assert!(table.unpack(NIL_RECORD, 2).is_none());
    }
}
