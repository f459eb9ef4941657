//! Value-ordered index of `(value, row)` entries.
//!
//! Entries are kept sorted by value. Equal values keep insertion order: a new
//! entry always lands after every entry with the same value.

use std::cmp::Ordering;

use emberdb_types::{RowIndex, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    pub value: Value,
    pub row: RowIndex,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct OrderedIndex {
    entries: Vec<IndexEntry>,
}

impl OrderedIndex {
    /// Index the output of a table scan given in row order.
    ///
    /// A stable sort gives the same layout as inserting each entry in turn.
    pub fn from_scan(mut entries: Vec<IndexEntry>) -> Self {
        entries.sort_by(|a, b| a.value.cmp(&b.value));
        Self { entries }
    }

    /// Keep `entries` as given, sorted or not.
    #[cfg(test)]
    pub fn from_entries_unchecked(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, pos: usize) -> Option<&IndexEntry> {
        self.entries.get(pos)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IndexEntry> {
        self.entries.iter()
    }

    /// Position of the first entry not less than `value`.
    pub fn first_position(&self, value: &Value) -> usize {
        self.entries.partition_point(|e| e.value < *value)
    }

    /// Position just past the last entry equal to `value`.
    pub fn last_position(&self, value: &Value) -> usize {
        self.entries.partition_point(|e| e.value <= *value)
    }

    /// Insert after any equal values and return the new entry's position.
    pub fn insert_after_equals(&mut self, value: Value, row: RowIndex) -> usize {
        let pos = self.last_position(&value);
        self.entries.insert(pos, IndexEntry { value, row });
        pos
    }

    /// Locate `row`, looking among entries equal to `value` first.
    pub fn position_of(&self, value: &Value, row: RowIndex) -> Option<usize> {
        let lo = self.first_position(value);
        let hi = self.last_position(value);
        self.entries[lo..hi]
            .iter()
            .position(|e| e.row == row)
            .map(|offset| lo + offset)
            .or_else(|| self.position_of_row(row))
    }

    /// Full scan for `row`.
    pub fn position_of_row(&self, row: RowIndex) -> Option<usize> {
        self.entries.iter().position(|e| e.row == row)
    }

    pub fn remove_at(&mut self, pos: usize) -> IndexEntry {
        self.entries.remove(pos)
    }

    /// Compare the entry at `pos` with `value`.
    pub fn compare_at(&self, pos: usize, value: &Value) -> Option<Ordering> {
        self.entries.get(pos).map(|e| e.value.cmp(value))
    }
}
