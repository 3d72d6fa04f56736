//! Symbols: labels, equates, imports.
//!
//! Keyed by name in a case-sensitive or case-insensitive global table (a
//! per-[`ParserContext`](crate::core::context::ParserContext) flag, spec.md
//! §3). Arena-indexed like [`Section`](crate::core::section::Section) /
//! [`Atom`](crate::core::atom::Atom): cross-references are [`SymbolId`]s,
//! not pointers — the same arena-by-index discipline the teacher crate
//! uses for `Abbreviation`/`BlockInfo` references.

use crate::core::expr::Expr;
use crate::core::section::SectionId;
use bitflags::bitflags;
use std::collections::HashMap;

/// Index into [`SymbolTable`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// A label bound to a section + offset, or an `EQU`/`SET` constant.
    LabSym,
    /// Declared but not defined in this translation unit (`XREF`, `EXTERN`).
    Import,
    /// An absolute expression symbol (e.g. an AOF `AOFSYM_ABS` symbol).
    Expression,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SymbolFlags: u32 {
        const EXPORT       = 1 << 0;
        const XREF         = 1 << 1;
        const XDEF         = 1 << 2;
        const WEAK         = 1 << 3;
        const NEAR         = 1 << 4;
        const LOCAL        = 1 << 5;
        const COMMON       = 1 << 6;
        const VASMINTERN   = 1 << 7;
        /// Value is mutable (`SET`/`SE`), as opposed to an immutable `EQU`.
        const MUTABLE      = 1 << 8;
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub flags: SymbolFlags,
    pub section: Option<SectionId>,
    pub expr: Option<Expr>,
    /// Resolved constant value, if known (section-relative offset for a
    /// `LabSym`, or the folded value for an `Expression`/equate).
    pub value: Option<i64>,
    pub size: Option<u32>,
    pub align: Option<u32>,
}

impl Symbol {
    fn new(name: String, kind: SymbolKind) -> Self {
        Self {
            name,
            kind,
            flags: SymbolFlags::empty(),
            section: None,
            expr: None,
            value: None,
            size: None,
            align: None,
        }
    }
}

/// The process-wide symbol table. `nocase` mirrors the dialect option of
/// the same name (spec.md §6); names are folded to lowercase internally
/// when set, the same trick a case-insensitive hash table would use.
#[derive(Debug, Default)]
pub struct SymbolTable {
    arena: Vec<Symbol>,
    by_name: HashMap<String, SymbolId>,
    pub nocase: bool,
}

impl SymbolTable {
    pub fn new(nocase: bool) -> Self {
        Self {
            arena: Vec::new(),
            by_name: HashMap::new(),
            nocase,
        }
    }

    fn key(&self, name: &str) -> String {
        if self.nocase {
            name.to_ascii_lowercase()
        } else {
            name.to_string()
        }
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(&self.key(name)).copied()
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.arena[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.arena[id.0 as usize]
    }

    /// Find-or-create: returns the existing symbol's id, or allocates a
    /// fresh one of `kind` with no binding yet.
    pub fn find_or_create(&mut self, name: &str, kind: SymbolKind) -> SymbolId {
        let key = self.key(name);
        if let Some(id) = self.by_name.get(&key) {
            return *id;
        }
        let id = SymbolId(self.arena.len() as u32);
        self.arena.push(Symbol::new(name.to_string(), kind));
        self.by_name.insert(key, id);
        id
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.arena
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nocase_folds_names() {
        let mut t = SymbolTable::new(true);
        let a = t.find_or_create("Foo", SymbolKind::LabSym);
        let b = t.find_or_create("FOO", SymbolKind::LabSym);
        assert_eq!(a, b);
    }

    #[test]
    fn case_sensitive_keeps_distinct() {
        let mut t = SymbolTable::new(false);
        let a = t.find_or_create("Foo", SymbolKind::LabSym);
        let b = t.find_or_create("foo", SymbolKind::LabSym);
        assert_ne!(a, b);
    }
}
