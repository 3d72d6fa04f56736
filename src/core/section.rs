//! Sections: named byte streams with atoms appended in source order
//! (spec.md §3). Sections are arena-indexed and also form a linked list
//! in creation order via `next`, mirroring the original `section->next`
//! chain the AOF/`/CMD` writers walk.

use crate::core::atom::{align_padding, Atom};
use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionId(pub u32);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        const ABSOLUTE          = 1 << 0;
        const IN_RORG           = 1 << 1;
        const LABELS_ARE_LOCAL  = 1 << 2;
        const NEAR_ADDRESSING   = 1 << 3;
        const FAR_ADDRESSING    = 1 << 4;
        /// Not part of the final image (a DSECT/offset section).
        const UNALLOCATED       = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Code,
    Data,
    Bss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionAttrs {
    pub kind: MemoryKind,
    pub readable: bool,
    pub writable: bool,
    /// `true` for BSS/uninitialized sections: no data payload in output.
    pub uninitialized: bool,
}

impl Default for SectionAttrs {
    fn default() -> Self {
        Self {
            kind: MemoryKind::Code,
            readable: true,
            writable: false,
            uninitialized: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub attrs: SectionAttrs,
    pub flags: SectionFlags,
    pub align: u32,
    pub memtype: Option<String>,
    pub org: u32,
    pub pc: u32,
    pub atoms: Vec<Atom>,
    pub next: Option<SectionId>,
}

impl Section {
    fn new(name: String, attrs: SectionAttrs, org: u32) -> Self {
        Self {
            name,
            attrs,
            flags: SectionFlags::empty(),
            align: 1,
            memtype: None,
            org,
            pc: org,
            atoms: Vec::new(),
            next: None,
        }
    }

    /// Appends an atom and advances `pc` by its aligned size — the
    /// invariant spec.md §3/§8 requires: `sum(size_after_align) == pc - org`.
    pub fn append(&mut self, atom: Atom) {
        self.pc += atom.size_after_align(self.pc);
        self.atoms.push(atom);
    }

    /// Recomputes `pc` from `org` and the atom list; used by tests to
    /// check the invariant independently of incremental `append` bookkeeping.
    pub fn recomputed_pc(&self) -> u32 {
        let mut pc = self.org;
        for a in &self.atoms {
            pc += a.size_after_align(pc);
        }
        pc
    }

    pub fn size(&self) -> u32 {
        self.pc - self.org
    }

    pub fn is_empty_of_content(&self) -> bool {
        self.pc == self.org
    }
}

#[derive(Debug, Default)]
pub struct SectionTable {
    arena: Vec<Section>,
    first: Option<SectionId>,
    last: Option<SectionId>,
    current: Option<SectionId>,
}

impl SectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: SectionId) -> &Section {
        &self.arena[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SectionId) -> &mut Section {
        &mut self.arena[id.0 as usize]
    }

    pub fn current(&self) -> Option<SectionId> {
        self.current
    }

    pub fn set_current(&mut self, id: SectionId) {
        self.current = Some(id);
    }

    pub fn find_by_name(&self, name: &str) -> Option<SectionId> {
        self.arena
            .iter()
            .enumerate()
            .find(|(_, s)| s.name == name)
            .map(|(i, _)| SectionId(i as u32))
    }

    /// Creates a new section and links it at the tail of the
    /// creation-order chain, making it current.
    pub fn new_section(&mut self, name: &str, attrs: SectionAttrs, org: u32) -> SectionId {
        let id = SectionId(self.arena.len() as u32);
        self.arena.push(Section::new(name.to_string(), attrs, org));
        if let Some(last) = self.last {
            self.get_mut(last).next = Some(id);
        } else {
            self.first = Some(id);
        }
        self.last = Some(id);
        self.current = Some(id);
        id
    }

    pub fn first(&self) -> Option<SectionId> {
        self.first
    }

    /// Iterates sections in creation order (the `next` chain, not arena
    /// order — the two coincide today but the chain is authoritative).
    pub fn iter_in_order(&self) -> impl Iterator<Item = SectionId> + '_ {
        let mut cur = self.first;
        std::iter::from_fn(move || {
            let id = cur?;
            cur = self.get(id).next;
            Some(id)
        })
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

/// Checks `size_after_align` sums correctly for every section — the
/// core invariant of spec.md §8.
pub fn check_section_invariant(sections: &SectionTable) -> Result<(), String> {
    for id in sections.iter_in_order() {
        let sec = sections.get(id);
        let recomputed = sec.recomputed_pc();
        if recomputed != sec.pc {
            return Err(format!(
                "section `{}`: pc {} does not match recomputed {} (org {})",
                sec.name, sec.pc, recomputed, sec.org
            ));
        }
    }
    Ok(())
}

/// Detects overlapping sections by absolute address range — used by both
/// the invariant checker and the `/CMD` writer (spec.md §4.13, "the
/// shared section-overlap check").
pub fn find_overlap(sections: &SectionTable) -> Option<(SectionId, SectionId)> {
    let mut ranges: Vec<(SectionId, u32, u32)> = sections
        .iter_in_order()
        .map(|id| {
            let s = sections.get(id);
            (id, s.org, s.pc)
        })
        .filter(|(_, org, pc)| org != pc)
        .collect();
    ranges.sort_by_key(|&(_, org, _)| org);
    for w in ranges.windows(2) {
        let (a_id, _, a_end) = w[0];
        let (b_id, b_start, _) = w[1];
        if b_start < a_end {
            return Some((a_id, b_id));
        }
    }
    None
}
