//! Atoms: the elements a section's content is built from (spec.md §3).
//!
//! Atoms are strictly appended and never reordered after emission; the
//! back end may later mutate them in place during alignment/fixup
//! (out of scope here, but the shape is kept faithful to that contract).

use crate::core::expr::Expr;
use crate::core::symbol::SymbolId;
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SpaceFlags: u32 {
        /// Section is uninitialized (BSS-like); the space atom reserves
        /// room but carries no fill bytes in the output.
        const UNINITIALIZED = 1 << 0;
    }
}

/// A format string + width pair for `EXPR_PRINT` (`.ECHO`/`PRINTV`-style
/// directives that print an evaluated expression).
#[derive(Debug, Clone, PartialEq)]
pub struct PrintSpec {
    pub format: char,
    pub width: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AtomKind {
    /// Raw bytes, padded/aligned per the atom's `align` field.
    Data(Vec<u8>),
    /// `count` elements of `elemsize` bytes, filled with `fill` (0 if
    /// the section is uninitialized and no explicit fill was given).
    Space {
        count: u32,
        elemsize: u8,
        fill: u8,
        flags: SpaceFlags,
    },
    /// A data-definition: one value of `bitsize` bits, evaluated lazily.
    DataDef { bitsize: u8, expr: Expr },
    /// Binds a symbol to the current section offset.
    Label(SymbolId),
    /// An instruction, with the encoder (external collaborator) not yet
    /// invoked: mnemonic + raw qualifier/operand text is all this atom
    /// carries.
    Instruction {
        mnemonic: String,
        qualifiers: Vec<String>,
        operands: String,
    },
    /// Reserve-to-offset: fill up to `expr` with `fill` bytes.
    Roffs { expr: Expr, fill: u8 },
    /// A compile-time assertion; `text` is the user-facing expression
    /// source for diagnostics.
    Assert { expr: Expr, text: String, message: Option<String> },
    /// Marks which source line subsequent atoms originated from
    /// (listing support — kept as a no-op marker atom here).
    SrcLine(u32),
    /// Arbitrary printed text (`ECHO`/`PRINTT`).
    Text(String),
    /// Prints an evaluated expression (`PRINTV`).
    ExprPrint(Expr, PrintSpec),
    /// Debug marker atom (parity with the teacher format's `VASMDEBUG`);
    /// carries no payload.
    DebugMarker,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub kind: AtomKind,
    /// Minimum alignment this atom requires, in bytes. Always >= 1.
    pub align: u32,
    pub file: String,
    pub line: u32,
}

impl Atom {
    pub fn new(kind: AtomKind, align: u32, file: impl Into<String>, line: u32) -> Self {
        debug_assert!(align >= 1);
        Self {
            kind,
            align: align.max(1),
            file: file.into(),
            line,
        }
    }

    /// Byte size of this atom's payload given the program counter `pc`
    /// *before* this atom's own alignment padding is applied. The
    /// returned size *includes* that alignment padding, matching the
    /// teacher's contract that "size_after_align" sums to `pc - org`.
    pub fn size_after_align(&self, pc: u32) -> u32 {
        let padding = align_padding(pc, self.align);
        padding + self.raw_size()
    }

    fn raw_size(&self) -> u32 {
        match &self.kind {
            AtomKind::Data(bytes) => bytes.len() as u32,
            AtomKind::Space { count, elemsize, .. } => count * u32::from(*elemsize),
            AtomKind::DataDef { bitsize, .. } => (u32::from(*bitsize) + 7) / 8,
            AtomKind::Label(_) => 0,
            AtomKind::Instruction { .. } => 0, // sized by the (external) encoder
            AtomKind::Roffs { .. } => 0,       // resolved against a target offset later
            AtomKind::Assert { .. } => 0,
            AtomKind::SrcLine(_) => 0,
            AtomKind::Text(_) => 0,
            AtomKind::ExprPrint(..) => 0,
            AtomKind::DebugMarker => 0,
        }
    }
}

pub fn align_padding(pc: u32, align: u32) -> u32 {
    if align <= 1 {
        0
    } else {
        let rem = pc % align;
        if rem == 0 {
            0
        } else {
            align - rem
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_padding_rounds_up() {
        assert_eq!(align_padding(5, 4), 3);
        assert_eq!(align_padding(8, 4), 0);
        assert_eq!(align_padding(1, 1), 0);
    }

    #[test]
    fn data_atom_size_includes_padding() {
        let a = Atom::new(AtomKind::Data(vec![1, 2, 3]), 4, "x.s", 1);
        assert_eq!(a.size_after_align(1), 3 + 3);
    }
}
