//! `ParserContext`: the single value every dialect's directive handlers
//! thread through, gathering what the original implementation held as
//! process-wide globals (spec.md §9 Design Notes: "gather them into a
//! single `ParserContext` value ... this also makes per-translation-unit
//! isolation easy to test").

use crate::cond::CondStack;
use crate::config::DialectOptions;
use crate::core::atom::{Atom, AtomKind};
use crate::core::section::{SectionAttrs, SectionId, SectionTable};
use crate::core::symbol::{SymbolFlags, SymbolId, SymbolKind, SymbolTable};
use crate::error::Diagnostic;
use crate::macros::{MacroDef, MacroTable, UniqueIdAllocator};
use crate::repeat::RepeatSpec;
use crate::source::SourceStack;

/// 65816 operand-size tracking (spec.md §4.10). `true` means 8-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode816 {
    pub a8: bool,
    pub xy8: bool,
}

impl Default for Mode816 {
    fn default() -> Self {
        Self { a8: true, xy8: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CpuLevel {
    Mos6502,
    Wdc65c02,
    Wdc65816,
}

/// A saved dummy-section (`DSECT`/`DUM`) frame: the section to restore
/// and the offset counter that was in effect (spec.md §4.11).
#[derive(Debug, Clone)]
pub struct DsectFrame {
    pub saved_section: SectionId,
    pub offset: u32,
}

/// Maximum conditional-stack depth (spec.md §3: "bounded by a constant,
/// e.g. 256").
pub const MAX_COND_DEPTH: usize = 256;

/// An in-progress `MACRO`...`ENDM`-family capture: lines are recorded
/// verbatim until the dialect's terminator set matches (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct MacroCapture {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<String>,
    pub start_file: String,
    pub start_line: u32,
}

/// An in-progress `REPT`...`ENDR`-family capture (spec.md §4.8).
#[derive(Debug, Clone)]
pub struct RepeatCapture {
    pub spec: RepeatSpec,
    pub body: Vec<String>,
}

/// Placeholder for the out-of-scope instruction table: the label-field
/// parser only needs to know *whether* a token is a mnemonic, to
/// disambiguate "label vs. instruction" at line start (spec.md §4.3).
pub trait InstructionTable {
    fn is_mnemonic(&self, name: &str) -> bool;
}

/// An instruction table that recognizes nothing — used by dialects/tests
/// that don't need real mnemonic disambiguation.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyInstructionTable;

impl InstructionTable for EmptyInstructionTable {
    fn is_mnemonic(&self, _name: &str) -> bool {
        false
    }
}

pub struct ParserContext {
    pub options: DialectOptions,
    pub symtab: SymbolTable,
    pub sections: SectionTable,
    pub diagnostics: Vec<Diagnostic>,

    /// Current source file name and line, updated by the source stack as
    /// lines are fetched; every emitted atom/diagnostic is stamped with
    /// this.
    pub cur_file: String,
    pub cur_line: u32,

    /// Anonymous-label monotonic counter (`:` forward/back references).
    pub anon_counter: u32,
    /// Name of the most recently defined global label, for EDTASM/Merlin
    /// local-label scoping and SCASM's `.N` locals.
    pub last_global_label: Option<String>,
    /// SCASM private-label context: increments on every new global label
    /// and every macro invocation (spec.md §4.3).
    pub scasm_private_context: u32,

    /// Bounded stack of integer IDs used to synthesize unique prefixes
    /// for "inline" blocks (spec.md §3).
    pub inline_scope_stack: Vec<u32>,
    next_inline_id: u32,

    pub mode816: Mode816,
    pub cpu_level: CpuLevel,

    pub dsect_stack: Vec<DsectFrame>,

    /// Merlin metadata directives that don't affect codegen (SPEC_FULL §4.14).
    pub merlin_metadata: crate::dialect::merlin::MerlinMetadata,
    /// Merlin `]NAME` variable-label bookkeeping (spec.md §4.3, §4.5).
    pub merlin_varlabels: crate::dialect::merlin::VarLabelTable,
    /// SCASM `.AC` nibble-compression state, persists across calls
    /// within a translation unit (spec.md §4.6).
    pub scasm_ac: crate::dialect::scasm::AcState,

    /// Conditional-assembly stack driving the skip-scanner (spec.md §4.9).
    pub cond: CondStack,
    /// Recorded macro bodies (spec.md §4.7).
    pub macros: MacroTable,
    /// Active file/macro/repeat frames (spec.md §4.1).
    pub source: SourceStack,
    /// `\@`/`]0` unique-id source, one counter per translation unit.
    pub unique_ids: UniqueIdAllocator,
    pub macro_capture: Option<MacroCapture>,
    pub repeat_capture: Option<RepeatCapture>,

    had_error: bool,
    had_fatal: bool,
}

impl ParserContext {
    pub fn new(options: DialectOptions) -> Self {
        let nocase = options.nocase;
        Self {
            options,
            symtab: SymbolTable::new(nocase),
            sections: SectionTable::new(),
            diagnostics: Vec::new(),
            cur_file: String::new(),
            cur_line: 0,
            anon_counter: 0,
            last_global_label: None,
            scasm_private_context: 0,
            inline_scope_stack: Vec::new(),
            next_inline_id: 0,
            mode816: Mode816::default(),
            cpu_level: CpuLevel::Mos6502,
            dsect_stack: Vec::new(),
            merlin_metadata: crate::dialect::merlin::MerlinMetadata::default(),
            merlin_varlabels: crate::dialect::merlin::VarLabelTable::new(),
            scasm_ac: crate::dialect::scasm::AcState::new(),
            cond: CondStack::new(),
            macros: MacroTable::new(nocase),
            source: SourceStack::new(),
            unique_ids: UniqueIdAllocator::default(),
            macro_capture: None,
            repeat_capture: None,
            had_error: false,
            had_fatal: false,
        }
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::warning(self.cur_file.clone(), self.cur_line, message));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.had_error = true;
        self.diagnostics
            .push(Diagnostic::error(self.cur_file.clone(), self.cur_line, message));
    }

    pub fn fatal(&mut self, message: impl Into<String>) {
        self.had_error = true;
        self.had_fatal = true;
        self.diagnostics
            .push(Diagnostic::fatal(self.cur_file.clone(), self.cur_line, message));
    }

    pub fn had_error(&self) -> bool {
        self.had_error
    }

    pub fn had_fatal(&self) -> bool {
        self.had_fatal
    }

    /// `new_section`: finds or creates a section by name (external
    /// collaborator in the original; a thin real implementation here).
    pub fn new_section(&mut self, name: &str, attrs: SectionAttrs, org: u32) -> SectionId {
        if let Some(id) = self.sections.find_by_name(name) {
            self.sections.set_current(id);
            return id;
        }
        self.sections.new_section(name, attrs, org)
    }

    pub fn set_section(&mut self, id: SectionId) {
        self.sections.set_current(id);
    }

    pub fn current_section(&mut self) -> SectionId {
        if let Some(id) = self.sections.current() {
            return id;
        }
        self.new_section("text", SectionAttrs::default(), 0)
    }

    /// The active program counter: the dummy-section offset counter when
    /// `DUM`/`DSECT` is open (spec.md §4.11), otherwise the current
    /// section's real `pc`.
    pub fn current_pc(&mut self) -> u32 {
        if let Some(frame) = self.dsect_stack.last() {
            return frame.offset;
        }
        let id = self.current_section();
        self.sections.get(id).pc
    }

    /// `add_atom`: appends to the current section, stamping file/line.
    /// Inside a dummy section this only advances the offset counter by
    /// the atom's size — dummy-section content is never placed in the
    /// saved section (spec.md §4.11).
    pub fn add_atom(&mut self, kind: AtomKind, align: u32) {
        if let Some(frame) = self.dsect_stack.last_mut() {
            frame.offset += dsect_atom_size(&kind);
            return;
        }
        let file = self.cur_file.clone();
        let line = self.cur_line;
        let id = self.current_section();
        self.sections
            .get_mut(id)
            .append(Atom::new(kind, align, file, line));
    }

    /// `new_labsym`: binds `name` to the current section + offset, or
    /// (inside `DUM`/`DSECT`) to the dummy offset counter with no
    /// section at all.
    pub fn new_labsym(&mut self, name: &str) -> SymbolId {
        if let Some(frame) = self.dsect_stack.last() {
            let pc = frame.offset;
            let id = self.symtab.find_or_create(name, SymbolKind::LabSym);
            let sym = self.symtab.get_mut(id);
            sym.section = None;
            sym.value = Some(pc as i64);
            self.last_global_label = Some(name.to_string());
            self.scasm_private_context += 1;
            return id;
        }
        let sec = self.current_section();
        let pc = self.sections.get(sec).pc;
        let id = self.symtab.find_or_create(name, SymbolKind::LabSym);
        {
            let sym = self.symtab.get_mut(id);
            sym.section = Some(sec);
            sym.value = Some(pc as i64);
        }
        self.add_atom(AtomKind::Label(id), 1);
        self.last_global_label = Some(name.to_string());
        self.scasm_private_context += 1;
        id
    }

    /// Records a completed macro definition, reporting a redefinition
    /// as an error rather than panicking.
    pub fn define_macro(&mut self, def: MacroDef) {
        if let Err(e) = self.macros.define(def) {
            self.error(e.to_string());
        }
    }

    /// Pushes a fresh inline-scope id, returning it for use as a label
    /// prefix.
    pub fn push_inline_scope(&mut self) -> u32 {
        let id = self.next_inline_id;
        self.next_inline_id += 1;
        self.inline_scope_stack.push(id);
        id
    }

    pub fn pop_inline_scope(&mut self) {
        self.inline_scope_stack.pop();
    }

    /// Resolves a symbol to a constant value, if possible, using the
    /// current section's `pc` for `Expr::CurrentPc`.
    pub fn eval_const(&self, e: &crate::core::expr::Expr) -> Result<i64, crate::core::expr::ExprError> {
        let pc = self
            .sections
            .current()
            .map(|id| self.sections.get(id).pc as i64)
            .unwrap_or(0);
        e.eval(pc, &|id| self.symtab.get(id).value)
    }
}

/// Byte size an atom would occupy, for dummy-section offset tracking
/// (spec.md §4.11) — only the data-bearing kinds a directive handler
/// would ever emit while `DUM`/`DSECT` is open matter here.
fn dsect_atom_size(kind: &AtomKind) -> u32 {
    match kind {
        AtomKind::Data(bytes) => bytes.len() as u32,
        AtomKind::Space { count, elemsize, .. } => count * u32::from(*elemsize),
        AtomKind::DataDef { bitsize, .. } => (u32::from(*bitsize) + 7) / 8,
        _ => 0,
    }
}

/// A symbol-flags helper used by the binding handlers (`EQU`/`SET`/`XDEF`
/// etc.) to enforce the monotonic-kind invariant of spec.md §3: "a
/// `WEAK|EXPORT|LOCAL` choice is monotonic — rebinding to a different
/// kind fails."
pub fn bind_flag_monotonic(existing: SymbolFlags, new_flag: SymbolFlags) -> Result<SymbolFlags, String> {
    let exclusive = SymbolFlags::WEAK | SymbolFlags::EXPORT | SymbolFlags::LOCAL;
    let existing_choice = existing & exclusive;
    let new_choice = new_flag & exclusive;
    if !existing_choice.is_empty() && !new_choice.is_empty() && existing_choice != new_choice {
        return Err(format!(
            "binding already set to {:?}, cannot rebind to {:?}",
            existing_choice, new_choice
        ));
    }
    Ok(existing | new_flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::Expr;

    #[test]
    fn equate_then_reference_yields_value() {
        let mut ctx = ParserContext::new(DialectOptions::default());
        ctx.new_section("code", SectionAttrs::default(), 0);
        let id = ctx.symtab.find_or_create("X", SymbolKind::LabSym);
        ctx.symtab.get_mut(id).expr = Some(Expr::num(5));
        ctx.symtab.get_mut(id).value = Some(5);
        let e = Expr::sym(id);
        assert_eq!(ctx.eval_const(&e).unwrap(), 5);
    }

    #[test]
    fn monotonic_binding_rejects_conflict() {
        let r = bind_flag_monotonic(SymbolFlags::WEAK, SymbolFlags::EXPORT);
        assert!(r.is_err());
    }

    #[test]
    fn monotonic_binding_allows_same_choice_twice() {
        let r = bind_flag_monotonic(SymbolFlags::EXPORT, SymbolFlags::EXPORT);
        assert!(r.is_ok());
    }
}
