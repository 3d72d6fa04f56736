//! Merlin syntax front-end.
//!
//! Grounded on the variable-label pending/finalize logic of the
//! original `syntax/merlin/syntax.c` (`find_or_create_varlabel`,
//! `prepare_varlabel_definition`, `finalize_varlabel`) and on the
//! metadata directives (`TYP`/`AUX`/`CYC`/`SAV`/`USR`) it records but
//! never consumes (SPEC_FULL §4.14).

use std::collections::HashMap;

use crate::core::atom::AtomKind;
use crate::core::context::ParserContext;
use crate::core::expr::Expr;
use crate::core::symbol::{SymbolFlags, SymbolKind};
use crate::dialect::directives::{self, StringPost};
use crate::dialect::{CondTag, Dialect, DialectKind};
use crate::lexer::AtPrefixMode;

/// RW18 disk-format placement recorded by `USR` (SPEC_FULL §4.14); no
/// writer in this crate consumes it, matching the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsrPlacement {
    pub side: u8,
    pub track: u8,
    pub offset: u16,
}

/// Merlin directives that record metadata without affecting codegen
/// (SPEC_FULL §4.14).
#[derive(Debug, Clone, Default)]
pub struct MerlinMetadata {
    pub file_type: Option<u8>,
    pub aux_type: Option<u16>,
    pub cycle_counting: bool,
    pub output_filename: Option<String>,
    pub usr_placement: Option<UsrPlacement>,
}

/// One `]NAME` variable label's bookkeeping (spec.md §3, §4.3, §4.5,
/// §9 "Variable-label deferral").
#[derive(Debug, Clone, Default)]
struct VarLabelEntry {
    unique_name: Option<String>,
    pending_name: Option<String>,
    definition_count: u32,
}

/// The variable-label table: name → unique backing name history. The
/// two-phase prepare/finalize split is the load-bearing part — see
/// spec.md §9: "prepare a pending unique name *before* evaluating the
/// RHS, publish it *after*."
#[derive(Debug, Default)]
pub struct VarLabelTable {
    entries: HashMap<String, VarLabelEntry>,
    counter: u32,
}

impl VarLabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_unique(&mut self) -> String {
        let id = self.counter;
        self.counter += 1;
        format!("unid_{}", id)
    }

    /// Reference at use-site (not a definition): returns the current
    /// unique backing name, allocating a forward-reference placeholder
    /// if this is the first mention.
    pub fn reference(&mut self, name: &str) -> String {
        if let Some(entry) = self.entries.get(name) {
            if let Some(u) = &entry.unique_name {
                return u.clone();
            }
        }
        let unique = self.alloc_unique();
        self.entries.entry(name.to_string()).or_default().unique_name = Some(unique.clone());
        unique
    }

    /// Phase 1 of a definition: prepares (but does not publish) the
    /// next unique backing name. If this variable was only
    /// forward-referenced so far (never defined), the placeholder
    /// allocated by [`Self::reference`] is reused as the *defined*
    /// name directly, matching the original's behavior of not wasting
    /// a second id on the first definition.
    pub fn prepare_definition(&mut self, name: &str) -> String {
        let entry = self.entries.entry(name.to_string()).or_default();
        if entry.definition_count == 0 && entry.unique_name.is_some() {
            let pending = entry.unique_name.clone().unwrap();
            entry.pending_name = Some(pending.clone());
            return pending;
        }
        let pending = {
            let id = self.counter;
            self.counter += 1;
            format!("unid_{}", id)
        };
        self.entries.get_mut(name).unwrap().pending_name = Some(pending.clone());
        pending
    }

    /// Phase 2: after the defining expression has been evaluated
    /// (reading the *old* `unique_name`), publishes the prepared name.
    pub fn finalize_definition(&mut self, name: &str) {
        if let Some(entry) = self.entries.get_mut(name) {
            if let Some(pending) = entry.pending_name.take() {
                entry.unique_name = Some(pending);
                entry.definition_count += 1;
            }
        }
    }
}

/// Resolves Merlin's `USE N/file` path form (SPEC_FULL §4.15).
pub fn resolve_use_path(spec: &str) -> String {
    let mut parts = spec.splitn(2, '/');
    let Some(digit) = parts.next() else {
        return spec.to_string();
    };
    let Some(rest) = parts.next() else {
        return spec.to_string();
    };
    if digit.len() != 1 || !digit.chars().next().unwrap().is_ascii_digit() {
        return spec.to_string();
    }
    let prefix = if digit == "4" {
        std::env::var("VASM_MERLIN_PREFIX_4").unwrap_or_else(|_| "./".to_string())
    } else {
        "./".to_string()
    };
    format!("{}{}", prefix, rest)
}

/// `<<<` → `EOM`, `--^` → `ENDR` (spec.md §4.4).
fn rewrite_synonym(line: &str) -> String {
    if line.trim() == "<<<" {
        "EOM".to_string()
    } else if line.trim() == "--^" {
        "ENDR".to_string()
    } else {
        line.to_string()
    }
}

/// Label-field split (spec.md §4.3): an unindented line's first
/// whitespace-delimited token is the label; an indented line has none.
fn split_label_field(line: &str) -> (Option<String>, String) {
    if line.is_empty() || line.starts_with(' ') || line.starts_with('\t') {
        return (None, line.trim_start().to_string());
    }
    let mut it = line.splitn(2, |c: char| c == ' ' || c == '\t');
    let label = it.next().unwrap_or("").to_string();
    let rest = it.next().unwrap_or("").to_string();
    if label.is_empty() {
        (None, rest)
    } else {
        (Some(label), rest)
    }
}

/// Rewrites `]NAME` occurrences in `text` to the name's current backing
/// symbol, so the shared expression parser (which only knows plain
/// identifiers) can resolve self-references inside a variable label's
/// own defining expression (spec.md §4.5, §9).
fn rewrite_varlabel_refs(ctx: &mut ParserContext, text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b']' {
            let start = i + 1;
            let mut j = start;
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                j += 1;
            }
            if j > start {
                let name = &text[start..j];
                out.push_str(&ctx.merlin_varlabels.reference(name));
                i = j;
                continue;
            }
        }
        let n = text[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
        out.push_str(&text[i..i + n]);
        i += n;
    }
    out
}

/// Binds the label field for every mnemonic except `EQU`/`SET` (which
/// bind it themselves, since the backing symbol there is the equate's
/// value, not a PC label) and the current-PC token (routed to `ORG`).
fn bind_label(ctx: &mut ParserContext, label: Option<&str>, mnemonic: &str) {
    let Some(label) = label else { return };
    if label == "*" || label == "." || matches!(mnemonic, "EQU" | "=" | "SET" | "SE") {
        return;
    }
    if let Some(name) = label.strip_prefix(']') {
        let backing = ctx.merlin_varlabels.reference(name);
        ctx.new_labsym(&backing);
        return;
    }
    if let Some(local) = label.strip_prefix(':') {
        match ctx.last_global_label.clone() {
            Some(global) => {
                ctx.new_labsym(&format!("{}.{}", global, local));
            }
            None => ctx.error("local label with no preceding global label"),
        }
        return;
    }
    ctx.new_labsym(label);
}

/// Conditional-assembly directive dispatch, shared between the
/// full-assembly and skip-scanning paths (spec.md §4.9).
fn dispatch_cond(ctx: &mut ParserContext, mnemonic: &str, operand: &str) -> Option<CondTag> {
    Some(match mnemonic {
        "DO" | "IF" => directives::handle_if(ctx, operand),
        "IFDEF" => directives::handle_ifdef(ctx, operand, false),
        "IFND" => directives::handle_ifdef(ctx, operand, true),
        "ELSE" | "EL" => directives::handle_else(ctx),
        "ELSEIF" => directives::handle_elseif(ctx, operand),
        "FIN" | "EI" | "ENDIF" => directives::handle_endif(ctx, true),
        _ => return None,
    })
}

pub struct Merlin;

impl Dialect for Merlin {
    fn kind(&self) -> DialectKind {
        DialectKind::Merlin
    }

    fn init(&self, ctx: &mut ParserContext) {
        ctx.new_section("text", Default::default(), ctx.options.org);
    }

    /// Real label-field/directive dispatch (spec.md §4.3-§4.11): binds
    /// the label (including `]NAME` variable labels via
    /// [`VarLabelTable`]), drives [`ParserContext::cond`], and emits
    /// atoms through [`crate::dialect::directives`].
    fn parse(&self, ctx: &mut ParserContext, line: &str) -> CondTag {
        if directives::feed_macro_capture(ctx, line, is_merlin_macro_end) {
            return CondTag::None;
        }
        if directives::feed_repeat_capture(ctx, line, is_merlin_repeat_end) {
            return CondTag::None;
        }

        let rewritten_line = rewrite_synonym(line.trim_end());
        let (label, rest) = split_label_field(&rewritten_line);
        let rest = rest.trim();
        let mut it = rest.splitn(2, char::is_whitespace);
        let mnemonic_raw = it.next().unwrap_or("");
        let operand_raw = it.next().unwrap_or("").trim();
        let mnemonic = mnemonic_raw.trim_start_matches('.').to_ascii_uppercase();

        if let Some(tag) = dispatch_cond(ctx, &mnemonic, operand_raw) {
            return tag;
        }
        if !ctx.cond.executing() {
            return CondTag::None;
        }

        match mnemonic.as_str() {
            "MAC" | "MACRO" | "MA" => {
                let (name, params) = match &label {
                    Some(l) => (
                        l.clone(),
                        directives::split_operands(operand_raw)
                            .into_iter()
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect(),
                    ),
                    None => directives::parse_macro_header(operand_raw),
                };
                directives::start_macro_capture(ctx, &name, params);
                return CondTag::None;
            }
            "MEXIT" => {
                directives::exit_macro(ctx);
                return CondTag::None;
            }
            "REPT" | "LUP" => {
                match directives::parse_repeat_header(ctx, operand_raw, AtPrefixMode::None) {
                    Some(spec) => directives::start_repeat_capture(ctx, spec),
                    None => ctx.error("malformed REPT/LUP header"),
                }
                return CondTag::None;
            }
            _ => {}
        }

        bind_label(ctx, label.as_deref(), &mnemonic);
        let operand = rewrite_varlabel_refs(ctx, operand_raw);

        match mnemonic.as_str() {
            "ORG" | "OR" => directives::handle_org(ctx, &operand, AtPrefixMode::None),
            "EQU" | "=" | "SET" | "SE" => {
                let mutable = matches!(mnemonic.as_str(), "SET" | "SE");
                match label.as_deref() {
                    Some("*") | Some(".") => directives::handle_org(ctx, &operand, AtPrefixMode::None),
                    Some(l) if l.starts_with(']') => {
                        let name = &l[1..];
                        let pending = ctx.merlin_varlabels.prepare_definition(name);
                        directives::handle_equate(ctx, &pending, &operand, mutable, AtPrefixMode::None);
                        ctx.merlin_varlabels.finalize_definition(name);
                    }
                    Some(l) => directives::handle_equate(ctx, l, &operand, mutable, AtPrefixMode::None),
                    None => ctx.error("EQU/SET requires a label"),
                }
            }
            "DB" | "FCB" | "DFB" => directives::emit_data_list(ctx, &operand, 1, false, AtPrefixMode::None),
            "DW" | "FDB" | "DA" => directives::emit_data_list(ctx, &operand, 2, false, AtPrefixMode::None),
            "DDB" => directives::emit_data_list(ctx, &operand, 2, true, AtPrefixMode::None),
            "DL" | "ADRL" => directives::emit_data_list(ctx, &operand, 4, false, AtPrefixMode::None),
            "DS" | "BS" | "RMB" => directives::emit_space(ctx, &operand, 1, AtPrefixMode::None),
            "ASC" => directives::emit_string_directive(ctx, &operand, StringPost::None, AtPrefixMode::None),
            "STR" => directives::emit_string_directive(ctx, &operand, StringPost::Str, AtPrefixMode::None),
            "STRL" => directives::emit_string_directive(ctx, &operand, StringPost::StrL, AtPrefixMode::None),
            "AZ" => directives::emit_string_directive(ctx, &operand, StringPost::Az, AtPrefixMode::None),
            "DCI" => directives::emit_string_directive(ctx, &operand, StringPost::AtDci, AtPrefixMode::None),
            "INV" => directives::emit_string_directive(ctx, &operand, StringPost::Inv, AtPrefixMode::None),
            "FLS" => directives::emit_string_directive(ctx, &operand, StringPost::Fls, AtPrefixMode::None),
            "REV" => directives::emit_string_directive(ctx, &operand, StringPost::Rev, AtPrefixMode::None),
            "FCS" => directives::emit_string_directive(ctx, &operand, StringPost::Fcs, AtPrefixMode::None),
            "HEX" => match crate::dialect::scasm::parse_hex_strict(&operand) {
                Ok(bytes) => ctx.add_atom(AtomKind::Data(bytes), 1),
                Err(e) => ctx.error(e.to_string()),
            },
            "XDEF" | "ENT" | "GLOBAL" => directives::set_symbol_flag(ctx, &operand, SymbolFlags::EXPORT, SymbolKind::LabSym),
            "XREF" | "EXT" | "EXTERN" => directives::set_symbol_flag(ctx, &operand, SymbolFlags::XREF, SymbolKind::Import),
            "WEAK" => directives::set_symbol_flag(ctx, &operand, SymbolFlags::WEAK, SymbolKind::LabSym),
            "LOCAL" => directives::set_symbol_flag(ctx, &operand, SymbolFlags::LOCAL, SymbolKind::LabSym),
            "MX" => directives::handle_mx(ctx, &operand),
            "LONGA" => directives::handle_longa(ctx, &operand),
            "LONGI" => directives::handle_longi(ctx, &operand),
            "REP" => directives::handle_rep_sep(ctx, &operand, false),
            "SEP" => directives::handle_rep_sep(ctx, &operand, true),
            "XC" => directives::handle_xc(ctx, &operand),
            "DUM" | "DSECT" => directives::handle_dum(ctx, &operand, AtPrefixMode::None),
            "DEND" | "ED" => directives::handle_dend(ctx),
            "TYP" => {
                let opts = directives::number_opts(ctx, AtPrefixMode::None);
                match crate::dialect::expr_parse::parse_expr(&operand, &mut ctx.symtab, opts) {
                    Ok(e) => match ctx.eval_const(&e) {
                        Ok(v) => ctx.merlin_metadata.file_type = Some(v as u8),
                        Err(e) => ctx.error(e.to_string()),
                    },
                    Err(e) => ctx.error(e.to_string()),
                }
            }
            "AUX" => {
                let opts = directives::number_opts(ctx, AtPrefixMode::None);
                match crate::dialect::expr_parse::parse_expr(&operand, &mut ctx.symtab, opts) {
                    Ok(e) => match ctx.eval_const(&e) {
                        Ok(v) => ctx.merlin_metadata.aux_type = Some(v as u16),
                        Err(e) => ctx.error(e.to_string()),
                    },
                    Err(e) => ctx.error(e.to_string()),
                }
            }
            "CYC" => ctx.merlin_metadata.cycle_counting = true,
            "SAV" => ctx.merlin_metadata.output_filename = Some(operand.clone()),
            "USR" => {
                let parts: Vec<&str> = operand.split(',').map(str::trim).collect();
                if parts.len() == 3 {
                    if let (Ok(side), Ok(track), Ok(offset)) = (parts[0].parse(), parts[1].parse(), parts[2].parse()) {
                        ctx.merlin_metadata.usr_placement = Some(UsrPlacement { side, track, offset });
                    } else {
                        ctx.error("malformed USR placement");
                    }
                } else {
                    ctx.error("USR expects side,track,offset");
                }
            }
            "USE" => {
                let _ = resolve_use_path(&operand);
                ctx.warning("USE source is not read by this translation unit");
            }
            "" => {}
            _ => {
                if directives::try_invoke_macro(ctx, mnemonic_raw, &operand) {
                    // invoked
                } else if let Some(name) = mnemonic_raw.strip_prefix(">>>") {
                    if !directives::try_invoke_macro(ctx, name, &operand) {
                        ctx.error(format!("undefined macro `{}`", name));
                    }
                } else if mnemonic == "PMC" {
                    let mut p = operand.splitn(2, char::is_whitespace);
                    let name = p.next().unwrap_or("");
                    let args = p.next().unwrap_or("").trim();
                    if !directives::try_invoke_macro(ctx, name, args) {
                        ctx.error(format!("undefined macro `{}`", name));
                    }
                } else {
                    ctx.add_atom(
                        AtomKind::Instruction {
                            mnemonic: mnemonic_raw.to_string(),
                            qualifiers: vec![],
                            operands: operand.clone(),
                        },
                        1,
                    );
                }
            }
        }
        CondTag::None
    }

    fn get_local_label(&self, ctx: &ParserContext, token: &str) -> Option<String> {
        let global = ctx.last_global_label.as_ref()?;
        Some(format!("{}.{}", global, token))
    }
}

fn is_merlin_macro_end(line: &str) -> bool {
    let u = line.trim().to_ascii_uppercase();
    let u = rewrite_synonym(&u);
    let first = u.split_whitespace().next().unwrap_or("");
    matches!(first, "ENDM" | "EOM")
}

fn is_merlin_repeat_end(line: &str) -> bool {
    let u = rewrite_synonym(line.trim());
    let first = u.to_ascii_uppercase();
    let first = first.split_whitespace().next().unwrap_or("");
    matches!(first, "ENDR" | "ENDU")
}

/// S1 support: evaluates a Merlin `]V EQU expr` form end-to-end given a
/// symbol-value lookup, driving the prepare/finalize split exactly as
/// the dispatcher would.
pub fn eval_varlabel_definition(
    table: &mut VarLabelTable,
    values: &mut HashMap<String, i64>,
    name: &str,
    expr: &Expr,
) -> i64 {
    // Evaluate against the *old* backing before preparing the new one,
    // so a self-referential `]V = ]V + 1` sees the prior value.
    let old_unique = table.reference(name);
    let pc = 0;
    let value = expr
        .eval(pc, &|_| None)
        .unwrap_or_else(|_| *values.get(&old_unique).unwrap_or(&0));
    table.prepare_definition(name);
    table.finalize_definition(name);
    let new_unique = table.reference(name);
    values.insert(new_unique, value);
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DialectOptions;
    use crate::core::expr::Expr;
    use crate::core::section::SectionAttrs;

    #[test]
    fn synonym_rewrites() {
        assert_eq!(rewrite_synonym("<<<"), "EOM");
        assert_eq!(rewrite_synonym("--^"), "ENDR");
        assert_eq!(rewrite_synonym("NOP"), "NOP");
    }

    #[test]
    fn use_path_resolves_prefix_4_from_env() {
        std::env::set_var("VASM_MERLIN_PREFIX_4", "/disk4/");
        assert_eq!(resolve_use_path("4/FOO"), "/disk4/FOO");
        std::env::remove_var("VASM_MERLIN_PREFIX_4");
    }

    #[test]
    fn use_path_defaults_prefix_4_to_dot_slash() {
        std::env::remove_var("VASM_MERLIN_PREFIX_4");
        assert_eq!(resolve_use_path("4/FOO"), "./FOO");
    }

    #[test]
    fn use_path_other_digits_use_fixed_table() {
        assert_eq!(resolve_use_path("2/BAR"), "./BAR");
    }

    #[test]
    fn scenario_s1_variable_label_self_update() {
        // ORG $1000 / ]V EQU 5 / ]V EQU ]V+1 / ]V EQU ]V+1 / DB ]V
        let mut table = VarLabelTable::new();
        let mut values: HashMap<String, i64> = HashMap::new();

        let u0 = table.reference("V");
        values.insert(u0, 5);
        table.prepare_definition("V");
        table.finalize_definition("V");

        let first_backing = table.reference("V");
        assert_eq!(values[&first_backing], 5);
        let v2 = values[&first_backing] + 1;
        table.prepare_definition("V");
        table.finalize_definition("V");
        let second_backing = table.reference("V");
        assert_ne!(first_backing, second_backing);
        values.insert(second_backing.clone(), v2);

        let v3 = values[&second_backing] + 1;
        table.prepare_definition("V");
        table.finalize_definition("V");
        let third_backing = table.reference("V");
        assert_ne!(second_backing, third_backing);
        values.insert(third_backing.clone(), v3);

        assert_eq!(values[&third_backing], 7);
    }

    #[test]
    fn eval_varlabel_definition_reads_old_value() {
        let mut table = VarLabelTable::new();
        let mut values = HashMap::new();
        let v = eval_varlabel_definition(&mut table, &mut values, "V", &Expr::num(5));
        assert_eq!(v, 5);
        let v = eval_varlabel_definition(&mut table, &mut values, "V", &Expr::num(v + 1));
        assert_eq!(v, 6);
    }

    #[test]
    fn local_label_scoped_to_last_global() {
        let mut ctx = ParserContext::new(DialectOptions::default());
        ctx.last_global_label = Some("LOOP".to_string());
        let merlin = Merlin;
        assert_eq!(merlin.get_local_label(&ctx, "1").as_deref(), Some("LOOP.1"));
    }

    #[test]
    fn dispatch_binds_variable_label_through_equ() {
        let mut ctx = ParserContext::new(DialectOptions::for_dialect(DialectKind::Merlin));
        ctx.new_section("text", SectionAttrs::default(), 0x1000);
        let merlin = Merlin;
        merlin.parse(&mut ctx, "]V EQU 5");
        merlin.parse(&mut ctx, "]V EQU ]V+1");
        let backing = ctx.merlin_varlabels.reference("V");
        assert_eq!(ctx.symtab.get(ctx.symtab.lookup(&backing).unwrap()).value, Some(6));
    }

    #[test]
    fn dispatch_emits_db_atom() {
        let mut ctx = ParserContext::new(DialectOptions::for_dialect(DialectKind::Merlin));
        ctx.new_section("text", SectionAttrs::default(), 0);
        let merlin = Merlin;
        merlin.parse(&mut ctx, "LABEL DB 1,2,3");
        let sec = ctx.sections.current().unwrap();
        assert!(ctx.symtab.lookup("LABEL").is_some());
        let data_atoms = ctx
            .sections
            .get(sec)
            .atoms
            .iter()
            .filter(|a| matches!(a.kind, AtomKind::Data(_)))
            .count();
        assert_eq!(data_atoms, 3);
    }

    #[test]
    fn dispatch_macro_round_trip() {
        let mut ctx = ParserContext::new(DialectOptions::for_dialect(DialectKind::Merlin));
        ctx.new_section("text", SectionAttrs::default(), 0);
        let merlin = Merlin;
        merlin.parse(&mut ctx, "PRINT MAC");
        merlin.parse(&mut ctx, "LDA ]1");
        merlin.parse(&mut ctx, "<<<");
        assert!(ctx.macros.is_defined("PRINT"));
        merlin.parse(&mut ctx, "   >>>PRINT #$58");
        assert_eq!(ctx.source.depth(), 1);
    }
}
