//! EDTASM-family syntax front-end (ARM/Acorn tool-chain lineage).
//!
//! The `#'x` character-literal rewrite and the doubled-backslash macro
//! escapes are the two quirks spec.md singles out for this dialect
//! (§4.2, §4.7); both are implemented here rather than folded into the
//! shared lexer, per spec.md §9 ("keep three small lexers").

use crate::core::atom::AtomKind;
use crate::core::context::ParserContext;
use crate::core::symbol::{SymbolFlags, SymbolKind};
use crate::dialect::directives::{self, StringPost};
use crate::dialect::{CondTag, Dialect, DialectKind};
use crate::lexer::AtPrefixMode;

/// Rewrites `#'x` (closing quote optional) to `#$xx` in place, as the
/// line source is required to do before expression parsing
/// (spec.md §4.2, §4.1 "the buffer is mutable and may be rewritten").
pub fn rewrite_char_literal(line: &str) -> String {
    let bytes = line.as_bytes();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'#' && bytes.get(i + 1) == Some(&b'\'') {
            if let Some(&c) = bytes.get(i + 2) {
                out.push_str(&format!("#${:02X}", c));
                i += 3;
                if bytes.get(i) == Some(&b'\'') {
                    i += 1; // optional closing quote
                }
                continue;
            }
        }
        let n = line[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
        out.push_str(&line[i..i + n]);
        i += n;
    }
    out
}

/// Label-field split (spec.md §4.3): an unindented line's first token is
/// the label; an indented line has none.
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

/// Binds the label field, except for `EQU`/`SET` (bound by the equate
/// handler as the expression's value, not a PC label).
fn bind_label(ctx: &mut ParserContext, label: Option<&str>, mnemonic: &str) {
    let Some(label) = label else { return };
    if matches!(mnemonic, "EQU" | "=" | "SET") {
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

fn dispatch_cond(ctx: &mut ParserContext, mnemonic: &str, operand: &str) -> Option<CondTag> {
    Some(match mnemonic {
        "COND" | "IF" => directives::handle_if(ctx, operand),
        "IFDEF" => directives::handle_ifdef(ctx, operand, false),
        "IFNDEF" => directives::handle_ifdef(ctx, operand, true),
        "ELSE" => directives::handle_else(ctx),
        "ENDIF" | "FIN" => directives::handle_endif(ctx, false),
        _ => return None,
    })
}

fn is_edtasm_macro_end(line: &str) -> bool {
    let u = line.trim().to_ascii_uppercase();
    matches!(u.split_whitespace().next().unwrap_or(""), "ENDM")
}

fn is_edtasm_repeat_end(line: &str) -> bool {
    let u = line.trim().to_ascii_uppercase();
    matches!(u.split_whitespace().next().unwrap_or(""), "ENDR")
}

pub struct Edtasm;

impl Dialect for Edtasm {
    fn kind(&self) -> DialectKind {
        DialectKind::Edtasm
    }

    fn init(&self, ctx: &mut ParserContext) {
        ctx.new_section("text", Default::default(), ctx.options.org);
    }

    /// A `*` in column 1 is always a full-line comment here — no
    /// fallthrough to a possible `*` operator (spec.md §4.4). Otherwise:
    /// real label/directive dispatch (spec.md §4.3-§4.11), applying the
    /// character-literal rewrite before the line is split and parsed
    /// any further.
    fn parse(&self, ctx: &mut ParserContext, line: &str) -> CondTag {
        if directives::feed_macro_capture(ctx, line, is_edtasm_macro_end) {
            return CondTag::None;
        }
        if directives::feed_repeat_capture(ctx, line, is_edtasm_repeat_end) {
            return CondTag::None;
        }
        if line.starts_with('*') {
            return CondTag::None;
        }

        let rewritten = rewrite_char_literal(line.trim_end());
        let (label, rest) = split_label_field(&rewritten);
        let rest = rest.trim();
        let mut it = rest.splitn(2, char::is_whitespace);
        let mnemonic_tok = it.next().unwrap_or("");
        let operand_raw = it.next().unwrap_or("").trim();
        let mnemonic = mnemonic_tok.to_ascii_uppercase();

        if let Some(tag) = dispatch_cond(ctx, &mnemonic, operand_raw) {
            return tag;
        }
        if !ctx.cond.executing() {
            return CondTag::None;
        }

        match mnemonic.as_str() {
            "MACRO" => {
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
            "REPT" => {
                match directives::parse_repeat_header(ctx, operand_raw, AtPrefixMode::None) {
                    Some(spec) => directives::start_repeat_capture(ctx, spec),
                    None => ctx.error("malformed REPT header"),
                }
                return CondTag::None;
            }
            _ => {}
        }

        bind_label(ctx, label.as_deref(), &mnemonic);
        let operand = operand_raw.to_string();

        match mnemonic.as_str() {
            "ORG" => directives::handle_org(ctx, &operand, AtPrefixMode::None),
            "EQU" | "=" => match label.as_deref() {
                Some(l) => directives::handle_equate(ctx, l, &operand, false, AtPrefixMode::None),
                None => ctx.error("EQU requires a label"),
            },
            "SET" => match label.as_deref() {
                Some(l) => directives::handle_equate(ctx, l, &operand, true, AtPrefixMode::None),
                None => ctx.error("SET requires a label"),
            },
            "DB" | "FCB" | "DEFB" => directives::emit_data_list(ctx, &operand, 1, false, AtPrefixMode::None),
            "DW" | "FDB" | "DEFW" => directives::emit_data_list(ctx, &operand, 2, false, AtPrefixMode::None),
            "DS" | "BS" | "DEFS" => directives::emit_space(ctx, &operand, 1, AtPrefixMode::None),
            "ASC" | "DEFM" => directives::emit_string_directive(ctx, &operand, StringPost::None, AtPrefixMode::None),
            "HEX" => match crate::dialect::scasm::parse_hex_strict(&operand) {
                Ok(bytes) => ctx.add_atom(AtomKind::Data(bytes), 1),
                Err(e) => ctx.error(e.to_string()),
            },
            "XDEF" | "GLOBAL" => directives::set_symbol_flag(ctx, &operand, SymbolFlags::EXPORT, SymbolKind::LabSym),
            "XREF" | "EXTERN" => directives::set_symbol_flag(ctx, &operand, SymbolFlags::XREF, SymbolKind::Import),
            "MX" => directives::handle_mx(ctx, &operand),
            "LONGA" => directives::handle_longa(ctx, &operand),
            "LONGI" => directives::handle_longi(ctx, &operand),
            "REP" => directives::handle_rep_sep(ctx, &operand, false),
            "SEP" => directives::handle_rep_sep(ctx, &operand, true),
            "XC" => directives::handle_xc(ctx, &operand),
            "DUM" | "DSECT" => directives::handle_dum(ctx, &operand, AtPrefixMode::None),
            "DEND" | "ED" => directives::handle_dend(ctx),
            "END" | "" => {}
            _ => {
                if !directives::try_invoke_macro(ctx, mnemonic_tok, &operand) {
                    ctx.add_atom(
                        AtomKind::Instruction {
                            mnemonic: mnemonic_tok.to_string(),
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

    /// `chkidend` (spec.md §9): whether `c` can end an identifier —
    /// EDTASM identifiers are plain alnum/`_`, no dialect-specific
    /// terminator beyond the shared rule.
    fn const_prefix(&self) -> &'static [char] {
        &['$', '%', '#']
    }
}

impl Edtasm {
    /// `chkidend`: whether `c` legally ends an identifier token.
    pub fn chkidend(&self, c: char) -> bool {
        !(c.is_ascii_alphanumeric() || c == '_')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DialectOptions;
    use crate::core::section::SectionAttrs;
    use crate::macros::{expand_line, ExpansionContext, MacroDialect};
    use std::collections::HashMap;

    #[test]
    fn rewrites_char_literal_with_closing_quote() {
        assert_eq!(rewrite_char_literal("LD A,#'X'"), "LD A,#$58");
    }

    #[test]
    fn rewrites_char_literal_without_closing_quote() {
        assert_eq!(rewrite_char_literal("LD A,#'X"), "LD A,#$58");
    }

    #[test]
    fn scenario_s3_char_literal_and_macro_expansion() {
        // PRINT MACRO / LD A,\\1 / ENDM ; invocation: PRINT #'X
        let rewritten = rewrite_char_literal("PRINT #'X");
        assert_eq!(rewritten, "PRINT #$58");
        let params = vec!["#$58".to_string()];
        let named = HashMap::new();
        let ctx = ExpansionContext {
            dialect: MacroDialect::Edtasm,
            params: &params,
            named: &named,
            unique_id: 0,
            lookup_symbol: &|_| None,
        };
        let expanded = expand_line("LD  A,\\\\1", &ctx).unwrap();
        assert_eq!(expanded, "LD  A,#$58");
    }

    #[test]
    fn column_one_star_is_always_comment() {
        let mut ctx = ParserContext::new(DialectOptions::default());
        let edtasm = Edtasm;
        assert_eq!(edtasm.parse(&mut ctx, "* this is a comment"), CondTag::None);
    }

    #[test]
    fn chkidend_rejects_identifier_chars() {
        let edtasm = Edtasm;
        assert!(!edtasm.chkidend('A'));
        assert!(edtasm.chkidend(' '));
        assert!(edtasm.chkidend(','));
    }

    #[test]
    fn dispatch_rewrites_char_literal_before_emitting_instruction() {
        let mut ctx = ParserContext::new(DialectOptions::for_dialect(DialectKind::Edtasm));
        ctx.new_section("text", SectionAttrs::default(), 0);
        let edtasm = Edtasm;
        edtasm.parse(&mut ctx, "CH LD A,#'X");
        let sec = ctx.sections.current().unwrap();
        let operands: Vec<String> = ctx
            .sections
            .get(sec)
            .atoms
            .iter()
            .filter_map(|a| match &a.kind {
                AtomKind::Instruction { operands, .. } => Some(operands.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(operands, vec!["A,#$58".to_string()]);
        assert!(ctx.symtab.lookup("CH").is_some());
    }

    #[test]
    fn dispatch_macro_round_trip() {
        let mut ctx = ParserContext::new(DialectOptions::for_dialect(DialectKind::Edtasm));
        ctx.new_section("text", SectionAttrs::default(), 0);
        let edtasm = Edtasm;
        edtasm.parse(&mut ctx, "PRINT MACRO");
        edtasm.parse(&mut ctx, "LD  A,\\\\1");
        edtasm.parse(&mut ctx, "ENDM");
        assert!(ctx.macros.is_defined("PRINT"));
        edtasm.parse(&mut ctx, "   PRINT #$58");
        assert_eq!(ctx.source.depth(), 1);
    }
}
