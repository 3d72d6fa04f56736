//! S-C Macro Assembler ("SCASM") syntax front-end.
//!
//! The `.AC` nibble-compression engine is grounded on
//! `syntax/scasm/syntax.c`'s three static tables and the
//! `ac_nibble_flag`/`ac_pending_nibble` persistent state shared across
//! directive invocations — including the `j+1` third-table indexing
//! quirk the design notes call out (spec.md §9 "Open questions").

use crate::core::atom::AtomKind;
use crate::core::context::ParserContext;
use crate::core::symbol::{SymbolFlags, SymbolKind};
use crate::dialect::directives::{self, StringPost};
use crate::dialect::{CondTag, Dialect, DialectKind};
use crate::error::LexError;
use crate::lexer::AtPrefixMode;

/// Persistent `.AC` nibble-stream state (spec.md §4.6: "stream state
/// persists across directives"). `.AC 0` resets it.
#[derive(Debug, Default)]
pub struct AcState {
    table1: Vec<u8>,
    table2: Vec<u8>,
    table3: Vec<u8>,
    /// `false` = next nibble goes in the high half of a new byte.
    odd: bool,
    pending_high_nibble: u8,
}

impl AcState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `.AC 0`: resets table contents and pending-nibble state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// `.AC 1"..."` / `.AC 2"..."` / `.AC 3"..."`: defines one of the
    /// three lookup tables from a literal character run.
    pub fn define_table(&mut self, which: u8, chars: &[u8]) {
        let table = match which {
            1 => &mut self.table1,
            2 => &mut self.table2,
            3 => &mut self.table3,
            _ => return,
        };
        table.clear();
        table.extend_from_slice(chars);
    }

    fn emit_nibble(&mut self, nibble: u8, out: &mut Vec<u8>) {
        if !self.odd {
            self.pending_high_nibble = nibble & 0xF;
            self.odd = true;
        } else {
            let byte = (self.pending_high_nibble << 4) | (nibble & 0xF);
            out.push(byte);
            self.odd = false;
        }
    }

    fn lookup(&self, c: u8) -> Option<Vec<u8>> {
        if let Some(pos) = self.table1.iter().position(|&t| t == c) {
            return Some(vec![(pos + 1) as u8]);
        }
        if let Some(pos) = self.table2.iter().position(|&t| t == c) {
            return Some(vec![0, (pos + 1) as u8]);
        }
        if let Some(pos) = self.table3.iter().position(|&t| t == c) {
            // Slot 0 of table3 is reserved; indices are `j+1` (spec.md
            // §9: "preserve this exactly").
            return Some(vec![0, 0, (pos + 1) as u8]);
        }
        None
    }

    /// `.AC /message/`: compresses `message` into the shared nibble
    /// stream, appending completed bytes to `out`. A digit not found in
    /// any table is a blank-run shorthand: the digit value is a space
    /// count (`0` means 10 spaces), encoded via table1's index for the
    /// space character.
    pub fn compress(&mut self, message: &[u8], out: &mut Vec<u8>) {
        for &c in message {
            if c.is_ascii_digit() && self.lookup(c).is_none() {
                let count = if c == b'0' { 10 } else { (c - b'0') as usize };
                if let Some(space_nibbles) = self.lookup(b' ') {
                    for _ in 0..count {
                        for n in &space_nibbles {
                            self.emit_nibble(*n, out);
                        }
                    }
                }
                continue;
            }
            if let Some(nibbles) = self.lookup(c) {
                for n in nibbles {
                    self.emit_nibble(n, out);
                }
            }
        }
    }
}

/// `.HS` hex-string directive (spec.md §4.6, §8 boundary behavior):
/// ignores separators between nibble pairs, pads an odd nibble count
/// with a leading zero nibble.
pub fn parse_hs(text: &str) -> Result<Vec<u8>, LexError> {
    let nibbles: Vec<u8> = text
        .bytes()
        .filter(|b| !matches!(b, b'.' | b',' | b' ' | b'\t'))
        .map(|b| match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'a'..=b'f' => Ok(b - b'a' + 10),
            b'A'..=b'F' => Ok(b - b'A' + 10),
            _ => Err(LexError::InvalidNumber),
        })
        .collect::<Result<_, _>>()?;
    let padded = if nibbles.len() % 2 == 1 {
        let mut v = vec![0u8];
        v.extend(nibbles);
        v
    } else {
        nibbles
    };
    Ok(padded.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect())
}

/// Merlin's `HEX` sibling: rejects an odd digit count outright (spec.md
/// §8: "Merlin `HEX` rejects with `even number of hex digits required`").
pub fn parse_hex_strict(text: &str) -> Result<Vec<u8>, LexError> {
    let nibbles: Vec<u8> = text
        .bytes()
        .filter(|b| !matches!(b, b'.' | b',' | b' ' | b'\t'))
        .map(|b| match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'a'..=b'f' => Ok(b - b'a' + 10),
            b'A'..=b'F' => Ok(b - b'A' + 10),
            _ => Err(LexError::InvalidNumber),
        })
        .collect::<Result<_, _>>()?;
    if nibbles.len() % 2 != 0 {
        return Err(LexError::OddHexDigits);
    }
    Ok(nibbles.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect())
}

/// `.AC` dispatch (spec.md §4.6): either a table definition
/// (`1"chars"`/`2"chars"`/`3"chars"`), a reset (`0`), or a compressed
/// message (`/text/`, any repeated delimiter).
fn handle_ac(ctx: &mut ParserContext, operand: &str) {
    let operand = operand.trim();
    if operand == "0" {
        ctx.scasm_ac.reset();
        return;
    }
    let bytes = operand.as_bytes();
    if bytes.len() > 2 && matches!(bytes[0], b'1' | b'2' | b'3') {
        let which = bytes[0] - b'0';
        let delim = bytes[1] as char;
        if let Some(end) = operand[2..].find(delim) {
            ctx.scasm_ac.define_table(which, &bytes[2..2 + end]);
            return;
        }
    }
    if bytes.len() >= 2 {
        let delim = bytes[0] as char;
        if let Some(end) = operand[1..].rfind(delim) {
            let mut out = Vec::new();
            ctx.scasm_ac.compress(&bytes[1..1 + end], &mut out);
            if !out.is_empty() {
                ctx.add_atom(AtomKind::Data(out), 1);
            }
            return;
        }
    }
    ctx.error("malformed .AC operand");
}

/// Label-field split (spec.md §4.3): identical convention to Merlin's —
/// an unindented line's first token is the label.
fn split_label_field(line: &str) -> (Option<String>, String) {
    if line.is_empty() || line.starts_with(' ') || line.starts_with('\t') {
        return (None, line.trim_start().to_string());
    }
    // The dotdir convention (spec.md §4.4, `DialectOptions::dotdir`) makes
    // a leading `.` unambiguous: it always starts a directive, never a
    // label, so there is no label field to split off.
    if line.starts_with('.') {
        return (None, line.to_string());
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

/// Binds the label field, except for `.EQ`/`.EQU` (bound as the
/// equate's value by the directive handler itself) and dot-prefixed
/// local labels (scoped under the last global label).
fn bind_label(ctx: &mut ParserContext, label: Option<&str>, mnemonic: &str) {
    let Some(label) = label else { return };
    if matches!(mnemonic, "EQ" | "EQU") {
        return;
    }
    if let Some(local) = label.strip_prefix('.') {
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
        "IF" => directives::handle_if(ctx, operand),
        "IFDEF" => directives::handle_ifdef(ctx, operand, false),
        "IFNDEF" => directives::handle_ifdef(ctx, operand, true),
        "ELSE" => directives::handle_else(ctx),
        "ENDIF" | "FIN" => directives::handle_endif(ctx, false),
        _ => return None,
    })
}

fn strip_dot_upper(line: &str) -> String {
    line.trim().trim_start_matches('.').to_ascii_uppercase()
}

fn is_scasm_macro_end(line: &str) -> bool {
    let u = strip_dot_upper(line);
    matches!(u.split_whitespace().next().unwrap_or(""), "EM" | "ENDM")
}

fn is_scasm_repeat_end(line: &str) -> bool {
    let u = strip_dot_upper(line);
    matches!(u.split_whitespace().next().unwrap_or(""), "ENDLUP" | "LUPEND" | "ENDR")
}

pub struct Scasm;

impl Dialect for Scasm {
    fn kind(&self) -> DialectKind {
        DialectKind::Scasm
    }

    fn init(&self, ctx: &mut ParserContext) {
        ctx.new_section("text", Default::default(), ctx.options.org);
    }

    /// Real label/directive dispatch (spec.md §4.3-§4.11): wires the
    /// `.AC`/`.HS`/`.HX` handlers above and the shared
    /// [`crate::dialect::directives`] table into the dot-stripped
    /// SCASM mnemonic set.
    fn parse(&self, ctx: &mut ParserContext, line: &str) -> CondTag {
        if directives::feed_macro_capture(ctx, line, is_scasm_macro_end) {
            return CondTag::None;
        }
        if directives::feed_repeat_capture(ctx, line, is_scasm_repeat_end) {
            return CondTag::None;
        }

        let line = line.trim_end();
        let (label, rest) = split_label_field(line);
        let rest = rest.trim();
        let mut it = rest.splitn(2, char::is_whitespace);
        let mnemonic_tok = it.next().unwrap_or("");
        let operand_raw = it.next().unwrap_or("").trim();
        let mnemonic = mnemonic_tok.trim_start_matches('.').to_ascii_uppercase();

        if let Some(tag) = dispatch_cond(ctx, &mnemonic, operand_raw) {
            return tag;
        }
        if !ctx.cond.executing() {
            return CondTag::None;
        }

        match mnemonic.as_str() {
            "MA" | "MACRO" => {
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
            "LUP" => {
                match directives::parse_repeat_header(ctx, operand_raw, AtPrefixMode::Octal) {
                    Some(spec) => directives::start_repeat_capture(ctx, spec),
                    None => ctx.error("malformed LUP header"),
                }
                return CondTag::None;
            }
            _ => {}
        }

        bind_label(ctx, label.as_deref(), &mnemonic);
        let operand = operand_raw.to_string();

        match mnemonic.as_str() {
            "OR" | "ORG" => directives::handle_org(ctx, &operand, AtPrefixMode::Octal),
            "EQ" | "EQU" => match label.as_deref() {
                Some(l) => directives::handle_equate_multi(ctx, l, &operand, false, AtPrefixMode::Octal),
                None => ctx.error(".EQ requires a label"),
            },
            "DA" => directives::emit_data_list(ctx, &operand, 2, false, AtPrefixMode::Octal),
            "DB" | "BY" => directives::emit_data_list(ctx, &operand, 1, false, AtPrefixMode::Octal),
            "BS" | "DS" => directives::emit_space(ctx, &operand, 1, AtPrefixMode::Octal),
            "AS" => directives::emit_string_directive(ctx, &operand, StringPost::None, AtPrefixMode::Octal),
            "AZ" => directives::emit_string_directive(ctx, &operand, StringPost::Az, AtPrefixMode::Octal),
            "AT" => directives::emit_string_directive(ctx, &operand, StringPost::Fcs, AtPrefixMode::Octal),
            "HS" => match parse_hs(&operand) {
                Ok(bytes) => ctx.add_atom(AtomKind::Data(bytes), 1),
                Err(e) => ctx.error(e.to_string()),
            },
            "HX" => match parse_hex_strict(&operand) {
                Ok(bytes) => ctx.add_atom(AtomKind::Data(bytes), 1),
                Err(e) => ctx.error(e.to_string()),
            },
            "AC" => handle_ac(ctx, &operand),
            "XDEF" | "GL" | "GLOBAL" => directives::set_symbol_flag(ctx, &operand, SymbolFlags::EXPORT, SymbolKind::LabSym),
            "XREF" | "EX" | "EXTERN" => directives::set_symbol_flag(ctx, &operand, SymbolFlags::XREF, SymbolKind::Import),
            "WEAK" => directives::set_symbol_flag(ctx, &operand, SymbolFlags::WEAK, SymbolKind::LabSym),
            "LOCAL" => directives::set_symbol_flag(ctx, &operand, SymbolFlags::LOCAL, SymbolKind::LabSym),
            "MX" => directives::handle_mx(ctx, &operand),
            "LONGA" => directives::handle_longa(ctx, &operand),
            "LONGI" => directives::handle_longi(ctx, &operand),
            "REP" => directives::handle_rep_sep(ctx, &operand, false),
            "SEP" => directives::handle_rep_sep(ctx, &operand, true),
            "XC" => directives::handle_xc(ctx, &operand),
            "DUM" | "DSECT" => directives::handle_dum(ctx, &operand, AtPrefixMode::Octal),
            "DEND" | "ED" => directives::handle_dend(ctx),
            "" => {}
            _ => {
                if directives::try_invoke_macro(ctx, mnemonic_tok, &operand) {
                    // invoked
                } else if let Some(name) = mnemonic_tok.strip_prefix('>') {
                    if !directives::try_invoke_macro(ctx, name, &operand) {
                        ctx.error(format!("undefined macro `{}`", name));
                    }
                } else if let Some(name) = mnemonic_tok.strip_prefix('_') {
                    if !directives::try_invoke_macro(ctx, name, &operand) {
                        ctx.error(format!("undefined macro `{}`", name));
                    }
                } else {
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

    fn const_prefix(&self) -> &'static [char] {
        &['$', '%', '@']
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DialectOptions;
    use crate::core::section::SectionAttrs;

    #[test]
    fn scenario_s2_ac_shared_nibble_stream() {
        let mut state = AcState::new();
        state.define_table(1, b"ABC"); // A->1, B->2, C->3
        let mut out = Vec::new();
        state.compress(b"A", &mut out);
        assert!(out.is_empty(), "first nibble pending, nothing emitted yet");
        state.compress(b"B", &mut out);
        assert_eq!(out, vec![0x12]);
    }

    #[test]
    fn ac_zero_resets_state() {
        let mut state = AcState::new();
        state.define_table(1, b"A");
        let mut out = Vec::new();
        state.compress(b"A", &mut out);
        state.reset();
        state.define_table(1, b"A");
        state.compress(b"A", &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn ac_table2_and_table3_use_prefix_nibbles() {
        let mut state = AcState::new();
        state.define_table(1, b"A");
        state.define_table(2, b"B");
        state.define_table(3, b"C");
        let mut out = Vec::new();
        state.compress(b"B", &mut out); // nibbles 0, 1
        assert_eq!(out, vec![0x01]);
        out.clear();
        state.compress(b"C", &mut out); // nibbles 0, 0, 1
        // first AC call left state even (2 nibbles), so this is 2 more nibbles -> one byte
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn hs_pads_odd_nibble_count() {
        let bytes = parse_hs("ABC").unwrap();
        assert_eq!(bytes, vec![0x0A, 0xBC]);
    }

    #[test]
    fn hs_ignores_separators() {
        let bytes = parse_hs("AB.CD,EF").unwrap();
        assert_eq!(bytes, vec![0xAB, 0xCD, 0xEF]);
    }

    #[test]
    fn hex_strict_rejects_odd_count() {
        assert!(matches!(parse_hex_strict("ABC"), Err(LexError::OddHexDigits)));
    }

    #[test]
    fn hex_strict_accepts_even_count() {
        assert_eq!(parse_hex_strict("ABCD").unwrap(), vec![0xAB, 0xCD]);
    }

    #[test]
    fn dispatch_wires_hs_into_real_atoms() {
        let mut ctx = ParserContext::new(DialectOptions::for_dialect(DialectKind::Scasm));
        ctx.new_section("text", SectionAttrs::default(), 0);
        let scasm = Scasm;
        scasm.parse(&mut ctx, "DATA .HS AB.CD");
        let sec = ctx.sections.current().unwrap();
        let data: Vec<u8> = ctx
            .sections
            .get(sec)
            .atoms
            .iter()
            .filter_map(|a| match &a.kind {
                AtomKind::Data(b) => Some(b.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(data, vec![0xAB, 0xCD]);
        assert!(ctx.symtab.lookup("DATA").is_some());
    }

    #[test]
    fn dispatch_ac_compresses_through_shared_context_state() {
        let mut ctx = ParserContext::new(DialectOptions::for_dialect(DialectKind::Scasm));
        ctx.new_section("text", SectionAttrs::default(), 0);
        let scasm = Scasm;
        scasm.parse(&mut ctx, r#".AC 1"AB""#);
        scasm.parse(&mut ctx, ".AC /AB/");
        let sec = ctx.sections.current().unwrap();
        let data: Vec<u8> = ctx
            .sections
            .get(sec)
            .atoms
            .iter()
            .filter_map(|a| match &a.kind {
                AtomKind::Data(b) => Some(b.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(data, vec![0x12]);
    }

    #[test]
    fn dispatch_macro_invocation_via_angle_sigil() {
        let mut ctx = ParserContext::new(DialectOptions::for_dialect(DialectKind::Scasm));
        ctx.new_section("text", SectionAttrs::default(), 0);
        let scasm = Scasm;
        scasm.parse(&mut ctx, "BEEP MA");
        scasm.parse(&mut ctx, "LDA #$30");
        scasm.parse(&mut ctx, ".EM");
        assert!(ctx.macros.is_defined("BEEP"));
        scasm.parse(&mut ctx, "   >BEEP");
        assert_eq!(ctx.source.depth(), 1);
    }
}
