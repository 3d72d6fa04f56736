//! Cross-dialect directive handlers (spec.md §4.4-§4.11).
//!
//! Each dialect keeps its own mnemonic table and label-field parser
//! (spec.md §9: "Dialect lexers are not orthogonal"), but the handler
//! *bodies* for data emission, string emission, equate binding,
//! export/import flags, 65816 mode tracking, the dummy section, and
//! macro/repeat capture are identical in shape across all three — this
//! module holds that shared body, called from each dialect's `parse`.

use std::collections::HashMap;

use crate::core::context::{CpuLevel, DsectFrame, MacroCapture, Mode816, ParserContext, RepeatCapture};
use crate::core::atom::AtomKind;
use crate::core::symbol::{SymbolFlags, SymbolKind};
use crate::dialect::expr_parse::parse_expr;
use crate::dialect::CondTag;
use crate::error::LexError;
use crate::lexer::{apply_bit7, parse_string_literal, AtPrefixMode, NumberOpts};
use crate::macros::{expand_line, ExpansionContext, MacroDialect};
use crate::source::FrameOrigin;

/// Evaluates `operand` as a conditional predicate: nonzero is true. A
/// malformed or unresolved expression reports an error and is treated
/// as false, so the skip-scanner still makes forward progress.
fn eval_predicate(ctx: &mut ParserContext, operand: &str) -> bool {
    let opts = number_opts(ctx, AtPrefixMode::None);
    match parse_expr(operand, &mut ctx.symtab, opts) {
        Ok(expr) => match ctx.eval_const(&expr) {
            Ok(v) => v != 0,
            Err(e) => {
                ctx.error(e.to_string());
                false
            }
        },
        Err(e) => {
            ctx.error(e.to_string());
            false
        }
    }
}

/// `IF*`/`IFDEF`-family (spec.md §4.9): pushes a new conditional frame.
pub fn handle_if(ctx: &mut ParserContext, operand: &str) -> CondTag {
    let predicate = eval_predicate(ctx, operand);
    if let Err(e) = ctx.cond.push_if(predicate) {
        ctx.error(e.to_string());
    }
    CondTag::If
}

/// `IFDEF`/`IFND` (spec.md §4.9): predicate is "is the symbol defined",
/// not an evaluated expression.
pub fn handle_ifdef(ctx: &mut ParserContext, operand: &str, negate: bool) -> CondTag {
    let name = operand.trim();
    let defined = ctx.symtab.lookup(name).map(|id| ctx.symtab.get(id).value.is_some()).unwrap_or(false);
    let predicate = if negate { !defined } else { defined };
    if let Err(e) = ctx.cond.push_if(predicate) {
        ctx.error(e.to_string());
    }
    CondTag::If
}

/// `ELSE`/`EL` (spec.md §4.9).
pub fn handle_else(ctx: &mut ParserContext) -> CondTag {
    if let Err(e) = ctx.cond.do_else() {
        ctx.error(e.to_string());
    }
    CondTag::Else
}

/// `ELSEIF` (spec.md §4.9).
pub fn handle_elseif(ctx: &mut ParserContext, operand: &str) -> CondTag {
    let predicate = eval_predicate(ctx, operand);
    if let Err(e) = ctx.cond.do_elseif(predicate) {
        ctx.error(e.to_string());
    }
    CondTag::Elif
}

/// `ENDIF`/`FIN`/`EI` (spec.md §4.9). `tolerant` selects Merlin's `FIN`
/// behavior: an extra close warns instead of erroring.
pub fn handle_endif(ctx: &mut ParserContext, tolerant: bool) -> CondTag {
    if tolerant {
        if !ctx.cond.pop_tolerant() {
            ctx.warning("FIN without matching DO/IF");
        }
    } else if let Err(e) = ctx.cond.pop() {
        ctx.error(e.to_string());
    }
    CondTag::Endif
}

/// Splits a comma-separated operand list at top-level commas, leaving
/// commas inside parentheses or string literals alone.
pub fn split_operands(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut depth = 0i32;
    let mut in_str: Option<char> = None;
    for c in text.chars() {
        match in_str {
            Some(q) => {
                cur.push(c);
                if c == q {
                    in_str = None;
                }
            }
            None => match c {
                '"' | '\'' => {
                    in_str = Some(c);
                    cur.push(c);
                }
                '(' => {
                    depth += 1;
                    cur.push(c);
                }
                ')' => {
                    depth -= 1;
                    cur.push(c);
                }
                ',' if depth == 0 => parts.push(std::mem::take(&mut cur)),
                _ => cur.push(c),
            },
        }
    }
    parts.push(cur);
    parts
}

pub fn number_opts(ctx: &ParserContext, at_prefix: AtPrefixMode) -> NumberOpts {
    NumberOpts {
        at_prefix,
        noc: ctx.options.noc,
        noi: ctx.options.noi,
    }
}

fn value_to_bytes(v: i64, elemsize: u8, big_endian: bool) -> Vec<u8> {
    let mut bytes = match elemsize {
        1 => vec![v as u8],
        2 => (v as u16).to_le_bytes().to_vec(),
        4 => (v as u32).to_le_bytes().to_vec(),
        _ => vec![v as u8],
    };
    if big_endian {
        bytes.reverse();
    }
    bytes
}

/// `DB`/`DW`/`DDB`/`DL`/`ADRL`-family directives: a comma-separated list
/// of expressions or string literals, each emitted as `elemsize` bytes.
/// An unresolved (forward-referencing) expression is emitted as a lazy
/// [`AtomKind::DataDef`] instead of erroring (spec.md §3 atom model).
pub fn emit_data_list(ctx: &mut ParserContext, operand: &str, elemsize: u8, big_endian: bool, at_prefix: AtPrefixMode) {
    for item in split_operands(operand) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if let Some(delim) = item.chars().next().filter(|c| *c == '"' || *c == '\'') {
            match parse_string_literal(item, delim, ctx.options.esc_sequences) {
                Ok((bytes, _)) => {
                    for b in bytes {
                        ctx.add_atom(AtomKind::Data(value_to_bytes(b as i64, elemsize, big_endian)), 1);
                    }
                }
                Err(e) => ctx.error(e.to_string()),
            }
            continue;
        }
        let opts = number_opts(ctx, at_prefix);
        match parse_expr(item, &mut ctx.symtab, opts) {
            Ok(expr) => {
                let pc = ctx.current_pc() as i64;
                match expr.clone().eval(pc, &|id| ctx.symtab.get(id).value) {
                    Ok(v) => ctx.add_atom(AtomKind::Data(value_to_bytes(v, elemsize, big_endian)), 1),
                    Err(_) => ctx.add_atom(AtomKind::DataDef { bitsize: elemsize * 8, expr }, 1),
                }
            }
            Err(e) => ctx.error(e.to_string()),
        }
    }
}

/// `DS`/`BS`/`RMB`-family: reserves `count` elements of `elemsize` bytes.
pub fn emit_space(ctx: &mut ParserContext, operand: &str, elemsize: u8, at_prefix: AtPrefixMode) {
    let opts = number_opts(ctx, at_prefix);
    match parse_expr(operand, &mut ctx.symtab, opts) {
        Ok(expr) => match ctx.eval_const(&expr) {
            Ok(v) => ctx.add_atom(
                AtomKind::Space {
                    count: v.max(0) as u32,
                    elemsize,
                    fill: 0,
                    flags: crate::core::atom::SpaceFlags::empty(),
                },
                1,
            ),
            Err(e) => ctx.error(e.to_string()),
        },
        Err(e) => ctx.error(e.to_string()),
    }
}

/// Post-processing applied to a string directive's byte run after the
/// bit-7 delimiter rule (spec.md §4.6 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPost {
    None,
    Az,
    AtDci,
    Inv,
    Fls,
    Rev,
    Str,
    StrL,
    Fcs,
}

fn apply_string_post(bytes: &mut Vec<u8>, post: StringPost) {
    match post {
        StringPost::None => {}
        StringPost::Az => bytes.push(0),
        StringPost::AtDci => {
            if let Some(last) = bytes.last_mut() {
                *last ^= 0x80;
            }
        }
        StringPost::Inv => {
            for b in bytes.iter_mut() {
                *b |= 0x80;
            }
        }
        StringPost::Fls => {
            for (i, b) in bytes.iter_mut().enumerate() {
                if i % 2 == 1 {
                    *b ^= 0x80;
                }
            }
        }
        StringPost::Rev => bytes.reverse(),
        StringPost::Str => {
            let n = bytes.len().min(255) as u8;
            bytes.insert(0, n);
        }
        StringPost::StrL => {
            let n = bytes.len().min(65535) as u16;
            let le = n.to_le_bytes();
            bytes.splice(0..0, le);
        }
        StringPost::Fcs => {
            if let Some(last) = bytes.last_mut() {
                *last |= 0x80;
            }
        }
    }
}

/// `ASC`/`AZ`/`AT`/`DCI`/`INV`/... (spec.md §4.6): each comma-separated
/// item is either a delimited string literal (bit-7 rule applied per
/// its own delimiter) or a byte-valued expression.
pub fn emit_string_directive(ctx: &mut ParserContext, operand: &str, post: StringPost, at_prefix: AtPrefixMode) {
    let mut bytes = Vec::new();
    for item in split_operands(operand) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let delim = item.chars().next().unwrap();
        if delim == '"' || delim == '\'' {
            match parse_string_literal(item, delim, ctx.options.esc_sequences) {
                Ok((mut b, _)) => {
                    apply_bit7(&mut b, delim);
                    bytes.append(&mut b);
                }
                Err(e) => ctx.error(e.to_string()),
            }
        } else {
            let opts = number_opts(ctx, at_prefix);
            match parse_expr(item, &mut ctx.symtab, opts) {
                Ok(expr) => match ctx.eval_const(&expr) {
                    Ok(v) => bytes.push(v as u8),
                    Err(e) => ctx.error(e.to_string()),
                },
                Err(e) => ctx.error(e.to_string()),
            }
        }
    }
    apply_string_post(&mut bytes, post);
    ctx.add_atom(AtomKind::Data(bytes), 1);
}

/// `EQU`/`=` (immutable) and `SET`/`SE` (mutable) (spec.md §4.5). Binds
/// `label` to the parsed expression, folding it to a constant when
/// possible.
pub fn handle_equate(ctx: &mut ParserContext, label: &str, operand: &str, mutable: bool, at_prefix: AtPrefixMode) {
    let opts = number_opts(ctx, at_prefix);
    match parse_expr(operand, &mut ctx.symtab, opts) {
        Ok(expr) => {
            let pc = ctx.current_pc() as i64;
            let value = expr.clone().eval(pc, &|id| ctx.symtab.get(id).value).ok();
            let id = ctx.symtab.find_or_create(label, SymbolKind::LabSym);
            let sym = ctx.symtab.get_mut(id);
            sym.expr = Some(expr);
            sym.value = value;
            if mutable {
                sym.flags |= SymbolFlags::MUTABLE;
            }
        }
        Err(e) => ctx.error(e.to_string()),
    }
}

/// SCASM `LABEL .EQ $36,37` multi-value form (spec.md §4.5): only the
/// first expression binds the symbol; the rest are parsed (for syntax
/// validation) and discarded.
pub fn handle_equate_multi(ctx: &mut ParserContext, label: &str, operand: &str, mutable: bool, at_prefix: AtPrefixMode) {
    let parts = split_operands(operand);
    let Some(first) = parts.first() else {
        ctx.error("EQU/SET requires an expression");
        return;
    };
    handle_equate(ctx, label, first, mutable, at_prefix);
    let opts = number_opts(ctx, at_prefix);
    for extra in &parts[1..] {
        if let Err(e) = parse_expr(extra, &mut ctx.symtab, opts) {
            ctx.error(e.to_string());
        }
    }
}

/// `XDEF`/`XREF`/`GLOBAL`/`WEAK`/`LOCAL`/... (spec.md §4.4 table): sets
/// `flag` on each named symbol, enforcing the monotonic-kind invariant.
pub fn set_symbol_flag(ctx: &mut ParserContext, operand: &str, flag: SymbolFlags, kind_if_new: SymbolKind) {
    for name in split_operands(operand) {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let id = ctx.symtab.find_or_create(name, kind_if_new);
        let existing = ctx.symtab.get(id).flags;
        match crate::core::context::bind_flag_monotonic(existing, flag) {
            Ok(f) => ctx.symtab.get_mut(id).flags = f,
            Err(e) => ctx.error(e),
        }
    }
}

/// `MX expr` (spec.md §4.10): sets the tracked accumulator/index sizes
/// directly from a two-bit mask and implies CPU >= 65816.
pub fn handle_mx(ctx: &mut ParserContext, operand: &str) {
    let opts = number_opts(ctx, AtPrefixMode::None);
    let expr = match parse_expr(operand, &mut ctx.symtab, opts) {
        Ok(e) => e,
        Err(e) => {
            ctx.error(e.to_string());
            return;
        }
    };
    let v = match ctx.eval_const(&expr) {
        Ok(v) => v,
        Err(_) => {
            ctx.error("MX requires a constant expression");
            return;
        }
    };
    ctx.mode816.a8 = v & 0b10 != 0;
    ctx.mode816.xy8 = v & 0b01 != 0;
    ctx.cpu_level = ctx.cpu_level.max(CpuLevel::Wdc65816);
}

/// `LONGA ON|OFF` (spec.md §4.10).
pub fn handle_longa(ctx: &mut ParserContext, operand: &str) {
    let on = operand.trim().eq_ignore_ascii_case("on");
    ctx.mode816.a8 = !on;
    ctx.cpu_level = ctx.cpu_level.max(CpuLevel::Wdc65816);
}

/// `LONGI ON|OFF` (spec.md §4.10).
pub fn handle_longi(ctx: &mut ParserContext, operand: &str) {
    let on = operand.trim().eq_ignore_ascii_case("on");
    ctx.mode816.xy8 = !on;
    ctx.cpu_level = ctx.cpu_level.max(CpuLevel::Wdc65816);
}

/// `REP #imm`/`SEP #imm` (spec.md §4.10): `SEP` sets the named status
/// bits (narrows to 8-bit), `REP` clears them (widens to 16-bit). A
/// missing `#` is auto-inserted for Merlin compatibility.
pub fn handle_rep_sep(ctx: &mut ParserContext, operand: &str, is_sep: bool) {
    let text = operand.trim().trim_start_matches('#');
    let opts = number_opts(ctx, AtPrefixMode::None);
    let expr = match parse_expr(text, &mut ctx.symtab, opts) {
        Ok(e) => e,
        Err(e) => {
            ctx.error(e.to_string());
            return;
        }
    };
    let v = match ctx.eval_const(&expr) {
        Ok(v) => v,
        Err(_) => {
            ctx.error("REP/SEP requires a constant expression");
            return;
        }
    };
    if v & 0x20 != 0 {
        ctx.mode816.a8 = is_sep;
    }
    if v & 0x10 != 0 {
        ctx.mode816.xy8 = is_sep;
    }
    ctx.cpu_level = ctx.cpu_level.max(CpuLevel::Wdc65816);
}

/// `XC`/`XC OFF` (spec.md §4.10): steps the CPU level up one notch, or
/// resets to 6502 with both sizes back at 8 bits.
pub fn handle_xc(ctx: &mut ParserContext, operand: &str) {
    if operand.trim().eq_ignore_ascii_case("off") {
        ctx.cpu_level = CpuLevel::Mos6502;
        ctx.mode816 = Mode816::default();
    } else {
        ctx.cpu_level = match ctx.cpu_level {
            CpuLevel::Mos6502 => CpuLevel::Wdc65c02,
            CpuLevel::Wdc65c02 | CpuLevel::Wdc65816 => CpuLevel::Wdc65816,
        };
    }
}

/// `ORG`/`OR` (spec.md §4.4 "Origin & section"). Setting the origin
/// before any content exists simply fixes the section's base; doing so
/// after content has been emitted has no real multi-chunk model in this
/// crate's single-origin `Section`, so it is approximated as a bare PC
/// reset with a warning.
pub fn handle_org(ctx: &mut ParserContext, operand: &str, at_prefix: AtPrefixMode) {
    let opts = number_opts(ctx, at_prefix);
    let expr = match parse_expr(operand, &mut ctx.symtab, opts) {
        Ok(e) => e,
        Err(e) => {
            ctx.error(e.to_string());
            return;
        }
    };
    let v = match ctx.eval_const(&expr) {
        Ok(v) => v as u32,
        Err(e) => {
            ctx.error(e.to_string());
            return;
        }
    };
    let id = ctx.current_section();
    let was_empty = ctx.sections.get(id).atoms.is_empty();
    if !was_empty {
        ctx.warning("ORG after content was emitted is approximated as a PC reset");
    }
    let sec = ctx.sections.get_mut(id);
    if was_empty {
        sec.org = v;
    }
    sec.pc = v;
}

/// Parses a `REPT`/`LUP` header (spec.md §4.8): `count[,iter_name]`.
pub fn parse_repeat_header(ctx: &mut ParserContext, operand: &str, at_prefix: AtPrefixMode) -> Option<RepeatSpec> {
    let parts = split_operands(operand);
    let count_text = parts.first()?.trim().to_string();
    let opts = number_opts(ctx, at_prefix);
    let expr = parse_expr(&count_text, &mut ctx.symtab, opts).ok()?;
    let count = ctx.eval_const(&expr).ok()?;
    let iter_name = parts.get(1).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    Some(RepeatSpec { count, iter_name })
}

/// Parses a `MAC`/`MACRO`/`MA` header: the macro name and its comma-
/// separated named-parameter list, if any (spec.md §4.7).
pub fn parse_macro_header(operand: &str) -> (String, Vec<String>) {
    let mut it = operand.splitn(2, char::is_whitespace);
    let name = it.next().unwrap_or("").trim().to_string();
    let rest = it.next().unwrap_or("").trim();
    let params = if rest.is_empty() {
        Vec::new()
    } else {
        split_operands(rest).into_iter().map(|s| s.trim().to_string()).collect()
    };
    (name, params)
}

/// `DUM addr`/`DSECT` (spec.md §4.11): saves the current section (only
/// on the outermost open) and switches to offset-counter mode.
pub fn handle_dum(ctx: &mut ParserContext, operand: &str, at_prefix: AtPrefixMode) {
    let already = !ctx.dsect_stack.is_empty();
    let addr = if operand.trim().is_empty() {
        if already {
            ctx.dsect_stack.last().unwrap().offset
        } else {
            0
        }
    } else {
        let opts = number_opts(ctx, at_prefix);
        match parse_expr(operand, &mut ctx.symtab, opts) {
            Ok(expr) => match ctx.eval_const(&expr) {
                Ok(v) => v as u32,
                Err(_) => {
                    ctx.error("DUM/DSECT address must be constant");
                    return;
                }
            },
            Err(e) => {
                ctx.error(e.to_string());
                return;
            }
        }
    };
    if already {
        ctx.dsect_stack.last_mut().unwrap().offset = addr;
    } else {
        let saved = ctx.current_section();
        ctx.dsect_stack.push(DsectFrame { saved_section: saved, offset: addr });
    }
}

/// `DEND`/`ED` (spec.md §4.11): restores the section saved by the
/// outermost `DUM`/`DSECT`.
pub fn handle_dend(ctx: &mut ParserContext) {
    if let Some(frame) = ctx.dsect_stack.pop() {
        ctx.set_section(frame.saved_section);
    } else {
        ctx.warning("DEND without matching DUM/DSECT");
    }
}

/// Begins recording a macro body (spec.md §4.7). The matching
/// terminator is recognized by the dialect's own `parse`, which calls
/// [`feed_macro_capture`] on every subsequent line until it does.
pub fn start_macro_capture(ctx: &mut ParserContext, name: &str, params: Vec<String>) {
    ctx.macro_capture = Some(MacroCapture {
        name: name.to_string(),
        params,
        body: Vec::new(),
        start_file: ctx.cur_file.clone(),
        start_line: ctx.cur_line,
    });
}

/// Feeds one raw source line to an in-progress macro capture. Returns
/// `true` if a capture was active (and so consumed the line), `false`
/// if there was nothing to capture and the dialect should dispatch the
/// line normally.
pub fn feed_macro_capture(ctx: &mut ParserContext, raw_line: &str, is_terminator: impl Fn(&str) -> bool) -> bool {
    if ctx.macro_capture.is_none() {
        return false;
    }
    if is_terminator(raw_line.trim()) {
        let cap = ctx.macro_capture.take().unwrap();
        ctx.define_macro(MacroDef {
            name: cap.name,
            params: cap.params,
            body: cap.body,
            def_file: cap.start_file,
            def_line: cap.start_line,
        });
    } else {
        ctx.macro_capture.as_mut().unwrap().body.push(raw_line.to_string());
    }
    true
}

/// Begins recording a `REPT`/`LUP` body (spec.md §4.8).
pub fn start_repeat_capture(ctx: &mut ParserContext, spec: RepeatSpec) {
    ctx.repeat_capture = Some(RepeatCapture { spec, body: Vec::new() });
}

/// Feeds one raw line to an in-progress repeat capture, pushing the
/// replay frames onto [`ParserContext::source`] once the terminator is
/// seen. Same `true`/`false` contract as [`feed_macro_capture`].
pub fn feed_repeat_capture(ctx: &mut ParserContext, raw_line: &str, is_terminator: impl Fn(&str) -> bool) -> bool {
    if ctx.repeat_capture.is_none() {
        return false;
    }
    if is_terminator(raw_line.trim()) {
        let cap = ctx.repeat_capture.take().unwrap();
        ctx.source.push_repeat(cap.body, cap.spec.count);
    } else {
        ctx.repeat_capture.as_mut().unwrap().body.push(raw_line.to_string());
    }
    true
}

use crate::repeat::RepeatSpec;
use crate::macros::MacroDef;

/// Detects and actions a macro invocation (bare mnemonic, or an
/// explicit name already stripped of its sigil by the caller),
/// pushing an expansion frame onto `ctx.source` (spec.md §4.7).
/// Returns `false` if `name` is not a known macro.
pub fn try_invoke_macro(ctx: &mut ParserContext, name: &str, operand: &str) -> bool {
    let Some(def) = ctx.macros.lookup(name).cloned() else {
        return false;
    };
    let params: Vec<String> = split_operands(operand)
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let unique_id = ctx.unique_ids.alloc();
    ctx.scasm_private_context += 1;
    ctx.source.push_macro(def.name.clone(), unique_id, def.body, params);
    true
}

/// Expands macro-body escape sequences in `line` if the current source
/// frame is a macro instance (spec.md §4.7 table); returns `None` when
/// there's nothing to expand (no active macro frame) so the caller
/// falls back to using `line` verbatim.
pub fn expand_macro_line(ctx: &mut ParserContext, line: &str, dialect: MacroDialect) -> Option<String> {
    let frame = ctx.source.current()?;
    let unique_id = match &frame.origin {
        FrameOrigin::MacroInstance { unique_id, .. } => *unique_id,
        _ => return None,
    };
    let params = frame.parameters.clone();
    let named: HashMap<String, String> = HashMap::new();
    let result = {
        let symtab = &ctx.symtab;
        let lookup = |name: &str| symtab.lookup(name).and_then(|id| symtab.get(id).value);
        let ectx = ExpansionContext {
            dialect,
            params: &params,
            named: &named,
            unique_id,
            lookup_symbol: &lookup,
        };
        expand_line(line, &ectx)
    };
    match result {
        Ok(s) => Some(s),
        Err(e) => {
            ctx.error(e.to_string());
            None
        }
    }
}

/// `MEXIT`/`EXITMACRO` (spec.md §4.7): pops the active macro frame.
pub fn exit_macro(ctx: &mut ParserContext) {
    ctx.source.exit_current_macro();
}

#[allow(dead_code)]
fn unused_lexerror_reference(_: LexError) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DialectOptions;
    use crate::core::section::SectionAttrs;

    #[test]
    fn split_operands_respects_parens_and_quotes() {
        let parts = split_operands("1,(2,3),\"a,b\"");
        assert_eq!(parts, vec!["1", "(2,3)", "\"a,b\""]);
    }

    #[test]
    fn emit_data_list_folds_constants() {
        let mut ctx = ParserContext::new(DialectOptions::default());
        ctx.new_section("code", SectionAttrs::default(), 0);
        emit_data_list(&mut ctx, "1,2,3", 1, false, AtPrefixMode::None);
        let sec = ctx.sections.current().unwrap();
        let bytes: Vec<u8> = ctx
            .sections
            .get(sec)
            .atoms
            .iter()
            .filter_map(|a| match &a.kind {
                AtomKind::Data(b) => Some(b[0]),
                _ => None,
            })
            .collect();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn equate_binds_immutable_symbol() {
        let mut ctx = ParserContext::new(DialectOptions::default());
        ctx.new_section("code", SectionAttrs::default(), 0);
        handle_equate(&mut ctx, "X", "5", false, AtPrefixMode::None);
        let id = ctx.symtab.lookup("X").unwrap();
        assert_eq!(ctx.symtab.get(id).value, Some(5));
        assert!(!ctx.symtab.get(id).flags.contains(SymbolFlags::MUTABLE));
    }

    #[test]
    fn xdef_sets_export_flag() {
        let mut ctx = ParserContext::new(DialectOptions::default());
        set_symbol_flag(&mut ctx, "FOO", SymbolFlags::EXPORT, SymbolKind::LabSym);
        let id = ctx.symtab.lookup("FOO").unwrap();
        assert!(ctx.symtab.get(id).flags.contains(SymbolFlags::EXPORT));
    }

    #[test]
    fn dum_dend_round_trip_restores_section() {
        let mut ctx = ParserContext::new(DialectOptions::default());
        let outer = ctx.new_section("code", SectionAttrs::default(), 0x8000);
        handle_dum(&mut ctx, "$1000", AtPrefixMode::None);
        assert_eq!(ctx.current_pc(), 0x1000);
        handle_dend(&mut ctx);
        assert_eq!(ctx.current_section(), outer);
    }

    #[test]
    fn mx_sets_both_sizes() {
        let mut ctx = ParserContext::new(DialectOptions::default());
        handle_mx(&mut ctx, "%11");
        assert!(ctx.mode816.a8);
        assert!(ctx.mode816.xy8);
        handle_mx(&mut ctx, "%00");
        assert!(!ctx.mode816.a8);
        assert!(!ctx.mode816.xy8);
    }

    #[test]
    fn rep_widens_sep_narrows() {
        let mut ctx = ParserContext::new(DialectOptions::default());
        handle_rep_sep(&mut ctx, "$30", true);
        assert!(ctx.mode816.a8 && ctx.mode816.xy8);
        handle_rep_sep(&mut ctx, "$30", false);
        assert!(!ctx.mode816.a8 && !ctx.mode816.xy8);
    }
}
