//! Macro Engine (spec.md §4.7): definition, invocation bookkeeping, and
//! escape expansion. Source-frame pushing for an invocation is the
//! caller's job (see [`crate::source::SourceStack::push_macro`]); this
//! module owns the macro table and the text-substitution rules.

use std::collections::HashMap;

use crate::error::MacroError;

/// A macro's recorded body, one raw source line at a time
/// (spec.md §3 "Macro").
#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<String>,
    pub def_file: String,
    pub def_line: u32,
}

/// Macro name table, keyed case-insensitively when `nocase` (matching
/// [`crate::core::symbol::SymbolTable`]'s fold rule, since both tables
/// are driven by the same dialect option in the original implementation).
#[derive(Debug, Default)]
pub struct MacroTable {
    macros: HashMap<String, MacroDef>,
    nocase: bool,
}

impl MacroTable {
    pub fn new(nocase: bool) -> Self {
        Self {
            macros: HashMap::new(),
            nocase,
        }
    }

    fn key(&self, name: &str) -> String {
        if self.nocase {
            name.to_ascii_uppercase()
        } else {
            name.to_string()
        }
    }

    pub fn define(&mut self, def: MacroDef) -> Result<(), MacroError> {
        let key = self.key(&def.name);
        if self.macros.contains_key(&key) {
            return Err(MacroError::Redefined(def.name));
        }
        self.macros.insert(key, def);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&MacroDef> {
        self.macros.get(&self.key(name))
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(&self.key(name))
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

/// Monotonic `\@`/`]0`-style unique-id source, one counter per
/// translation unit (spec.md §8: "the `\@` / `]0` unique token within
/// the expansion is distinct from any prior or later invocation's
/// token").
#[derive(Debug, Default)]
pub struct UniqueIdAllocator {
    next: u32,
}

impl UniqueIdAllocator {
    pub fn alloc(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroDialect {
    Edtasm,
    Merlin,
    Scasm,
}

/// Maximum size of an expanded line (spec.md §4.7: overflow must be
/// detected and reported as "macro expansion too long").
pub const MAX_EXPANSION_LEN: usize = 4096;

pub struct ExpansionContext<'a> {
    pub dialect: MacroDialect,
    pub params: &'a [String],
    pub named: &'a HashMap<String, String>,
    pub unique_id: u32,
    pub lookup_symbol: &'a dyn Fn(&str) -> Option<i64>,
}

fn positional_param(params: &[String], digit: u8) -> String {
    let idx = if digit == 0 { 10 } else { digit as usize };
    params.get(idx - 1).cloned().unwrap_or_default()
}

fn read_ident(s: &str) -> &str {
    let len = s
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
        .count();
    &s[..len]
}

/// Expands one already-fetched body line's escape sequences
/// (spec.md §4.7 table). Returns the substituted line.
pub fn expand_line(line: &str, ctx: &ExpansionContext) -> Result<String, MacroError> {
    let mut out = String::new();
    let mut rest = line;
    while !rest.is_empty() {
        let bytes = rest.as_bytes();
        let (text, adv) = match ctx.dialect {
            MacroDialect::Edtasm if bytes[0] == b'\\' && bytes.get(1) == Some(&b'\\') => {
                expand_edtasm_escape(rest, ctx)?
            }
            MacroDialect::Merlin | MacroDialect::Scasm if bytes[0] == b'\\' => {
                expand_backslash_escape(rest, ctx)?
            }
            MacroDialect::Merlin | MacroDialect::Scasm if bytes[0] == b']' => {
                expand_bracket_escape(rest, ctx)
            }
            _ => {
                let n = rest.chars().next().map(|c| c.len_utf8()).unwrap_or(1);
                (rest[..n].to_string(), n)
            }
        };
        out.push_str(&text);
        rest = &rest[adv..];
        if out.len() > MAX_EXPANSION_LEN {
            return Err(MacroError::ExpansionTooLong);
        }
    }
    Ok(out)
}

fn expand_backslash_escape(rest: &str, ctx: &ExpansionContext) -> Result<(String, usize), MacroError> {
    let bytes = rest.as_bytes();
    match bytes.get(1) {
        Some(d) if d.is_ascii_digit() => Ok((positional_param(ctx.params, d - b'0'), 2)),
        Some(b'@') => Ok((format!("_{:06}", ctx.unique_id), 2)),
        Some(b'(') if bytes.get(2) == Some(&b')') => Ok((String::new(), 3)),
        Some(c) if c.is_ascii_alphabetic() || *c == b'_' => {
            let name = read_ident(&rest[1..]);
            let adv = 1 + name.len();
            if let Some(val) = ctx.named.get(name) {
                Ok((val.clone(), adv))
            } else if let Some(v) = (ctx.lookup_symbol)(name) {
                Ok((v.unsigned_abs().to_string(), adv))
            } else {
                Err(MacroError::UnknownParameter(name.to_string()))
            }
        }
        _ => Ok(("\\".to_string(), 1)),
    }
}

fn expand_bracket_escape(rest: &str, ctx: &ExpansionContext) -> (String, usize) {
    let bytes = rest.as_bytes();
    match ctx.dialect {
        MacroDialect::Merlin => match bytes.get(1) {
            Some(b']') => ("]".to_string(), 2),
            Some(b'0') => (ctx.params.len().to_string(), 2),
            Some(d) if (b'1'..=b'8').contains(d) => (positional_param(ctx.params, d - b'0'), 2),
            _ => ("]".to_string(), 1),
        },
        MacroDialect::Scasm => match bytes.get(1) {
            Some(b'#') => (ctx.params.len().to_string(), 2),
            Some(d) if d.is_ascii_digit() => (positional_param(ctx.params, d - b'0'), 2),
            _ => ("]".to_string(), 1),
        },
        MacroDialect::Edtasm => ("]".to_string(), 1),
    }
}

fn expand_edtasm_escape(rest: &str, ctx: &ExpansionContext) -> Result<(String, usize), MacroError> {
    let bytes = rest.as_bytes();
    match bytes.get(2) {
        Some(d) if d.is_ascii_digit() => Ok((positional_param(ctx.params, d - b'0'), 3)),
        Some(b'@') => Ok((format!("_{:06}", ctx.unique_id), 3)),
        Some(b'.') => {
            let name = read_ident(&rest[3..]);
            let adv = 3 + name.len();
            Ok((format!("{}_{:06}", name, ctx.unique_id), adv))
        }
        _ => Ok(("\\\\".to_string(), 2)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_symbols(_: &str) -> Option<i64> {
        None
    }

    #[test]
    fn define_then_redefine_errors() {
        let mut table = MacroTable::new(false);
        let def = MacroDef {
            name: "PRINT".into(),
            params: vec![],
            body: vec![],
            def_file: "a.asm".into(),
            def_line: 1,
        };
        table.define(def.clone()).unwrap();
        assert!(matches!(table.define(def), Err(MacroError::Redefined(_))));
    }

    #[test]
    fn nocase_folds_macro_names() {
        let mut table = MacroTable::new(true);
        table
            .define(MacroDef {
                name: "Print".into(),
                params: vec![],
                body: vec![],
                def_file: "a.asm".into(),
                def_line: 1,
            })
            .unwrap();
        assert!(table.lookup("PRINT").is_some());
    }

    #[test]
    fn merlin_bracket_params_and_count() {
        let named = HashMap::new();
        let params = vec!["5".to_string(), "10".to_string()];
        let ctx = ExpansionContext {
            dialect: MacroDialect::Merlin,
            params: &params,
            named: &named,
            unique_id: 7,
            lookup_symbol: &no_symbols,
        };
        assert_eq!(expand_line("DB ]1,]2,]0", &ctx).unwrap(), "DB 5,10,2");
    }

    #[test]
    fn scasm_param_zero_means_tenth() {
        let named = HashMap::new();
        let params: Vec<String> = (1..=10).map(|n| n.to_string()).collect();
        let ctx = ExpansionContext {
            dialect: MacroDialect::Scasm,
            params: &params,
            named: &named,
            unique_id: 0,
            lookup_symbol: &no_symbols,
        };
        assert_eq!(expand_line("DB ]0", &ctx).unwrap(), "DB 10");
    }

    #[test]
    fn unique_id_formats_six_digits() {
        let named = HashMap::new();
        let params = vec![];
        let ctx = ExpansionContext {
            dialect: MacroDialect::Merlin,
            params: &params,
            named: &named,
            unique_id: 42,
            lookup_symbol: &no_symbols,
        };
        assert_eq!(expand_line("L\\@", &ctx).unwrap(), "L_000042");
    }

    #[test]
    fn edtasm_doubled_backslash_param() {
        let named = HashMap::new();
        let params = vec!["#$58".to_string()];
        let ctx = ExpansionContext {
            dialect: MacroDialect::Edtasm,
            params: &params,
            named: &named,
            unique_id: 0,
            lookup_symbol: &no_symbols,
        };
        assert_eq!(expand_line("LD  A,\\\\1", &ctx).unwrap(), "LD  A,#$58");
    }

    #[test]
    fn edtasm_local_label_suffix() {
        let named = HashMap::new();
        let params = vec![];
        let ctx = ExpansionContext {
            dialect: MacroDialect::Edtasm,
            params: &params,
            named: &named,
            unique_id: 3,
            lookup_symbol: &no_symbols,
        };
        assert_eq!(expand_line("\\\\.loop", &ctx).unwrap(), "loop_000003");
    }

    #[test]
    fn unique_ids_distinct_across_invocations() {
        let named = HashMap::new();
        let params = vec![];
        let ctx1 = ExpansionContext {
            dialect: MacroDialect::Merlin,
            params: &params,
            named: &named,
            unique_id: 1,
            lookup_symbol: &no_symbols,
        };
        let ctx2 = ExpansionContext {
            unique_id: 2,
            ..ExpansionContext {
                dialect: MacroDialect::Merlin,
                params: &params,
                named: &named,
                unique_id: 0,
                lookup_symbol: &no_symbols,
            }
        };
        assert_ne!(
            expand_line("\\@", &ctx1).unwrap(),
            expand_line("\\@", &ctx2).unwrap()
        );
    }

    #[test]
    fn expansion_too_long_errors() {
        let named = HashMap::new();
        let params = vec!["x".repeat(MAX_EXPANSION_LEN + 10)];
        let ctx = ExpansionContext {
            dialect: MacroDialect::Merlin,
            params: &params,
            named: &named,
            unique_id: 0,
            lookup_symbol: &no_symbols,
        };
        assert!(matches!(expand_line("\\1", &ctx), Err(MacroError::ExpansionTooLong)));
    }
}
