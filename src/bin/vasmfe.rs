//! Thin CLI driver (SPEC_FULL §6): selects a dialect, applies the flag
//! set, runs the parser over one file, writes AOF or `/CMD`. Exists to
//! exercise the library end-to-end, not to replace the real vasm driver.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::process::ExitCode;

use vasm_frontends::config::DialectOptions;
use vasm_frontends::core::symbol::SymbolFlags;
use vasm_frontends::dialect::directives::expand_macro_line;
use vasm_frontends::dialect::{edtasm::Edtasm, merlin::Merlin, scasm::Scasm, CondTag, Dialect, DialectKind};
use vasm_frontends::macros::MacroDialect;
use vasm_frontends::output::aof::{SymAttrFlags, SymbolEntry, AOFSYM_EXTERN, AOFSYM_GLOBAL, AOFSYM_LOCAL};
use vasm_frontends::output::{aof, cmd};
use vasm_frontends::ParserContext;

struct Args {
    dialect: DialectKind,
    format: String,
    input: String,
    output: String,
    options: DialectOptions,
}

fn parse_args() -> Result<Args, String> {
    let mut dialect = None;
    let mut format = "aof".to_string();
    let mut input = None;
    let mut output = "a.out".to_string();
    let mut options = DialectOptions::default();

    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--dialect" => {
                let v = iter.next().ok_or("--dialect needs a value")?;
                dialect = Some(match v.as_str() {
                    "edtasm" => DialectKind::Edtasm,
                    "merlin" => DialectKind::Merlin,
                    "scasm" => DialectKind::Scasm,
                    other => return Err(format!("unknown dialect `{other}`")),
                });
            }
            "--format" => format = iter.next().ok_or("--format needs a value")?,
            "-o" => output = iter.next().ok_or("-o needs a value")?,
            "-nocase" => options.nocase = true,
            "-dotdir" => options.dotdir = true,
            "-autoexp" => options.autoexp = true,
            "-i" => options.igntrail = true,
            "-noc" => options.noc = true,
            "-noi" => options.noi = true,
            "-ast" => options.ast = true,
            "-ldots" => options.ldots = true,
            "-sect" => options.sect = true,
            arg if arg.starts_with("-org=") => {
                options.org = arg["-org=".len()..].parse().map_err(|_| "invalid -org value")?;
            }
            arg if arg.starts_with("-exec=") => {
                options.exec_symbol = Some(arg["-exec=".len()..].to_string());
            }
            other => input = Some(other.to_string()),
        }
    }

    let dialect = dialect.ok_or("missing --dialect edtasm|merlin|scasm")?;
    let input = input.ok_or("missing input file")?;
    Ok(Args {
        dialect,
        format,
        input,
        output,
        options,
    })
}

fn macro_dialect(kind: DialectKind) -> MacroDialect {
    match kind {
        DialectKind::Edtasm => MacroDialect::Edtasm,
        DialectKind::Merlin => MacroDialect::Merlin,
        DialectKind::Scasm => MacroDialect::Scasm,
    }
}

/// Drains the source stack, feeding each logical line through macro-body
/// escape expansion (when the current frame is a macro instance) before
/// handing it to the dialect. A directive's returned [`CondTag`] is
/// already acted on internally (each dialect mutates `ctx.cond` itself
/// via its `dispatch_cond` helper before returning); the driver only
/// needs to notice that a tag came back at all, for diagnostics.
fn drive(ctx: &mut ParserContext, dialect: &dyn Dialect, mdialect: MacroDialect) -> Result<(), String> {
    let mut last_tag = CondTag::None;
    loop {
        let line = ctx.source.read_next_line().map_err(|e| e.to_string())?;
        let Some(raw) = line else { break };
        ctx.cur_line = ctx.source.current().map(|f| f.line_number()).unwrap_or(ctx.cur_line);
        let expanded = expand_macro_line(ctx, &raw, mdialect);
        let line = expanded.as_deref().unwrap_or(&raw);
        last_tag = dialect.parse(ctx, line);
    }
    log::trace!("last directive tag seen: {last_tag:?}");

    if ctx.cond.check_closed().is_err() {
        ctx.fatal("unclosed conditional block at end of file");
    }
    if ctx.macro_capture.is_some() {
        ctx.fatal("unterminated macro definition at end of file");
    }
    if ctx.repeat_capture.is_some() {
        ctx.fatal("unterminated repeat block at end of file");
    }
    Ok(())
}

/// Builds the AOF symbol table entries from `ctx.symtab` (spec.md §4.12
/// "Symbols"): an `Import` is `AOFSYM_EXTERN`; `EXPORT`/`XDEF` is
/// `AOFSYM_GLOBAL`; everything else is `AOFSYM_LOCAL`. A symbol with no
/// bound section (an equate, or an import) is absolute.
fn build_symbol_entries(ctx: &ParserContext) -> Vec<SymbolEntry> {
    ctx.symtab
        .iter()
        .map(|(_, sym)| {
            let binding = if sym.kind == vasm_frontends::core::symbol::SymbolKind::Import {
                AOFSYM_EXTERN
            } else if sym.flags.intersects(SymbolFlags::EXPORT | SymbolFlags::XDEF) {
                AOFSYM_GLOBAL
            } else {
                AOFSYM_LOCAL
            };
            let mut flags = SymAttrFlags::empty();
            if sym.section.is_none() {
                flags |= SymAttrFlags::ABS;
            }
            if ctx.symtab.nocase {
                flags |= SymAttrFlags::NOCASE;
            }
            if sym.flags.contains(SymbolFlags::WEAK) {
                flags |= SymAttrFlags::WEAK;
            }
            if sym.flags.contains(SymbolFlags::COMMON) {
                flags |= SymAttrFlags::COMMON;
            }
            SymbolEntry {
                name: sym.name.clone(),
                binding,
                flags,
                value: sym.value.unwrap_or(0) as u32,
                area_name: sym.section.map(|id| ctx.sections.get(id).name.clone()),
            }
        })
        .collect()
}

fn run() -> Result<(), String> {
    let args = parse_args()?;
    let source = fs::read_to_string(&args.input).map_err(|e| format!("reading `{}`: {e}", args.input))?;

    let nocase_default = DialectOptions::for_dialect(args.dialect).nocase;
    let mut options = args.options;
    options.nocase |= nocase_default;

    let dialect: Box<dyn Dialect> = match args.dialect {
        DialectKind::Edtasm => Box::new(Edtasm),
        DialectKind::Merlin => Box::new(Merlin),
        DialectKind::Scasm => Box::new(Scasm),
    };

    let mut ctx = ParserContext::new(options);
    dialect.init(&mut ctx);
    ctx.source.push_include(args.input.clone(), source.lines().map(str::to_string).collect());
    ctx.cur_file = args.input.clone();

    drive(&mut ctx, dialect.as_ref(), macro_dialect(args.dialect))?;

    for diag in &ctx.diagnostics {
        log::warn!("{diag}");
    }

    if ctx.had_fatal() {
        return Err("aborted: fatal error during parsing".to_string());
    }

    let bytes = match args.format.as_str() {
        "aof" => {
            let symbols = build_symbol_entries(&ctx);
            // No back end in this crate produces `StdReloc`s yet (SPEC_FULL
            // §4.12 leaves relocation *generation* to the dialects' future
            // expression-to-instruction lowering, which isn't implemented
            // here) — every area is written reloc-free until that lowering
            // exists.
            aof::write_aof(&ctx.sections, &symbols, &HashMap::new(), None).map_err(|e| e.to_string())?
        }
        "cmd" => {
            cmd::check_overlap(&ctx.sections).map_err(|e| e.to_string())?;
            let exec = cmd::resolve_exec_address(
                options_exec(&ctx),
                &|name| ctx.symtab.lookup(name).and_then(|id| ctx.symtab.get(id).value),
                ctx.sections.first().map(|id| ctx.sections.get(id).org),
            )
            .map_err(|e| e.to_string())?;
            cmd::write_cmd(&ctx.sections, exec)
        }
        other => return Err(format!("unknown output format `{other}`")),
    };

    fs::write(&args.output, bytes).map_err(|e| format!("writing `{}`: {e}", args.output))?;

    if ctx.had_error() {
        return Err("completed with errors".to_string());
    }
    Ok(())
}

fn options_exec(ctx: &ParserContext) -> Option<&str> {
    ctx.options.exec_symbol.as_deref()
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("vasmfe: {e}");
            ExitCode::FAILURE
        }
    }
}
