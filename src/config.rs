//! Per-dialect option flags: the CLI surface of spec.md §6, factored out
//! of the out-of-scope CLI/config layer into a plain struct the library
//! can be driven by directly (tests build one with [`DialectOptions::default`]
//! and override fields; [`crate::dialect::DialectKind`] picks sane
//! per-dialect defaults via [`DialectOptions::for_dialect`]).

use crate::dialect::DialectKind;

#[derive(Debug, Clone)]
pub struct DialectOptions {
    /// `-nocase`: fold symbol names to a single case in the symbol table.
    pub nocase: bool,
    /// `-dotdir`: accept directives with an optional leading `.` even in
    /// a dotless dialect (Merlin).
    pub dotdir: bool,
    /// `-autoexp`: SCASM auto-expand macros with no leading sigil;
    /// no-op for Merlin.
    pub autoexp: bool,
    /// `-org=N`: default origin if no `ORG` directive is seen.
    pub org: u32,
    /// `-i`: ignore-trailing — tolerate and silently comment out text
    /// after a complete operand.
    pub igntrail: bool,
    /// `-noc`: disable C-style number prefixes (`0x`, `0b`, leading `0`).
    pub noc: bool,
    /// `-noi`: disable Intel-style numeric suffixes (`h`, `o`, `q`, `b`).
    pub noi: bool,
    /// `-ast`: SCASM `.AS`/`.AT` style string literals w/o delimiter bit7 rule.
    pub ast: bool,
    /// `-ldots`: require a leading `.` on SCASM local labels.
    pub ldots: bool,
    /// `-sect`: enable explicit `SECTION` directive support.
    pub sect: bool,
    /// Escape sequences (`\n`, `\t`, ...) enabled inside string literals.
    pub esc_sequences: bool,

    /// `/CMD`-only: `-exec=SYM` selects the entry symbol.
    pub exec_symbol: Option<String>,
    /// Merlin `USE 4/...` prefix override (`VASM_MERLIN_PREFIX_4`).
    pub merlin_prefix_4: Option<String>,
}

impl Default for DialectOptions {
    fn default() -> Self {
        Self {
            nocase: false,
            dotdir: false,
            autoexp: false,
            org: 0,
            igntrail: false,
            noc: false,
            noi: false,
            ast: false,
            ldots: false,
            sect: false,
            esc_sequences: false,
            exec_symbol: None,
            merlin_prefix_4: None,
        }
    }
}

impl DialectOptions {
    /// Historical per-dialect defaults: EDTASM is always case-sensitive
    /// and has no dot-directives; Merlin is case-insensitive; SCASM is
    /// dot-prefixed and case-insensitive.
    pub fn for_dialect(kind: DialectKind) -> Self {
        let mut opts = Self::default();
        match kind {
            DialectKind::Edtasm => {
                opts.nocase = false;
            }
            DialectKind::Merlin => {
                opts.nocase = true;
            }
            DialectKind::Scasm => {
                opts.nocase = true;
                opts.dotdir = true;
            }
        }
        opts
    }
}
