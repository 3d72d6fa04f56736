//! The `Dialect` trait (spec.md §9 "Dialect selection") and the three
//! concrete syntaxes. Each dialect owns its own lexer quirks and
//! directive table (spec.md §9 "Dialect lexers are not orthogonal") and
//! shares only the low-level pieces in [`crate::lexer`], [`crate::macros`],
//! [`crate::repeat`], and [`crate::cond`].

pub mod directives;
pub mod edtasm;
pub mod expr_parse;
pub mod merlin;
pub mod scasm;

use crate::core::context::ParserContext;
use crate::error::Diagnostic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectKind {
    Edtasm,
    Merlin,
    Scasm,
}

/// A directive's effect on the conditional skip-scanner
/// (spec.md §4.4: "a small tagged subset ... driving the conditional
/// stack").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondTag {
    None,
    If,
    Else,
    Elif,
    Endif,
}

/// The per-dialect capability set named in spec.md §9: `init`, `parse`,
/// `defsect`, `args`, `parse_macro_arg`, `expand_macro`,
/// `get_local_label`, `const_prefix`, `const_suffix`, and (EDTASM only)
/// `chkidend`.
pub trait Dialect {
    fn kind(&self) -> DialectKind;

    /// `init`: dialect-specific `ParserContext` setup (default section,
    /// reserved symbols).
    fn init(&self, ctx: &mut ParserContext);

    /// `parse`: processes one raw source line — including its own label
    /// field, which each dialect splits off itself since the convention
    /// differs (column-1 token vs. `dotdir`'s leading `.`) — returning
    /// the directive's [`CondTag`] for the skip-scanner and appending
    /// any diagnostics to `ctx`.
    fn parse(&self, ctx: &mut ParserContext, line: &str) -> CondTag;

    /// `defsect`: the section a bare, directive-less program starts in.
    fn defsect(&self) -> &'static str {
        "text"
    }

    /// `get_local_label`: resolves a dialect-local-label token
    /// (`:ID`/`.N`/`:N`) against the current scoping context into a
    /// unique backing name.
    fn get_local_label(&self, ctx: &ParserContext, token: &str) -> Option<String>;

    /// The numeric-constant prefix/suffix character sets this dialect's
    /// lexer accepts, for diagnostics/help text.
    fn const_prefix(&self) -> &'static [char] {
        &['$', '%']
    }
    fn const_suffix(&self) -> &'static [char] {
        &['h', 'o', 'q', 'b', 'd']
    }
}

/// Whether a reduced line (while the conditional stack is not fully
/// taken) still needs scanning: only lines whose tag is not `None`
/// matter (spec.md §4.9: "looks only for directives that affect the
/// stack").
pub fn affects_cond_stack(tag: CondTag) -> bool {
    tag != CondTag::None
}

/// Enforces the post-handler `eol()` check (spec.md §4.4): once a
/// directive handler returns, anything left on the line besides
/// whitespace/comment is a warning, suppressed when `igntrail` is set.
pub fn check_eol(ctx: &mut ParserContext, rest: &str, commentchar: char) {
    let trimmed = rest.trim_start();
    let is_trailing_garbage = !trimmed.is_empty() && !trimmed.starts_with(commentchar);
    if is_trailing_garbage && !ctx.options.igntrail {
        ctx.warning(format!("trailing text ignored: `{}`", trimmed));
    }
}

pub(crate) fn push_diag(ctx: &mut ParserContext, d: Diagnostic) {
    ctx.diagnostics.push(d);
}
