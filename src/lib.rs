//! Dialect front-ends for a multi-target cross-assembler.
//!
//! Three independent syntax parsers (EDTASM, Merlin, S-C Macro Assembler)
//! share a lexical/macro/conditional core and feed a common atom/section
//! data model. Two object-file writers (AOF for ARM, TRS-DOS `/CMD` for
//! Z80) consume the finalized model.
//!
//! The instruction encoder, expression evaluator proper, and CLI/listing
//! layers are treated as external collaborators; this crate provides
//! minimal stand-ins for them under [`core`] so the front-ends are
//! runnable and testable on their own.

/// Shared data model: sections, atoms, symbols, expressions, parser context.
pub mod core;
/// Diagnostics: recoverable vs. fatal errors, reported per source line.
pub mod error;
/// Dialect-independent lexical primitives: number prefixes, string literals.
pub mod lexer;
/// Source stack: file/macro/repeat frames feeding lines to the parser.
pub mod source;
/// Macro definition, invocation, and escape expansion.
pub mod macros;
/// `REPT`/`LUP` repeat-block engine.
pub mod repeat;
/// Conditional-assembly stack (`IF`/`ELSE`/`ELSEIF`/`ENDIF`).
pub mod cond;
/// The `Dialect` trait and the three concrete syntaxes.
pub mod dialect;
/// AOF and TRS-DOS `/CMD` object-file writers.
pub mod output;
/// Per-dialect option flags (the CLI surface of §6).
pub mod config;

pub use crate::core::context::ParserContext;
pub use crate::dialect::{Dialect, DialectKind};
pub use crate::error::{Diagnostic, Severity};
