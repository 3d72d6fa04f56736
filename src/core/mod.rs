//! The shared data model: sections, atoms, symbols, expressions, and the
//! `ParserContext` that threads all mutable parser state through every
//! dialect's directive handlers (see spec.md §9, "Global mutable parser
//! state").

pub mod atom;
pub mod context;
pub mod expr;
pub mod section;
pub mod symbol;

pub use atom::{Atom, AtomKind, SpaceFlags};
pub use context::ParserContext;
pub use expr::{Expr, ExprError};
pub use section::{Section, SectionAttrs, SectionFlags, SectionId};
pub use symbol::{Symbol, SymbolFlags, SymbolId, SymbolKind};
