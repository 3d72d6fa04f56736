//! A small opaque expression tree.
//!
//! The real assembler's expression evaluator (`parse_expr`/`eval_expr`)
//! is an external collaborator (spec.md §1); the parser only needs to
//! build trees, `simplify` them, `eval` them against a symbol table, and
//! `copy_tree` when a variable label's old value must be captured before
//! rebinding (spec.md §4.5, §9). This module provides exactly that much,
//! no more.

use crate::core::symbol::SymbolId;
use std::fmt;

/// Binary operators an expression tree can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogAnd,
    LogOr,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    LogNot,
}

/// An expression tree node. Owns its subtrees exclusively; use
/// [`Expr::copy_tree`] to alias a value that must survive a rebind
/// (the variable-label "old value" case, spec.md §4.5/§9).
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(i64),
    Sym(SymbolId),
    /// The current program counter at the point this expression occurs.
    CurrentPc,
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("division by zero")]
    DivByZero,
    #[error("expression must be constant")]
    NotConstant,
    #[error("undefined symbol")]
    UndefinedSymbol,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Num(n) => write!(f, "{n}"),
            Expr::Sym(id) => write!(f, "sym#{}", id.0),
            Expr::CurrentPc => write!(f, "*"),
            Expr::Unary(op, e) => {
                let sym = match op {
                    UnOp::Neg => "-",
                    UnOp::Not => "~",
                    UnOp::LogNot => "!",
                };
                write!(f, "{sym}{e}")
            }
            Expr::Binary(op, a, b) => {
                let sym = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    BinOp::Mod => "%",
                    BinOp::And => "&",
                    BinOp::Or => "|",
                    BinOp::Xor => "^",
                    BinOp::Shl => "<<",
                    BinOp::Shr => ">>",
                    BinOp::Eq => "==",
                    BinOp::Ne => "!=",
                    BinOp::Lt => "<",
                    BinOp::Le => "<=",
                    BinOp::Gt => ">",
                    BinOp::Ge => ">=",
                    BinOp::LogAnd => "&&",
                    BinOp::LogOr => "||",
                };
                write!(f, "({a} {sym} {b})")
            }
        }
    }
}

impl Expr {
    pub fn num(n: i64) -> Self {
        Expr::Num(n)
    }

    pub fn sym(id: SymbolId) -> Self {
        Expr::Sym(id)
    }

    pub fn binary(op: BinOp, a: Expr, b: Expr) -> Self {
        Expr::Binary(op, Box::new(a), Box::new(b))
    }

    pub fn unary(op: UnOp, a: Expr) -> Self {
        Expr::Unary(op, Box::new(a))
    }

    /// Deep-clone the tree. Needed whenever a reference must outlive a
    /// rebind of the symbol it names (e.g. a variable label's
    /// pre-redefinition value).
    pub fn copy_tree(&self) -> Expr {
        self.clone()
    }

    /// Fold constant subtrees as far as possible without resolving any
    /// symbol.
    pub fn simplify(self) -> Expr {
        match self {
            Expr::Unary(op, e) => {
                let e = e.simplify();
                if let Expr::Num(n) = e {
                    Expr::Num(apply_unary(op, n))
                } else {
                    Expr::Unary(op, Box::new(e))
                }
            }
            Expr::Binary(op, a, b) => {
                let a = a.simplify();
                let b = b.simplify();
                if let (Expr::Num(x), Expr::Num(y)) = (&a, &b) {
                    if let Ok(n) = apply_binary(op, *x, *y) {
                        return Expr::Num(n);
                    }
                }
                Expr::Binary(op, Box::new(a), Box::new(b))
            }
            other => other,
        }
    }

    /// Evaluate fully, resolving symbols via `resolve` and the current PC
    /// via `pc`. Returns [`ExprError::NotConstant`] only if a required
    /// symbol can't be resolved by the caller's closure (forward
    /// reference); callers that need a hard constant should call this
    /// after all symbols are defined.
    pub fn eval(&self, pc: i64, resolve: &dyn Fn(SymbolId) -> Option<i64>) -> Result<i64, ExprError> {
        match self {
            Expr::Num(n) => Ok(*n),
            Expr::CurrentPc => Ok(pc),
            Expr::Sym(id) => resolve(*id).ok_or(ExprError::UndefinedSymbol),
            Expr::Unary(op, e) => Ok(apply_unary(*op, e.eval(pc, resolve)?)),
            Expr::Binary(op, a, b) => {
                apply_binary(*op, a.eval(pc, resolve)?, b.eval(pc, resolve)?)
            }
        }
    }
}

fn apply_unary(op: UnOp, v: i64) -> i64 {
    match op {
        UnOp::Neg => v.wrapping_neg(),
        UnOp::Not => !v,
        UnOp::LogNot => (v == 0) as i64,
    }
}

fn apply_binary(op: BinOp, a: i64, b: i64) -> Result<i64, ExprError> {
    Ok(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(ExprError::DivByZero);
            }
            a.wrapping_div(b)
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(ExprError::DivByZero);
            }
            a.wrapping_rem(b)
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => a.wrapping_shl(b as u32 & 63),
        BinOp::Shr => a.wrapping_shr(b as u32 & 63),
        BinOp::Eq => (a == b) as i64,
        BinOp::Ne => (a != b) as i64,
        BinOp::Lt => (a < b) as i64,
        BinOp::Le => (a <= b) as i64,
        BinOp::Gt => (a > b) as i64,
        BinOp::Ge => (a >= b) as i64,
        BinOp::LogAnd => ((a != 0) && (b != 0)) as i64,
        BinOp::LogOr => ((a != 0) || (b != 0)) as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simplify_folds_constants() {
        let e = Expr::binary(BinOp::Add, Expr::num(1), Expr::num(2)).simplify();
        assert_eq!(e, Expr::Num(3));
    }

    #[test]
    fn eval_resolves_symbols() {
        let id = SymbolId(0);
        let e = Expr::binary(BinOp::Add, Expr::sym(id), Expr::num(1));
        let v = e.eval(0, &|s| if s == id { Some(41) } else { None }).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn copy_tree_is_independent() {
        let e = Expr::binary(BinOp::Add, Expr::num(1), Expr::num(2));
        let copy = e.copy_tree();
        assert_eq!(e, copy);
    }
}
