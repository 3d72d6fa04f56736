//! A minimal recursive-descent expression parser (spec.md §1 "the real
//! expression evaluator is an external collaborator"; this crate needs
//! just enough of one to turn `EQU`/`SET`/data-directive/conditional
//! operand text into [`Expr`] trees it can fold with [`Expr::eval`]).
//!
//! Precedence ladder, loosest to tightest: `||`, `&&`, `|`, `^`, `&`,
//! comparisons, shift, add/sub, mul/div/mod, unary, primary.

use crate::core::expr::{BinOp, Expr, UnOp};
use crate::core::symbol::{SymbolKind, SymbolTable};
use crate::error::LexError;
use crate::lexer::{is_ident_char, is_ident_start, read_number, skip_blanks, NumberOpts};

pub struct ExprParser<'a> {
    text: &'a str,
    pos: usize,
    opts: NumberOpts,
}

impl<'a> ExprParser<'a> {
    pub fn new(text: &'a str, opts: NumberOpts) -> Self {
        Self { text, pos: 0, opts }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    fn rest(&self) -> &str {
        &self.text[self.pos..]
    }

    fn skip_ws(&mut self) {
        self.pos += skip_blanks(self.rest());
    }

    fn eat_str(&mut self, tok: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(tok) {
            self.pos += tok.len();
            true
        } else {
            false
        }
    }

    /// `eat_str` for single-character operators that must not be confused
    /// with a two-character one starting the same way (`|` vs `||`).
    fn eat_char_not(&mut self, c: char, not_followed_by: char) -> bool {
        self.skip_ws();
        let r = self.rest();
        if r.starts_with(c) && r[c.len_utf8()..].chars().next() != Some(not_followed_by) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    pub fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.rest().is_empty()
    }

    pub fn parse(&mut self, symtab: &mut SymbolTable) -> Result<Expr, LexError> {
        let e = self.parse_logor(symtab)?;
        Ok(e)
    }

    fn parse_logor(&mut self, symtab: &mut SymbolTable) -> Result<Expr, LexError> {
        let mut lhs = self.parse_logand(symtab)?;
        while self.eat_str("||") {
            let rhs = self.parse_logand(symtab)?;
            lhs = Expr::binary(BinOp::LogOr, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_logand(&mut self, symtab: &mut SymbolTable) -> Result<Expr, LexError> {
        let mut lhs = self.parse_bitor(symtab)?;
        while self.eat_str("&&") {
            let rhs = self.parse_bitor(symtab)?;
            lhs = Expr::binary(BinOp::LogAnd, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_bitor(&mut self, symtab: &mut SymbolTable) -> Result<Expr, LexError> {
        let mut lhs = self.parse_bitxor(symtab)?;
        while self.eat_char_not('|', '|') {
            let rhs = self.parse_bitxor(symtab)?;
            lhs = Expr::binary(BinOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_bitxor(&mut self, symtab: &mut SymbolTable) -> Result<Expr, LexError> {
        let mut lhs = self.parse_bitand(symtab)?;
        while self.eat_str("^") {
            let rhs = self.parse_bitand(symtab)?;
            lhs = Expr::binary(BinOp::Xor, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_bitand(&mut self, symtab: &mut SymbolTable) -> Result<Expr, LexError> {
        let mut lhs = self.parse_cmp(symtab)?;
        while self.eat_char_not('&', '&') {
            let rhs = self.parse_cmp(symtab)?;
            lhs = Expr::binary(BinOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self, symtab: &mut SymbolTable) -> Result<Expr, LexError> {
        let mut lhs = self.parse_shift(symtab)?;
        loop {
            let op = if self.eat_str("==") {
                BinOp::Eq
            } else if self.eat_str("!=") || self.eat_str("<>") {
                BinOp::Ne
            } else if self.eat_str("<=") {
                BinOp::Le
            } else if self.eat_str(">=") {
                BinOp::Ge
            } else if self.eat_char_not('<', '<') && !self.rest().starts_with('=') {
                BinOp::Lt
            } else if self.eat_char_not('>', '>') && !self.rest().starts_with('=') {
                BinOp::Gt
            } else {
                break;
            };
            let rhs = self.parse_shift(symtab)?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self, symtab: &mut SymbolTable) -> Result<Expr, LexError> {
        let mut lhs = self.parse_addsub(symtab)?;
        loop {
            let op = if self.eat_str("<<") {
                BinOp::Shl
            } else if self.eat_str(">>") {
                BinOp::Shr
            } else {
                break;
            };
            let rhs = self.parse_addsub(symtab)?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_addsub(&mut self, symtab: &mut SymbolTable) -> Result<Expr, LexError> {
        let mut lhs = self.parse_muldiv(symtab)?;
        loop {
            let op = if self.eat_str("+") {
                BinOp::Add
            } else if self.eat_str("-") {
                BinOp::Sub
            } else {
                break;
            };
            let rhs = self.parse_muldiv(symtab)?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_muldiv(&mut self, symtab: &mut SymbolTable) -> Result<Expr, LexError> {
        let mut lhs = self.parse_unary(symtab)?;
        loop {
            let op = if self.eat_str("*") {
                BinOp::Mul
            } else if self.eat_str("/") {
                BinOp::Div
            } else if self.eat_str("%") {
                BinOp::Mod
            } else {
                break;
            };
            let rhs = self.parse_unary(symtab)?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self, symtab: &mut SymbolTable) -> Result<Expr, LexError> {
        if self.eat_str("-") {
            return Ok(Expr::unary(UnOp::Neg, self.parse_unary(symtab)?));
        }
        if self.eat_str("~") {
            return Ok(Expr::unary(UnOp::Not, self.parse_unary(symtab)?));
        }
        if self.eat_str("!") {
            return Ok(Expr::unary(UnOp::LogNot, self.parse_unary(symtab)?));
        }
        self.parse_primary(symtab)
    }

    fn parse_primary(&mut self, symtab: &mut SymbolTable) -> Result<Expr, LexError> {
        self.skip_ws();
        if self.eat_str("(") {
            let e = self.parse_logor(symtab)?;
            self.skip_ws();
            if !self.eat_str(")") {
                return Err(LexError::MissingParens);
            }
            return Ok(e);
        }
        if self.rest().starts_with('*') && !self.rest()[1..].starts_with('*') {
            self.pos += 1;
            return Ok(Expr::CurrentPc);
        }
        if let Some((value, consumed)) = read_number(self.rest(), &self.opts)? {
            self.pos += consumed;
            return Ok(Expr::num(value));
        }
        if let Some(c) = self.rest().chars().next() {
            if c == '\'' || c == '"' {
                let (bytes, consumed) = crate::lexer::parse_string_literal(self.rest(), c, false)?;
                self.pos += consumed;
                let v = bytes.first().copied().unwrap_or(0) as i64;
                return Ok(Expr::num(v));
            }
            if is_ident_start(c) {
                let len = self.rest().char_indices().take_while(|(_, c)| is_ident_char(*c)).count();
                let name = &self.rest()[..len];
                self.pos += len;
                let id = symtab.find_or_create(name, SymbolKind::LabSym);
                return Ok(Expr::sym(id));
            }
        }
        Err(LexError::InvalidNumber)
    }
}

/// Parses `text` as a single expression, requiring the whole (trimmed)
/// string to be consumed.
pub fn parse_expr(text: &str, symtab: &mut SymbolTable, opts: NumberOpts) -> Result<Expr, LexError> {
    let mut p = ExprParser::new(text.trim(), opts);
    let e = p.parse(symtab)?;
    if !p.at_end() {
        return Err(LexError::TrailingGarbage);
    }
    Ok(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::ExprError;

    fn eval(text: &str, symtab: &mut SymbolTable) -> Result<i64, String> {
        let e = parse_expr(text, symtab, NumberOpts::default()).map_err(|e| e.to_string())?;
        e.eval(0x100, &|id| symtab.get(id).value).map_err(|e: ExprError| e.to_string())
    }

    #[test]
    fn parses_arithmetic_with_precedence() {
        let mut symtab = SymbolTable::new(false);
        assert_eq!(eval("1+2*3", &mut symtab).unwrap(), 7);
    }

    #[test]
    fn parses_parens() {
        let mut symtab = SymbolTable::new(false);
        assert_eq!(eval("(1+2)*3", &mut symtab).unwrap(), 9);
    }

    #[test]
    fn current_pc_resolves_to_pc_argument() {
        let mut symtab = SymbolTable::new(false);
        assert_eq!(eval("*+1", &mut symtab).unwrap(), 0x101);
    }

    #[test]
    fn resolves_defined_symbol() {
        let mut symtab = SymbolTable::new(false);
        let id = symtab.find_or_create("FOO", SymbolKind::LabSym);
        symtab.get_mut(id).value = Some(42);
        assert_eq!(eval("FOO+1", &mut symtab).unwrap(), 43);
    }

    #[test]
    fn undefined_symbol_is_not_constant() {
        let mut symtab = SymbolTable::new(false);
        assert!(eval("BAR", &mut symtab).is_err());
    }

    #[test]
    fn bitwise_and_shift_precedence() {
        let mut symtab = SymbolTable::new(false);
        assert_eq!(eval("1<<4|1", &mut symtab).unwrap(), 0x11);
    }

    #[test]
    fn trailing_garbage_errors() {
        let mut symtab = SymbolTable::new(false);
        assert!(parse_expr("1 2", &mut symtab, NumberOpts::default()).is_err());
    }
}
