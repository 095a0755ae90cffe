//! Recursive-descent parser producing the formula AST.
//!
//! Precedence, loosest first: `+ -`, `* /` (and implicit multiplication
//! such as `2x`), unary sign, `^` (right associative).

use super::lexer::{Token, TokenKind};
use super::FormulaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    X,
    Xp,
    Dx,
}

impl Variable {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "x" => Some(Variable::X),
            "xp" => Some(Variable::Xp),
            "dx" => Some(Variable::Dx),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Sqrt,
    Cbrt,
    Abs,
    Ln,
    Log10,
    Log2,
    Exp,
    Floor,
    Ceil,
    Signum,
    Min,
    Max,
    Pow,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        let function = match name {
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "asin" => Function::Asin,
            "acos" => Function::Acos,
            "atan" => Function::Atan,
            "sinh" => Function::Sinh,
            "cosh" => Function::Cosh,
            "tanh" => Function::Tanh,
            "sqrt" => Function::Sqrt,
            "cbrt" => Function::Cbrt,
            "abs" => Function::Abs,
            // `log` is the natural logarithm, as in most formula engines
            "log" | "ln" => Function::Ln,
            "log10" => Function::Log10,
            "log2" => Function::Log2,
            "exp" => Function::Exp,
            "floor" => Function::Floor,
            "ceil" => Function::Ceil,
            "signum" | "sign" => Function::Signum,
            "min" => Function::Min,
            "max" => Function::Max,
            "pow" => Function::Pow,
            _ => return None,
        };
        Some(function)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
            Function::Asin => "asin",
            Function::Acos => "acos",
            Function::Atan => "atan",
            Function::Sinh => "sinh",
            Function::Cosh => "cosh",
            Function::Tanh => "tanh",
            Function::Sqrt => "sqrt",
            Function::Cbrt => "cbrt",
            Function::Abs => "abs",
            Function::Ln => "log",
            Function::Log10 => "log10",
            Function::Log2 => "log2",
            Function::Exp => "exp",
            Function::Floor => "floor",
            Function::Ceil => "ceil",
            Function::Signum => "signum",
            Function::Min => "min",
            Function::Max => "max",
            Function::Pow => "pow",
        }
    }

    /// Accepted argument counts as `(min, max)`
    fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Function::Min | Function::Max => (1, None),
            Function::Pow => (2, Some(2)),
            _ => (1, Some(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(Variable),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

pub fn parse(tokens: &[Token]) -> Result<Expr, FormulaError> {
    if tokens.is_empty() {
        return Err(FormulaError::Empty);
    }

    let mut parser = Parser {
        tokens,
        index: 0,
        depth: 0,
    };
    let expr = parser.expression()?;

    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(parser.unexpected(token)),
    }
}

/// Deepest nesting of parentheses, calls, signs and exponents
pub const MAX_DEPTH: usize = 64;

struct Parser<'a> {
    tokens: &'a [Token],
    index: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.index)
    }

    fn peek_kind(&self) -> Option<&'a TokenKind> {
        self.peek().map(|token| &token.kind)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.index);
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn unexpected(&self, token: &Token) -> FormulaError {
        FormulaError::UnexpectedToken {
            found: token.kind.describe(),
            position: token.position,
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), FormulaError> {
        match self.advance() {
            Some(token) if token.kind == kind => Ok(()),
            Some(token) => Err(self.unexpected(token)),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }

    /// Run `parse` one nesting level down
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, FormulaError>,
    ) -> Result<T, FormulaError> {
        if self.depth >= MAX_DEPTH {
            return Err(FormulaError::TooDeep);
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expression(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;

        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;

        loop {
            match self.peek_kind() {
                Some(TokenKind::Star) => {
                    self.advance();
                    let rhs = self.unary()?;
                    lhs = binary(BinaryOp::Mul, lhs, rhs);
                }
                Some(TokenKind::Slash) => {
                    self.advance();
                    let rhs = self.unary()?;
                    lhs = binary(BinaryOp::Div, lhs, rhs);
                }
                // Implicit multiplication: `2x`, `3(x+1)`, `(x)(xp)`
                Some(TokenKind::Number(_)) | Some(TokenKind::Ident(_)) | Some(TokenKind::LParen) => {
                    let rhs = self.power()?;
                    lhs = binary(BinaryOp::Mul, lhs, rhs);
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek_kind() {
            Some(TokenKind::Minus) => {
                self.advance();
                let inner = self.nested(Self::unary)?;
                Ok(Expr::Negate(Box::new(inner)))
            }
            Some(TokenKind::Plus) => {
                self.advance();
                self.nested(Self::unary)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, FormulaError> {
        let base = self.primary()?;

        if let Some(TokenKind::Caret) = self.peek_kind() {
            self.advance();
            let exponent = self.nested(Self::unary)?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }

        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        let token = self.advance().ok_or(FormulaError::UnexpectedEnd)?;

        match &token.kind {
            TokenKind::Number(value) => Ok(Expr::Number(*value)),
            TokenKind::LParen => {
                let inner = self.nested(Self::expression)?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident(name) => self.identifier(name),
            _ => Err(self.unexpected(token)),
        }
    }

    fn identifier(&mut self, name: &str) -> Result<Expr, FormulaError> {
        if let Some(variable) = Variable::from_name(name) {
            return Ok(Expr::Variable(variable));
        }

        match name {
            "pi" => return Ok(Expr::Number(std::f64::consts::PI)),
            "e" => return Ok(Expr::Number(std::f64::consts::E)),
            _ => {}
        }

        let Some(function) = Function::from_name(name) else {
            return Err(FormulaError::UnknownVariable(name.to_string()));
        };

        if self.peek_kind() != Some(&TokenKind::LParen) {
            return Err(FormulaError::MissingArguments(function.name()));
        }
        self.advance();

        let mut args = Vec::new();
        if self.peek_kind() != Some(&TokenKind::RParen) {
            loop {
                args.push(self.nested(Self::expression)?);
                match self.peek_kind() {
                    Some(TokenKind::Comma) => {
                        self.advance();
                    }
                    _ => break,
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        let (min, max) = function.arity();
        if args.len() < min || max.map_or(false, |max| args.len() > max) {
            return Err(FormulaError::WrongArity {
                function: function.name(),
                found: args.len(),
            });
        }

        Ok(Expr::Call { function, args })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
