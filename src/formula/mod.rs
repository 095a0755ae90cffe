//! # Formula Module
//!
//! Operator-editable formulas that convert the raw moisture value into a
//! physical quantity.
//!
//! A formula is an infix arithmetic expression over three variables:
//! - `x`  - the current raw value
//! - `xp` - the previous raw value (`x` when there is none yet)
//! - `dx` - `x - xp`
//!
//! Operators `+ - * / ^`, parentheses, the constants `pi` and `e`, and the
//! usual math functions (`sin`, `cos`, `tan`, `log`/`ln`, `log10`, `sqrt`,
//! `abs`, `min`, `max`, ...) are supported. Parsing is stateless and cheap,
//! so editors can re-validate on every keystroke.

mod lexer;
mod parser;

use thiserror::Error;

use parser::{BinaryOp, Expr, Function, Variable};

/// Formula parse and evaluation faults
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("Formula is empty")]
    Empty,

    #[error("Unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },

    #[error("Unexpected {found} at position {position}")]
    UnexpectedToken { found: String, position: usize },

    #[error("Unexpected end of formula")]
    UnexpectedEnd,

    #[error("Invalid number '{0}'")]
    InvalidNumber(String),

    #[error("Unknown variable '{0}' (use x, xp or dx)")]
    UnknownVariable(String),

    #[error("Function '{0}' needs arguments in parentheses")]
    MissingArguments(&'static str),

    #[error("Function '{function}' does not take {found} argument(s)")]
    WrongArity { function: &'static str, found: usize },

    #[error("Formula is too long")]
    TooLong,

    #[error("Formula is nested too deeply")]
    TooDeep,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Result is not a finite number")]
    NotFinite,
}

/// Values bound to the formula variables
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Variables {
    pub x: f64,
    pub xp: f64,
    pub dx: f64,
}

impl Variables {
    /// Bind `x` and `xp`, deriving `dx = x - xp`
    pub fn new(x: f64, xp: f64) -> Self {
        Self { x, xp, dx: x - xp }
    }

    fn get(&self, variable: Variable) -> f64 {
        match variable {
            Variable::X => self.x,
            Variable::Xp => self.xp,
            Variable::Dx => self.dx,
        }
    }
}

/// A parsed formula
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    text: String,
    expr: Expr,
}

impl Formula {
    /// Parse formula text
    ///
    /// # Errors
    ///
    /// Returns error if the text is blank, malformed, or names anything
    /// other than `x`, `xp`, `dx`, the constants, or a known function.
    pub fn parse(text: &str) -> Result<Self, FormulaError> {
        let tokens = lexer::tokenize(text)?;
        let expr = parser::parse(&tokens)?;
        Ok(Self {
            text: text.to_string(),
            expr,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Evaluate with the given variable bindings
    ///
    /// # Errors
    ///
    /// Returns error on division by zero or a non-finite result.
    pub fn evaluate(&self, vars: &Variables) -> Result<f64, FormulaError> {
        let value = eval(&self.expr, vars)?;
        if !value.is_finite() {
            return Err(FormulaError::NotFinite);
        }
        Ok(value)
    }
}

/// Parse and evaluate a formula in one step
///
/// # Examples
///
/// ```
/// use soil_link::formula::validate;
///
/// assert_eq!(validate("x*2", 5.0, 5.0, 0.0), Ok(10.0));
/// assert!(validate("x+", 5.0, 5.0, 0.0).is_err());
/// ```
pub fn validate(text: &str, x: f64, xp: f64, dx: f64) -> Result<f64, FormulaError> {
    Formula::parse(text)?.evaluate(&Variables { x, xp, dx })
}

fn eval(expr: &Expr, vars: &Variables) -> Result<f64, FormulaError> {
    match expr {
        Expr::Number(value) => Ok(*value),
        Expr::Variable(variable) => Ok(vars.get(*variable)),
        Expr::Negate(inner) => Ok(-eval(inner, vars)?),
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval(lhs, vars)?;
            let rhs = eval(rhs, vars)?;
            match op {
                BinaryOp::Add => Ok(lhs + rhs),
                BinaryOp::Sub => Ok(lhs - rhs),
                BinaryOp::Mul => Ok(lhs * rhs),
                BinaryOp::Div => {
                    if rhs == 0.0 {
                        return Err(FormulaError::DivisionByZero);
                    }
                    Ok(lhs / rhs)
                }
                BinaryOp::Pow => Ok(lhs.powf(rhs)),
            }
        }
        Expr::Call { function, args } => {
            let values = args
                .iter()
                .map(|arg| eval(arg, vars))
                .collect::<Result<Vec<f64>, FormulaError>>()?;
            Ok(call(*function, &values))
        }
    }
}

fn call(function: Function, args: &[f64]) -> f64 {
    // Arity is checked by the parser.
    let a = args[0];
    match function {
        Function::Sin => a.sin(),
        Function::Cos => a.cos(),
        Function::Tan => a.tan(),
        Function::Asin => a.asin(),
        Function::Acos => a.acos(),
        Function::Atan => a.atan(),
        Function::Sinh => a.sinh(),
        Function::Cosh => a.cosh(),
        Function::Tanh => a.tanh(),
        Function::Sqrt => a.sqrt(),
        Function::Cbrt => a.cbrt(),
        Function::Abs => a.abs(),
        Function::Ln => a.ln(),
        Function::Log10 => a.log10(),
        Function::Log2 => a.log2(),
        Function::Exp => a.exp(),
        Function::Floor => a.floor(),
        Function::Ceil => a.ceil(),
        Function::Signum => {
            if a == 0.0 {
                0.0
            } else {
                a.signum()
            }
        }
        Function::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
        Function::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Function::Pow => a.powf(args[1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_x(text: &str, x: f64) -> Result<f64, FormulaError> {
        validate(text, x, x, 0.0)
    }

    #[test]
    fn test_linear_formula() {
        assert_eq!(eval_x("x*2", 5.0), Ok(10.0));
        assert_eq!(eval_x("2*x+1", 3.0), Ok(7.0));
    }

    #[test]
    fn test_all_variables_bound() {
        assert_eq!(validate("x + xp + dx", 3.0, 2.0, 1.0), Ok(6.0));
        assert_eq!(validate("dx / (x - xp)", 3.0, 1.0, 2.0), Ok(1.0));
    }

    #[test]
    fn test_variables_new_derives_dx() {
        let vars = Variables::new(10.0, 4.0);
        assert_eq!(vars.dx, 6.0);
    }

    #[test]
    fn test_power_and_unary_minus() {
        assert_eq!(eval_x("x^2", 3.0), Ok(9.0));
        assert_eq!(eval_x("-x^2", 3.0), Ok(-9.0));
        assert_eq!(eval_x("(-x)^2", 3.0), Ok(9.0));
        assert_eq!(eval_x("2^-1", 0.0), Ok(0.5));
        assert_eq!(eval_x("2^3^2", 0.0), Ok(512.0));
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval_x("sqrt(x)", 16.0), Ok(4.0));
        assert_eq!(eval_x("abs(x)", -2.5), Ok(2.5));
        assert_eq!(eval_x("min(x, 3)", 5.0), Ok(3.0));
        assert_eq!(eval_x("max(x, 3, 7)", 5.0), Ok(7.0));
        assert_eq!(eval_x("pow(x, 2)", 4.0), Ok(16.0));
        assert!((eval_x("log10(x)", 1000.0).unwrap() - 3.0).abs() < 1e-12);
        assert_eq!(eval_x("log2(x)", 8.0), Ok(3.0));
        assert!((eval_x("log(e)", 0.0).unwrap() - 1.0).abs() < 1e-12);
        assert!((eval_x("ln(e^2)", 0.0).unwrap() - 2.0).abs() < 1e-12);
        assert!(eval_x("sin(pi)", 0.0).unwrap().abs() < 1e-12);
        assert_eq!(eval_x("cos(0)", 0.0), Ok(1.0));
    }

    #[test]
    fn test_implicit_multiplication() {
        assert_eq!(eval_x("2x", 4.0), Ok(8.0));
        assert_eq!(eval_x("3(x+1)", 1.0), Ok(6.0));
    }

    #[test]
    fn test_calibration_style_formula() {
        // Typical two-point calibration: map raw 3000..1200 to 0..100 %
        let value = eval_x("(3000 - x) / (3000 - 1200) * 100", 2100.0).unwrap();
        assert!((value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_formula() {
        assert_eq!(eval_x("", 1.0), Err(FormulaError::Empty));
        assert_eq!(eval_x("   ", 1.0), Err(FormulaError::Empty));
    }

    #[test]
    fn test_malformed_formula() {
        assert_eq!(eval_x("x+", 1.0), Err(FormulaError::UnexpectedEnd));
        assert!(eval_x("*x", 1.0).is_err());
        assert!(eval_x("x $ 2", 1.0).is_err());
    }

    #[test]
    fn test_unknown_identifier() {
        assert_eq!(
            eval_x("y", 1.0),
            Err(FormulaError::UnknownVariable("y".to_string()))
        );
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(eval_x("x/0", 1.0), Err(FormulaError::DivisionByZero));
        assert_eq!(validate("1/dx", 1.0, 1.0, 0.0), Err(FormulaError::DivisionByZero));
    }

    #[test]
    fn test_non_finite_results() {
        assert_eq!(eval_x("sqrt(x)", -1.0), Err(FormulaError::NotFinite));
        assert_eq!(eval_x("log(x)", 0.0), Err(FormulaError::NotFinite));
    }

    #[test]
    fn test_error_messages_are_readable() {
        let err = eval_x("x + foo", 1.0).unwrap_err();
        assert_eq!(err.to_string(), "Unknown variable 'foo' (use x, xp or dx)");

        let err = eval_x("x # 1", 1.0).unwrap_err();
        assert_eq!(err.to_string(), "Unexpected character '#' at position 3");
    }

    #[test]
    fn test_formula_reusable() {
        let formula = Formula::parse("x - xp").unwrap();
        assert_eq!(formula.text(), "x - xp");
        assert_eq!(formula.evaluate(&Variables::new(5.0, 3.0)), Ok(2.0));
        assert_eq!(formula.evaluate(&Variables::new(1.0, 3.0)), Ok(-2.0));
    }

    #[test]
    fn test_hostile_formulas_return_errors() {
        // Same stack size as a tokio worker thread
        let handle = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let deep_parens = format!("{}x{}", "(".repeat(5_000), ")".repeat(5_000));
                assert_eq!(validate(&deep_parens, 1.0, 1.0, 0.0), Err(FormulaError::TooLong));

                let many_signs = format!("{}x", "-".repeat(20_000));
                assert_eq!(validate(&many_signs, 1.0, 1.0, 0.0), Err(FormulaError::TooLong));

                let nested = format!("{}x{}", "(".repeat(100), ")".repeat(100));
                assert_eq!(validate(&nested, 1.0, 1.0, 0.0), Err(FormulaError::TooDeep));

                let long_sum = vec!["x"; 128].join("+");
                assert_eq!(validate(&long_sum, 1.0, 1.0, 0.0), Ok(128.0));
            })
            .unwrap();
        handle.join().unwrap();
    }
}
