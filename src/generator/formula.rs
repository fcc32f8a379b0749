//! Restricted arithmetic expressions for answer formulas and validation predicates.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! expr    := and ( "||" and )*
//! and     := cmp ( "&&" cmp )*
//! cmp     := sum ( ("<" | "<=" | ">" | ">=" | "==" | "!=") sum )?
//! sum     := term ( ("+" | "-") term )*
//! term    := unary ( ("*" | "/" | "%") unary )*
//! unary   := ("-" | "+") unary | power
//! power   := primary ( "^" unary )?
//! primary := number | ident | ident "(" expr ("," expr)* ")" | "(" expr ")"
//! ```
//!
//! Comparisons and logical operators yield `1` or `0`. Nothing outside this
//! grammar can be expressed, and identifiers only resolve against the binding map.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::ValidationRules;

const COMPARE_EPSILON: f64 = 1e-9;
/// Parentheses, calls, unary signs and exponents together.
pub const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unexpected token '{found}' at {pos}")]
    UnexpectedToken { found: String, pos: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("function {name} expects {expected} argument(s), got {got}")]
    Arity {
        name: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("expression produced a non-finite value")]
    NonFinite,
    #[error("expression nests deeper than {limit} levels")]
    TooDeep { limit: usize },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    AndAnd,
    OrOr,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Ident(name) => name.clone(),
            Self::Plus => "+".into(),
            Self::Minus => "-".into(),
            Self::Star => "*".into(),
            Self::Slash => "/".into(),
            Self::Percent => "%".into(),
            Self::Caret => "^".into(),
            Self::LParen => "(".into(),
            Self::RParen => ")".into(),
            Self::Comma => ",".into(),
            Self::Lt => "<".into(),
            Self::Le => "<=".into(),
            Self::Gt => ">".into(),
            Self::Ge => ">=".into(),
            Self::EqEq => "==".into(),
            Self::Ne => "!=".into(),
            Self::AndAnd => "&&".into(),
            Self::OrOr => "||".into(),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let start = i;

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        if ch.is_ascii_digit() || ch == '.' {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            let value = literal
                .parse::<f64>()
                .map_err(|_| ExpressionError::InvalidNumber(literal.clone()))?;
            tokens.push((Token::Number(value), start));
            continue;
        }

        if ch.is_ascii_alphabetic() || ch == '_' {
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push((Token::Ident(chars[start..i].iter().collect()), start));
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, width) = match (ch, next) {
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::Ne, 2),
            ('&', Some('&')) => (Token::AndAnd, 2),
            ('|', Some('|')) => (Token::OrOr, 2),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('^', _) => (Token::Caret, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            _ => return Err(ExpressionError::UnexpectedChar { ch, pos: start }),
        };
        tokens.push((token, start));
        i += width;
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Abs,
    Min,
    Max,
    Round,
    Floor,
    Ceil,
    Sqrt,
    Pow,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "abs" => Some(Self::Abs),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "round" => Some(Self::Round),
            "floor" => Some(Self::Floor),
            "ceil" => Some(Self::Ceil),
            "sqrt" => Some(Self::Sqrt),
            "pow" => Some(Self::Pow),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Abs => "abs",
            Self::Min => "min",
            Self::Max => "max",
            Self::Round => "round",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Sqrt => "sqrt",
            Self::Pow => "pow",
        }
    }

    fn check_arity(&self, got: usize) -> Result<(), ExpressionError> {
        let (ok, expected) = match self {
            Self::Min | Self::Max => (got >= 1, "at least 1"),
            Self::Pow => (got == 2, "2"),
            _ => (got == 1, "1"),
        };
        if ok {
            Ok(())
        } else {
            Err(ExpressionError::Arity {
                name: self.name(),
                expected,
                got,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Var(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Function,
        args: Vec<Expr>,
    },
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self) -> ExpressionError {
        match self.tokens.get(self.pos) {
            Some((token, pos)) => ExpressionError::UnexpectedToken {
                found: token.describe(),
                pos: *pos,
            },
            None => ExpressionError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, wanted: Token) -> Result<(), ExpressionError> {
        if self.peek() == Some(&wanted) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_cmp()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.pos += 1;
            let rhs = self.parse_cmp()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr, ExpressionError> {
        let lhs = self.parse_sum()?;
        let op = match self.peek() {
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_sum()?;
        Ok(binary(op, lhs, rhs))
    }

    fn parse_sum(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.depth >= MAX_NESTING {
            return Err(ExpressionError::TooDeep { limit: MAX_NESTING });
        }
        self.depth += 1;
        let parsed = self.parse_unary_inner();
        self.depth -= 1;
        parsed
    }

    fn parse_unary_inner(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.parse_primary()?;
        if self.peek() == Some(&Token::Caret) {
            self.pos += 1;
            let exponent = self.parse_unary()?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let unexpected = self.unexpected();
        match self.advance() {
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::Ident(name)) => {
                if self.peek() != Some(&Token::LParen) {
                    return Ok(Expr::Var(name));
                }
                let func = Function::lookup(&name).ok_or(ExpressionError::UnknownFunction(name))?;
                self.pos += 1;
                let mut args = vec![self.parse_or()?];
                while self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    args.push(self.parse_or()?);
                }
                self.expect(Token::RParen)?;
                func.check_arity(args.len())?;
                Ok(Expr::Call { func, args })
            }
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            _ => Err(unexpected),
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn finite(value: f64) -> Result<f64, ExpressionError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ExpressionError::NonFinite)
    }
}

fn truth(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

impl Expr {
    fn eval(&self, vars: &BTreeMap<String, f64>) -> Result<f64, ExpressionError> {
        match self {
            Self::Number(value) => Ok(*value),
            Self::Var(name) => vars
                .get(name)
                .copied()
                .ok_or_else(|| ExpressionError::UnknownIdentifier(name.clone())),
            Self::Neg(inner) => Ok(-inner.eval(vars)?),
            Self::Binary { op, lhs, rhs } => {
                let left = lhs.eval(vars)?;
                match op {
                    BinaryOp::And if left == 0.0 => return Ok(0.0),
                    BinaryOp::Or if left != 0.0 => return Ok(1.0),
                    _ => {}
                }
                let right = rhs.eval(vars)?;
                let value = match op {
                    BinaryOp::Add => left + right,
                    BinaryOp::Sub => left - right,
                    BinaryOp::Mul => left * right,
                    BinaryOp::Div | BinaryOp::Rem if right == 0.0 => {
                        return Err(ExpressionError::DivisionByZero)
                    }
                    BinaryOp::Div => left / right,
                    BinaryOp::Rem => left % right,
                    BinaryOp::Pow => left.powf(right),
                    BinaryOp::Lt => truth(left < right - COMPARE_EPSILON),
                    BinaryOp::Le => truth(left <= right + COMPARE_EPSILON),
                    BinaryOp::Gt => truth(left > right + COMPARE_EPSILON),
                    BinaryOp::Ge => truth(left >= right - COMPARE_EPSILON),
                    BinaryOp::Eq => truth((left - right).abs() <= COMPARE_EPSILON),
                    BinaryOp::Ne => truth((left - right).abs() > COMPARE_EPSILON),
                    BinaryOp::And | BinaryOp::Or => truth(right != 0.0),
                };
                finite(value)
            }
            Self::Call { func, args } => {
                let values = args
                    .iter()
                    .map(|arg| arg.eval(vars))
                    .collect::<Result<Vec<_>, _>>()?;
                let value = match func {
                    Function::Abs => values[0].abs(),
                    Function::Round => values[0].round(),
                    Function::Floor => values[0].floor(),
                    Function::Ceil => values[0].ceil(),
                    Function::Sqrt => values[0].sqrt(),
                    Function::Pow => values[0].powf(values[1]),
                    Function::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
                    Function::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                };
                finite(value)
            }
        }
    }

    fn collect_identifiers(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Number(_) => {}
            Self::Var(name) => {
                out.insert(name.clone());
            }
            Self::Neg(inner) => inner.collect_identifiers(out),
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_identifiers(out);
                rhs.collect_identifiers(out);
            }
            Self::Call { args, .. } => {
                for arg in args {
                    arg.collect_identifiers(out);
                }
            }
        }
    }
}

/// A parsed expression, reusable across many variable assignments.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    root: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExpressionError::UnexpectedEnd);
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.unexpected());
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, vars: &BTreeMap<String, f64>) -> Result<f64, ExpressionError> {
        self.root.eval(vars)
    }

    pub fn holds(&self, vars: &BTreeMap<String, f64>) -> Result<bool, ExpressionError> {
        Ok(self.evaluate(vars)? != 0.0)
    }

    pub fn identifiers(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.root.collect_identifiers(&mut out);
        out
    }
}

pub fn evaluate(formula: &str, vars: &BTreeMap<String, f64>) -> Result<f64, ExpressionError> {
    Formula::parse(formula)?.evaluate(vars)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleViolation {
    #[error("result {value} exceeds maximum {max}")]
    AboveMax { value: f64, max: f64 },
    #[error("result {value} is below minimum {min}")]
    BelowMin { value: f64, min: f64 },
    #[error("result {0} is not a whole number")]
    NotWholeNumber(f64),
    #[error("custom predicate rejected the sample")]
    PredicateFailed,
    #[error("custom predicate could not be evaluated: {0}")]
    Predicate(#[from] ExpressionError),
}

/// Validation rules with the predicate parsed once up front.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    max_result: Option<f64>,
    min_result: Option<f64>,
    whole_number: bool,
    predicate: Option<Formula>,
}

impl CompiledRules {
    pub fn compile(rules: &ValidationRules) -> Result<Self, ExpressionError> {
        let predicate = rules.predicate.as_deref().map(Formula::parse).transpose()?;
        Ok(Self {
            max_result: rules.max_result,
            min_result: rules.min_result,
            whole_number: rules.whole_number,
            predicate,
        })
    }

    /// The predicate sees every variable binding plus `answer`.
    pub fn check(&self, value: f64, bindings: &BTreeMap<String, f64>) -> Result<(), RuleViolation> {
        if let Some(max) = self.max_result {
            if value > max + COMPARE_EPSILON {
                return Err(RuleViolation::AboveMax { value, max });
            }
        }
        if let Some(min) = self.min_result {
            if value < min - COMPARE_EPSILON {
                return Err(RuleViolation::BelowMin { value, min });
            }
        }
        if self.whole_number && (value - value.round()).abs() > COMPARE_EPSILON {
            return Err(RuleViolation::NotWholeNumber(value));
        }
        if let Some(predicate) = &self.predicate {
            let mut scope = bindings.clone();
            scope.insert("answer".to_string(), value);
            if !predicate.holds(&scope)? {
                return Err(RuleViolation::PredicateFailed);
            }
        }
        Ok(())
    }
}

pub fn validate(
    value: f64,
    rules: &ValidationRules,
    bindings: &BTreeMap<String, f64>,
) -> Result<(), RuleViolation> {
    CompiledRules::compile(rules)?.check(value, bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_precedence() {
        let empty = BTreeMap::new();
        assert_eq!(evaluate("2 + 3 * 4", &empty).unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4", &empty).unwrap(), 20.0);
        assert_eq!(evaluate("10 - 4 - 3", &empty).unwrap(), 3.0);
        assert_eq!(evaluate("2 ^ 3 ^ 2", &empty).unwrap(), 512.0);
        assert_eq!(evaluate("-2 ^ 2", &empty).unwrap(), -4.0);
        assert_eq!(evaluate("17 % 5", &empty).unwrap(), 2.0);
        assert_eq!(evaluate(".5 * 4", &empty).unwrap(), 2.0);
    }

    #[test]
    fn test_variables_and_functions() {
        let bindings = vars(&[("a", 7.0), ("b", 2.0)]);
        assert_eq!(evaluate("a / b", &bindings).unwrap(), 3.5);
        assert_eq!(evaluate("max(a, b, 10)", &bindings).unwrap(), 10.0);
        assert_eq!(evaluate("min(a, b)", &bindings).unwrap(), 2.0);
        assert_eq!(evaluate("round(a / b)", &bindings).unwrap(), 4.0);
        assert_eq!(evaluate("sqrt(pow(a, 2))", &bindings).unwrap(), 7.0);
        assert_eq!(evaluate("abs(b - a)", &bindings).unwrap(), 5.0);
    }

    #[test]
    fn test_comparisons_yield_truth_values() {
        let bindings = vars(&[("a", 5.0), ("b", 3.0)]);
        assert_eq!(evaluate("a > b", &bindings).unwrap(), 1.0);
        assert_eq!(evaluate("a > b && b > a", &bindings).unwrap(), 0.0);
        assert_eq!(evaluate("a < b || a % b == 2", &bindings).unwrap(), 1.0);
        assert_eq!(evaluate("0.1 + 0.2 == 0.3", &bindings).unwrap(), 1.0);
    }

    #[test]
    fn test_nesting_is_bounded() {
        let empty = BTreeMap::new();
        let shallow = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(evaluate(&shallow, &empty).unwrap(), 1.0);

        let deep = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert_eq!(
            Formula::parse(&deep).err(),
            Some(ExpressionError::TooDeep { limit: MAX_NESTING })
        );
        let signs = format!("{}1", "-".repeat(10_000));
        assert!(matches!(Formula::parse(&signs), Err(ExpressionError::TooDeep { .. })));
        let calls = format!("{}1{}", "abs(".repeat(5_000), ")".repeat(5_000));
        assert!(matches!(Formula::parse(&calls), Err(ExpressionError::TooDeep { .. })));
    }

    #[test]
    fn test_evaluation_errors() {
        let bindings = vars(&[("a", 1.0)]);
        assert_eq!(
            evaluate("a + c", &bindings),
            Err(ExpressionError::UnknownIdentifier("c".to_string()))
        );
        assert_eq!(evaluate("a / (a - 1)", &bindings), Err(ExpressionError::DivisionByZero));
        assert_eq!(evaluate("sqrt(a - 2)", &bindings), Err(ExpressionError::NonFinite));
        assert_eq!(evaluate("10 ^ 400", &bindings), Err(ExpressionError::NonFinite));
    }

    #[test]
    fn test_host_code_is_rejected() {
        let empty = BTreeMap::new();
        assert!(matches!(
            evaluate("exec(1)", &empty),
            Err(ExpressionError::UnknownFunction(_))
        ));
        assert!(matches!(
            evaluate("__import__('os')", &empty),
            Err(ExpressionError::UnexpectedChar { ch: '\'', .. })
        ));
        assert!(matches!(
            evaluate("a; b", &empty),
            Err(ExpressionError::UnexpectedChar { ch: ';', .. })
        ));
        assert!(matches!(
            evaluate("\"text\"", &empty),
            Err(ExpressionError::UnexpectedChar { .. })
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Formula::parse(""), Err(ExpressionError::UnexpectedEnd));
        assert_eq!(Formula::parse("1 +"), Err(ExpressionError::UnexpectedEnd));
        assert!(matches!(Formula::parse("(1 + 2"), Err(ExpressionError::UnexpectedEnd)));
        assert!(matches!(Formula::parse("1 2"), Err(ExpressionError::UnexpectedToken { .. })));
        assert!(matches!(Formula::parse("1..2"), Err(ExpressionError::InvalidNumber(_))));
        assert!(matches!(Formula::parse("pow(1)"), Err(ExpressionError::Arity { .. })));
    }

    #[test]
    fn test_identifiers() {
        let formula = Formula::parse("price * n + max(a, 2)").unwrap();
        let ids: Vec<_> = formula.identifiers().into_iter().collect();
        assert_eq!(ids, vec!["a", "n", "price"]);
    }

    #[test]
    fn test_validate_rules() {
        let bindings = vars(&[("a", 9.0), ("b", 4.0)]);
        let rules = ValidationRules {
            max_result: Some(20.0),
            min_result: Some(0.0),
            whole_number: true,
            predicate: Some("a > b && answer < 100".to_string()),
        };
        assert!(validate(13.0, &rules, &bindings).is_ok());
        assert!(matches!(validate(21.0, &rules, &bindings), Err(RuleViolation::AboveMax { .. })));
        assert!(matches!(validate(-1.0, &rules, &bindings), Err(RuleViolation::BelowMin { .. })));
        assert_eq!(validate(2.5, &rules, &bindings), Err(RuleViolation::NotWholeNumber(2.5)));

        let swapped = vars(&[("a", 1.0), ("b", 4.0)]);
        assert_eq!(validate(5.0, &rules, &swapped), Err(RuleViolation::PredicateFailed));
    }

    #[test]
    fn test_predicate_with_unknown_identifier() {
        let rules = ValidationRules {
            predicate: Some("z > 1".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            validate(1.0, &rules, &BTreeMap::new()),
            Err(RuleViolation::Predicate(ExpressionError::UnknownIdentifier(_)))
        ));
    }
}
