//! Text rule language.
//!
//! Scripts are boolean expressions over the current frame, for example
//!
//! ```text
//! right_wrist.y < right_shoulder.y AND dist(right_wrist, nose) > 0.2
//! tm.class == 'screwing' && tm.confidence >= 0.8
//! abs(angles.trunkTwist) > 20 or not angles.trunk < 60
//! ```
//!
//! ## Grammar
//!
//! ```text
//! expr     := or
//! or       := and (("OR" | "||") and)*
//! and      := not (("AND" | "&&") not)*
//! not      := ("NOT" | "!") not | cmp
//! cmp      := sum (("<" | "<=" | ">" | ">=" | "==" | "=" | "!=") sum)?
//! sum      := product (("+" | "-") product)*
//! product  := unary (("*" | "/" | "%") unary)*
//! unary    := "-" unary | primary
//! primary  := NUMBER | STRING | "true" | "false"
//!           | IDENT "(" (expr ("," expr)*)? ")"
//!           | IDENT ("." IDENT)*
//!           | "(" expr ")"
//! ```
//!
//! Keywords are case-insensitive. A missing joint, angle or classifier
//! output evaluates to Unknown, which propagates with Kleene logic.
//! Expression trees deeper than [`MAX_DEPTH`] are rejected at parse time.

use ergo_core::{joint_angle_deg, AngleKey, ClassifierOutput, Error, Keypoint, Result};

use crate::context::FrameContext;
use crate::truth::Truth;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Dot,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    AndAnd,
    OrOr,
    Bang,
}

#[derive(Debug, Clone, PartialEq)]
struct Spanned {
    token: Token,
    position: usize,
}

fn parse_error(position: usize, message: impl Into<String>) -> Error {
    Error::ScriptParse {
        position,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while let Some(&c) = chars.get(i) {
        let start = i;
        let next = chars.get(i + 1).copied();
        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '<' if next == Some('=') => {
                i += 1;
                Token::Le
            }
            '<' => Token::Lt,
            '>' if next == Some('=') => {
                i += 1;
                Token::Ge
            }
            '>' => Token::Gt,
            '=' if next == Some('=') => {
                i += 1;
                Token::Eq
            }
            '=' => Token::Eq,
            '!' if next == Some('=') => {
                i += 1;
                Token::Ne
            }
            '!' => Token::Bang,
            '&' if next == Some('&') => {
                i += 1;
                Token::AndAnd
            }
            '|' if next == Some('|') => {
                i += 1;
                Token::OrOr
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => break,
                        Some(&ch) => text.push(ch),
                        None => return Err(parse_error(start, "unterminated string")),
                    }
                    i += 1;
                }
                Token::Str(text)
            }
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => Token::Dot,
            c if c.is_ascii_digit() || c == '.' => {
                let mut text = String::new();
                while let Some(&d) = chars.get(i) {
                    if d.is_ascii_digit() || d == '.' {
                        text.push(d);
                        i += 1;
                    } else {
                        break;
                    }
                }
                i -= 1;
                let value = text
                    .parse::<f64>()
                    .map_err(|_| parse_error(start, format!("invalid number '{text}'")))?;
                Token::Number(value)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut text = String::new();
                while let Some(&d) = chars.get(i) {
                    if d.is_alphanumeric() || d == '_' {
                        text.push(d);
                        i += 1;
                    } else {
                        break;
                    }
                }
                i -= 1;
                Token::Ident(text)
            }
            other => return Err(parse_error(start, format!("unexpected character '{other}'"))),
        };
        tokens.push(Spanned {
            token,
            position: start,
        });
        i += 1;
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
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Path(Vec<String>),
    Call(String, Vec<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// Deepest expression tree a script may build
pub const MAX_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
    depth: usize,
}

fn keyword(token: Option<&Token>, word: &str) -> bool {
    matches!(token, Some(Token::Ident(name)) if name.eq_ignore_ascii_case(word))
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |s| s.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<()> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(parse_error(self.position(), format!("expected {what}")))
        }
    }

    /// One level deeper into the expression tree. Callers restore the
    /// depth they started at once the subtree is built.
    fn descend(&mut self) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(parse_error(self.position(), "script nests too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) || keyword(self.peek(), "or") {
            self.pos += 1;
            self.descend()?;
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_not()?;
        while self.peek() == Some(&Token::AndAnd) || keyword(self.peek(), "and") {
            self.pos += 1;
            self.descend()?;
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Bang) || keyword(self.peek(), "not") {
            self.pos += 1;
            let base = self.depth;
            self.descend()?;
            let inner = self.parse_not()?;
            self.depth = base;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let lhs = self.parse_sum()?;
        let op = match self.peek() {
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_sum()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_sum(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            let rhs = self.parse_product()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_product(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            let base = self.depth;
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth = base;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let position = self.position();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::LParen) => {
                let base = self.depth;
                self.descend()?;
                let inner = self.parse_or()?;
                self.depth = base;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if name.eq_ignore_ascii_case("true") {
                    return Ok(Expr::Bool(true));
                }
                if name.eq_ignore_ascii_case("false") {
                    return Ok(Expr::Bool(false));
                }
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let base = self.depth;
                    self.descend()?;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        args.push(self.parse_or()?);
                        while self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                            args.push(self.parse_or()?);
                        }
                    }
                    self.depth = base;
                    self.expect(Token::RParen, "')' after arguments")?;
                    return Ok(Expr::Call(name.to_ascii_lowercase(), args));
                }
                let mut path = vec![name];
                while self.peek() == Some(&Token::Dot) {
                    self.pos += 1;
                    match self.advance() {
                        Some(Token::Ident(segment)) => path.push(segment),
                        _ => return Err(parse_error(self.position(), "expected name after '.'")),
                    }
                }
                Ok(Expr::Path(path))
            }
            Some(_) => Err(parse_error(position, "unexpected token")),
            None => Err(parse_error(position, "unexpected end of script")),
        }
    }
}

/// Runtime value of a sub-expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Str(String),
    Bool(bool),
    Unknown,
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Unknown => "unknown",
        }
    }

    fn truth(&self) -> Result<Truth> {
        match self {
            Value::Bool(b) => Ok(Truth::from_bool(*b)),
            Value::Unknown => Ok(Truth::Unknown),
            other => Err(Error::ScriptEval(format!(
                "expected a boolean, found a {}",
                other.type_name()
            ))),
        }
    }

    fn from_truth(truth: Truth) -> Value {
        match truth {
            Truth::True => Value::Bool(true),
            Truth::False => Value::Bool(false),
            Truth::Unknown => Value::Unknown,
        }
    }
}

fn number(value: Value, context: &str) -> Result<Option<f64>> {
    match value {
        Value::Number(n) => Ok(Some(n)),
        Value::Unknown => Ok(None),
        other => Err(Error::ScriptEval(format!(
            "{context} expects a number, found a {}",
            other.type_name()
        ))),
    }
}

/// A parsed script, ready to evaluate against frames
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    source: String,
    root: Expr,
}

impl Script {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(parse_error(0, "empty script"));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: source.chars().count(),
            depth: 0,
        };
        let root = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(parse_error(parser.position(), "unexpected trailing input"));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate to a truth value; a non-boolean result is an error
    pub fn evaluate(&self, ctx: &FrameContext<'_>) -> Result<Truth> {
        self.evaluate_value(ctx)?.truth()
    }

    pub fn evaluate_value(&self, ctx: &FrameContext<'_>) -> Result<Value> {
        Evaluator { ctx }.eval(&self.root)
    }
}

struct Evaluator<'c, 'a> {
    ctx: &'c FrameContext<'a>,
}

impl Evaluator<'_, '_> {
    fn eval(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Path(path) => self.resolve(path),
            Expr::Call(name, args) => self.call(name, args),
            Expr::Neg(inner) => Ok(number(self.eval(inner)?, "'-'")?
                .map_or(Value::Unknown, |n| Value::Number(-n))),
            Expr::Not(inner) => Ok(Value::from_truth(!self.eval(inner)?.truth()?)),
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                let left = self.eval(lhs)?.truth()?;
                if left == Truth::False {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::from_truth(left.and(self.eval(rhs)?.truth()?)))
            }
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                let left = self.eval(lhs)?.truth()?;
                if left == Truth::True {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::from_truth(left.or(self.eval(rhs)?.truth()?)))
            }
            Expr::Binary(op, lhs, rhs) => {
                let left = self.eval(lhs)?;
                let right = self.eval(rhs)?;
                self.binary(*op, left, right)
            }
        }
    }

    fn binary(&self, op: BinaryOp, left: Value, right: Value) -> Result<Value> {
        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            let equal = match (&left, &right) {
                (Value::Unknown, _) | (_, Value::Unknown) => return Ok(Value::Unknown),
                (Value::Number(a), Value::Number(b)) => a == b,
                (Value::Str(a), Value::Str(b)) => a.eq_ignore_ascii_case(b),
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (a, b) => {
                    return Err(Error::ScriptEval(format!(
                        "cannot compare a {} with a {}",
                        a.type_name(),
                        b.type_name()
                    )))
                }
            };
            return Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }));
        }

        let (Some(a), Some(b)) = (number(left, "operator")?, number(right, "operator")?) else {
            return Ok(Value::Unknown);
        };
        let value = match op {
            BinaryOp::Add => Value::Number(a + b),
            BinaryOp::Sub => Value::Number(a - b),
            BinaryOp::Mul => Value::Number(a * b),
            BinaryOp::Div if b == 0.0 => Value::Unknown,
            BinaryOp::Div => Value::Number(a / b),
            BinaryOp::Rem if b == 0.0 => Value::Unknown,
            BinaryOp::Rem => Value::Number(a % b),
            BinaryOp::Lt => Value::Bool(a < b),
            BinaryOp::Le => Value::Bool(a <= b),
            BinaryOp::Gt => Value::Bool(a > b),
            BinaryOp::Ge => Value::Bool(a >= b),
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::And | BinaryOp::Or => Value::Unknown,
        };
        Ok(value)
    }

    fn joint_arg(&self, expr: &Expr) -> Result<Keypoint> {
        let name = match expr {
            Expr::Path(path) if path.len() == 1 => path[0].as_str(),
            Expr::Str(s) => s.as_str(),
            _ => return Err(Error::ScriptEval("expected a joint name".to_string())),
        };
        Keypoint::from_name(name).ok_or_else(|| Error::ScriptEval(format!("unknown joint '{name}'")))
    }

    fn call(&self, name: &str, args: &[Expr]) -> Result<Value> {
        match name {
            "dist" | "distance" => {
                let [a, b] = args else {
                    return Err(Error::ScriptEval(format!("{name} takes 2 joints")));
                };
                let (a, b) = (self.joint_arg(a)?, self.joint_arg(b)?);
                Ok(match (self.ctx.joint(a, true), self.ctx.joint(b, true)) {
                    (Some(p), Some(q)) => Value::Number(p.distance_to(&q)),
                    _ => Value::Unknown,
                })
            }
            "angle" => {
                let [a, b, c] = args else {
                    return Err(Error::ScriptEval("angle takes 3 joints".to_string()));
                };
                let joints = [self.joint_arg(a)?, self.joint_arg(b)?, self.joint_arg(c)?];
                let points: Option<Vec<_>> = joints.iter().map(|j| self.ctx.joint(*j, true)).collect();
                Ok(match points.as_deref() {
                    Some([p, q, r]) => Value::Number(joint_angle_deg(p, q, r)),
                    _ => Value::Unknown,
                })
            }
            _ => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    match number(self.eval(arg)?, name)? {
                        Some(v) => values.push(v),
                        None => return Ok(Value::Unknown),
                    }
                }
                math(name, &values).map(Value::Number)
            }
        }
    }

    fn resolve(&self, path: &[String]) -> Result<Value> {
        let segments: Vec<String> = path.iter().map(|s| s.to_ascii_lowercase()).collect();
        match segments.as_slice() {
            [root, key] if root == "angles" => {
                let key = AngleKey::from_name(key)
                    .ok_or_else(|| Error::ScriptEval(format!("unknown angle '{key}'")))?;
                Ok(self.ctx.angles.get(key).map_or(Value::Unknown, Value::Number))
            }
            [root, prop] if root == "tm" => {
                let first = self
                    .ctx
                    .observation
                    .external
                    .values()
                    .find(|o| matches!(o, ClassifierOutput::Label(_)))
                    .or_else(|| self.ctx.observation.external.values().next());
                classifier_property(first, prop)
            }
            [root, model, prop] if root == "tm" => {
                let output = self
                    .ctx
                    .observation
                    .external
                    .iter()
                    .find(|(id, _)| id.eq_ignore_ascii_case(model))
                    .map(|(_, o)| o);
                classifier_property(output, prop)
            }
            [joint, prop] => {
                let keypoint = Keypoint::from_name(joint)
                    .ok_or_else(|| Error::ScriptEval(format!("unknown joint '{joint}'")))?;
                match prop.as_str() {
                    "x" => Ok(self.ctx.keypoint(keypoint).map_or(Value::Unknown, |k| Value::Number(k.x))),
                    "y" => Ok(self.ctx.keypoint(keypoint).map_or(Value::Unknown, |k| Value::Number(k.y))),
                    "confidence" | "score" => Ok(self
                        .ctx
                        .pose()
                        .and_then(|p| p.get(keypoint))
                        .map_or(Value::Unknown, |k| Value::Number(k.confidence))),
                    other => Err(Error::ScriptEval(format!("unknown joint property '{other}'"))),
                }
            }
            _ => Err(Error::ScriptEval(format!("unknown name '{}'", path.join(".")))),
        }
    }
}

fn classifier_property(output: Option<&ClassifierOutput>, prop: &str) -> Result<Value> {
    let best = match output {
        None => return Ok(Value::Unknown),
        Some(ClassifierOutput::Label(label)) => Some((label.class_name.clone(), label.probability)),
        Some(ClassifierOutput::Detections(detections)) => detections
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .map(|d| (d.class_name.clone(), d.confidence)),
    };
    let Some((class_name, confidence)) = best else {
        return Ok(Value::Unknown);
    };
    match prop {
        "class" | "classname" => Ok(Value::Str(class_name)),
        "confidence" | "probability" => Ok(Value::Number(confidence)),
        other => Err(Error::ScriptEval(format!("unknown classifier property '{other}'"))),
    }
}

fn math(name: &str, args: &[f64]) -> Result<f64> {
    let arity = |n: usize| -> Result<()> {
        if args.len() == n {
            Ok(())
        } else {
            Err(Error::ScriptEval(format!("{name} takes {n} argument(s), got {}", args.len())))
        }
    };
    let first = || args.first().copied().unwrap_or(0.0);
    match name {
        "abs" => arity(1).map(|_| first().abs()),
        "round" => arity(1).map(|_| first().round()),
        "floor" => arity(1).map(|_| first().floor()),
        "ceil" => arity(1).map(|_| first().ceil()),
        "sqrt" => arity(1).map(|_| first().sqrt()),
        "sin" => arity(1).map(|_| first().sin()),
        "cos" => arity(1).map(|_| first().cos()),
        "tan" => arity(1).map(|_| first().tan()),
        "atan2" => arity(2).map(|_| first().atan2(args.get(1).copied().unwrap_or(0.0))),
        "min" | "max" if args.is_empty() => Err(Error::ScriptEval(format!("{name} needs arguments"))),
        "min" => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
        "max" => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        other => Err(Error::ScriptEval(format!("unknown function '{other}'"))),
    }
}
