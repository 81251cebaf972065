//! Buffer distance specifications
//!
//! A buffer is either a fixed distance or an arithmetic expression evaluated
//! once per source feature over its attributes. Expressions support numbers,
//! `"field"` or bare field references, `+ - * /`, unary minus and parentheses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::error::EngineError;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BufferSpec {
    Fixed(f64),
    Expression(String),
}

impl BufferSpec {
    /// Validate the spec before any feature is touched
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            BufferSpec::Fixed(d) if !d.is_finite() => Err(EngineError::geometry(format!(
                "buffer distance must be finite, got {}",
                d
            ))),
            BufferSpec::Fixed(_) => Ok(()),
            BufferSpec::Expression(text) => BufferExpr::parse(text).map(|_| ()),
        }
    }

    /// Distance for one feature, rounded to `precision` decimals when given
    pub fn distance_for(
        &self,
        attributes: &Map<String, Value>,
        precision: Option<usize>,
    ) -> Result<f64, EngineError> {
        let raw = match self {
            BufferSpec::Fixed(d) => *d,
            BufferSpec::Expression(text) => BufferExpr::parse(text)?.evaluate(attributes)?,
        };
        if !raw.is_finite() {
            return Err(EngineError::geometry(format!(
                "buffer expression evaluated to {}",
                raw
            )));
        }
        Ok(round_distance(raw, precision))
    }

    /// Stable text form used in cache keys
    pub fn fingerprint(&self) -> String {
        match self {
            BufferSpec::Fixed(d) => format!("fixed:{}", d),
            BufferSpec::Expression(text) => {
                format!("expr:{}", blake3::hash(text.trim().as_bytes()).to_hex())
            }
        }
    }
}

/// Round to `precision` decimals; `None` keeps the value untouched
pub fn round_distance(value: f64, precision: Option<usize>) -> f64 {
    match precision {
        Some(decimals) => {
            let factor = 10f64.powi(decimals as i32);
            (value * factor).round() / factor
        }
        None => value,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Field(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Result<Vec<Token>, EngineError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' => {
                let mut name = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('"') if chars.get(i + 1) == Some(&'"') => {
                            name.push('"');
                            i += 2;
                        }
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            name.push(*ch);
                            i += 1;
                        }
                        None => {
                            return Err(EngineError::syntax(
                                "unterminated field reference in buffer expression",
                            ));
                        }
                    }
                }
                tokens.push(Token::Field(name));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal.parse::<f64>().map_err(|_| {
                    EngineError::syntax(format!("invalid number in buffer expression: {}", literal))
                })?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Field(chars[start..i].iter().collect()));
            }
            other => {
                return Err(EngineError::syntax(format!(
                    "unexpected character '{}' in buffer expression",
                    other
                )));
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Field(String),
    Neg(Box<Node>),
    Binary(char, Box<Node>, Box<Node>),
}

/// Parsed buffer expression
#[derive(Debug, Clone, PartialEq)]
pub struct BufferExpr {
    root: Node,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Node, EngineError> {
        let mut node = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            node = Node::Binary(op, Box::new(node), Box::new(self.term()?));
        }
        Ok(node)
    }

    // term := unary (('*' | '/') unary)*
    fn term(&mut self) -> Result<Node, EngineError> {
        let mut node = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            node = Node::Binary(op, Box::new(node), Box::new(self.unary()?));
        }
        Ok(node)
    }

    fn unary(&mut self) -> Result<Node, EngineError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(Node::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Node, EngineError> {
        match self.next() {
            Some(Token::Number(v)) => Ok(Node::Number(v)),
            Some(Token::Field(name)) => Ok(Node::Field(name)),
            Some(Token::LParen) => {
                let node = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(node),
                    _ => Err(EngineError::syntax("missing ')' in buffer expression")),
                }
            }
            Some(other) => Err(EngineError::syntax(format!(
                "unexpected token {:?} in buffer expression",
                other
            ))),
            None => Err(EngineError::syntax("buffer expression ends unexpectedly")),
        }
    }
}

impl BufferExpr {
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(EngineError::syntax("empty buffer expression"));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.expr()?;
        if parser.pos < parser.tokens.len() {
            return Err(EngineError::syntax(format!(
                "trailing input in buffer expression: {:?}",
                parser.tokens[parser.pos]
            )));
        }
        Ok(Self { root })
    }

    pub fn evaluate(&self, attributes: &Map<String, Value>) -> Result<f64, EngineError> {
        eval(&self.root, attributes)
    }
}

fn eval(node: &Node, attributes: &Map<String, Value>) -> Result<f64, EngineError> {
    match node {
        Node::Number(v) => Ok(*v),
        Node::Field(name) => match attributes.get(name) {
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| {
                EngineError::geometry(format!("field {} is not representable as f64", name))
            }),
            Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| {
                EngineError::geometry(format!("field {} is not numeric: {}", name, s))
            }),
            Some(other) => Err(EngineError::geometry(format!(
                "field {} is not numeric: {}",
                name, other
            ))),
            None => Err(EngineError::geometry(format!(
                "field {} missing from source feature",
                name
            ))),
        },
        Node::Neg(inner) => Ok(-eval(inner, attributes)?),
        Node::Binary(op, lhs, rhs) => {
            let a = eval(lhs, attributes)?;
            let b = eval(rhs, attributes)?;
            match op {
                '+' => Ok(a + b),
                '-' => Ok(a - b),
                '*' => Ok(a * b),
                _ if b == 0.0 => Err(EngineError::geometry("division by zero in buffer expression")),
                _ => Ok(a / b),
            }
        }
    }
}
