//! Arithmetic expression language for patch parameters.
//!
//! A small recursive-descent parser turning free text like
//! `"freq * 2 + lfo"` into patch subtrees. Subtraction and division do not
//! exist in the graph, so they lower onto what does: `a - b` becomes
//! `sum(a, product(-1, b))` and `a / b` becomes `product(a, reciprocal(b))`.
//! Bare identifiers become named `free` parameters, except the reserved
//! `freq` and `vel`, which map to the note-event leaves.

use crate::error::ExprError;
use crate::patch::{FreeSpec, NodeArr, PatchNode, ValueSpec};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Eof,
}

/// Token plus the character offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

fn token_name(token: &Token) -> &'static str {
    match token {
        Token::Number(_) => "number",
        Token::Ident(_) => "identifier",
        Token::Plus => "'+'",
        Token::Minus => "'-'",
        Token::Star => "'*'",
        Token::Slash => "'/'",
        Token::LParen => "'('",
        Token::RParen => "')'",
        Token::Eof => "end of expression",
    }
}

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < chars.len() {
        let start = pos;
        match chars[pos] {
            ' ' | '\t' | '\r' | '\n' => pos += 1,
            '+' => {
                tokens.push(Spanned { token: Token::Plus, pos: start });
                pos += 1;
            }
            '-' => {
                tokens.push(Spanned { token: Token::Minus, pos: start });
                pos += 1;
            }
            '*' => {
                tokens.push(Spanned { token: Token::Star, pos: start });
                pos += 1;
            }
            '/' => {
                tokens.push(Spanned { token: Token::Slash, pos: start });
                pos += 1;
            }
            '(' => {
                tokens.push(Spanned { token: Token::LParen, pos: start });
                pos += 1;
            }
            ')' => {
                tokens.push(Spanned { token: Token::RParen, pos: start });
                pos += 1;
            }
            '0'..='9' | '.' => {
                let mut end = pos;
                while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == '.') {
                    end += 1;
                }
                let text: String = chars[pos..end].iter().collect();
                let value = text.parse::<f64>().map_err(|_| ExprError::InvalidNumber {
                    text: text.clone(),
                    pos: start,
                })?;
                tokens.push(Spanned { token: Token::Number(value), pos: start });
                pos = end;
            }
            ch if ch.is_ascii_alphabetic() || ch == '_' => {
                let mut end = pos;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }
                let name: String = chars[pos..end].iter().collect();
                tokens.push(Spanned { token: Token::Ident(name), pos: start });
                pos = end;
            }
            ch => return Err(ExprError::UnexpectedChar { ch, pos: start }),
        }
    }
    tokens.push(Spanned { token: Token::Eof, pos: chars.len() });
    Ok(tokens)
}

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn span(&self) -> usize {
        self.tokens[self.pos].pos
    }

    /// Take the current token; the Eof sentinel is never stepped past.
    fn advance(&mut self) -> Spanned {
        let spanned = self.tokens[self.pos].clone();
        if spanned.token != Token::Eof {
            self.pos += 1;
        }
        spanned
    }

    fn expect(&mut self, expected: Token) -> Result<Spanned, ExprError> {
        if std::mem::discriminant(self.peek()) == std::mem::discriminant(&expected) {
            Ok(self.advance())
        } else if *self.peek() == Token::Eof {
            Err(ExprError::UnexpectedEnd {
                expected: token_name(&expected).to_string(),
            })
        } else {
            Err(ExprError::UnexpectedToken {
                expected: token_name(&expected).to_string(),
                found: token_name(self.peek()).to_string(),
                pos: self.span(),
            })
        }
    }

    pub fn parse(mut self) -> Result<PatchNode, ExprError> {
        let node = self.parse_additive()?;
        match self.peek() {
            Token::Eof => Ok(node),
            found => Err(ExprError::UnexpectedToken {
                expected: "end of expression".to_string(),
                found: token_name(found).to_string(),
                pos: self.span(),
            }),
        }
    }

    fn parse_additive(&mut self) -> Result<PatchNode, ExprError> {
        let mut terms = vec![self.parse_multiplicative()?];
        loop {
            match self.peek() {
                Token::Plus => {
                    self.advance();
                    terms.push(self.parse_multiplicative()?);
                }
                Token::Minus => {
                    self.advance();
                    let rhs = self.parse_multiplicative()?;
                    terms.push(negate(rhs));
                }
                _ => break,
            }
        }
        Ok(collapse(terms, PatchNode::Sum))
    }

    fn parse_multiplicative(&mut self) -> Result<PatchNode, ExprError> {
        let mut factors = vec![self.parse_unary()?];
        loop {
            match self.peek() {
                Token::Star => {
                    self.advance();
                    factors.push(self.parse_unary()?);
                }
                Token::Slash => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    factors.push(PatchNode::Reciprocal(Box::new(rhs)));
                }
                _ => break,
            }
        }
        Ok(collapse(factors, PatchNode::Product))
    }

    fn parse_unary(&mut self) -> Result<PatchNode, ExprError> {
        if *self.peek() == Token::Minus {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(negate(operand));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<PatchNode, ExprError> {
        let spanned = self.advance();
        match spanned.token {
            Token::Number(value) => Ok(PatchNode::Const(ValueSpec { value, name: None })),
            Token::Ident(name) => Ok(ident_node(name)),
            Token::LParen => {
                let inner = self.parse_additive()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Eof => Err(ExprError::UnexpectedEnd {
                expected: "number, identifier, or '('".to_string(),
            }),
            other => Err(ExprError::UnexpectedToken {
                expected: "number, identifier, or '('".to_string(),
                found: token_name(&other).to_string(),
                pos: spanned.pos,
            }),
        }
    }
}

/// Parse expression text into a patch subtree.
pub fn parse_expression(text: &str) -> Result<PatchNode, ExprError> {
    let tokens = tokenize(text)?;
    Parser::new(tokens).parse()
}

/// A single term stays bare; multiple terms wrap in the combinator.
fn collapse(mut terms: Vec<PatchNode>, wrap: fn(NodeArr) -> PatchNode) -> PatchNode {
    if terms.len() == 1 {
        if let Some(single) = terms.pop() {
            return single;
        }
    }
    wrap(NodeArr::from(terms))
}

fn negate(node: PatchNode) -> PatchNode {
    PatchNode::Product(NodeArr::from(vec![
        PatchNode::Const(ValueSpec { value: -1.0, name: None }),
        node,
    ]))
}

fn ident_node(name: String) -> PatchNode {
    match name.as_str() {
        "freq" => PatchNode::NoteFreq {},
        "vel" => PatchNode::NoteVel {},
        _ => PatchNode::Free(FreeSpec { name, value: 0.0 }),
    }
}
