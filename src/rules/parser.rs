//! Tokenizer and recursive-descent parser for the rules DSL.
//!
//! ```text
//! rules := match+
//! match := 'match' path '{' allow* '}'
//! path  := segment ('/' segment)*
//! segment := ident | '{' ident '}'
//! allow := 'allow' mode (':' 'if' expr)?
//! mode  := ('r'|'w'|'rw')
//! expr  := param op param
//! op    := '==' | '<' | '>' | '<=' | '>='
//! param := ident | 'auth.uid'
//! ```

use crate::error::{CustodianResult, ServerError};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Literal(String),
    Variable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Literal(String),
    PathVar(String),
    AuthUid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grants {
    pub read: bool,
    pub write: bool,
}

impl Grants {
    pub fn covers(&self, wants: Grants) -> bool {
        (!wants.read || self.read) && (!wants.write || self.write)
    }

    fn parse(mode: &str) -> CustodianResult<Self> {
        match mode {
            "r" => Ok(Grants {
                read: true,
                write: false,
            }),
            "w" => Ok(Grants {
                read: false,
                write: true,
            }),
            "rw" => Ok(Grants {
                read: true,
                write: true,
            }),
            other => Err(ServerError::Parse(format!("unknown allow mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Check {
    pub lhs: Param,
    pub op: CompareOp,
    pub rhs: Param,
}

#[derive(Debug, Clone)]
pub struct Prereq {
    pub grants: Grants,
    pub check: Option<Check>,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: Vec<PathSegment>,
    pub prereqs: Vec<Prereq>,
}

/// A single lexical token. Quoted strings are unwrapped into `QuotedLiteral`
/// so the parser can tell a literal apart from a bare identifier without
/// re-inspecting the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    QuotedLiteral(String),
}

impl Token {
    fn as_str(&self) -> &str {
        match self {
            Token::Word(s) | Token::QuotedLiteral(s) => s,
        }
    }
}

struct Tokenizer {
    tokens: Vec<Token>,
    pos: usize,
}

fn tokenize(input: &str) -> CustodianResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = input;
    while !rest.is_empty() {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        if let Some(inner) = rest.strip_prefix('"') {
            let end = inner
                .find('"')
                .ok_or_else(|| ServerError::Parse("unterminated string literal".into()))?;
            tokens.push(Token::QuotedLiteral(inner[..end].to_string()));
            rest = &inner[end + 1..];
            continue;
        }
        let bytes = rest.as_bytes();
        let two_char = rest.len() >= 2 && matches!(&rest[..2], "==" | "<=" | ">=");
        let one_char = matches!(bytes[0], b'{' | b'}' | b':' | b'<' | b'>' | b'/' | b';');
        let len = if two_char {
            2
        } else if one_char {
            1
        } else {
            rest.find(|c: char| {
                c.is_whitespace() || matches!(c, '{' | '}' | ':' | '<' | '>' | '/' | ';' | '"')
            })
            .unwrap_or(rest.len())
            .max(1)
        };
        tokens.push(Token::Word(rest[..len].to_string()));
        rest = &rest[len..];
    }
    Ok(tokens)
}

impl Tokenizer {
    fn new(input: &str) -> CustodianResult<Self> {
        Ok(Self {
            tokens: tokenize(input)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_str(&self) -> Option<&str> {
        self.peek().map(Token::as_str)
    }

    fn next(&mut self) -> CustodianResult<&Token> {
        if self.pos >= self.tokens.len() {
            return Err(ServerError::Parse("unexpected end of rules input".into()));
        }
        let tok = &self.tokens[self.pos];
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, expected: &str) -> CustodianResult<()> {
        let tok = self.next()?.as_str().to_string();
        if tok != expected {
            return Err(ServerError::Parse(format!(
                "expected '{expected}', found '{tok}'"
            )));
        }
        Ok(())
    }
}

fn is_ident(tok: &str) -> bool {
    !tok.is_empty() && tok.chars().all(|c| c.is_alphanumeric() || c == '.' || c == '_')
}

/// Parse a full rules file into an ordered sequence of rules.
pub fn parse_rules(input: &str) -> CustodianResult<Vec<Rule>> {
    let mut tokenizer = Tokenizer::new(input)?;
    let mut rules = Vec::new();
    while tokenizer.peek().is_some() {
        rules.push(parse_match(&mut tokenizer)?);
    }
    Ok(rules)
}

fn parse_match(tokenizer: &mut Tokenizer) -> CustodianResult<Rule> {
    tokenizer.expect("match")?;
    let pattern = parse_path(tokenizer)?;

    let mut seen = HashSet::new();
    for segment in &pattern {
        if let PathSegment::Variable(name) = segment {
            if !seen.insert(name.clone()) {
                return Err(ServerError::ParamInval(format!(
                    "duplicate path variable '{name}' in one match"
                )));
            }
        }
    }

    tokenizer.expect("{")?;
    let mut prereqs = Vec::new();
    while tokenizer.peek_str().map(|t| t != "}").unwrap_or(false) {
        prereqs.push(parse_allow(tokenizer, &seen)?);
    }
    tokenizer.expect("}")?;

    Ok(Rule { pattern, prereqs })
}

fn parse_path(tokenizer: &mut Tokenizer) -> CustodianResult<Vec<PathSegment>> {
    let mut segments = Vec::new();
    loop {
        let tok = tokenizer.next()?.as_str().to_string();
        if tok == "{" {
            let name = tokenizer.next()?.as_str().to_string();
            if !is_ident(&name) {
                return Err(ServerError::ParamInval(format!(
                    "invalid path variable name: {name}"
                )));
            }
            tokenizer.expect("}")?;
            segments.push(PathSegment::Variable(name));
        } else {
            if !is_ident(&tok) {
                return Err(ServerError::Parse(format!("invalid path segment: {tok}")));
            }
            segments.push(PathSegment::Literal(tok));
        }
        match tokenizer.peek_str() {
            Some("/") => {
                tokenizer.next()?;
            }
            _ => break,
        }
    }
    Ok(segments)
}

fn parse_allow(tokenizer: &mut Tokenizer, known_vars: &HashSet<String>) -> CustodianResult<Prereq> {
    tokenizer.expect("allow")?;
    let mode = tokenizer.next()?.as_str().to_string();
    let grants = Grants::parse(&mode)?;

    let check = if tokenizer.peek_str() == Some(":") {
        tokenizer.next()?;
        tokenizer.expect("if")?;
        Some(parse_expr(tokenizer, known_vars)?)
    } else {
        None
    };

    if tokenizer.peek_str() == Some(";") {
        tokenizer.next()?;
    }

    Ok(Prereq { grants, check })
}

fn parse_expr(tokenizer: &mut Tokenizer, known_vars: &HashSet<String>) -> CustodianResult<Check> {
    let lhs = parse_param(tokenizer, known_vars)?;
    let op_tok = tokenizer.next()?.as_str().to_string();
    let op = match op_tok.as_str() {
        "==" => CompareOp::Eq,
        "<" => CompareOp::Lt,
        ">" => CompareOp::Gt,
        "<=" => CompareOp::Le,
        ">=" => CompareOp::Ge,
        other => return Err(ServerError::Parse(format!("invalid operator: {other}"))),
    };
    let rhs = parse_param(tokenizer, known_vars)?;
    Ok(Check { lhs, op, rhs })
}

fn parse_param(tokenizer: &mut Tokenizer, known_vars: &HashSet<String>) -> CustodianResult<Param> {
    let tok = tokenizer.next()?;
    if let Token::QuotedLiteral(s) = tok {
        return Ok(Param::Literal(s.clone()));
    }
    let tok = tok.as_str();
    if tok == "auth.uid" {
        return Ok(Param::AuthUid);
    }
    if tok.chars().all(|c| c.is_ascii_digit()) && !tok.is_empty() {
        return Ok(Param::Literal(tok.to_string()));
    }
    if !is_ident(tok) {
        return Err(ServerError::ParamInval(format!("invalid param: {tok}")));
    }
    if known_vars.contains(tok) {
        Ok(Param::PathVar(tok.to_string()))
    } else {
        Err(ServerError::ParamInval(format!(
            "unknown param identifier: {tok}"
        )))
    }
}
