//! Tag-query expressions used by conditional requests.
//!
//! The accepted grammar is:
//!
//! ```text
//! expr    := and ( "OR" and )*
//! and     := term ( "AND" term )*
//! term    := "(" expr ")" | key op value
//! key     := "\"" chars "\"" | bare-identifier
//! value   := "'" chars "'"
//! op      := "=" | "<>" | ">" | ">=" | "<" | "<="
//! ```
//!
//! Keywords are case-insensitive. Comparisons are lexicographic on the raw
//! tag value, and a comparison against a missing key is always false.

use std::fmt;

use cask_common::{Error, Result};

use crate::provider::Tags;

/// Comparison operator in a tag predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn apply(self, actual: &str, expected: &str) -> bool {
        match self {
            CompareOp::Eq => actual == expected,
            CompareOp::Ne => actual != expected,
            CompareOp::Gt => actual > expected,
            CompareOp::Ge => actual >= expected,
            CompareOp::Lt => actual < expected,
            CompareOp::Le => actual <= expected,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }
}

/// Parsed predicate over a blob's tag set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagQuery {
    Compare {
        key: String,
        op: CompareOp,
        value: String,
    },
    And(Box<TagQuery>, Box<TagQuery>),
    Or(Box<TagQuery>, Box<TagQuery>),
}

impl TagQuery {
    /// Parse a tag-query expression.
    ///
    /// # Errors
    /// - `InvalidInput` if the expression is empty or malformed
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(Error::InvalidInput("Tag query is empty".to_string()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let query = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(Error::InvalidInput(format!(
                "Unexpected token in tag query: {:?}",
                tok
            )));
        }
        Ok(query)
    }

    /// Evaluate the predicate against a tag set.
    pub fn matches(&self, tags: &Tags) -> bool {
        match self {
            TagQuery::Compare { key, op, value } => tags
                .get(key)
                .map(|actual| op.apply(actual, value))
                .unwrap_or(false),
            TagQuery::And(lhs, rhs) => lhs.matches(tags) && rhs.matches(tags),
            TagQuery::Or(lhs, rhs) => lhs.matches(tags) || rhs.matches(tags),
        }
    }
}

impl fmt::Display for TagQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagQuery::Compare { key, op, value } => {
                write!(f, "\"{}\" {} '{}'", key, op.symbol(), value)
            }
            TagQuery::And(lhs, rhs) => write!(f, "({} AND {})", lhs, rhs),
            TagQuery::Or(lhs, rhs) => write!(f, "({} OR {})", lhs, rhs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Key(String),
    Value(String),
    Op(CompareOp),
    And,
    Or,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' | '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == c => break,
                        Some(ch) => text.push(ch),
                        None => {
                            return Err(Error::InvalidInput(
                                "Unterminated quote in tag query".to_string(),
                            ))
                        }
                    }
                }
                tokens.push(if c == '"' {
                    Token::Key(text)
                } else {
                    Token::Value(text)
                });
            }
            '=' => {
                chars.next();
                tokens.push(Token::Op(CompareOp::Eq));
            }
            '<' => {
                chars.next();
                let op = match chars.peek() {
                    Some('>') => {
                        chars.next();
                        CompareOp::Ne
                    }
                    Some('=') => {
                        chars.next();
                        CompareOp::Le
                    }
                    _ => CompareOp::Lt,
                };
                tokens.push(Token::Op(op));
            }
            '>' => {
                chars.next();
                let op = if chars.peek() == Some(&'=') {
                    chars.next();
                    CompareOp::Ge
                } else {
                    CompareOp::Gt
                };
                tokens.push(Token::Op(op));
            }
            c if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' || ch == '-' || ch == '.' {
                        word.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    _ => Token::Key(word),
                };
                tokens.push(token);
            }
            other => {
                return Err(Error::InvalidInput(format!(
                    "Unexpected character in tag query: '{}'",
                    other
                )))
            }
        }
    }

    Ok(tokens)
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
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn parse_or(&mut self) -> Result<TagQuery> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let rhs = self.parse_and()?;
            lhs = TagQuery::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<TagQuery> {
        let mut lhs = self.parse_term()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let rhs = self.parse_term()?;
            lhs = TagQuery::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<TagQuery> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(Error::InvalidInput(
                        "Missing closing parenthesis in tag query".to_string(),
                    )),
                }
            }
            Some(Token::Key(key)) => {
                let op = match self.next() {
                    Some(Token::Op(op)) => op,
                    other => {
                        return Err(Error::InvalidInput(format!(
                            "Expected comparison operator after '{}', found {:?}",
                            key, other
                        )))
                    }
                };
                match self.next() {
                    Some(Token::Value(value)) => Ok(TagQuery::Compare { key, op, value }),
                    other => Err(Error::InvalidInput(format!(
                        "Expected quoted value after '{}', found {:?}",
                        key, other
                    ))),
                }
            }
            other => Err(Error::InvalidInput(format!(
                "Expected tag predicate, found {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_simple_equality() {
        let q = TagQuery::parse("\"project\" = 'cask'").unwrap();
        assert!(q.matches(&tags(&[("project", "cask")])));
        assert!(!q.matches(&tags(&[("project", "other")])));
    }

    #[test]
    fn test_missing_key_never_matches() {
        let q = TagQuery::parse("\"tier\" <> 'hot'").unwrap();
        assert!(!q.matches(&tags(&[])));
        assert!(q.matches(&tags(&[("tier", "cool")])));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let q = TagQuery::parse("\"a\" = '1' OR \"b\" = '2' AND \"c\" = '3'").unwrap();
        // a=1 alone satisfies the OR
        assert!(q.matches(&tags(&[("a", "1")])));
        // b=2 without c=3 does not
        assert!(!q.matches(&tags(&[("b", "2")])));
        assert!(q.matches(&tags(&[("b", "2"), ("c", "3")])));
    }

    #[test]
    fn test_parentheses_override_precedence() {
        let q = TagQuery::parse("(\"a\" = '1' OR \"b\" = '2') and \"c\" = '3'").unwrap();
        assert!(!q.matches(&tags(&[("a", "1")])));
        assert!(q.matches(&tags(&[("a", "1"), ("c", "3")])));
    }

    #[test]
    fn test_range_comparisons_are_lexicographic() {
        let q = TagQuery::parse("date >= '2024-01-01' AND date < '2025-01-01'").unwrap();
        assert!(q.matches(&tags(&[("date", "2024-06-30")])));
        assert!(!q.matches(&tags(&[("date", "2025-02-01")])));
    }

    #[test]
    fn test_malformed_queries_are_rejected() {
        assert!(TagQuery::parse("").is_err());
        assert!(TagQuery::parse("\"a\" = ").is_err());
        assert!(TagQuery::parse("\"a\" '1'").is_err());
        assert!(TagQuery::parse("(\"a\" = '1'").is_err());
        assert!(TagQuery::parse("\"a\" = 'unterminated").is_err());
        assert!(TagQuery::parse("\"a\" = '1' \"b\"").is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let q = TagQuery::parse("\"a\" = '1' OR \"b\" >= '2'").unwrap();
        let reparsed = TagQuery::parse(&q.to_string()).unwrap();
        assert_eq!(q, reparsed);
    }

    fn compare_strategy() -> impl proptest::strategy::Strategy<Value = TagQuery> {
        use proptest::prelude::*;
        let op = prop_oneof![
            Just(CompareOp::Eq),
            Just(CompareOp::Ne),
            Just(CompareOp::Gt),
            Just(CompareOp::Ge),
            Just(CompareOp::Lt),
            Just(CompareOp::Le),
        ];
        ("[a-z][a-z0-9_]{0,8}", op, "[a-zA-Z0-9 ._-]{0,12}")
            .prop_map(|(key, op, value)| TagQuery::Compare { key, op, value })
    }

    fn query_strategy() -> impl proptest::strategy::Strategy<Value = TagQuery> {
        use proptest::prelude::*;
        compare_strategy().prop_recursive(3, 16, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone())
                    .prop_map(|(l, r)| TagQuery::And(Box::new(l), Box::new(r))),
                (inner.clone(), inner)
                    .prop_map(|(l, r)| TagQuery::Or(Box::new(l), Box::new(r))),
            ]
        })
    }

    proptest::proptest! {
        #[test]
        fn prop_display_reparses(query in query_strategy()) {
            let rendered = query.to_string();
            proptest::prop_assert_eq!(TagQuery::parse(&rendered).unwrap(), query);
        }
    }
}
