//! Raw filter string parsing.
//!
//! # Responsibility
//! - Turn textual filters such as `age > 5 AND (name CONTAINS "an")` into the
//!   same structured `Predicate` the builder emits.
//!
//! # Invariants
//! - Parsed input is replayed through `PredicateBuilder`, so text and builder
//!   expressions share one validation path.

use super::builder::{Predicate, PredicateBuilder};
use super::operator::PredicateOperator;
use super::value::PredicateValue;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Raw filter text that could not be turned into a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSyntaxError {
    /// Byte offset where parsing stopped.
    pub position: usize,
    pub message: String,
}

impl FilterSyntaxError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

impl Display for FilterSyntaxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at offset {}", self.message, self.position)
    }
}

impl Error for FilterSyntaxError {}

#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Identifier(String),
    Operator(PredicateOperator),
    And,
    Or,
    Not,
    Between,
    Literal(PredicateValue),
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
    Comma,
}

impl Predicate {
    /// Parses a raw filter string.
    ///
    /// # Errors
    /// - Returns `FilterSyntaxError` for unknown tokens, incomplete comparisons
    ///   or structurally malformed expressions (dangling connectives,
    ///   unbalanced parentheses).
    pub fn parse(input: &str) -> Result<Self, FilterSyntaxError> {
        let lexemes = tokenize(input)?;
        let mut builder = PredicateBuilder::new();
        let mut cursor = 0usize;

        while let Some((offset, lexeme)) = lexemes.get(cursor) {
            cursor += 1;
            builder = match lexeme {
                Lexeme::OpenParen => builder.begin_group(),
                Lexeme::CloseParen => builder.end_group(),
                Lexeme::And | Lexeme::Or if builder.is_empty() => {
                    return Err(FilterSyntaxError::new(
                        *offset,
                        "filter cannot start with a logical connective",
                    ));
                }
                Lexeme::And => builder.and(),
                Lexeme::Or => builder.or(),
                Lexeme::Not => builder.not(),
                Lexeme::Identifier(attribute) => {
                    let (next, with_comparison) =
                        parse_comparison(&lexemes, cursor, attribute, builder)?;
                    cursor = next;
                    with_comparison
                }
                _ => {
                    return Err(FilterSyntaxError::new(
                        *offset,
                        "expected attribute, connective or parenthesis",
                    ));
                }
            };
        }

        builder
            .try_build()
            .map_err(|err| FilterSyntaxError::new(input.len(), err.to_string()))
    }
}

fn parse_comparison(
    lexemes: &[(usize, Lexeme)],
    cursor: usize,
    attribute: &str,
    builder: PredicateBuilder,
) -> Result<(usize, PredicateBuilder), FilterSyntaxError> {
    let end_offset = lexemes.last().map_or(0, |(offset, _)| *offset);
    match lexemes.get(cursor) {
        Some((_, Lexeme::Operator(operator))) => {
            let value = expect_literal(lexemes, cursor + 1, end_offset)?;
            Ok((cursor + 2, builder.condition(attribute, *operator, value)))
        }
        Some((_, Lexeme::Between)) => {
            expect_exact(lexemes, cursor + 1, &Lexeme::OpenBrace, "`{`", end_offset)?;
            let lower = expect_literal(lexemes, cursor + 2, end_offset)?;
            expect_exact(lexemes, cursor + 3, &Lexeme::Comma, "`,`", end_offset)?;
            let upper = expect_literal(lexemes, cursor + 4, end_offset)?;
            expect_exact(lexemes, cursor + 5, &Lexeme::CloseBrace, "`}`", end_offset)?;
            Ok((cursor + 6, builder.between(attribute, lower, upper)))
        }
        Some((offset, _)) => Err(FilterSyntaxError::new(
            *offset,
            format!("expected comparison operator after `{attribute}`"),
        )),
        None => Err(FilterSyntaxError::new(
            end_offset,
            format!("expected comparison operator after `{attribute}`"),
        )),
    }
}

fn expect_literal(
    lexemes: &[(usize, Lexeme)],
    index: usize,
    end_offset: usize,
) -> Result<PredicateValue, FilterSyntaxError> {
    match lexemes.get(index) {
        Some((_, Lexeme::Literal(value))) => Ok(value.clone()),
        Some((offset, _)) => Err(FilterSyntaxError::new(*offset, "expected literal value")),
        None => Err(FilterSyntaxError::new(end_offset, "expected literal value")),
    }
}

fn expect_exact(
    lexemes: &[(usize, Lexeme)],
    index: usize,
    expected: &Lexeme,
    label: &str,
    end_offset: usize,
) -> Result<(), FilterSyntaxError> {
    match lexemes.get(index) {
        Some((_, lexeme)) if lexeme == expected => Ok(()),
        Some((offset, _)) => Err(FilterSyntaxError::new(*offset, format!("expected {label}"))),
        None => Err(FilterSyntaxError::new(end_offset, format!("expected {label}"))),
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Lexeme)>, FilterSyntaxError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut lexemes = Vec::new();
    let mut index = 0usize;

    while let Some(&(offset, current)) = chars.get(index) {
        let next = chars.get(index + 1).map(|(_, c)| *c);
        match current {
            c if c.is_whitespace() => {
                index += 1;
                continue;
            }
            '(' => lexemes.push((offset, Lexeme::OpenParen)),
            ')' => lexemes.push((offset, Lexeme::CloseParen)),
            '{' => lexemes.push((offset, Lexeme::OpenBrace)),
            '}' => lexemes.push((offset, Lexeme::CloseBrace)),
            ',' => lexemes.push((offset, Lexeme::Comma)),
            '&' if next == Some('&') => {
                lexemes.push((offset, Lexeme::And));
                index += 1;
            }
            '|' if next == Some('|') => {
                lexemes.push((offset, Lexeme::Or));
                index += 1;
            }
            '!' if next != Some('=') => lexemes.push((offset, Lexeme::Not)),
            '=' | '>' | '<' | '!' => {
                let symbol = match next {
                    Some(follow) if follow == '=' || (current == '<' && follow == '>') => {
                        index += 1;
                        format!("{current}{follow}")
                    }
                    _ => current.to_string(),
                };
                let operator = PredicateOperator::from_symbol(&symbol).ok_or_else(|| {
                    FilterSyntaxError::new(offset, format!("unknown operator `{symbol}`"))
                })?;
                lexemes.push((offset, Lexeme::Operator(operator)));
            }
            '"' | '\'' => {
                let (text, consumed) = read_quoted(&chars, index, current)?;
                lexemes.push((offset, Lexeme::Literal(PredicateValue::Text(text))));
                index += consumed;
                continue;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let (value, consumed) = read_number(&chars, index)?;
                lexemes.push((offset, Lexeme::Literal(value)));
                index += consumed;
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = index;
                while chars
                    .get(index)
                    .is_some_and(|(_, c)| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
                {
                    index += 1;
                }
                let word: String = chars[start..index].iter().map(|(_, c)| *c).collect();
                lexemes.push((offset, classify_word(word)));
                continue;
            }
            other => {
                return Err(FilterSyntaxError::new(
                    offset,
                    format!("unexpected character `{other}`"),
                ));
            }
        }
        index += 1;
    }

    Ok(lexemes)
}

fn classify_word(word: String) -> Lexeme {
    match word.to_ascii_uppercase().as_str() {
        "AND" => Lexeme::And,
        "OR" => Lexeme::Or,
        "NOT" => Lexeme::Not,
        "BETWEEN" => Lexeme::Between,
        "LIKE" => Lexeme::Operator(PredicateOperator::Like),
        "CONTAINS" => Lexeme::Operator(PredicateOperator::Contains),
        "TRUE" | "YES" => Lexeme::Literal(PredicateValue::Bool(true)),
        "FALSE" | "NO" => Lexeme::Literal(PredicateValue::Bool(false)),
        "NIL" | "NULL" => Lexeme::Literal(PredicateValue::Null),
        _ => Lexeme::Identifier(word),
    }
}

fn read_quoted(
    chars: &[(usize, char)],
    start: usize,
    quote: char,
) -> Result<(String, usize), FilterSyntaxError> {
    let mut text = String::new();
    let mut index = start + 1;
    while let Some(&(_, current)) = chars.get(index) {
        match current {
            '\\' => {
                let Some(&(_, escaped)) = chars.get(index + 1) else {
                    break;
                };
                text.push(escaped);
                index += 2;
            }
            c if c == quote => return Ok((text, index + 1 - start)),
            c => {
                text.push(c);
                index += 1;
            }
        }
    }
    Err(FilterSyntaxError::new(
        chars[start].0,
        "unterminated string literal",
    ))
}

fn read_number(
    chars: &[(usize, char)],
    start: usize,
) -> Result<(PredicateValue, usize), FilterSyntaxError> {
    let mut index = start;
    if chars.get(index).is_some_and(|(_, c)| *c == '-') {
        index += 1;
    }
    while chars
        .get(index)
        .is_some_and(|(_, c)| c.is_ascii_digit() || *c == '.')
    {
        index += 1;
    }
    let text: String = chars[start..index].iter().map(|(_, c)| *c).collect();
    let offset = chars[start].0;

    let value = if text.contains('.') {
        text.parse::<f64>()
            .map(PredicateValue::Real)
            .map_err(|_| FilterSyntaxError::new(offset, format!("invalid number `{text}`")))?
    } else {
        text.parse::<i64>()
            .map(PredicateValue::Integer)
            .map_err(|_| FilterSyntaxError::new(offset, format!("invalid number `{text}`")))?
    };
    Ok((value, index - start))
}
