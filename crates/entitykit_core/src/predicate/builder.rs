//! Fluent predicate builder and the validated expression it emits.
//!
//! # Invariants
//! - A `Predicate` always holds a well-formed token sequence: operands and
//!   connectives alternate, groups are balanced and nothing dangles.
//! - Arguments are bound in token order; attribute paths are validated before
//!   they are rendered into SQL.

use super::operator::{LogicalOperator, PredicateOperator};
use super::value::PredicateValue;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

static ATTRIBUTE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("valid attribute path regex")
});

/// Returns whether `path` may be used as an attribute or sort key.
pub fn is_valid_attribute_path(path: &str) -> bool {
    ATTRIBUTE_PATH.is_match(path)
}

/// SQL expression reading one attribute out of the stored JSON object.
///
/// Callers must validate `path` with [`is_valid_attribute_path`] first.
pub(crate) fn attribute_sql(path: &str) -> String {
    format!("json_extract(attributes, '$.{path}')")
}

/// Reason a builder sequence could not become a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateError {
    Empty,
    DanglingConnective,
    UnbalancedGroups,
    /// Token at `position` cannot follow the token before it.
    MisplacedToken {
        position: usize,
    },
    InvalidAttribute(String),
}

impl Display for PredicateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "predicate has no conditions"),
            Self::DanglingConnective => write!(f, "predicate ends with a logical connective"),
            Self::UnbalancedGroups => write!(f, "predicate groups are not balanced"),
            Self::MisplacedToken { position } => {
                write!(f, "unexpected predicate token at position {position}")
            }
            Self::InvalidAttribute(path) => write!(f, "invalid attribute path `{path}`"),
        }
    }
}

impl Error for PredicateError {}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    /// Consumes one argument.
    Condition {
        attribute: String,
        operator: PredicateOperator,
    },
    /// Consumes two arguments (lower, upper).
    Between { attribute: String },
    Logical(LogicalOperator),
    /// Negates the operand that follows: one comparison or one group.
    Not,
    BeginGroup,
    EndGroup,
}

/// Accumulates expression tokens until finalized by [`PredicateBuilder::build`].
///
/// The builder is consumed on build, so leftover state can never leak into a
/// second expression.
#[derive(Debug, Clone, Default)]
pub struct PredicateBuilder {
    tokens: Vec<Token>,
    arguments: Vec<PredicateValue>,
}

impl PredicateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `AND`. Ignored while the builder is still empty.
    pub fn and(self) -> Self {
        self.push_logical(LogicalOperator::And)
    }

    /// Appends `OR`. Ignored while the builder is still empty.
    pub fn or(self) -> Self {
        self.push_logical(LogicalOperator::Or)
    }

    /// Negates the next condition, range or group.
    pub fn not(mut self) -> Self {
        self.tokens.push(Token::Not);
        self
    }

    pub fn begin_group(mut self) -> Self {
        self.tokens.push(Token::BeginGroup);
        self
    }

    pub fn end_group(mut self) -> Self {
        self.tokens.push(Token::EndGroup);
        self
    }

    /// Appends `attribute <operator> value`.
    pub fn condition(
        mut self,
        attribute: impl Into<String>,
        operator: PredicateOperator,
        value: impl Into<PredicateValue>,
    ) -> Self {
        self.tokens.push(Token::Condition {
            attribute: attribute.into(),
            operator,
        });
        self.arguments.push(value.into());
        self
    }

    /// Appends an inclusive `attribute BETWEEN {lower, upper}` range.
    pub fn between(
        mut self,
        attribute: impl Into<String>,
        lower: impl Into<PredicateValue>,
        upper: impl Into<PredicateValue>,
    ) -> Self {
        self.tokens.push(Token::Between {
            attribute: attribute.into(),
        });
        self.arguments.push(lower.into());
        self.arguments.push(upper.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Finalizes the expression, or returns `None` when it is malformed.
    pub fn build(self) -> Option<Predicate> {
        self.try_build().ok()
    }

    /// Finalizes the expression and names the defect when it is malformed.
    pub fn try_build(self) -> Result<Predicate, PredicateError> {
        validate(&self.tokens)?;
        Ok(Predicate {
            tokens: self.tokens,
            arguments: self.arguments,
        })
    }

    fn push_logical(mut self, operator: LogicalOperator) -> Self {
        if !self.tokens.is_empty() {
            self.tokens.push(Token::Logical(operator));
        }
        self
    }
}

fn validate(tokens: &[Token]) -> Result<(), PredicateError> {
    if tokens.is_empty() {
        return Err(PredicateError::Empty);
    }

    let mut expect_operand = true;
    let mut depth = 0usize;
    for (position, token) in tokens.iter().enumerate() {
        match token {
            Token::Condition { attribute, .. } | Token::Between { attribute } => {
                if !expect_operand {
                    return Err(PredicateError::MisplacedToken { position });
                }
                if !is_valid_attribute_path(attribute) {
                    return Err(PredicateError::InvalidAttribute(attribute.clone()));
                }
                expect_operand = false;
            }
            Token::BeginGroup => {
                if !expect_operand {
                    return Err(PredicateError::MisplacedToken { position });
                }
                depth += 1;
            }
            Token::Not => {
                if !expect_operand {
                    return Err(PredicateError::MisplacedToken { position });
                }
            }
            Token::EndGroup => {
                if depth == 0 {
                    return Err(PredicateError::UnbalancedGroups);
                }
                if expect_operand {
                    return match tokens.get(position.wrapping_sub(1)) {
                        Some(Token::Logical(_) | Token::Not) => {
                            Err(PredicateError::DanglingConnective)
                        }
                        _ => Err(PredicateError::MisplacedToken { position }),
                    };
                }
                depth -= 1;
            }
            Token::Logical(_) => {
                if expect_operand {
                    return Err(PredicateError::MisplacedToken { position });
                }
                expect_operand = true;
            }
        }
    }

    if matches!(tokens.last(), Some(Token::Logical(_) | Token::Not)) {
        return Err(PredicateError::DanglingConnective);
    }
    if depth != 0 || expect_operand {
        return Err(PredicateError::UnbalancedGroups);
    }
    Ok(())
}

/// Immutable, validated boolean filter expression with bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    tokens: Vec<Token>,
    arguments: Vec<PredicateValue>,
}

impl Predicate {
    /// Bound values in the order they appear in the expression.
    pub fn arguments(&self) -> &[PredicateValue] {
        &self.arguments
    }

    /// Number of comparisons (conditions and ranges) in the expression.
    pub fn condition_count(&self) -> usize {
        self.tokens
            .iter()
            .filter(|token| matches!(token, Token::Condition { .. } | Token::Between { .. }))
            .count()
    }

    /// Renders the expression as a SQL fragment over the `attributes` column.
    ///
    /// `NOT` wraps its operand in parentheses; `negations` holds the group
    /// depth of each negation still waiting for its operand to end.
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut parts = Vec::with_capacity(self.tokens.len());
        let mut values = Vec::with_capacity(self.arguments.len());
        let mut arguments = self.arguments.iter();
        let mut negations: Vec<usize> = Vec::new();
        let mut depth = 0usize;

        for token in &self.tokens {
            match token {
                Token::Condition {
                    attribute,
                    operator,
                } => {
                    let Some(value) = arguments.next() else {
                        break;
                    };
                    let (sql, bound) = condition_sql(&attribute_sql(attribute), *operator, value);
                    parts.push(sql);
                    values.extend(bound);
                    close_negations(&mut parts, &mut negations, depth);
                }
                Token::Between { attribute } => {
                    parts.push(format!("{} BETWEEN ? AND ?", attribute_sql(attribute)));
                    for value in arguments.by_ref().take(2) {
                        values.push(value.to_sql_value());
                    }
                    close_negations(&mut parts, &mut negations, depth);
                }
                Token::Logical(operator) => parts.push(operator.symbol().to_string()),
                Token::Not => {
                    parts.push("NOT (".to_string());
                    negations.push(depth);
                }
                Token::BeginGroup => {
                    parts.push("(".to_string());
                    depth += 1;
                }
                Token::EndGroup => {
                    parts.push(")".to_string());
                    depth = depth.saturating_sub(1);
                    close_negations(&mut parts, &mut negations, depth);
                }
            }
        }

        (parts.join(" "), values)
    }
}

/// SQL for one comparison plus the value it binds, if any.
fn condition_sql(
    column: &str,
    operator: PredicateOperator,
    value: &PredicateValue,
) -> (String, Option<Value>) {
    match (operator, value) {
        (PredicateOperator::Equals, PredicateValue::Null) => (format!("{column} IS NULL"), None),
        (PredicateOperator::NotEquals, PredicateValue::Null) => {
            (format!("{column} IS NOT NULL"), None)
        }
        (PredicateOperator::Like, PredicateValue::Text(pattern)) => (
            format!("{column} GLOB ?"),
            Some(Value::Text(escape_glob_classes(pattern))),
        ),
        _ => {
            let sql = match operator {
                PredicateOperator::Equals => format!("{column} = ?"),
                PredicateOperator::NotEquals => format!("{column} <> ?"),
                PredicateOperator::GreaterThan => format!("{column} > ?"),
                PredicateOperator::GreaterThanOrEqual => format!("{column} >= ?"),
                PredicateOperator::LessThan => format!("{column} < ?"),
                PredicateOperator::LessThanOrEqual => format!("{column} <= ?"),
                PredicateOperator::Like => format!("{column} GLOB ?"),
                PredicateOperator::Contains => format!("instr({column}, ?) > 0"),
            };
            (sql, Some(value.to_sql_value()))
        }
    }
}

/// `GLOB` reads `[...]` as a character class; `[[]` matches a literal `[`.
fn escape_glob_classes(pattern: &str) -> String {
    pattern.replace('[', "[[]")
}

fn close_negations(parts: &mut Vec<String>, negations: &mut Vec<usize>, depth: usize) {
    while negations.last() == Some(&depth) {
        negations.pop();
        parts.push(")".to_string());
    }
}

impl Display for Predicate {
    /// Formats in the raw filter syntax accepted by `Predicate::parse`.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut arguments = self.arguments.iter();
        let mut first = true;
        for token in &self.tokens {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            match token {
                Token::Condition {
                    attribute,
                    operator,
                } => {
                    let value = arguments.next().cloned().unwrap_or(PredicateValue::Null);
                    write!(f, "{attribute} {operator} {value}")?;
                }
                Token::Between { attribute } => {
                    let lower = arguments.next().cloned().unwrap_or(PredicateValue::Null);
                    let upper = arguments.next().cloned().unwrap_or(PredicateValue::Null);
                    write!(f, "{attribute} BETWEEN {{{lower}, {upper}}}")?;
                }
                Token::Logical(operator) => f.write_str(operator.symbol())?,
                Token::Not => f.write_str("NOT")?,
                Token::BeginGroup => f.write_str("(")?,
                Token::EndGroup => f.write_str(")")?,
            }
        }
        Ok(())
    }
}
