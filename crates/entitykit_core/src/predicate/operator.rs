use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Comparison applied between one attribute and one bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    /// Wildcard match: `*` any run of characters, `?` one character. Every
    /// other character, `[` included, matches itself.
    Like,
    /// Substring match.
    Contains,
}

impl PredicateOperator {
    /// Textual form used by the raw filter syntax.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Like => "LIKE",
            Self::Contains => "CONTAINS",
        }
    }

    /// Parses a raw filter operator. Keyword operators are case-insensitive.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "==" | "=" => Some(Self::Equals),
            "!=" | "<>" => Some(Self::NotEquals),
            ">" => Some(Self::GreaterThan),
            ">=" => Some(Self::GreaterThanOrEqual),
            "<" => Some(Self::LessThan),
            "<=" => Some(Self::LessThanOrEqual),
            other if other.eq_ignore_ascii_case("like") => Some(Self::Like),
            other if other.eq_ignore_ascii_case("contains") => Some(Self::Contains),
            _ => None,
        }
    }
}

impl Display for PredicateOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Connective joining two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PredicateOperator;

    #[test]
    fn from_symbol_accepts_aliases_and_keywords() {
        assert_eq!(
            PredicateOperator::from_symbol("="),
            Some(PredicateOperator::Equals)
        );
        assert_eq!(
            PredicateOperator::from_symbol("contains"),
            Some(PredicateOperator::Contains)
        );
        assert_eq!(
            PredicateOperator::from_symbol("Like"),
            Some(PredicateOperator::Like)
        );
        assert_eq!(
            PredicateOperator::from_symbol("<>"),
            Some(PredicateOperator::NotEquals)
        );
        assert_eq!(PredicateOperator::from_symbol("=>"), None);
    }
}
