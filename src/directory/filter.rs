//! Structured filter expressions for the directory search endpoints:
//! `field:'value'` clauses combined with AND / OR.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Number(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Clause { field: String, value: FilterValue },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

impl FilterExpr {
    pub fn text(field: impl Into<String>, value: impl Into<String>) -> Self {
        FilterExpr::Clause {
            field: field.into(),
            value: FilterValue::Text(value.into()),
        }
    }

    pub fn number(field: impl Into<String>, value: u64) -> Self {
        FilterExpr::Clause {
            field: field.into(),
            value: FilterValue::Number(value),
        }
    }

    pub fn and(self, other: FilterExpr) -> Self {
        match self {
            FilterExpr::And(mut parts) => {
                parts.push(other);
                FilterExpr::And(parts)
            }
            first => FilterExpr::And(vec![first, other]),
        }
    }

    pub fn or(self, other: FilterExpr) -> Self {
        match self {
            FilterExpr::Or(mut parts) => {
                parts.push(other);
                FilterExpr::Or(parts)
            }
            first => FilterExpr::Or(vec![first, other]),
        }
    }

    /// `field:'a' OR field:'b' ...`; `None` for an empty list.
    pub fn any_of(field: &str, values: impl IntoIterator<Item = u64>) -> Option<Self> {
        let mut clauses = values.into_iter().map(|v| FilterExpr::number(field, v));
        let first = clauses.next()?;
        Some(clauses.fold(first, FilterExpr::or))
    }

    /// Wrapped in double quotes, as the query parameter expects.
    pub fn to_query_param(&self) -> String {
        format!("\"{}\"", self)
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::Clause { .. } => write!(f, "{}", self),
            _ => write!(f, "({})", self),
        }
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'").replace('"', "\\\"")
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::Clause { field, value: FilterValue::Text(v) } => {
                write!(f, "{}:'{}'", field, escape(v))
            }
            FilterExpr::Clause { field, value: FilterValue::Number(n) } => write!(f, "{}:{}", field, n),
            FilterExpr::And(parts) | FilterExpr::Or(parts) => {
                let joiner = if matches!(self, FilterExpr::And(_)) { " AND " } else { " OR " };
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(joiner)?;
                    }
                    part.fmt_nested(f)?;
                }
                Ok(())
            }
        }
    }
}
