//! Predicates for WHERE clauses.

use crate::models::SqlParam;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Like => "LIKE",
        }
    }
}

/// A WHERE clause predicate.
///
/// `Condition::none()` is the absence of a predicate: it vanishes when
/// combined with `and`/`or`, and a statement whose condition is `none()`
/// has no WHERE clause at all.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    None,
    True,
    Compare {
        column: String,
        op: CompareOp,
        value: SqlParam,
    },
    IsNull(String),
    IsNotNull(String),
    In {
        column: String,
        values: Vec<SqlParam>,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    /// SQL fragment with `?` placeholders, rewritten for the dialect.
    Raw {
        sql: String,
        params: Vec<SqlParam>,
    },
}

impl Condition {
    pub fn none() -> Self {
        Self::None
    }

    /// Renders as `1 = 1`; unlike `none()` this is a WHERE clause.
    pub fn always_true() -> Self {
        Self::True
    }

    pub fn raw(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self::Raw {
            sql: sql.into(),
            params,
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<SqlParam>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<SqlParam>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<SqlParam>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn ge(column: impl Into<String>, value: impl Into<SqlParam>) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<SqlParam>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn le(column: impl Into<String>, value: impl Into<SqlParam>) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<SqlParam>) -> Self {
        Self::compare(column, CompareOp::Like, pattern)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into())
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::IsNotNull(column.into())
    }

    /// `column IN (...)`. An empty list matches nothing.
    pub fn in_list<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlParam>,
    {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<SqlParam>) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn and(self, other: Condition) -> Self {
        match (self, other) {
            (Self::None, c) | (c, Self::None) => c,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), c) => {
                left.push(c);
                Self::And(left)
            }
            (c, Self::And(mut right)) => {
                right.insert(0, c);
                Self::And(right)
            }
            (a, b) => Self::And(vec![a, b]),
        }
    }

    pub fn or(self, other: Condition) -> Self {
        match (self, other) {
            (Self::None, c) | (c, Self::None) => c,
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), c) => {
                left.push(c);
                Self::Or(left)
            }
            (c, Self::Or(mut right)) => {
                right.insert(0, c);
                Self::Or(right)
            }
            (a, b) => Self::Or(vec![a, b]),
        }
    }

    /// True when this condition produces a WHERE clause. A junction counts
    /// only if one of its parts does, so `And(vec![])` is no predicate.
    pub fn is_predicate(&self) -> bool {
        match self {
            Self::None => false,
            Self::And(parts) | Self::Or(parts) => parts.iter().any(Condition::is_predicate),
            Self::Not(inner) => inner.is_predicate(),
            _ => true,
        }
    }
}

impl std::ops::Not for Condition {
    type Output = Condition;

    /// Negating `none()` is still `none()`.
    fn not(self) -> Self::Output {
        match self {
            c if !c.is_predicate() => Self::None,
            Self::Not(inner) => *inner,
            c => Self::Not(Box::new(c)),
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::None
    }
}
