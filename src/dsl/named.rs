//! Raw SQL with `:name` parameters.
//!
//! Markers are compiled to the dialect's positional placeholders in order of
//! appearance; a name used twice is bound twice. Quoted text, comments and
//! PostgreSQL `::` casts are left alone.

use crate::error::{DataError, DataResult};
use crate::models::{DatabaseType, SqlParam};
use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

/// A raw statement with its named markers compiled for one dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedSql {
    sql: String,
    names: Vec<String>,
}

impl NamedSql {
    pub fn parse(sql: &str, db_type: DatabaseType) -> DataResult<Self> {
        let mut names = Vec::new();
        let sql = rewrite(sql, |c, rest| {
            if c != ':' {
                return None;
            }
            match rest.peek() {
                Some(&':') => {
                    rest.next();
                    Some("::".to_string())
                }
                Some(&n) if n.is_ascii_alphabetic() || n == '_' => {
                    let mut name = String::new();
                    while let Some(&n) = rest.peek() {
                        if !(n.is_ascii_alphanumeric() || n == '_') {
                            break;
                        }
                        name.push(n);
                        rest.next();
                    }
                    names.push(name);
                    Some(db_type.placeholder(names.len()))
                }
                _ => None,
            }
        })?;
        Ok(Self { sql, names })
    }

    /// The compiled statement.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Marker names in placeholder order, repeats included.
    pub fn param_names(&self) -> &[String] {
        &self.names
    }

    /// Values in placeholder order. Unused entries in `params` are ignored.
    pub fn bind(&self, params: &HashMap<String, SqlParam>) -> DataResult<Vec<SqlParam>> {
        self.names
            .iter()
            .map(|name| {
                params.get(name).cloned().ok_or_else(|| {
                    DataError::invalid_input(format!("Missing value for named parameter ':{}'", name))
                })
            })
            .collect()
    }
}

/// Number `?` markers for the dialect (`$1`, `$2`, ... on PostgreSQL).
pub fn number_positional(sql: &str, db_type: DatabaseType) -> DataResult<String> {
    let mut count = 0;
    rewrite(sql, |c, _| {
        (c == '?').then(|| {
            count += 1;
            db_type.placeholder(count)
        })
    })
}

/// Copy `sql`, letting `marker` replace characters outside quotes and
/// comments.
fn rewrite<F>(sql: &str, mut marker: F) -> DataResult<String>
where
    F: FnMut(char, &mut Peekable<Chars<'_>>) -> Option<String>,
{
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            out.push(c);
            continue;
        }
        if matches!(c, '\'' | '"' | '`') {
            quote = Some(c);
            out.push(c);
            continue;
        }
        if c == '-' && chars.peek() == Some(&'-') {
            out.push(c);
            for c in chars.by_ref() {
                out.push(c);
                if c == '\n' {
                    break;
                }
            }
            continue;
        }
        if c == '/' && chars.peek() == Some(&'*') {
            out.push(c);
            let mut prev = ' ';
            for c in chars.by_ref() {
                out.push(c);
                if prev == '*' && c == '/' {
                    break;
                }
                prev = c;
            }
            continue;
        }
        match marker(c, &mut chars) {
            Some(replacement) => out.push_str(&replacement),
            None => out.push(c),
        }
    }

    match quote {
        Some(q) => Err(DataError::invalid_input(format!(
            "Unterminated {} quote in statement: {}",
            q, sql
        ))),
        None => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, SqlParam)]) -> HashMap<String, SqlParam> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_named_markers_compile_per_dialect() {
        let sql = "SELECT * FROM user WHERE user_id = :userId AND status = :status";
        let pg = NamedSql::parse(sql, DatabaseType::PostgreSQL).unwrap();
        assert_eq!(pg.sql(), "SELECT * FROM user WHERE user_id = $1 AND status = $2");
        assert_eq!(pg.param_names(), ["userId", "status"]);

        let mysql = NamedSql::parse(sql, DatabaseType::MySQL).unwrap();
        assert_eq!(mysql.sql(), "SELECT * FROM user WHERE user_id = ? AND status = ?");
    }

    #[test]
    fn test_quotes_and_casts_untouched() {
        let named = NamedSql::parse(
            "SELECT ':skip', \"a:b\", created::date FROM t WHERE id = :id",
            DatabaseType::PostgreSQL,
        )
        .unwrap();
        assert_eq!(
            named.sql(),
            "SELECT ':skip', \"a:b\", created::date FROM t WHERE id = $1"
        );
        assert_eq!(named.param_names(), ["id"]);

        // Doubled quotes stay inside the literal.
        let named = NamedSql::parse("SELECT 'it''s :x' WHERE a = :a", DatabaseType::SQLite).unwrap();
        assert_eq!(named.param_names(), ["a"]);
    }

    #[test]
    fn test_repeated_name_binds_twice() {
        let named = NamedSql::parse("SELECT :v + :v, :w", DatabaseType::PostgreSQL).unwrap();
        assert_eq!(named.sql(), "SELECT $1 + $2, $3");
        let bound = named
            .bind(&params(&[
                ("v", SqlParam::Int(2)),
                ("w", "x".into()),
                ("unused", SqlParam::Null),
            ]))
            .unwrap();
        assert_eq!(bound, vec![SqlParam::Int(2), SqlParam::Int(2), "x".into()]);
    }

    #[test]
    fn test_missing_value_rejected() {
        let named = NamedSql::parse("DELETE FROM t WHERE id = :id", DatabaseType::SQLite).unwrap();
        let err = named.bind(&HashMap::new()).unwrap_err();
        assert!(matches!(err, DataError::InvalidInput { .. }));
        assert!(err.to_string().contains(":id"));
    }

    #[test]
    fn test_comments_skipped() {
        let named = NamedSql::parse(
            "-- don't bind :a here\nSELECT /* nor :b */ :c",
            DatabaseType::PostgreSQL,
        )
        .unwrap();
        assert_eq!(named.sql(), "-- don't bind :a here\nSELECT /* nor :b */ $1");
        assert_eq!(named.param_names(), ["c"]);
    }

    #[test]
    fn test_unterminated_quote_rejected() {
        assert!(NamedSql::parse("SELECT 'open", DatabaseType::MySQL).is_err());
    }

    #[test]
    fn test_positional_markers_numbered_for_postgres() {
        let sql = "UPDATE t SET a = ?, b = '?' WHERE id = ?";
        assert_eq!(
            number_positional(sql, DatabaseType::PostgreSQL).unwrap(),
            "UPDATE t SET a = $1, b = '?' WHERE id = $2"
        );
        assert_eq!(number_positional(sql, DatabaseType::SQLite).unwrap(), sql);
    }
}
