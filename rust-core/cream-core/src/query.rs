//! # Query Condition Compiler
//!
//! Turns structured filter and entity objects into parameterized SQL.
//!
//! A filter is a list of condition groups. Inside a group every entry is
//! `column OP ?` and entries are AND-joined; groups are OR-joined. A field
//! key may end in a comparison marker:
//!
//! | marker | operator |
//! |--------|----------|
//! | `?gt`  | `>`      |
//! | `?lt`  | `<`      |
//! | `?gte` | `>=`     |
//! | `?lte` | `<=`     |
//! | `?ne`  | `<>`     |
//! | `?eq`  | `=`      |
//!
//! Reads and updates only ever see live rows: `DELETED = 0` is appended to
//! every `fetch` and `update`. Table and column names are written verbatim
//! and must be trusted identifiers; only values are parameterized.

use crate::database::DbValue;
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::fmt;

/// One condition group or one entity: field key → literal value
pub type Condition = Map<String, Value>;

/// Soft-delete filter appended to reads and updates
pub const LIVE_ROWS: &str = "DELETED = 0";

/// Comparison operator of one condition entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`
    Eq,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Gte,
    /// `<=`
    Lte,
    /// `<>`
    Ne,
}

impl Operator {
    fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "eq" => Some(Self::Eq),
            "gt" => Some(Self::Gt),
            "lt" => Some(Self::Lt),
            "gte" => Some(Self::Gte),
            "lte" => Some(Self::Lte),
            "ne" => Some(Self::Ne),
            _ => None,
        }
    }

    /// SQL spelling
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Ne => "<>",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Split `age?gte` into (`age`, `>=`); keys without a known marker are
/// columns compared with `=`
#[must_use]
pub fn split_key(key: &str) -> (&str, Operator) {
    key.rsplit_once('?')
        .and_then(|(column, marker)| Operator::from_marker(marker).map(|op| (column, op)))
        .unwrap_or((key, Operator::Eq))
}

/// Compiled SQL text plus positional arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text with `?` placeholders
    pub sql: String,
    /// Values for the placeholders, in order
    pub args: Vec<DbValue>,
}

impl Statement {
    /// Arguments rendered for diagnostics
    #[must_use]
    pub fn args_display(&self) -> String {
        self.args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Statement compiler bound to one table
#[derive(Debug, Clone, Copy)]
pub struct QueryCompiler<'a> {
    table: &'a str,
}

impl<'a> QueryCompiler<'a> {
    /// Compiler for `table`
    #[must_use]
    pub const fn new(table: &'a str) -> Self {
        Self { table }
    }

    /// `SELECT` of `columns` (all when empty) from live rows matching `groups`
    #[must_use]
    pub fn fetch<S: AsRef<str>>(&self, columns: &[S], groups: &[Condition]) -> Statement {
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut args = Vec::new();
        let filter = where_clause(groups, &mut args);
        Statement {
            sql: format!("SELECT {projection} FROM {} WHERE {filter}", self.table),
            args,
        }
    }

    /// `INSERT` of the entity's columns, in iteration order
    ///
    /// # Errors
    ///
    /// `Error::EmptyEntity` when the entity has no columns.
    pub fn put(&self, entity: &Condition) -> Result<Statement> {
        if entity.is_empty() {
            return Err(Error::EmptyEntity {
                table: self.table.to_string(),
            });
        }
        let columns: Vec<&str> = entity.keys().map(String::as_str).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        Ok(Statement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({placeholders})",
                self.table,
                columns.join(", ")
            ),
            args: entity.values().map(DbValue::from).collect(),
        })
    }

    /// Soft delete of the rows matching every entry of `condition`
    ///
    /// # Errors
    ///
    /// `Error::UnsafeDelete` when `condition` is empty; an unconditional
    /// delete is never compiled.
    pub fn remove(&self, condition: &Condition) -> Result<Statement> {
        if condition.is_empty() {
            return Err(Error::UnsafeDelete {
                table: self.table.to_string(),
            });
        }
        let mut args = Vec::with_capacity(condition.len());
        let terms = group_terms(condition, &mut args);
        Ok(Statement {
            sql: format!("UPDATE {} SET DELETED = 1 WHERE {terms}", self.table),
            args,
        })
    }

    /// `UPDATE` of the entity's columns on live rows matching `groups`
    ///
    /// # Errors
    ///
    /// `Error::EmptyEntity` when the entity has no columns.
    pub fn update(&self, entity: &Condition, groups: &[Condition]) -> Result<Statement> {
        if entity.is_empty() {
            return Err(Error::EmptyEntity {
                table: self.table.to_string(),
            });
        }
        let mut args: Vec<DbValue> = Vec::with_capacity(entity.len());
        let assignments = entity
            .iter()
            .map(|(column, value)| {
                args.push(DbValue::from(value));
                format!("{column} = ?")
            })
            .collect::<Vec<_>>()
            .join(", ");
        let filter = where_clause(groups, &mut args);
        Ok(Statement {
            sql: format!("UPDATE {} SET {assignments} WHERE {filter}", self.table),
            args,
        })
    }
}

/// `a = ? AND b > ?`, pushing values onto `args`
fn group_terms(group: &Condition, args: &mut Vec<DbValue>) -> String {
    group
        .iter()
        .map(|(key, value)| {
            let (column, op) = split_key(key);
            args.push(DbValue::from(value));
            format!("{column} {op} ?")
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// OR of AND-groups followed by the soft-delete filter
fn where_clause(groups: &[Condition], args: &mut Vec<DbValue>) -> String {
    let rendered: Vec<String> = groups
        .iter()
        .filter(|group| !group.is_empty())
        .map(|group| format!("( {} )", group_terms(group, args)))
        .collect();

    match rendered.len() {
        0 => LIVE_ROWS.to_string(),
        1 => format!("{} AND {LIVE_ROWS}", rendered[0]),
        _ => format!("( {} ) AND {LIVE_ROWS}", rendered.join(" OR ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(value: Value) -> Condition {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("age?gte"), ("age", Operator::Gte));
        assert_eq!(split_key("age?gt"), ("age", Operator::Gt));
        assert_eq!(split_key("id?ne"), ("id", Operator::Ne));
        assert_eq!(split_key("name"), ("name", Operator::Eq));
        assert_eq!(split_key("odd?thing"), ("odd?thing", Operator::Eq));
    }

    #[test]
    fn test_fetch_without_conditions() {
        let stmt = QueryCompiler::new("users").fetch::<&str>(&[], &[]);
        assert_eq!(stmt.sql, "SELECT * FROM users WHERE DELETED = 0");
        assert!(stmt.args.is_empty());
    }

    #[test]
    fn test_fetch_with_operator_marker() {
        let stmt = QueryCompiler::new("users").fetch(
            &["id", "name"],
            &[cond(json!({"name": "bob", "age?gte": 18}))],
        );
        assert_eq!(
            stmt.sql,
            "SELECT id, name FROM users WHERE ( name = ? AND age >= ? ) AND DELETED = 0"
        );
        assert_eq!(
            stmt.args,
            vec![DbValue::String("bob".to_string()), DbValue::Int(18)]
        );
    }

    #[test]
    fn test_fetch_or_groups() {
        let stmt = QueryCompiler::new("t").fetch::<&str>(
            &[],
            &[cond(json!({"a": 1})), cond(json!({"b?lt": 2, "c?lte": 3}))],
        );
        assert_eq!(
            stmt.sql,
            "SELECT * FROM t WHERE ( ( a = ? ) OR ( b < ? AND c <= ? ) ) AND DELETED = 0"
        );
        assert_eq!(
            stmt.args,
            vec![DbValue::Int(1), DbValue::Int(2), DbValue::Int(3)]
        );
        assert_eq!(stmt.sql.matches(LIVE_ROWS).count(), 1);
    }

    #[test]
    fn test_fetch_skips_empty_groups() {
        let stmt = QueryCompiler::new("t").fetch::<&str>(&[], &[Condition::new()]);
        assert_eq!(stmt.sql, "SELECT * FROM t WHERE DELETED = 0");
    }

    #[test]
    fn test_update_statement() {
        let stmt = QueryCompiler::new("t")
            .update(&cond(json!({"status": "x"})), &[cond(json!({"id?ne": 5}))])
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE t SET status = ? WHERE ( id <> ? ) AND DELETED = 0"
        );
        assert_eq!(
            stmt.args,
            vec![DbValue::String("x".to_string()), DbValue::Int(5)]
        );
    }

    #[test]
    fn test_update_without_conditions_keeps_soft_delete() {
        let stmt = QueryCompiler::new("t")
            .update(&cond(json!({"a": 1, "b": null})), &[])
            .unwrap();
        assert_eq!(stmt.sql, "UPDATE t SET a = ?, b = ? WHERE DELETED = 0");
        assert_eq!(stmt.args, vec![DbValue::Int(1), DbValue::Null]);
    }

    #[test]
    fn test_update_empty_entity_rejected() {
        let err = QueryCompiler::new("t")
            .update(&Condition::new(), &[cond(json!({"id": 1}))])
            .unwrap_err();
        assert!(matches!(err, Error::EmptyEntity { .. }));
    }

    #[test]
    fn test_put_keeps_entity_order() {
        let stmt = QueryCompiler::new("notes")
            .put(&cond(json!({"title": "a", "body": "b", "pinned": true})))
            .unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO notes (title, body, pinned) VALUES (?, ?, ?)"
        );
        assert_eq!(
            stmt.args,
            vec![
                DbValue::String("a".to_string()),
                DbValue::String("b".to_string()),
                DbValue::Bool(true)
            ]
        );
    }

    #[test]
    fn test_remove_requires_condition() {
        let err = QueryCompiler::new("notes")
            .remove(&Condition::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnsafeDelete { table } if table == "notes"));
    }

    #[test]
    fn test_remove_statement() {
        let stmt = QueryCompiler::new("notes")
            .remove(&cond(json!({"id": 3, "owner": "amy"})))
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE notes SET DELETED = 1 WHERE id = ? AND owner = ?"
        );
        assert_eq!(stmt.args.len(), 2);
    }

    #[test]
    fn test_args_display() {
        let stmt = QueryCompiler::new("t")
            .update(&cond(json!({"status": "x"})), &[cond(json!({"id": 5}))])
            .unwrap();
        assert_eq!(stmt.args_display(), "x,5");
    }
}
