//! Query Builder WHERE clause operations

use crate::backends::{DatabaseValue, IntoArgs};

use super::builder::Query;
use super::types::*;

/// Operators accepted by [`Query::where_condition`]
const COMPARISONS: [&str; 10] = ["=", "!=", "<>", ">", ">=", "<", "<=", "LIKE", "NOT LIKE", "ILIKE"];

/// A bare column reference (optionally `table.column`) that can be quoted safely
pub(crate) fn is_plain_identifier(text: &str) -> bool {
    !text.is_empty()
        && !text.starts_with(|c: char| c.is_ascii_digit())
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '*')
}

/// Infer a predicate from a `where_` call.
///
/// A plain column with one argument is an equality test. With two or more
/// arguments a leading comparison operator is honoured; otherwise the first
/// argument is the compared value. Anything else is a raw fragment.
pub(crate) fn infer_predicate(query: &str, mut args: Vec<DatabaseValue>) -> Predicate {
    let column = query.trim();
    if !is_plain_identifier(column) || args.is_empty() {
        return Predicate::Raw {
            sql: query.to_string(),
            args,
        };
    }

    if args.len() >= 2 {
        if let DatabaseValue::String(op) = &args[0] {
            if OPERATORS.contains(&op.trim()) {
                let operator = op.trim().to_string();
                return Predicate::Compare {
                    column: column.to_string(),
                    operator,
                    value: args.swap_remove(1),
                };
            }
        }
    }

    Predicate::Compare {
        column: column.to_string(),
        operator: "=".to_string(),
        value: args.swap_remove(0),
    }
}

impl Query {
    fn push_where(&self, predicate: Predicate, or: bool) -> Query {
        self.derive(|c| c.wheres.push(WhereClause { predicate, or }))
    }

    /// `where_("name = ?", args!["x"])`, `where_("age", args![">", 18])` or `where_("id", args![1])`
    pub fn where_(&self, query: &str, args: impl IntoArgs) -> Query {
        self.push_where(infer_predicate(query, args.into_args()), false)
    }

    pub fn or_where(&self, query: &str, args: impl IntoArgs) -> Query {
        self.push_where(infer_predicate(query, args.into_args()), true)
    }

    /// Add WHERE condition with equality
    pub fn where_eq(&self, column: &str, value: impl Into<DatabaseValue>) -> Query {
        self.where_condition(column, "=", value)
    }

    pub fn where_ne(&self, column: &str, value: impl Into<DatabaseValue>) -> Query {
        self.where_condition(column, "!=", value)
    }

    pub fn where_gt(&self, column: &str, value: impl Into<DatabaseValue>) -> Query {
        self.where_condition(column, ">", value)
    }

    pub fn where_gte(&self, column: &str, value: impl Into<DatabaseValue>) -> Query {
        self.where_condition(column, ">=", value)
    }

    pub fn where_lt(&self, column: &str, value: impl Into<DatabaseValue>) -> Query {
        self.where_condition(column, "<", value)
    }

    pub fn where_lte(&self, column: &str, value: impl Into<DatabaseValue>) -> Query {
        self.where_condition(column, "<=", value)
    }

    pub fn where_like(&self, column: &str, pattern: &str) -> Query {
        self.where_condition(column, "LIKE", pattern)
    }

    /// Explicit comparison; unknown operators fall back to equality
    pub fn where_condition(
        &self,
        column: &str,
        operator: &str,
        value: impl Into<DatabaseValue>,
    ) -> Query {
        let upper = operator.trim().to_uppercase();
        let operator = if COMPARISONS.contains(&upper.as_str()) {
            upper
        } else {
            "=".to_string()
        };
        self.push_where(
            Predicate::Compare {
                column: column.to_string(),
                operator,
                value: value.into(),
            },
            false,
        )
    }

    /// An empty list matches nothing
    pub fn where_in(&self, column: &str, values: impl IntoArgs) -> Query {
        self.push_in(column, values, false, false)
    }

    pub fn or_where_in(&self, column: &str, values: impl IntoArgs) -> Query {
        self.push_in(column, values, false, true)
    }

    /// An empty list matches everything
    pub fn where_not_in(&self, column: &str, values: impl IntoArgs) -> Query {
        self.push_in(column, values, true, false)
    }

    pub fn or_where_not_in(&self, column: &str, values: impl IntoArgs) -> Query {
        self.push_in(column, values, true, true)
    }

    fn push_in(&self, column: &str, values: impl IntoArgs, negated: bool, or: bool) -> Query {
        self.push_where(
            Predicate::In {
                column: column.to_string(),
                values: values.into_args(),
                negated,
            },
            or,
        )
    }

    pub fn where_between(
        &self,
        column: &str,
        low: impl Into<DatabaseValue>,
        high: impl Into<DatabaseValue>,
    ) -> Query {
        self.push_between(column, low.into(), high.into(), false)
    }

    pub fn where_not_between(
        &self,
        column: &str,
        low: impl Into<DatabaseValue>,
        high: impl Into<DatabaseValue>,
    ) -> Query {
        self.push_between(column, low.into(), high.into(), true)
    }

    fn push_between(&self, column: &str, low: DatabaseValue, high: DatabaseValue, negated: bool) -> Query {
        self.push_where(
            Predicate::Between {
                column: column.to_string(),
                low,
                high,
                negated,
            },
            false,
        )
    }

    pub fn where_null(&self, column: &str) -> Query {
        self.push_null(column, false, false)
    }

    pub fn where_not_null(&self, column: &str) -> Query {
        self.push_null(column, true, false)
    }

    pub fn or_where_null(&self, column: &str) -> Query {
        self.push_null(column, false, true)
    }

    fn push_null(&self, column: &str, negated: bool, or: bool) -> Query {
        self.push_where(
            Predicate::Null {
                column: column.to_string(),
                negated,
            },
            or,
        )
    }

    /// Parenthesized sub-conditions built on a fresh query
    pub fn where_group(&self, build: impl FnOnce(Query) -> Query) -> Query {
        self.push_group(build, false)
    }

    pub fn or_where_group(&self, build: impl FnOnce(Query) -> Query) -> Query {
        self.push_group(build, true)
    }

    fn push_group(&self, build: impl FnOnce(Query) -> Query, or: bool) -> Query {
        let inner = build(self.fresh());
        let clauses = inner.conditions.wheres.clone();
        if clauses.is_empty() {
            return self.clone();
        }
        self.push_where(Predicate::Group(clauses), or)
    }

    /// HAVING condition; inference follows `where_`
    pub fn having(&self, query: &str, args: impl IntoArgs) -> Query {
        let predicate = infer_predicate(query, args.into_args());
        self.derive(|c| c.having.push(WhereClause { predicate, or: false }))
    }

    /// Equality on every attribute; nulls become `IS NULL`
    pub(crate) fn where_attributes(&self, attributes: &crate::backends::Attributes) -> Query {
        attributes
            .iter()
            .fold(self.clone(), |query, (column, value)| match value {
                DatabaseValue::Null => query.where_null(column),
                value => query.where_eq(column, value.clone()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;

    #[test]
    fn test_plain_column_with_value_is_equality() {
        let predicate = infer_predicate("id", args![7]);
        assert_eq!(
            predicate,
            Predicate::Compare {
                column: "id".to_string(),
                operator: "=".to_string(),
                value: DatabaseValue::Int64(7),
            }
        );
    }

    #[test]
    fn test_leading_operator_is_recognized() {
        match infer_predicate("age", args![">=", 18]) {
            Predicate::Compare { operator, value, .. } => {
                assert_eq!(operator, ">=");
                assert_eq!(value, DatabaseValue::Int64(18));
            }
            other => panic!("Expected comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_unlisted_operator_is_a_value() {
        match infer_predicate("name", args!["!=", "x"]) {
            Predicate::Compare { operator, value, .. } => {
                assert_eq!(operator, "=");
                assert_eq!(value, DatabaseValue::String("!=".to_string()));
            }
            other => panic!("Expected comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_fragments_stay_raw() {
        assert!(matches!(
            infer_predicate("name = ? OR email = ?", args!["a", "b"]),
            Predicate::Raw { ref args, .. } if args.len() == 2
        ));
        assert!(matches!(infer_predicate("active", args![]), Predicate::Raw { .. }));
        assert!(matches!(infer_predicate("COUNT(*)", args![3]), Predicate::Raw { .. }));
    }

    #[test]
    fn test_identifier_check() {
        assert!(is_plain_identifier("users.id"));
        assert!(is_plain_identifier("*"));
        assert!(!is_plain_identifier("1st"));
        assert!(!is_plain_identifier("name = ?"));
        assert!(!is_plain_identifier(""));
    }
}
