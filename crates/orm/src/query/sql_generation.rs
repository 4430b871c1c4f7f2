//! Query Builder SQL generation
//!
//! Statements are rendered with `?` placeholders in argument order and rebound
//! to the dialect's native form just before execution.

use crate::backends::{Attributes, DatabaseValue, Dialect, ReturningStyle};
use crate::error::OrmResult;
use crate::model::{Model, ModelSchema};

use super::builder::Query;
use super::types::*;
use super::where_clause::is_plain_identifier;

/// A rendered statement
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<DatabaseValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// SQL with the dialect's own placeholders
    pub fn native_sql(&self, dialect: Dialect) -> String {
        dialect.rebind(&self.sql)
    }

    /// SQL with every argument inlined as a literal; for logs and debugging only
    pub fn to_raw_sql(&self, dialect: Dialect) -> String {
        dialect.replace_placeholders(&self.sql, |position| {
            self.params
                .get(position - 1)
                .map(DatabaseValue::to_sql_literal)
                .unwrap_or_else(|| "?".to_string())
        })
    }
}

/// What a SELECT returns
#[derive(Debug, Clone, Copy)]
pub(crate) enum Projection<'a> {
    Rows,
    Count,
    Exists,
    Pluck(&'a str),
    Sum(&'a str),
}

/// Renders one statement from accumulated conditions
pub(crate) struct SqlWriter<'a> {
    dialect: Dialect,
    conditions: &'a Conditions,
    table: &'a str,
    schema: Option<&'a ModelSchema>,
    sql: String,
    params: Vec<DatabaseValue>,
}

impl<'a> SqlWriter<'a> {
    pub(crate) fn new(
        dialect: Dialect,
        conditions: &'a Conditions,
        table: &'a str,
        schema: Option<&'a ModelSchema>,
    ) -> Self {
        Self {
            dialect,
            conditions,
            table,
            schema,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }

    /// Quote bare identifiers; expressions pass through untouched
    fn column(&self, name: &str) -> String {
        let physical = self
            .schema
            .and_then(|schema| schema.column(name))
            .unwrap_or(name);
        if is_plain_identifier(physical) {
            self.dialect.quote_ident(physical)
        } else {
            physical.to_string()
        }
    }

    fn quoted_table(&self) -> String {
        if is_plain_identifier(self.table) {
            self.dialect.quote_ident(self.table)
        } else {
            self.table.to_string()
        }
    }

    fn soft_delete_clause(&self) -> Option<WhereClause> {
        if self.conditions.with_trashed {
            return None;
        }
        let column = self.schema?.soft_delete_column()?;
        let column = if is_plain_identifier(self.table) {
            format!("{}.{}", self.table, column)
        } else {
            column.to_string()
        };
        Some(WhereClause {
            predicate: Predicate::Null {
                column,
                negated: false,
            },
            or: false,
        })
    }

    /// Key conditions, then the caller's wheres, then the soft-delete scope.
    /// User wheres containing OR are grouped so the extra clauses bind to all of them.
    fn scoped_wheres(&self, keys: Vec<WhereClause>, soft_delete: bool) -> Vec<WhereClause> {
        let scope = if soft_delete { self.soft_delete_clause() } else { None };
        let user = &self.conditions.wheres;
        let mut all = keys;

        if !user.is_empty() {
            let has_or = user.iter().skip(1).any(|clause| clause.or);
            if has_or && (!all.is_empty() || scope.is_some()) {
                all.push(WhereClause {
                    predicate: Predicate::Group(user.clone()),
                    or: false,
                });
            } else {
                all.extend(user.iter().cloned());
            }
        }
        all.extend(scope);
        all
    }

    fn write_where(&mut self, clauses: &[WhereClause]) {
        if clauses.is_empty() {
            return;
        }
        self.sql.push_str(" WHERE ");
        self.write_clauses(clauses);
    }

    fn write_clauses(&mut self, clauses: &[WhereClause]) {
        let multiple = clauses.len() > 1;
        for (i, clause) in clauses.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(if clause.or { " OR " } else { " AND " });
            }
            self.write_predicate(&clause.predicate, multiple);
        }
    }

    fn write_predicate(&mut self, predicate: &Predicate, multiple: bool) {
        match predicate {
            Predicate::Compare {
                column,
                operator,
                value,
            } => {
                let column = self.column(column);
                self.sql.push_str(&format!("{} {} ?", column, operator));
                self.params.push(value.clone());
            }
            Predicate::Raw { sql, args } => {
                if multiple && contains_or(sql) {
                    self.sql.push_str(&format!("({})", sql));
                } else {
                    self.sql.push_str(sql);
                }
                self.params.extend(args.iter().cloned());
            }
            Predicate::In {
                column,
                values,
                negated,
            } => {
                if values.is_empty() {
                    self.sql.push_str(if *negated { "(1 = 1)" } else { "(1 = 0)" });
                    return;
                }
                let column = self.column(column);
                let marks = vec!["?"; values.len()].join(", ");
                let keyword = if *negated { "NOT IN" } else { "IN" };
                self.sql.push_str(&format!("{} {} ({})", column, keyword, marks));
                self.params.extend(values.iter().cloned());
            }
            Predicate::Between {
                column,
                low,
                high,
                negated,
            } => {
                let column = self.column(column);
                let keyword = if *negated { "NOT BETWEEN" } else { "BETWEEN" };
                self.sql.push_str(&format!("{} {} ? AND ?", column, keyword));
                self.params.push(low.clone());
                self.params.push(high.clone());
            }
            Predicate::Null { column, negated } => {
                let column = self.column(column);
                let keyword = if *negated { "IS NOT NULL" } else { "IS NULL" };
                self.sql.push_str(&format!("{} {}", column, keyword));
            }
            Predicate::Group(clauses) => {
                self.sql.push('(');
                self.write_clauses(clauses);
                self.sql.push(')');
            }
        }
    }

    fn row_columns(&self) -> String {
        let c = self.conditions;
        let selects: Vec<&String> = c.selects.iter().filter(|s| *s != ASSOCIATIONS).collect();
        if !selects.is_empty() {
            return selects
                .iter()
                .map(|name| self.column(name))
                .collect::<Vec<_>>()
                .join(", ");
        }

        let omits: Vec<&String> = c.omits.iter().filter(|s| *s != ASSOCIATIONS).collect();
        match self.schema {
            Some(schema) if !omits.is_empty() => {
                let omitted: Vec<&str> = omits
                    .iter()
                    .map(|name| schema.column(name).unwrap_or(name.as_str()))
                    .collect();
                schema
                    .fields()
                    .iter()
                    .filter(|field| !omitted.contains(&field.column.as_str()))
                    .map(|field| self.dialect.quote_ident(&field.column))
                    .collect::<Vec<_>>()
                    .join(", ")
            }
            _ => "*".to_string(),
        }
    }

    fn count_expression(&self) -> String {
        let c = self.conditions;
        let selects: Vec<&String> = c.selects.iter().filter(|s| *s != ASSOCIATIONS).collect();
        if c.distinct && !selects.is_empty() {
            let columns: Vec<String> = selects.iter().map(|name| self.column(name)).collect();
            format!("COUNT(DISTINCT {})", columns.join(", "))
        } else {
            "COUNT(*)".to_string()
        }
    }

    /// SELECT .. FROM .. JOIN .. WHERE .. GROUP BY .. HAVING, then ORDER/LIMIT/lock when `tail`
    fn write_select_body(&mut self, head: &str, distinct: bool, tail: bool) {
        let c = self.conditions;
        self.sql.push_str("SELECT ");
        if distinct {
            self.sql.push_str("DISTINCT ");
        }
        self.sql.push_str(head);
        self.sql.push_str(" FROM ");
        self.sql.push_str(&self.quoted_table());
        if tail {
            if let Some(hint) = self.dialect.table_hint(c.lock) {
                self.sql.push(' ');
                self.sql.push_str(hint);
            }
        }

        for join in &c.joins {
            match join {
                Join::On {
                    join_type,
                    table,
                    left,
                    right,
                } => {
                    let rendered = format!(
                        " {} {} ON {} = {}",
                        join_type,
                        self.column(table),
                        self.column(left),
                        self.column(right)
                    );
                    self.sql.push_str(&rendered);
                }
                Join::Raw { sql, args } => {
                    self.sql.push(' ');
                    self.sql.push_str(sql);
                    self.params.extend(args.iter().cloned());
                }
            }
        }

        let wheres = self.scoped_wheres(Vec::new(), true);
        self.write_where(&wheres);

        if !c.group_by.is_empty() {
            let columns: Vec<String> = c.group_by.iter().map(|g| self.column(g)).collect();
            self.sql.push_str(" GROUP BY ");
            self.sql.push_str(&columns.join(", "));
        }
        if !c.having.is_empty() {
            self.sql.push_str(" HAVING ");
            self.write_clauses(&c.having);
        }

        if !tail {
            return;
        }

        if !c.order_by.is_empty() {
            let orders: Vec<String> = c
                .order_by
                .iter()
                .map(|order| match order {
                    Order::Column { column, direction } => {
                        format!("{} {}", self.column(column), direction)
                    }
                    Order::Raw(sql) => sql.clone(),
                    Order::Random => self.dialect.random_function().to_string(),
                })
                .collect();
            self.sql.push_str(" ORDER BY ");
            self.sql.push_str(&orders.join(", "));
        }
        let paging = self
            .dialect
            .limit_offset(c.limit, c.offset, !c.order_by.is_empty());
        self.sql.push_str(&paging);
        if let Some(lock) = self.dialect.lock_clause(c.lock) {
            self.sql.push(' ');
            self.sql.push_str(lock);
        }
    }

    pub(crate) fn select(mut self, projection: Projection<'_>) -> Statement {
        let distinct = self.conditions.distinct;
        match projection {
            Projection::Rows => {
                let head = self.row_columns();
                self.write_select_body(&head, distinct, true);
            }
            Projection::Pluck(column) => {
                let head = self.column(column);
                self.write_select_body(&head, distinct, true);
            }
            Projection::Count if !self.conditions.group_by.is_empty() => {
                let head = self
                    .conditions
                    .group_by
                    .iter()
                    .map(|g| self.column(g))
                    .collect::<Vec<_>>()
                    .join(", ");
                self.sql.push_str("SELECT COUNT(*) FROM (");
                self.write_select_body(&head, false, false);
                self.sql.push_str(") count_source");
            }
            Projection::Count => {
                let head = self.count_expression();
                self.write_select_body(&head, false, false);
            }
            Projection::Sum(column) => {
                let head = format!("SUM({})", self.column(column));
                self.write_select_body(&head, false, false);
            }
            Projection::Exists => {
                self.write_select_body("1", false, false);
                let paging = self.dialect.limit_offset(Some(1), None, false);
                self.sql.push_str(&paging);
            }
        }
        self.finish()
    }

    /// Multi-row INSERT; `returning` names the generated key to read back
    pub(crate) fn insert(
        mut self,
        columns: &[String],
        rows: Vec<Vec<DatabaseValue>>,
        returning: Option<&str>,
    ) -> Statement {
        let style = self.dialect.returning_style();
        let output = match (returning, style) {
            (Some(key), ReturningStyle::Output) => {
                format!(" OUTPUT INSERTED.{}", self.dialect.quote_ident(key))
            }
            _ => String::new(),
        };
        let trailing = match (returning, style) {
            (Some(key), ReturningStyle::Returning) => {
                format!(" RETURNING {}", self.dialect.quote_ident(key))
            }
            _ => String::new(),
        };

        self.sql = format!("INSERT INTO {}", self.quoted_table());
        if columns.is_empty() {
            match self.dialect {
                Dialect::Mysql => self.sql.push_str(" () VALUES ()"),
                _ => {
                    self.sql.push_str(&output);
                    self.sql.push_str(" DEFAULT VALUES");
                }
            }
        } else {
            let names: Vec<String> = columns.iter().map(|c| self.dialect.quote_ident(c)).collect();
            self.sql.push_str(&format!(" ({})", names.join(", ")));
            self.sql.push_str(&output);
            let tuple = format!("({})", vec!["?"; columns.len()].join(", "));
            let tuples = vec![tuple; rows.len()].join(", ");
            self.sql.push_str(&format!(" VALUES {}", tuples));
            self.params = rows.into_iter().flatten().collect();
        }
        self.sql.push_str(&trailing);
        self.finish()
    }

    /// UPDATE scoped by `keys` and the caller's wheres; soft-deleted rows are skipped
    pub(crate) fn update(mut self, sets: &Attributes, keys: Vec<WhereClause>) -> Statement {
        let mut assignments = Vec::with_capacity(sets.len());
        for (column, value) in sets {
            let column = self.dialect.quote_ident(column);
            if value.is_null() {
                assignments.push(format!("{} = NULL", column));
            } else {
                assignments.push(format!("{} = ?", column));
                self.params.push(value.clone());
            }
        }
        self.sql = format!("UPDATE {} SET {}", self.quoted_table(), assignments.join(", "));
        let wheres = self.scoped_wheres(keys, true);
        self.write_where(&wheres);
        self.finish()
    }

    pub(crate) fn delete(mut self, keys: Vec<WhereClause>) -> Statement {
        self.sql = format!("DELETE FROM {}", self.quoted_table());
        let wheres = self.scoped_wheres(keys, false);
        self.write_where(&wheres);
        self.finish()
    }
}

fn contains_or(sql: &str) -> bool {
    sql.to_uppercase().contains(" OR ")
}

/// `column = value` as a key condition
pub(crate) fn key_clause(column: &str, value: DatabaseValue) -> WhereClause {
    WhereClause {
        predicate: Predicate::Compare {
            column: column.to_string(),
            operator: "=".to_string(),
            value,
        },
        or: false,
    }
}

impl Query {
    /// The SELECT `get::<M>()` would run
    pub fn to_statement<M: Model>(&self) -> OrmResult<Statement> {
        let query = self.bind_for::<M>()?;
        query.validate()?;
        let dialect = query.dialect()?;
        let (schema, table) = query.target::<M>()?;
        Ok(SqlWriter::new(dialect, &query.conditions, &table, Some(&*schema)).select(Projection::Rows))
    }

    /// The would-be SELECT with native placeholders
    pub fn to_sql<M: Model>(&self) -> OrmResult<String> {
        let dialect = self.bind_for::<M>()?.dialect()?;
        Ok(self.to_statement::<M>()?.native_sql(dialect))
    }

    /// The would-be SELECT with arguments inlined
    pub fn to_raw_sql<M: Model>(&self) -> OrmResult<String> {
        let dialect = self.bind_for::<M>()?.dialect()?;
        Ok(self.to_statement::<M>()?.to_raw_sql(dialect))
    }
}
