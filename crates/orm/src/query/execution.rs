//! Query execution
//!
//! Every statement funnels through [`Query::run_exec`] or [`Query::run_fetch`]:
//! rebind placeholders, pick the transaction or a routed pool, apply the
//! deadline, and trace the outcome.

use std::future::Future;
use std::time::Instant;

use crate::backends::{Attributes, DatabaseValue, ExecResult, IntoArgs, Row};
use crate::connection::Access;
use crate::error::{OrmError, OrmResult};
use crate::events::{Dest, Event, EventKind};
use crate::model::Model;

use super::builder::Query;
use super::sql_generation::{Projection, SqlWriter, Statement};
use super::types::*;

impl Query {
    async fn with_deadline<T>(&self, work: impl Future<Output = OrmResult<T>>) -> OrmResult<T> {
        match self.conditions.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| OrmError::Timeout(limit))?,
            None => work.await,
        }
    }

    /// Reads that lock rows go to the writer
    fn read_access(&self) -> Access {
        if self.conditions.lock == LockMode::None {
            Access::Read
        } else {
            Access::Write
        }
    }

    pub(crate) async fn run_exec(&self, access: Access, statement: &Statement) -> OrmResult<ExecResult> {
        let sql = statement.native_sql(self.dialect()?);
        let start = Instant::now();
        let result = self
            .with_deadline(async {
                match &self.tx {
                    Some(tx) => tx.execute(&sql, &statement.params).await,
                    None => {
                        let connection = self.orm.registry.connection(&self.connection).await?;
                        connection.pool(access).execute(&sql, &statement.params).await
                    }
                }
            })
            .await;

        let affected = result.as_ref().map(|r| r.rows_affected).unwrap_or(0);
        self.orm.logger.trace(start, &sql, affected, result.as_ref().err());
        result
    }

    pub(crate) async fn run_fetch(&self, access: Access, statement: &Statement) -> OrmResult<Vec<Row>> {
        let sql = statement.native_sql(self.dialect()?);
        let start = Instant::now();
        let result = self
            .with_deadline(async {
                match &self.tx {
                    Some(tx) => tx.fetch_all(&sql, &statement.params).await,
                    None => {
                        let connection = self.orm.registry.connection(&self.connection).await?;
                        connection.pool(access).fetch_all(&sql, &statement.params).await
                    }
                }
            })
            .await;

        let rows = result.as_ref().map(|r| r.len() as u64).unwrap_or(0);
        self.orm.logger.trace(start, &sql, rows, result.as_ref().err());
        result
    }

    async fn select_rows<M: Model>(&self, projection: Projection<'_>) -> OrmResult<Vec<Row>> {
        self.validate()?;
        let dialect = self.dialect()?;
        let (schema, table) = self.target::<M>()?;
        let statement = SqlWriter::new(dialect, &self.conditions, &table, Some(&*schema)).select(projection);
        self.run_fetch(self.read_access(), &statement).await
    }

    /// Every matching row as `M`, relations eager loaded, `retrieved` fired per row
    pub async fn get<M: Model>(&self) -> OrmResult<Vec<M>> {
        let query = self.bind_for::<M>()?;
        let rows = query.select_rows::<M>(Projection::Rows).await?;
        query.hydrate(rows).await
    }

    pub(crate) async fn hydrate<M: Model>(&self, rows: Vec<Row>) -> OrmResult<Vec<M>> {
        let schema = crate::model::schema_of::<M>()?;
        let mut models = Vec::with_capacity(rows.len());
        let mut originals = Vec::with_capacity(rows.len());
        for row in rows {
            let attributes = row.into_map();
            models.push(schema.from_attributes::<M>(&attributes)?);
            originals.push(attributes);
        }

        self.eager_load(&mut models).await?;

        let hooks = self.hooks::<M>();
        if hooks.is_empty() {
            return Ok(models);
        }
        let mut retrieved = Vec::with_capacity(models.len());
        for (model, original) in models.into_iter().zip(originals) {
            let mut event = Event::new(
                EventKind::Retrieved,
                self.clone(),
                schema.clone(),
                Some(original),
                Dest::Model(model.clone()),
            );
            hooks.fire(EventKind::Retrieved, &mut event).await?;
            retrieved.push(match event.into_dest() {
                Dest::Model(model) => model,
                Dest::Map(_) => model,
            });
        }
        Ok(retrieved)
    }

    /// Rows whose primary key is in `keys`; no keys is an error, not a full scan
    pub async fn find<M: Model>(&self, keys: impl IntoArgs) -> OrmResult<Vec<M>> {
        let keys = keys.into_args();
        if keys.is_empty() {
            return Err(OrmError::MissingWhereClause);
        }
        let query = self.bind_for::<M>()?;
        let (schema, _) = query.target::<M>()?;
        query.where_in(schema.primary_key(), keys).get::<M>().await
    }

    pub async fn find_one<M: Model>(&self, key: impl Into<DatabaseValue>) -> OrmResult<Option<M>> {
        let key = key.into();
        if key.is_zero() {
            return Err(OrmError::MissingWhereClause);
        }
        let query = self.bind_for::<M>()?;
        let (schema, _) = query.target::<M>()?;
        query.where_eq(schema.primary_key(), key).first::<M>().await
    }

    pub async fn find_or_fail<M: Model>(&self, key: impl Into<DatabaseValue>) -> OrmResult<M> {
        self.find_one::<M>(key).await?.ok_or(OrmError::RecordNotFound)
    }

    /// First row, ordered by primary key unless an order is set
    pub async fn first<M: Model>(&self) -> OrmResult<Option<M>> {
        let query = self.bind_for::<M>()?;
        let query = if query.conditions.order_by.is_empty() {
            let (schema, table) = query.target::<M>()?;
            if query.conditions.joins.is_empty() {
                query.order_by(schema.primary_key())
            } else {
                query.order_by(&format!("{}.{}", table, schema.primary_key()))
            }
        } else {
            query
        };
        Ok(query.limit(1).get::<M>().await?.into_iter().next())
    }

    pub async fn first_or_fail<M: Model>(&self) -> OrmResult<M> {
        self.first::<M>().await?.ok_or(OrmError::RecordNotFound)
    }

    /// First row, or whatever `fallback` produces
    pub async fn first_or<M, F>(&self, fallback: F) -> OrmResult<M>
    where
        M: Model,
        F: FnOnce() -> OrmResult<M>,
    {
        match self.first::<M>().await? {
            Some(found) => Ok(found),
            None => fallback(),
        }
    }

    pub async fn count<M: Model>(&self) -> OrmResult<i64> {
        let query = self.bind_for::<M>()?;
        let rows = query.select_rows::<M>(Projection::Count).await?;
        Ok(first_value(&rows).and_then(|v| v.as_i64()).unwrap_or(0))
    }

    pub async fn exists<M: Model>(&self) -> OrmResult<bool> {
        let query = self.bind_for::<M>()?;
        Ok(!query.select_rows::<M>(Projection::Exists).await?.is_empty())
    }

    /// One column of every matching row
    pub async fn pluck<M: Model>(&self, column: &str) -> OrmResult<Vec<DatabaseValue>> {
        let query = self.bind_for::<M>()?;
        let rows = query.select_rows::<M>(Projection::Pluck(column)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.get_by_index(0).cloned())
            .collect())
    }

    /// SUM of a column; no rows sums to zero
    pub async fn sum<M: Model>(&self, column: &str) -> OrmResult<f64> {
        let query = self.bind_for::<M>()?;
        let rows = query.select_rows::<M>(Projection::Sum(column)).await?;
        Ok(first_value(&rows).and_then(|v| v.as_f64()).unwrap_or(0.0))
    }

    fn table_only(&self) -> OrmResult<&str> {
        self.conditions
            .table
            .as_deref()
            .filter(|table| !table.is_empty())
            .ok_or(OrmError::TableIsRequired)
    }

    /// Rows of the table set with [`Query::table`], as attribute maps
    pub async fn get_rows(&self) -> OrmResult<Vec<Attributes>> {
        self.validate()?;
        let table = self.table_only()?;
        let statement = SqlWriter::new(self.dialect()?, &self.conditions, table, None).select(Projection::Rows);
        let rows = self.run_fetch(self.read_access(), &statement).await?;
        Ok(rows.into_iter().map(Row::into_map).collect())
    }

    pub async fn count_rows(&self) -> OrmResult<i64> {
        self.validate()?;
        let table = self.table_only()?;
        let statement = SqlWriter::new(self.dialect()?, &self.conditions, table, None).select(Projection::Count);
        let rows = self.run_fetch(self.read_access(), &statement).await?;
        Ok(first_value(&rows).and_then(|v| v.as_i64()).unwrap_or(0))
    }

    /// Verbatim statement on the writer; returns the affected row count
    pub async fn exec(&self, sql: &str, args: impl IntoArgs) -> OrmResult<u64> {
        let statement = Statement::new(sql, args.into_args());
        Ok(self.run_exec(Access::Write, &statement).await?.rows_affected)
    }

    /// Verbatim query hydrated into `M`; no eager loading or hooks
    pub async fn raw<M: Model>(&self, sql: &str, args: impl IntoArgs) -> OrmResult<Vec<M>> {
        let query = self.bind_for::<M>()?;
        let schema = crate::model::schema_of::<M>()?;
        let statement = Statement::new(sql, args.into_args());
        let rows = query.run_fetch(Access::Read, &statement).await?;
        rows.into_iter()
            .map(|row| schema.from_attributes::<M>(&row.into_map()))
            .collect()
    }
}

fn first_value(rows: &[Row]) -> Option<&DatabaseValue> {
    rows.first().and_then(|row| row.get_by_index(0))
}
