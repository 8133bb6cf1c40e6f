//! Connection pool wrapper around Postgres (with an in-memory SQLite
//! backend for tests) plus the batch insert path used by the loader.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use derive_builder::Builder;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use tracing::debug;

#[cfg(test)]
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqlitePoolOptions};

use crate::config::{CONNECT_TIMEOUT, MAX_POOL_CONNECTIONS};
use crate::loader::{Destination, DestinationError, FieldValue, MappedRecord};
use crate::schema::{ColumnDef, ColumnType};

/// Connection parameters for the target database.
#[derive(Builder, Clone, Debug)]
pub struct PoolArgs {
    #[builder(setter(into))]
    host: String,
    #[builder(default = "5432")]
    port: u16,
    #[builder(setter(into))]
    database: String,
    #[builder(setter(into))]
    username: String,
    #[builder(setter(into))]
    password: String,
    #[builder(default = "MAX_POOL_CONNECTIONS")]
    max_connections: u32,
}

/// Database pool used by the loader and the reporting queries.
///
/// Production builds always talk to Postgres. Tests swap in an in-memory
/// SQLite pool so the full load path can run without a server.
#[derive(Clone, Debug)]
pub struct Pool {
    inner: PoolInner,
}

#[derive(Clone, Debug)]
enum PoolInner {
    Postgres(PgPool),
    #[cfg(test)]
    Sqlite(SqlitePool),
}

/// Create a connection pool for the target database.
pub async fn connect(args: PoolArgs) -> Result<Pool> {
    let options = PgConnectOptions::new()
        .host(&args.host)
        .port(args.port)
        .database(&args.database)
        .username(&args.username)
        .password(&args.password);

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(CONNECT_TIMEOUT)
        .connect_with(options)
        .await
        .context("Failed to create connection pool")?;

    debug!(host = %args.host, database = %args.database, "Connected to Postgres");
    Ok(Pool {
        inner: PoolInner::Postgres(pool),
    })
}

impl Pool {
    /// In-memory SQLite pool for tests. A single connection keeps the
    /// shared database alive for the lifetime of the pool.
    #[cfg(test)]
    pub async fn sqlite_in_memory() -> Result<Pool> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to create in-memory SQLite pool")?;

        Ok(Pool {
            inner: PoolInner::Sqlite(pool),
        })
    }

    pub fn is_postgres(&self) -> bool {
        match &self.inner {
            PoolInner::Postgres(_) => true,
            #[cfg(test)]
            PoolInner::Sqlite(_) => false,
        }
    }

    /// Execute a statement that returns no rows (DDL, test fixtures).
    pub async fn execute_query(&self, sql: &str) -> Result<(), sqlx::Error> {
        match &self.inner {
            PoolInner::Postgres(pool) => {
                sqlx::query(sql).execute(pool).await?;
            }
            #[cfg(test)]
            PoolInner::Sqlite(pool) => {
                sqlx::query(sql).execute(pool).await?;
            }
        }
        Ok(())
    }

    /// Fetch a single i64 value, e.g. `SELECT COUNT(*) FROM t`.
    pub async fn fetch_one_i64(&self, sql: &str) -> Result<i64, sqlx::Error> {
        match &self.inner {
            PoolInner::Postgres(pool) => {
                let row: (i64,) = sqlx::query_as(sql).fetch_one(pool).await?;
                Ok(row.0)
            }
            #[cfg(test)]
            PoolInner::Sqlite(pool) => {
                let row: (i64,) = sqlx::query_as(sql).fetch_one(pool).await?;
                Ok(row.0)
            }
        }
    }

    /// Fetch `(department, job, q1, q2, q3, q4)` rows for a year-bound
    /// query. Placeholders use `$N` and are converted for SQLite.
    pub async fn fetch_quarter_rows(
        &self,
        sql: &str,
        year: i32,
    ) -> Result<Vec<(String, String, i64, i64, i64, i64)>, sqlx::Error> {
        match &self.inner {
            PoolInner::Postgres(pool) => sqlx::query_as(sql).bind(year).fetch_all(pool).await,
            #[cfg(test)]
            PoolInner::Sqlite(pool) => {
                let sql = convert_to_sqlite_placeholders(sql);
                sqlx::query_as(&sql).bind(year).fetch_all(pool).await
            }
        }
    }

    /// Fetch `(id, department, hired)` rows for a year-bound query.
    pub async fn fetch_department_rows(
        &self,
        sql: &str,
        year: i32,
    ) -> Result<Vec<(i64, String, i64)>, sqlx::Error> {
        match &self.inner {
            PoolInner::Postgres(pool) => sqlx::query_as(sql).bind(year).fetch_all(pool).await,
            #[cfg(test)]
            PoolInner::Sqlite(pool) => {
                let sql = convert_to_sqlite_placeholders(sql);
                sqlx::query_as(&sql).bind(year).fetch_all(pool).await
            }
        }
    }
}

#[async_trait]
impl Destination for Pool {
    /// Insert a batch of mapped records inside a single transaction.
    ///
    /// Builds one multi-row `INSERT` statement with typed binds and makes
    /// exactly one commit attempt. Any failure rolls the whole batch back.
    async fn insert_batch(
        &self,
        table: &str,
        columns: &[ColumnDef],
        records: &[MappedRecord],
    ) -> Result<(), DestinationError> {
        if records.is_empty() {
            return Ok(());
        }
        let sql = build_insert_sql(table, columns, records.len());

        match &self.inner {
            PoolInner::Postgres(pool) => {
                let mut tx = pool.begin().await.map_err(classify_error)?;
                let mut query = sqlx::query(&sql);
                for record in records {
                    query = bind_record_pg(query, columns, record);
                }
                if let Err(err) = query.execute(&mut *tx).await {
                    let _ = tx.rollback().await;
                    return Err(classify_error(err));
                }
                tx.commit().await.map_err(classify_error)?;
            }
            #[cfg(test)]
            PoolInner::Sqlite(pool) => {
                let sql = convert_to_sqlite_placeholders(&sql);
                let mut tx = pool.begin().await.map_err(classify_error)?;
                let mut query = sqlx::query(&sql);
                for record in records {
                    query = bind_record_sqlite(query, columns, record);
                }
                if let Err(err) = query.execute(&mut *tx).await {
                    let _ = tx.rollback().await;
                    return Err(classify_error(err));
                }
                tx.commit().await.map_err(classify_error)?;
            }
        }
        Ok(())
    }
}

/// Build a multi-row `INSERT INTO t (cols) VALUES ($1, ...), (...)` statement.
fn build_insert_sql(table: &str, columns: &[ColumnDef], record_count: usize) -> String {
    let column_list = columns
        .iter()
        .map(|c| format!("\"{}\"", c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut value_groups = Vec::with_capacity(record_count);
    let mut param = 1;
    for _ in 0..record_count {
        let placeholders: Vec<String> = columns
            .iter()
            .map(|_| {
                let p = format!("${param}");
                param += 1;
                p
            })
            .collect();
        value_groups.push(format!("({})", placeholders.join(", ")));
    }

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quoted_table_name(table),
        column_list,
        value_groups.join(", ")
    )
}

/// Quote each dotted segment of a possibly schema-qualified table name.
fn quoted_table_name(table: &str) -> String {
    table
        .split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(".")
}

fn bind_record_pg<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    columns: &[ColumnDef],
    record: &MappedRecord,
) -> Query<'q, Postgres, PgArguments> {
    for (column, value) in columns.iter().zip(record.values()) {
        query = match value {
            FieldValue::Text(s) => query.bind(s.clone()),
            FieldValue::Integer(n) => query.bind(*n),
            FieldValue::Timestamp(ts) => query.bind(*ts),
            // Absent fields bind a NULL typed to the declared column type.
            // Invalid values never reach the destination; the mapper
            // rejects those rows before batching.
            FieldValue::Absent | FieldValue::Invalid(_) => match column.col_type {
                ColumnType::Text => query.bind(Option::<String>::None),
                ColumnType::Integer => query.bind(Option::<i64>::None),
                ColumnType::Timestamp => query.bind(Option::<NaiveDateTime>::None),
            },
        };
    }
    query
}

#[cfg(test)]
fn bind_record_sqlite<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    columns: &[ColumnDef],
    record: &MappedRecord,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for (column, value) in columns.iter().zip(record.values()) {
        query = match value {
            FieldValue::Text(s) => query.bind(s.clone()),
            FieldValue::Integer(n) => query.bind(*n),
            FieldValue::Timestamp(ts) => query.bind(*ts),
            FieldValue::Absent | FieldValue::Invalid(_) => match column.col_type {
                ColumnType::Text => query.bind(Option::<String>::None),
                ColumnType::Integer => query.bind(Option::<i64>::None),
                ColumnType::Timestamp => query.bind(Option::<NaiveDateTime>::None),
            },
        };
    }
    query
}

/// Convert `$N` placeholders to SQLite's `?` style.
#[cfg(test)]
fn convert_to_sqlite_placeholders(sql: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' && chars.peek().is_some_and(|n| n.is_ascii_digit()) {
            result.push('?');
            while chars.peek().is_some_and(|n| n.is_ascii_digit()) {
                chars.next();
            }
        } else {
            result.push(c);
        }
    }
    result
}

/// Split database errors into connectivity failures (the server is
/// unreachable or dropped the connection) and commit failures (the batch
/// itself was refused, e.g. a constraint violation).
fn classify_error(err: sqlx::Error) -> DestinationError {
    let connectivity = matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Protocol(_)
            | sqlx::Error::Tls(_)
    ) || {
        let text = err.to_string().to_lowercase();
        text.contains("connection") || text.contains("timed out") || text.contains("broken pipe")
    };

    if connectivity {
        DestinationError::Connectivity(err.to_string())
    } else {
        DestinationError::Commit(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TargetTableSpec;

    #[test]
    fn test_build_insert_sql_multi_row() {
        let columns = vec![
            ColumnDef::required("id", ColumnType::Integer),
            ColumnDef::required("department", ColumnType::Text),
        ];
        let sql = build_insert_sql("departments", &columns, 2);
        assert_eq!(
            sql,
            "INSERT INTO \"departments\" (\"id\", \"department\") VALUES ($1, $2), ($3, $4)"
        );
    }

    #[test]
    fn test_build_insert_sql_qualified_table() {
        let columns = vec![ColumnDef::required("id", ColumnType::Integer)];
        let sql = build_insert_sql("migration_tables.jobs", &columns, 1);
        assert_eq!(
            sql,
            "INSERT INTO \"migration_tables\".\"jobs\" (\"id\") VALUES ($1)"
        );
    }

    #[test]
    fn test_convert_to_sqlite_placeholders() {
        assert_eq!(
            convert_to_sqlite_placeholders("VALUES ($1, $2), ($3, $4)"),
            "VALUES (?, ?), (?, ?)"
        );
        // Multi-digit parameters collapse to a single marker.
        assert_eq!(convert_to_sqlite_placeholders("($9, $10, $11)"), "(?, ?, ?)");
        // A dollar sign without digits is left alone.
        assert_eq!(convert_to_sqlite_placeholders("cost $ 5"), "cost $ 5");
    }

    #[tokio::test]
    async fn test_insert_batch_round_trip_sqlite() {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        pool.execute_query(
            "CREATE TABLE departments (id INTEGER PRIMARY KEY, department TEXT NOT NULL)",
        )
        .await
        .unwrap();

        let spec = TargetTableSpec::catalog("departments").unwrap();
        let records = vec![
            MappedRecord::new(vec![
                FieldValue::Integer(1),
                FieldValue::Text("Engineering".to_string()),
            ]),
            MappedRecord::new(vec![
                FieldValue::Integer(2),
                FieldValue::Text("Sales".to_string()),
            ]),
        ];

        pool.insert_batch("departments", spec.insert_columns(), &records)
            .await
            .unwrap();

        let count = pool
            .fetch_one_i64("SELECT COUNT(*) FROM departments")
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_insert_batch_rolls_back_on_constraint_violation() {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        pool.execute_query(
            "CREATE TABLE departments (id INTEGER PRIMARY KEY, department TEXT NOT NULL)",
        )
        .await
        .unwrap();

        let spec = TargetTableSpec::catalog("departments").unwrap();
        // Second record violates the primary key; the whole batch must vanish.
        let records = vec![
            MappedRecord::new(vec![
                FieldValue::Integer(1),
                FieldValue::Text("Engineering".to_string()),
            ]),
            MappedRecord::new(vec![
                FieldValue::Integer(1),
                FieldValue::Text("Duplicate".to_string()),
            ]),
        ];

        let err = pool
            .insert_batch("departments", spec.insert_columns(), &records)
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "batch_commit");

        let count = pool
            .fetch_one_i64("SELECT COUNT(*) FROM departments")
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_absent_binds_null() {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        pool.execute_query("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)")
            .await
            .unwrap();

        let columns = vec![
            ColumnDef::required("id", ColumnType::Integer),
            ColumnDef::nullable("body", ColumnType::Text),
        ];
        let records = vec![MappedRecord::new(vec![
            FieldValue::Integer(7),
            FieldValue::Absent,
        ])];
        pool.insert_batch("notes", &columns, &records).await.unwrap();

        let nulls = pool
            .fetch_one_i64("SELECT COUNT(*) FROM notes WHERE body IS NULL")
            .await
            .unwrap();
        assert_eq!(nulls, 1);
    }
}
