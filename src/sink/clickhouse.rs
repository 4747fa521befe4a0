//! ClickHouse sink backed by `clickhouse_rs`.
//!
//! Tables are created on demand from the column specs handed over by
//! the staging buffers, so dynamically-discovered layouts need no
//! migration step. Inserts are built as single batched VALUES
//! statements; ClickHouse acknowledges an INSERT only after it is
//! applied, so the commit barrier is a connection round trip.

use std::fmt::Write;

use anyhow::{Context, Result};
use clickhouse_rs::Pool;

use super::{CellValue, ColumnSpec, ColumnType, Sink};

pub struct ClickHouseSink {
    pool: Pool,
    database: String,
}

impl ClickHouseSink {
    pub fn new(pool: Pool, database: String) -> Self {
        Self { pool, database }
    }
}

impl Sink for ClickHouseSink {
    async fn define_table(&mut self, table: &str, columns: &[ColumnSpec]) -> Result<()> {
        let sql = create_table_sql(&self.database, table, columns);

        let mut handle = self
            .pool
            .get_handle()
            .await
            .with_context(|| format!("getting handle to create {table}"))?;
        handle
            .execute(sql.as_str())
            .await
            .with_context(|| format!("creating table {table}"))?;

        Ok(())
    }

    async fn append_rows(
        &mut self,
        table: &str,
        columns: &[ColumnSpec],
        rows: &[Vec<CellValue>],
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let sql = insert_sql(&self.database, table, columns, rows);

        let mut handle = self
            .pool
            .get_handle()
            .await
            .with_context(|| format!("getting handle for {table} insert"))?;
        handle
            .execute(sql.as_str())
            .await
            .with_context(|| format!("sending {table} batch"))?;

        Ok(())
    }

    async fn commit(&mut self, table: &str) -> Result<()> {
        // Inserts are acknowledged synchronously; a successful round
        // trip confirms nothing is still in flight on this connection.
        let mut handle = self
            .pool
            .get_handle()
            .await
            .with_context(|| format!("getting handle to commit {table}"))?;
        handle
            .ping()
            .await
            .with_context(|| format!("confirming {table} batch"))?;

        Ok(())
    }

    async fn table_size(&mut self, table: &str) -> Result<u64> {
        let sql = format!("SELECT count() AS n FROM {}.{table}", self.database);

        let mut handle = self
            .pool
            .get_handle()
            .await
            .with_context(|| format!("getting handle to count {table}"))?;
        let block = handle
            .query(sql.as_str())
            .fetch_all()
            .await
            .with_context(|| format!("counting rows in {table}"))?;

        match block.rows().next() {
            Some(row) => {
                let n: u64 = row.get("n").context("reading row count")?;
                Ok(n)
            }
            None => Ok(0),
        }
    }
}

// --- SQL formatting helpers ---

/// ClickHouse column type for a declared column. Scalars are Nullable
/// because unset cells are stored as NULL.
fn clickhouse_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Text => "Nullable(String)",
        ColumnType::Int32 => "Nullable(Int32)",
        ColumnType::Int64 => "Nullable(Int64)",
        ColumnType::UInt32 => "Nullable(UInt32)",
        ColumnType::UInt64 => "Nullable(UInt64)",
        ColumnType::Float64 => "Nullable(Float64)",
        ColumnType::Bool => "Nullable(UInt8)",
        ColumnType::UInt64List => "Array(UInt64)",
    }
}

fn create_table_sql(database: &str, table: &str, columns: &[ColumnSpec]) -> String {
    let mut sql = String::with_capacity(96 + columns.len() * 32);
    let _ = write!(sql, "CREATE TABLE IF NOT EXISTS {database}.{table} (");
    for (idx, col) in columns.iter().enumerate() {
        if idx > 0 {
            sql.push_str(", ");
        }
        let _ = write!(sql, "{} {}", quote_identifier(&col.name), clickhouse_type(col.ty));
    }
    sql.push_str(") ENGINE = MergeTree ORDER BY tuple()");
    sql
}

fn insert_sql(
    database: &str,
    table: &str,
    columns: &[ColumnSpec],
    rows: &[Vec<CellValue>],
) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_identifier(&c.name)).collect();
    let mut sql = String::with_capacity(64 + names.len() * 16 + rows.len() * columns.len() * 12);
    let _ = write!(
        sql,
        "INSERT INTO {database}.{table} ({}) VALUES ",
        names.join(", ")
    );

    for (idx, row) in rows.iter().enumerate() {
        if idx > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (col, cell) in row.iter().enumerate() {
            if col > 0 {
                sql.push_str(", ");
            }
            append_literal(&mut sql, cell, columns[col].ty);
        }
        sql.push(')');
    }
    sql
}

/// Appends one cell as a SQL literal. An unset cell in an array column
/// becomes the empty array since Array columns are not Nullable.
fn append_literal(sql: &mut String, cell: &CellValue, ty: ColumnType) {
    match cell {
        CellValue::Null => {
            if ty == ColumnType::UInt64List {
                sql.push_str("[]");
            } else {
                sql.push_str("NULL");
            }
        }
        CellValue::Text(s) => {
            let escaped = escape_sql(s);
            let _ = write!(sql, "'{escaped}'");
        }
        CellValue::Int32(v) => {
            let _ = write!(sql, "{v}");
        }
        CellValue::Int64(v) => {
            let _ = write!(sql, "{v}");
        }
        CellValue::UInt32(v) => {
            let _ = write!(sql, "{v}");
        }
        CellValue::UInt64(v) => {
            let _ = write!(sql, "{v}");
        }
        CellValue::Float64(v) => {
            let _ = write!(sql, "{v}");
        }
        CellValue::Bool(v) => {
            sql.push(if *v { '1' } else { '0' });
        }
        CellValue::UInt64List(values) => {
            sql.push('[');
            for (idx, value) in values.iter().enumerate() {
                if idx > 0 {
                    sql.push_str(", ");
                }
                let _ = write!(sql, "{value}");
            }
            sql.push(']');
        }
    }
}

/// Escapes a string value for SQL insertion. Control characters are
/// escaped too since metric names and hostnames come straight from the
/// source documents.
fn escape_sql(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
        .replace('\0', "\\0")
}

/// Backtick-quotes a column name. Node-state metrics and model
/// parameters name columns after document fields, so every identifier
/// goes through here before reaching DDL or INSERT text.
fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}
