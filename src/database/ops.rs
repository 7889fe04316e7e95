// Copyright 2025-2026 The namedb developers.
// This file is part of namedb.

// namedb is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// namedb is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with namedb.  If not, see <http://www.gnu.org/licenses/>.

//! Insert/update/delete primitives, checked at runtime against the live
//! table schema.  Any mismatch between a record and its table is an
//! invariant violation, not a recoverable condition.

use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnection};
use sqlx::Row;

use crate::error::{NamedbError, Result};
use crate::types::FieldMap;

/// Bind one JSON scalar as a query parameter.
pub(crate) fn bind_value<'q>(
	query: Query<'q, Sqlite, SqliteArguments<'q>>,
	value: &Value,
) -> Result<Query<'q, Sqlite, SqliteArguments<'q>>> {
	Ok(match value {
		Value::Null => query.bind(None::<String>),
		Value::Bool(flag) => query.bind(*flag),
		Value::Number(number) => {
			if let Some(int) = number.as_i64() {
				query.bind(int)
			} else if let Some(uint) = number.as_u64() {
				query.bind(uint as i64)
			} else {
				query.bind(number.as_f64().unwrap_or_default())
			}
		}
		Value::String(text) => query.bind(text.clone()),
		Value::Array(_) | Value::Object(_) => {
			return Err(NamedbError::Invariant(format!("cannot bind composite value {}", value)))
		}
	})
}

/// The declared columns of `table`, in declaration order.
pub async fn table_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<String>> {
	let rows = sqlx::query(&format!("PRAGMA table_info({})", table)).fetch_all(&mut *conn).await?;
	rows.iter().map(|row| row.try_get::<String, _>("name").map_err(Into::into)).collect()
}

/// Check a set of field names against the columns of `table`.
///
/// With `fields_match_columns`, every field must name a real column; with
/// `columns_match_fields`, every column must be covered by a field.
pub async fn assert_fields_match(
	conn: &mut SqliteConnection,
	table: &str,
	fields: &[&str],
	fields_match_columns: bool,
	columns_match_fields: bool,
) -> Result<()> {
	let columns = table_columns(conn, table).await?;

	let mut missing = Vec::new();
	let mut extra = Vec::new();

	if columns_match_fields {
		for column in &columns {
			if !fields.contains(&column.as_str()) {
				missing.push(column.clone());
			}
		}
	}
	if fields_match_columns {
		for field in fields {
			if !columns.iter().any(|column| column == field) {
				extra.push((*field).to_string());
			}
		}
	}

	if !missing.is_empty() || !extra.is_empty() {
		return Err(NamedbError::SchemaMismatch {
			table: table.to_string(),
			missing: missing.join(","),
			extra: extra.join(","),
		});
	}
	Ok(())
}

/// Insert `record` into `table`.  The record must cover every column of the
/// table, and nothing else.
pub async fn insert(conn: &mut SqliteConnection, table: &str, record: &FieldMap) -> Result<()> {
	let fields: Vec<&str> = record.keys().map(String::as_str).collect();
	assert_fields_match(conn, table, &fields, true, true).await?;

	let placeholders = vec!["?"; fields.len()].join(",");
	let sql = format!("INSERT INTO {} ({}) VALUES ({})", table, fields.join(","), placeholders);

	let mut query = sqlx::query(&sql);
	for value in record.values() {
		query = bind_value(query, value)?;
	}
	query.execute(&mut *conn).await?;
	Ok(())
}

/// Update the row of `table` identified by `primary_key`.
///
/// Fields of `record` listed in `must_equal` are pinned in the WHERE clause
/// to the record's values instead of being written, guarding the key and the
/// immutable fields against silent mutation; `only_if` appends extra
/// equality (or IS NULL) predicates with values of its own.  Exactly one row
/// must change.
pub async fn update(
	conn: &mut SqliteConnection,
	table: &str,
	primary_key: &str,
	record: &FieldMap,
	must_equal: &[String],
	only_if: &FieldMap,
) -> Result<()> {
	if record.get(primary_key).is_none() {
		return Err(NamedbError::Invariant(format!("no value for primary key '{}' in record", primary_key)));
	}
	if !must_equal.iter().any(|field| field == primary_key) {
		return Err(NamedbError::Invariant(format!("primary key '{}' is set to change", primary_key)));
	}
	for field in only_if.keys() {
		if must_equal.iter().any(|pinned| pinned == field) {
			return Err(NamedbError::Invariant(format!("'{}' is in both only_if and must_equal", field)));
		}
	}

	let record_fields: Vec<&str> = record.keys().map(String::as_str).collect();
	let pinned_fields: Vec<&str> = must_equal.iter().map(String::as_str).collect();
	let only_if_fields: Vec<&str> = only_if.keys().map(String::as_str).collect();
	assert_fields_match(conn, table, &record_fields, true, false).await?;
	assert_fields_match(conn, table, &pinned_fields, true, false).await?;
	assert_fields_match(conn, table, &only_if_fields, true, false).await?;

	let update_columns: Vec<&String> =
		record.keys().filter(|key| !must_equal.iter().any(|pinned| pinned == *key)).collect();
	if update_columns.is_empty() {
		return Err(NamedbError::Invariant(format!("no columns of '{}' left to update", table)));
	}

	let set: Vec<String> = update_columns.iter().map(|column| format!("{} = ?", column)).collect();

	let mut where_set = Vec::new();
	let mut where_values: Vec<&Value> = Vec::new();
	for column in must_equal {
		let value = record
			.get(column)
			.ok_or_else(|| NamedbError::Invariant(format!("must_equal field '{}' is not in the record", column)))?;
		if value.is_null() {
			where_set.push(format!("{} IS NULL", column));
		} else {
			where_set.push(format!("{} = ?", column));
			where_values.push(value);
		}
	}
	for (column, value) in only_if {
		if value.is_null() {
			where_set.push(format!("{} IS NULL", column));
		} else {
			where_set.push(format!("{} = ?", column));
			where_values.push(value);
		}
	}

	let sql = format!("UPDATE {} SET {} WHERE {}", table, set.join(", "), where_set.join(" AND "));

	let mut query = sqlx::query(&sql);
	for column in &update_columns {
		query = bind_value(query, &record[column.as_str()])?;
	}
	for value in where_values {
		query = bind_value(query, value)?;
	}

	let done = query.execute(&mut *conn).await?;
	if done.rows_affected() != 1 {
		return Err(NamedbError::RowCount { query: sql, count: done.rows_affected() });
	}
	Ok(())
}

/// Delete the row of `table` whose `primary_key` equals `value`.
/// The row must exist.
pub async fn delete(conn: &mut SqliteConnection, table: &str, primary_key: &str, value: &Value) -> Result<()> {
	assert_fields_match(conn, table, &[primary_key], true, false).await?;

	let sql = format!("DELETE FROM {} WHERE {} = ?", table, primary_key);
	let done = bind_value(sqlx::query(&sql), value)?.execute(&mut *conn).await?;
	if done.rows_affected() != 1 {
		return Err(NamedbError::RowCount { query: sql, count: done.rows_affected() });
	}
	Ok(())
}
