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

//! Row-level coercions between sqlite rows and record field maps.

use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::error::{NamedbError, Result};
use crate::types::FieldMap;

/// Read a whole row into a column -> value map.
///
/// `revoked` is coerced from its stored 0/1 into a bool; any other integer
/// there means a corrupted database.
pub fn row_to_fields(row: &SqliteRow) -> Result<FieldMap> {
	let mut fields = FieldMap::new();
	for (idx, column) in row.columns().iter().enumerate() {
		let value = column_value(row, idx)?;
		let value = if column.name() == "revoked" { coerce_revoked(value)? } else { value };
		fields.insert(column.name().to_string(), value);
	}
	Ok(fields)
}

fn column_value(row: &SqliteRow, idx: usize) -> Result<Value> {
	let raw = row.try_get_raw(idx)?;
	if raw.is_null() {
		return Ok(Value::Null);
	}
	let type_name = raw.type_info().name().to_string();
	match type_name.as_str() {
		"INTEGER" | "INT" | "BOOLEAN" => Ok(Value::from(row.try_get::<i64, _>(idx)?)),
		"REAL" => Ok(Value::from(row.try_get::<f64, _>(idx)?)),
		"TEXT" => Ok(Value::from(row.try_get::<String, _>(idx)?)),
		"BLOB" => Ok(Value::from(hex::encode(row.try_get::<Vec<u8>, _>(idx)?))),
		other => Err(NamedbError::InvalidColumnValue {
			column: format!("column {}", idx),
			value: format!("unsupported sqlite type {}", other),
		}),
	}
}

fn coerce_revoked(value: Value) -> Result<Value> {
	match value.as_i64() {
		Some(0) => Ok(Value::Bool(false)),
		Some(1) => Ok(Value::Bool(true)),
		_ => Err(NamedbError::InvalidColumnValue { column: "revoked".to_string(), value: value.to_string() }),
	}
}
