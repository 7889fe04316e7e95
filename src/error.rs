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

use std::io;
use thiserror::Error;

pub type Result<T, E = NamedbError> = std::result::Result<T, E>;

/// Namedb Error Enum
///
/// Lookups for absent records are not errors; they surface as `Ok(None)` or
/// empty vectors.  Everything here is either a storage failure or an
/// invariant violation (a malformed input from the upstream validator, or a
/// corrupted database).
#[derive(Debug, Error)]
pub enum NamedbError {
	// Rust std io error
	#[error(transparent)]
	Io(#[from] io::Error),

	// database error
	#[error("sqlx error: {0}")]
	Sql(#[from] sqlx::Error),
	#[error(transparent)]
	Serialization(#[from] serde_json::Error),

	#[error("database '{0}' already exists")]
	DatabaseExists(String),

	#[error("unknown opcode '{0}'")]
	UnknownOpcode(String),

	#[error("record does not match table '{table}': missing [{missing}], extra [{extra}]")]
	SchemaMismatch { table: String, missing: String, extra: String },

	#[error("'{target}' is missing fields: {fields}")]
	MissingFields { target: String, fields: String },

	#[error("illegal transition from '{from}' to '{to}'")]
	IllegalTransition { from: String, to: String },

	#[error("query `{query}` touched {count} rows, expected exactly one")]
	RowCount { query: String, count: u64 },

	#[error("invalid value for column '{column}': {value}")]
	InvalidColumnValue { column: String, value: String },

	// writer-ordering errors
	#[error("operation at ({block_id}, {vtxindex}) does not follow ({last_block_id}, {last_vtxindex})")]
	OutOfOrder { block_id: u64, vtxindex: u32, last_block_id: u64, last_vtxindex: u32 },
	#[error("block {block_id} does not advance past block {last_block_id}")]
	BlockOutOfOrder { block_id: u64, last_block_id: u64 },
	#[error("no block is open")]
	NotInBlock,
	#[error("block {0} is already open")]
	BlockOpen(u64),
	#[error("engine is faulted; abort the current block before writing")]
	Faulted,

	#[error("{0}")]
	Invariant(String),
}
