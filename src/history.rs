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

//! The append-only history journal: one JSON payload per state change per
//! entity, either a delta (prior values of the fields the operation
//! changes) or a full snapshot of the prior record's consensus fields.

use serde_json::Value;
use sqlx::sqlite::SqliteConnection;

use crate::database::{ops, HISTORY_TABLE};
use crate::error::{NamedbError, Result};
use crate::opcodes::{FieldSet, Opcode, OpcodeCatalog};
use crate::types::{FieldMap, History, HistoryEntry, HISTORY_SNAPSHOT};

/// The opcode a record claims to have been produced by.
pub fn record_opcode(catalog: &OpcodeCatalog, record: &FieldMap) -> Result<Opcode> {
	let wire = record
		.get("op")
		.and_then(Value::as_str)
		.ok_or_else(|| NamedbError::Invariant("record is missing its 'op'".to_string()))?;
	catalog.opcode(wire)
}

/// Check that `record` is a complete snapshot: it must carry every
/// consensus field of its own opcode.
pub fn is_snapshot_record(catalog: &OpcodeCatalog, record: &FieldMap) -> Result<()> {
	let opcode = record_opcode(catalog, record)?;
	let missing: Vec<&str> =
		catalog.consensus_fields(opcode)?.iter().filter(|field| !record.contains_key(**field)).copied().collect();
	if !missing.is_empty() {
		return Err(NamedbError::MissingFields { target: opcode.name().to_string(), fields: missing.join(",") });
	}
	Ok(())
}

/// Save the history diff of applying `opcode` to `pre_record` (the prior
/// state), keyed by `history_id` at `(block_id, vtxindex, txid)`.
///
/// If the prior record was produced by an opcode whose mutate set is `All`
/// (or `snapshot` is forced), the payload is a full snapshot of the prior
/// record's consensus fields plus the snapshot marker; otherwise it is the
/// projection of the prior record onto `opcode`'s backup fields.
#[allow(clippy::too_many_arguments)]
pub async fn save(
	conn: &mut SqliteConnection,
	catalog: &OpcodeCatalog,
	opcode: Opcode,
	history_id: &str,
	block_id: u64,
	vtxindex: u32,
	txid: &str,
	pre_record: &FieldMap,
	snapshot: bool,
) -> Result<()> {
	log::debug!("save history for '{}' at ({}, {})", history_id, block_id, vtxindex);

	let prev_opcode = record_opcode(catalog, pre_record)?;
	let snapshot = snapshot || catalog.mutate_fields(prev_opcode)? == FieldSet::All;

	let payload = if snapshot {
		let mut payload = project(pre_record, catalog.consensus_fields(prev_opcode)?, prev_opcode)?;
		payload.insert(HISTORY_SNAPSHOT.to_string(), Value::Bool(true));
		payload
	} else {
		project(pre_record, catalog.backup_fields(opcode)?, opcode)?
	};

	append(conn, history_id, block_id, vtxindex, txid, &payload).await
}

fn project(record: &FieldMap, fields: &[&str], opcode: Opcode) -> Result<FieldMap> {
	let mut payload = FieldMap::new();
	let mut missing = Vec::new();
	for field in fields {
		match record.get(*field) {
			Some(value) => {
				payload.insert((*field).to_string(), value.clone());
			}
			None => missing.push(*field),
		}
	}
	if !missing.is_empty() {
		return Err(NamedbError::MissingFields { target: opcode.name().to_string(), fields: missing.join(",") });
	}
	Ok(payload)
}

/// Append one journal row.  The payload carries its own `op`/`txid`/
/// `vtxindex` (the *prior* values, not the new operation's).
async fn append(
	conn: &mut SqliteConnection,
	history_id: &str,
	block_id: u64,
	vtxindex: u32,
	txid: &str,
	payload: &FieldMap,
) -> Result<()> {
	let mut absent = Vec::new();
	for key in &["op", "txid", "vtxindex"] {
		if !payload.contains_key(*key) {
			absent.push(*key);
		}
	}
	if !absent.is_empty() {
		return Err(NamedbError::MissingFields {
			target: format!("history payload for '{}'", history_id),
			fields: absent.join(","),
		});
	}

	let op = payload
		.get("op")
		.and_then(Value::as_str)
		.ok_or_else(|| NamedbError::Invariant("history payload 'op' is not a string".to_string()))?;

	let mut row = FieldMap::new();
	row.insert("txid".to_string(), Value::from(txid));
	row.insert("history_id".to_string(), Value::from(history_id));
	row.insert("block_id".to_string(), Value::from(block_id));
	row.insert("vtxindex".to_string(), Value::from(vtxindex));
	row.insert("op".to_string(), Value::from(op));
	row.insert("history_data".to_string(), Value::from(serde_json::to_string(&Value::Object(payload.clone()))?));

	ops::insert(conn, HISTORY_TABLE, &row).await
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
	block_id: i64,
	history_data: String,
}

/// All history for a name or namespace, grouped by block, ordered by
/// `vtxindex` within a block.
pub async fn fetch(conn: &mut SqliteConnection, history_id: &str) -> Result<History> {
	let rows = sqlx::query_as::<_, HistoryRow>(
		"SELECT block_id, history_data FROM history WHERE history_id = ? ORDER BY block_id, vtxindex ASC",
	)
	.bind(history_id)
	.fetch_all(&mut *conn)
	.await?;
	extract(rows)
}

/// History restricted to blocks in `[start_block, end_block)`.
pub async fn fetch_range(
	conn: &mut SqliteConnection,
	history_id: &str,
	start_block: u64,
	end_block: u64,
) -> Result<History> {
	let rows = sqlx::query_as::<_, HistoryRow>(
		"SELECT block_id, history_data FROM history
		 WHERE history_id = ? AND block_id >= ? AND block_id < ?
		 ORDER BY block_id, vtxindex ASC",
	)
	.bind(history_id)
	.bind(start_block as i64)
	.bind(end_block as i64)
	.fetch_all(&mut *conn)
	.await?;
	extract(rows)
}

fn extract(rows: Vec<HistoryRow>) -> Result<History> {
	let mut history = History::new();
	for row in rows {
		let data = match serde_json::from_str(&row.history_data)? {
			Value::Object(fields) => fields,
			other => return Err(NamedbError::Invariant(format!("history payload is not an object: {}", other))),
		};
		let wire = data
			.get("op")
			.and_then(Value::as_str)
			.ok_or_else(|| NamedbError::Invariant("history payload is missing its 'op'".to_string()))?;
		let opcode = Opcode::from_wire(wire).ok_or_else(|| NamedbError::UnknownOpcode(wire.to_string()))?;
		history.entry(row.block_id as u64).or_insert_with(Vec::new).push(HistoryEntry { opcode, data });
	}
	Ok(history)
}
