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

//! Historical replay: walk a record's history diffs back in time to
//! reconstruct the sequence of states it occupied during any prior block.

use itertools::Itertools;
use serde_json::Value;
use sqlx::sqlite::SqliteConnection;

use crate::database::queries;
use crate::error::{NamedbError, Result};
use crate::history;
use crate::opcodes::{Opcode, OpcodeCatalog};
use crate::types::{FieldMap, History, HistoryEntry, HISTORY_SNAPSHOT};

/// Replay `record`'s history back to `block_id`.
///
/// Returns the sequence of states the record went through during that
/// block, in ascending `vtxindex` order: empty (`None`) if the record did
/// not exist yet, a singleton if it was created earlier and left unchanged.
/// The returned states carry no history of their own.
pub fn restore_from_history(
	catalog: &OpcodeCatalog,
	record: &FieldMap,
	history: &History,
	block_id: u64,
) -> Result<Option<Vec<FieldMap>>> {
	let mut state = record.clone();
	let blocks_desc: Vec<u64> = history.keys().rev().copied().collect();

	if blocks_desc.is_empty() {
		// a record with no history must itself be a complete snapshot
		history::is_snapshot_record(catalog, &state)?;
		return Ok(Some(vec![state]));
	}

	if block_id > blocks_desc[0] {
		// already past all recorded changes
		return Ok(Some(vec![state]));
	}

	let created = record
		.get("block_number")
		.and_then(Value::as_u64)
		.ok_or_else(|| NamedbError::Invariant("record has no block_number".to_string()))?;
	if block_id < created {
		return Ok(None);
	}

	// index of the latest history block at or before block_id
	let last_block = blocks_desc.iter().position(|&block| block_id >= block).unwrap_or_else(|| blocks_desc.len());

	// walk the later blocks in reverse chronological order
	for block in &blocks_desc[..last_block] {
		for entry in history[block].iter().rev() {
			apply(&mut state, entry);
		}
	}

	// `state` is now the record as of just after the last change in block
	// `blocks_desc[last_block]`; earlier entries of that same block yield
	// the in-block sequence
	let mut updates = vec![state.clone()];
	if last_block < blocks_desc.len() {
		let entries = &history[&blocks_desc[last_block]];
		if entries.len() > 1 {
			for entry in entries.iter().rev().take(entries.len() - 1) {
				apply(&mut state, entry);
				updates.push(state.clone());
			}
		}
	}

	updates.reverse();
	Ok(Some(updates))
}

/// Apply one history entry, walking backwards: a snapshot replaces the
/// state wholesale, a delta merges in but can never move `block_number`.
fn apply(state: &mut FieldMap, entry: &HistoryEntry) {
	if entry.is_snapshot() {
		*state = entry.data.clone();
		state.remove(HISTORY_SNAPSHOT);
	} else {
		for (field, value) in &entry.data {
			if field == "block_number" {
				continue;
			}
			state.insert(field.clone(), value.clone());
		}
	}
}

async fn restore_rows(
	conn: &mut SqliteConnection,
	catalog: &OpcodeCatalog,
	rows: Vec<FieldMap>,
	id_field: &str,
	block_id: u64,
) -> Result<Vec<FieldMap>> {
	let mut restored = Vec::new();
	for row in rows {
		let id = row
			.get(id_field)
			.and_then(Value::as_str)
			.ok_or_else(|| NamedbError::Invariant(format!("row has no '{}'", id_field)))?
			.to_string();
		let row_history = history::fetch(conn, &id).await?;
		if let Some(states) = restore_from_history(catalog, &row, &row_history, block_id)? {
			restored.extend(states);
		}
	}
	Ok(restored)
}

/// Every name, namespace and preorder state that was current during
/// `block_id`, in ascending `vtxindex` order.
pub async fn get_all_records_at(
	conn: &mut SqliteConnection,
	catalog: &OpcodeCatalog,
	block_id: u64,
) -> Result<Vec<FieldMap>> {
	let block = Value::from(block_id);
	let mut all = Vec::new();

	// name records preordered or registered for the first time at this block
	let rows = queries::select_fields(
		conn,
		"SELECT * FROM name_records WHERE block_number = ? OR preorder_block_number = ?",
		&[block.clone(), block.clone()],
	)
	.await?;
	let states = restore_rows(conn, catalog, rows, "name", block_id).await?;
	log::debug!("{} name-preorder states at {}", states.len(), block_id);
	all.extend(states);

	// name records otherwise touched at this block
	let rows = queries::select_fields(
		conn,
		"SELECT name_records.* FROM name_records JOIN history ON name_records.name = history.history_id \
		 WHERE name_records.block_number < ? AND name_records.preorder_block_number != ? AND history.block_id = ? \
		 GROUP BY name_records.name",
		&[block.clone(), block.clone(), block.clone()],
	)
	.await?;
	let states = restore_rows(conn, catalog, rows, "name", block_id).await?;
	log::debug!("{} name-change states at {}", states.len(), block_id);
	all.extend(states);

	// outstanding preorders created at this block
	let rows =
		queries::select_fields(conn, "SELECT * FROM preorders WHERE block_number = ?", &[block.clone()]).await?;
	log::debug!("{} preorders created at {}", rows.len(), block_id);
	all.extend(rows);

	// namespaces revealed at this block
	let rows =
		queries::select_fields(conn, "SELECT * FROM namespaces WHERE block_number = ?", &[block.clone()]).await?;
	let states = restore_rows(conn, catalog, rows, "namespace_id", block_id).await?;
	log::debug!("{} namespace-reveal states at {}", states.len(), block_id);
	all.extend(states);

	// namespaces revealed earlier and touched at this block
	let rows = queries::select_fields(
		conn,
		"SELECT namespaces.* FROM namespaces JOIN history ON namespaces.namespace_id = history.history_id \
		 WHERE namespaces.block_number < ? AND history.block_id = ? AND (namespaces.op = ? OR namespaces.op = ?) \
		 GROUP BY namespaces.namespace_id",
		&[
			block.clone(),
			block,
			Value::from(Opcode::NamespaceReveal.wire()),
			Value::from(Opcode::NamespaceReady.wire()),
		],
	)
	.await?;
	let states = restore_rows(conn, catalog, rows, "namespace_id", block_id).await?;
	log::debug!("{} namespace-change states at {}", states.len(), block_id);
	all.extend(states);

	Ok(all
		.into_iter()
		.sorted_by_key(|state| state.get("vtxindex").and_then(Value::as_u64).unwrap_or(0))
		.collect())
}
