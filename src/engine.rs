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

//! The state-machine engine: the single writer over the name set.
//!
//! The block-ingestion driver calls `begin_block`, applies its operations in
//! ascending `vtxindex`, then `commit_block`.  All writes of a block share
//! one transaction.  Operation payloads carry every mutate field of their
//! opcode; any additional payload field acts as an equality guard on the
//! current row.  A failed operation latches the engine into a faulted state
//! and the block must be aborted before anything else is written.

use serde_json::Value;
use sqlx::sqlite::SqliteConnection;

use crate::database::{queries, Database, PREORDERS_TABLE};
use crate::error::{NamedbError, Result};
use crate::history;
use crate::opcodes::{Entity, FieldSet, Opcode, OpcodeCatalog};
use crate::types::{FieldMap, History, HISTORY_SNAPSHOT};
use crate::util;

pub struct StateEngine {
	conn: SqliteConnection,
	catalog: OpcodeCatalog,
	/// Last applied `(block_id, vtxindex)`, including within the open block.
	cursor: Option<(u64, u32)>,
	cursor_at_begin: Option<(u64, u32)>,
	/// Last committed block.
	last_block: Option<u64>,
	block: Option<u64>,
	faulted: bool,
}

impl StateEngine {
	/// Attach a writer to the database with the given opcode catalog.
	pub async fn new(db: &Database, catalog: OpcodeCatalog) -> Result<Self> {
		Ok(Self {
			conn: db.writer().await?,
			catalog,
			cursor: None,
			cursor_at_begin: None,
			last_block: None,
			block: None,
			faulted: false,
		})
	}

	pub fn catalog(&self) -> &OpcodeCatalog {
		&self.catalog
	}

	pub fn is_faulted(&self) -> bool {
		self.faulted
	}

	pub fn last_applied(&self) -> Option<(u64, u32)> {
		self.cursor
	}

	/// Open the transaction for `block_id`.  Blocks must arrive in strictly
	/// increasing order.
	pub async fn begin_block(&mut self, block_id: u64) -> Result<()> {
		self.guard()?;
		if let Some(open) = self.block {
			return Err(NamedbError::BlockOpen(open));
		}
		if let Some(last) = self.last_block {
			if block_id <= last {
				return Err(NamedbError::BlockOutOfOrder { block_id, last_block_id: last });
			}
		}
		sqlx::query("BEGIN").execute(&mut self.conn).await?;
		self.block = Some(block_id);
		log::debug!("begin block {}", block_id);
		Ok(())
	}

	/// Commit everything applied since `begin_block` atomically.
	pub async fn commit_block(&mut self) -> Result<()> {
		self.guard()?;
		let block = self.block.ok_or(NamedbError::NotInBlock)?;
		match sqlx::query("COMMIT").execute(&mut self.conn).await {
			Ok(_) => {
				self.block = None;
				self.last_block = Some(block);
				self.cursor_at_begin = self.cursor;
				log::debug!("commit block {}", block);
				Ok(())
			}
			Err(e) => {
				self.faulted = true;
				Err(e.into())
			}
		}
	}

	/// Roll the open block back wholly and clear the fault latch.
	pub async fn abort_block(&mut self) -> Result<()> {
		let block = self.block.ok_or(NamedbError::NotInBlock)?;
		sqlx::query("ROLLBACK").execute(&mut self.conn).await?;
		self.block = None;
		self.cursor = self.cursor_at_begin;
		self.faulted = false;
		log::warn!("aborted block {}", block);
		Ok(())
	}

	/// Admit a name or namespace preorder.  The payload must carry the
	/// committed `preorder_hash`; a duplicate hash is refused by the table's
	/// unique key.
	pub async fn preorder(&mut self, op_data: &FieldMap, block_id: u64, vtxindex: u32, txid: &str) -> Result<()> {
		self.guard()?;
		let res = self.preorder_inner(op_data, block_id, vtxindex, txid).await;
		self.latch(res)
	}

	/// Create a name or namespace from its preorder: record the preorder as
	/// the first history entry, insert the live row, and consume the
	/// preorder.  Excludes imports.
	#[allow(clippy::too_many_arguments)]
	pub async fn state_create(
		&mut self,
		opcode: Opcode,
		new_record: &FieldMap,
		block_id: u64,
		vtxindex: u32,
		txid: &str,
		history_id: &str,
		preorder: &FieldMap,
	) -> Result<()> {
		self.guard()?;
		let res = self.state_create_inner(opcode, new_record, block_id, vtxindex, txid, history_id, preorder).await;
		self.latch(res)
	}

	/// Apply a post-creation transition to an existing record: journal the
	/// prior values of the opcode's backup fields, then update the live row.
	///
	/// `only_if` appends extra predicates to the update; `constraints_ignored`
	/// lists non-mutate fields the protocol explicitly allows to drift.
	#[allow(clippy::too_many_arguments)]
	pub async fn state_transition(
		&mut self,
		opcode: Opcode,
		op_data: &FieldMap,
		block_id: u64,
		vtxindex: u32,
		txid: &str,
		history_id: &str,
		cur_record: &FieldMap,
		only_if: &FieldMap,
		constraints_ignored: &[&str],
	) -> Result<()> {
		self.guard()?;
		let res = self
			.state_transition_inner(
				opcode,
				op_data,
				block_id,
				vtxindex,
				txid,
				history_id,
				cur_record,
				only_if,
				constraints_ignored,
			)
			.await;
		self.latch(res)
	}

	/// Create or overwrite a name by import, bypassing the preorder flow.
	/// Each import payload is a full snapshot in its own right.
	#[allow(clippy::too_many_arguments)]
	pub async fn state_create_as_import(
		&mut self,
		opcode: Opcode,
		new_record: &FieldMap,
		block_id: u64,
		vtxindex: u32,
		txid: &str,
		history_id: &str,
		prior_import: Option<&FieldMap>,
	) -> Result<()> {
		self.guard()?;
		let res = self
			.state_create_as_import_inner(opcode, new_record, block_id, vtxindex, txid, history_id, prior_import)
			.await;
		self.latch(res)
	}

	/// Re-create a previously expired name or namespace: re-anchor the last
	/// snapshot of its prior incarnation at the preorder's point in time,
	/// journal the preorder, and overwrite the surviving row.
	#[allow(clippy::too_many_arguments)]
	pub async fn state_create_from_prior_history(
		&mut self,
		opcode: Opcode,
		new_record: &FieldMap,
		block_id: u64,
		vtxindex: u32,
		txid: &str,
		history_id: &str,
		prior_history: &History,
		preorder: &FieldMap,
	) -> Result<()> {
		self.guard()?;
		let res = self
			.state_create_from_prior_history_inner(
				opcode,
				new_record,
				block_id,
				vtxindex,
				txid,
				history_id,
				prior_history,
				preorder,
			)
			.await;
		self.latch(res)
	}

	fn guard(&self) -> Result<()> {
		if self.faulted {
			Err(NamedbError::Faulted)
		} else {
			Ok(())
		}
	}

	fn latch<T>(&mut self, res: Result<T>) -> Result<T> {
		if res.is_err() {
			self.faulted = true;
		}
		res
	}

	/// Enforce `(block_id, vtxindex)` strictly ascending, inside the open
	/// block.
	fn advance(&mut self, block_id: u64, vtxindex: u32) -> Result<()> {
		match self.block {
			Some(open) if open == block_id => {}
			Some(open) => {
				return Err(NamedbError::Invariant(format!(
					"operation at block {} inside open block {}",
					block_id, open
				)))
			}
			None => return Err(NamedbError::NotInBlock),
		}
		if let Some((last_block, last_vtxindex)) = self.cursor {
			if (block_id, vtxindex) <= (last_block, last_vtxindex) {
				return Err(NamedbError::OutOfOrder {
					block_id,
					vtxindex,
					last_block_id: last_block,
					last_vtxindex,
				});
			}
		}
		self.cursor = Some((block_id, vtxindex));
		Ok(())
	}

	async fn preorder_inner(
		&mut self,
		op_data: &FieldMap,
		block_id: u64,
		vtxindex: u32,
		txid: &str,
	) -> Result<()> {
		self.advance(block_id, vtxindex)?;

		let opcode = history::record_opcode(&self.catalog, op_data)?;
		if !self.catalog.is_preorder(opcode)? {
			return Err(NamedbError::Invariant(format!("'{}' is not a preorder operation", opcode)));
		}
		let hash = op_data
			.get("preorder_hash")
			.and_then(Value::as_str)
			.ok_or_else(|| NamedbError::Invariant("preorder payload has no preorder_hash".to_string()))?;

		log::debug!("preorder '{}' at ({}, {}) txid {}", hash, block_id, vtxindex, txid);
		crate::database::ops::insert(&mut self.conn, PREORDERS_TABLE, op_data).await
	}

	#[allow(clippy::too_many_arguments)]
	async fn state_create_inner(
		&mut self,
		opcode: Opcode,
		new_record: &FieldMap,
		block_id: u64,
		vtxindex: u32,
		txid: &str,
		history_id: &str,
		preorder: &FieldMap,
	) -> Result<()> {
		self.advance(block_id, vtxindex)?;

		if !self.catalog.is_creation(opcode)? {
			return Err(NamedbError::Invariant(format!("'{}' is not a state-creating operation", opcode)));
		}
		let preorder_hash = preorder
			.get("preorder_hash")
			.and_then(Value::as_str)
			.ok_or_else(|| NamedbError::Invariant("preorder record has no preorder_hash".to_string()))?
			.to_string();

		self.op_sanity_check(opcode, new_record, preorder)?;

		// the preorder must belong to the matching preorder class
		let preorder_opcode = history::record_opcode(&self.catalog, preorder)?;
		let entity = self.catalog.entity(opcode)?;
		if !self.catalog.is_preorder(preorder_opcode)? || self.catalog.entity(preorder_opcode)? != entity {
			return Err(NamedbError::Invariant(format!(
				"'{}' preorder cannot create '{}'",
				preorder_opcode, opcode
			)));
		}
		self.mutation_sanity_check(opcode, new_record)?;

		log::debug!("create '{}' from preorder '{}' at ({}, {})", history_id, preorder_hash, block_id, vtxindex);

		history::save(&mut self.conn, &self.catalog, opcode, history_id, block_id, vtxindex, txid, preorder, false)
			.await?;

		let record = self.complete_record(opcode, new_record)?;
		crate::database::ops::insert(&mut self.conn, entity.table(), &record).await?;
		crate::database::ops::delete(&mut self.conn, PREORDERS_TABLE, "preorder_hash", &Value::from(preorder_hash))
			.await
	}

	#[allow(clippy::too_many_arguments)]
	async fn state_transition_inner(
		&mut self,
		opcode: Opcode,
		op_data: &FieldMap,
		block_id: u64,
		vtxindex: u32,
		txid: &str,
		history_id: &str,
		cur_record: &FieldMap,
		only_if: &FieldMap,
		constraints_ignored: &[&str],
	) -> Result<()> {
		self.advance(block_id, vtxindex)?;

		if !self.catalog.is_transition(opcode)? {
			return Err(NamedbError::Invariant(format!("'{}' is not a state-transition operation", opcode)));
		}
		self.op_sanity_check(opcode, op_data, cur_record)?;

		// the history ID must name the current record
		let entity = self.catalog.entity(opcode)?;
		match cur_record.get(entity.id_field()).and_then(Value::as_str) {
			Some(id) if id == history_id => {}
			_ => {
				return Err(NamedbError::Invariant(format!(
					"history ID '{}' does not name the current record",
					history_id
				)))
			}
		}
		self.mutation_sanity_check(opcode, op_data)?;

		log::debug!("transition '{}' via {} at ({}, {})", history_id, opcode, block_id, vtxindex);

		history::save(&mut self.conn, &self.catalog, opcode, history_id, block_id, vtxindex, txid, cur_record, false)
			.await?;

		let mut payload = op_data.clone();
		payload.insert(entity.id_field().to_string(), Value::from(history_id));
		self.update_record(opcode, &payload, only_if, constraints_ignored).await
	}

	#[allow(clippy::too_many_arguments)]
	async fn state_create_as_import_inner(
		&mut self,
		opcode: Opcode,
		new_record: &FieldMap,
		block_id: u64,
		vtxindex: u32,
		txid: &str,
		history_id: &str,
		prior_import: Option<&FieldMap>,
	) -> Result<()> {
		self.advance(block_id, vtxindex)?;

		if !self.catalog.is_import(opcode)? {
			return Err(NamedbError::Invariant(format!("'{}' is not a state-importing operation", opcode)));
		}
		if self.catalog.entity(opcode)? != Entity::Name {
			return Err(NamedbError::Invariant(format!("'{}' does not import a name", opcode)));
		}

		// each import payload is a full snapshot in its own right
		history::is_snapshot_record(&self.catalog, new_record)?;
		self.op_sanity_check(opcode, new_record, new_record)?;
		self.mutation_sanity_check(opcode, new_record)?;

		let exists = queries::get_name(&mut self.conn, history_id, block_id, false, false).await?.is_some();

		match prior_import {
			None => {
				if exists {
					return Err(NamedbError::Invariant(format!(
						"cannot import existing name '{}' without its prior import",
						history_id
					)));
				}
				log::debug!("import '{}' at ({}, {})", history_id, block_id, vtxindex);

				let mut dup = new_record.clone();
				dup.insert(HISTORY_SNAPSHOT.to_string(), Value::Bool(true));
				history::save(&mut self.conn, &self.catalog, opcode, history_id, block_id, vtxindex, txid, &dup, true)
					.await?;

				let record = self.complete_record(opcode, new_record)?;
				crate::database::ops::insert(&mut self.conn, Entity::Name.table(), &record).await
			}
			Some(prior) => {
				if !exists {
					return Err(NamedbError::Invariant(format!(
						"cannot overwrite missing import '{}'",
						history_id
					)));
				}
				match prior.get("name").and_then(Value::as_str) {
					Some(name) if name == history_id => {}
					_ => {
						return Err(NamedbError::Invariant(format!(
							"prior import is not for name '{}'",
							history_id
						)))
					}
				}
				let prior_block = prior
					.get("block_number")
					.and_then(Value::as_u64)
					.ok_or_else(|| NamedbError::Invariant("prior import has no block_number".to_string()))?;
				let prior_vtxindex = prior
					.get("vtxindex")
					.and_then(Value::as_u64)
					.ok_or_else(|| NamedbError::Invariant("prior import has no vtxindex".to_string()))?;
				if (prior_block, prior_vtxindex) >= (block_id, u64::from(vtxindex)) {
					return Err(NamedbError::Invariant(format!(
						"prior import of '{}' does not precede ({}, {})",
						history_id, block_id, vtxindex
					)));
				}
				log::debug!("re-import '{}' at ({}, {})", history_id, block_id, vtxindex);

				history::save(&mut self.conn, &self.catalog, opcode, history_id, block_id, vtxindex, txid, prior, false)
					.await?;

				let mut payload = new_record.clone();
				payload.insert("name".to_string(), Value::from(history_id));
				self.update_record(opcode, &payload, &FieldMap::new(), &[]).await
			}
		}
	}

	#[allow(clippy::too_many_arguments)]
	async fn state_create_from_prior_history_inner(
		&mut self,
		opcode: Opcode,
		new_record: &FieldMap,
		block_id: u64,
		vtxindex: u32,
		txid: &str,
		history_id: &str,
		prior_history: &History,
		preorder: &FieldMap,
	) -> Result<()> {
		self.advance(block_id, vtxindex)?;

		if !self.catalog.is_creation(opcode)? {
			return Err(NamedbError::Invariant(format!("'{}' is not a state-creating operation", opcode)));
		}

		let preorder_hash = preorder
			.get("preorder_hash")
			.and_then(Value::as_str)
			.ok_or_else(|| NamedbError::Invariant("preorder record has no preorder_hash".to_string()))?
			.to_string();
		let preorder_block = preorder
			.get("block_number")
			.and_then(Value::as_u64)
			.ok_or_else(|| NamedbError::Invariant("preorder has no block_number".to_string()))?;
		let preorder_vtxindex = preorder
			.get("vtxindex")
			.and_then(Value::as_u64)
			.ok_or_else(|| NamedbError::Invariant("preorder has no vtxindex".to_string()))?;
		let preorder_txid = preorder
			.get("txid")
			.and_then(Value::as_str)
			.ok_or_else(|| NamedbError::Invariant("preorder has no txid".to_string()))?
			.to_string();

		// the prior incarnation must have left a true snapshot at the
		// preorder's block
		let last = prior_history
			.get(&preorder_block)
			.and_then(|entries| entries.last())
			.ok_or_else(|| NamedbError::Invariant(format!("no history snapshot at {}", preorder_block)))?;
		if !last.is_snapshot() {
			return Err(NamedbError::Invariant(format!(
				"history at {} does not end in a snapshot",
				preorder_block
			)));
		}
		history::is_snapshot_record(&self.catalog, &last.data)?;
		self.mutation_sanity_check(opcode, new_record)?;

		log::debug!("re-create '{}' from prior history at ({}, {})", history_id, block_id, vtxindex);

		// re-anchor the snapshot at the preorder's point in time, then
		// journal the preorder at the current point
		history::save(
			&mut self.conn,
			&self.catalog,
			opcode,
			history_id,
			preorder_block,
			preorder_vtxindex as u32,
			&preorder_txid,
			&last.data,
			true,
		)
		.await?;
		history::save(&mut self.conn, &self.catalog, opcode, history_id, block_id, vtxindex, txid, preorder, false)
			.await?;

		// the row survives from the prior incarnation: overwrite it
		let entity = self.catalog.entity(opcode)?;
		let mut payload = new_record.clone();
		payload.insert(entity.id_field().to_string(), Value::from(history_id));
		self.update_record(opcode, &payload, &FieldMap::new(), &[]).await?;

		crate::database::ops::delete(&mut self.conn, PREORDERS_TABLE, "preorder_hash", &Value::from(preorder_hash))
			.await
	}

	/// The opcode must agree with its payload (modulo shared wire codes, as
	/// with register/renew), and the sequence graph must allow
	/// `record.op -> opcode`.
	fn op_sanity_check(&self, opcode: Opcode, op_data: &FieldMap, record: &FieldMap) -> Result<()> {
		let data_opcode = history::record_opcode(&self.catalog, op_data)?;
		let cur_opcode = history::record_opcode(&self.catalog, record)?;

		if data_opcode != opcode && data_opcode.wire() != opcode.wire() {
			return Err(NamedbError::Invariant(format!(
				"operation data is for '{}', not '{}'",
				data_opcode, opcode
			)));
		}
		if !self.catalog.allowed_next(cur_opcode, opcode)? {
			return Err(NamedbError::IllegalTransition {
				from: cur_opcode.name().to_string(),
				to: opcode.name().to_string(),
			});
		}
		Ok(())
	}

	/// Every mutate field of the opcode must be present in the payload, even
	/// if null.  `All`-mutate opcodes are covered by the insert's
	/// full-coverage rule instead.
	fn mutation_sanity_check(&self, opcode: Opcode, op_data: &FieldMap) -> Result<()> {
		if let FieldSet::Fields(fields) = self.catalog.mutate_fields(opcode)? {
			let missing: Vec<&str> = fields.iter().filter(|field| !op_data.contains_key(**field)).copied().collect();
			if !missing.is_empty() {
				return Err(NamedbError::MissingFields {
					target: opcode.name().to_string(),
					fields: missing.join(","),
				});
			}
		}
		Ok(())
	}

	/// Fill in the derived name fields, or encode the namespace buckets,
	/// depending on the opcode's entity.
	fn complete_record(&self, opcode: Opcode, record: &FieldMap) -> Result<FieldMap> {
		let mut record = record.clone();
		match self.catalog.entity(opcode)? {
			Entity::Name => {
				let name = record
					.get("name")
					.and_then(Value::as_str)
					.ok_or_else(|| NamedbError::Invariant("name record has no name".to_string()))?
					.to_string();
				if !record.contains_key("namespace_id") {
					record.insert("namespace_id".to_string(), Value::from(util::namespace_from_name(&name)));
				}
				if !record.contains_key("name_hash128") {
					record.insert("name_hash128".to_string(), Value::from(util::hash256_trunc128(&name)));
				}
			}
			Entity::Namespace => {
				if !record.contains_key("namespace_id") {
					return Err(NamedbError::Invariant("namespace record has no ID".to_string()));
				}
				// price buckets are JSON-encoded text on disk; transitions
				// that don't touch them simply omit the field
				if let Some(Value::Array(buckets)) = record.get("buckets") {
					let text = serde_json::to_string(&Value::Array(buckets.clone()))?;
					record.insert("buckets".to_string(), Value::from(text));
				}
			}
		}
		Ok(record)
	}

	/// Update the live row: pin every non-mutate payload field (and the
	/// entity's ID) in the WHERE clause, minus `constraints_ignored`.
	async fn update_record(
		&mut self,
		opcode: Opcode,
		op_data: &FieldMap,
		only_if: &FieldMap,
		constraints_ignored: &[&str],
	) -> Result<()> {
		let entity = self.catalog.entity(opcode)?;
		let id_field = entity.id_field();

		let record = self.complete_record(opcode, op_data)?;
		let mutate = self.catalog.mutate_fields(opcode)?;

		if let FieldSet::Fields(fields) = mutate {
			if fields.contains(&id_field) {
				return Err(NamedbError::Invariant(format!("'{}' is a mutate field of '{}'", id_field, opcode)));
			}
		}

		let mut must_equal: Vec<String> = match mutate {
			FieldSet::All => Vec::new(),
			FieldSet::Fields(fields) => {
				record.keys().filter(|key| !fields.contains(&key.as_str())).cloned().collect()
			}
		};
		if !must_equal.iter().any(|field| field == id_field) {
			must_equal.push(id_field.to_string());
		}
		must_equal.retain(|field| !constraints_ignored.contains(&field.as_str()));

		crate::database::ops::update(&mut self.conn, entity.table(), id_field, &record, &must_equal, only_if).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test::*;

	fn op_payload(pairs: &[(&str, Value)]) -> FieldMap {
		let mut payload = FieldMap::new();
		for (key, value) in pairs {
			payload.insert(key.to_string(), value.clone());
		}
		payload
	}

	#[tokio::test]
	async fn namespace_lifecycle() {
		let (_dir, db, mut engine) = setup().await;

		establish_namespace(&mut engine, "test", 100, 110, 120, 520000, 10).await;

		let mut conn = db.conn().await.unwrap();
		let namespace = queries::get_namespace(&mut conn, "test", 120, true).await.unwrap().unwrap();
		assert_eq!(namespace.record.op, Opcode::NamespaceReady.wire());
		assert_eq!(namespace.record.ready_block, 120);
		assert_eq!(namespace.record.reveal_block, 110);
		assert_eq!(namespace.record.buckets, vec![6, 5, 4, 3, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

		// the reveal journaled the preorder; the ready journaled the reveal
		let history = namespace.history.unwrap();
		let blocks: Vec<u64> = history.keys().copied().collect();
		assert_eq!(blocks, vec![110, 120]);

		let reveal_entry = &history.get(&110).unwrap()[0];
		assert!(reveal_entry.is_snapshot());
		assert_eq!(reveal_entry.opcode, Opcode::NamespacePreorder);
		assert_eq!(reveal_entry.data.get("block_number"), Some(&Value::from(100)));

		let ready_entry = &history.get(&120).unwrap()[0];
		assert!(ready_entry.is_snapshot());
		assert_eq!(ready_entry.opcode, Opcode::NamespaceReveal);
		assert_eq!(ready_entry.data.get("reveal_block"), Some(&Value::from(110)));

		// discriminated lookups
		assert!(queries::get_namespace_ready(&mut conn, "test", false).await.unwrap().is_some());
		assert!(queries::get_namespace_reveal(&mut conn, "test", 120, false).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn reveal_window_gates_the_namespace() {
		let (_dir, db, mut engine) = setup().await;

		let preorder = namespace_preorder("idle", 100, 3, 10);
		engine.begin_block(100).await.unwrap();
		engine.preorder(&preorder.to_fields().unwrap(), 100, 3, &preorder.txid).await.unwrap();
		engine.commit_block().await.unwrap();

		let namespace = namespace_record("idle", &preorder, 110, 1000, 4, 11);
		engine.begin_block(110).await.unwrap();
		engine
			.state_create(
				Opcode::NamespaceReveal,
				&namespace.to_fields().unwrap(),
				110,
				4,
				&namespace.txid,
				"idle",
				&preorder.to_fields().unwrap(),
			)
			.await
			.unwrap();
		engine.commit_block().await.unwrap();

		let mut conn = db.conn().await.unwrap();
		assert!(queries::get_namespace_reveal(&mut conn, "idle", 110, false).await.unwrap().is_some());
		assert!(queries::get_namespace(&mut conn, "idle", 115, false).await.unwrap().is_some());
		// never readied: the reveal lapses after NAMESPACE_REVEAL_EXPIRE
		let lapsed = 110 + crate::NAMESPACE_REVEAL_EXPIRE;
		assert!(queries::get_namespace(&mut conn, "idle", lapsed, false).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn name_registration_consumes_the_preorder() {
		let (_dir, db, mut engine) = setup().await;

		let namespace = establish_namespace(&mut engine, "test", 100, 110, 120, 520000, 10).await;
		let record = register_name(&mut engine, "test.test", &namespace, 373601, 373610, 20).await;

		let mut conn = db.conn().await.unwrap();
		let name = queries::get_name(&mut conn, "test.test", 373610, false, true).await.unwrap().unwrap();
		assert_eq!(name.record.first_registered, 373610);
		assert_eq!(name.record.last_renewed, 373610);
		assert!(!name.record.revoked);
		assert_eq!(name.record.value_hash, None);

		// the preorder row is gone
		let row = sqlx::query("SELECT COUNT(*) AS count FROM preorders")
			.fetch_one(&mut *conn)
			.await
			.unwrap();
		let count: i64 = sqlx::Row::try_get(&row, "count").unwrap();
		assert_eq!(count, 0);
		assert!(queries::get_name_preorder(&mut conn, &record.preorder_hash, 373610).await.unwrap().is_none());

		// one history entry, at the applied block, holding the preorder
		let history = name.history.unwrap();
		let blocks: Vec<u64> = history.keys().copied().collect();
		assert_eq!(blocks, vec![373610]);
		let entry = &history.get(&373610).unwrap()[0];
		assert!(entry.is_snapshot());
		assert_eq!(entry.opcode, Opcode::NamePreorder);
		assert_eq!(entry.data.get("block_number"), Some(&Value::from(373601)));
	}

	#[tokio::test]
	async fn update_changes_only_its_mutate_fields() {
		let (_dir, db, mut engine) = setup().await;

		let namespace = establish_namespace(&mut engine, "test", 100, 110, 120, 520000, 10).await;
		register_name(&mut engine, "test.test", &namespace, 373601, 373610, 20).await;

		let mut conn = db.conn().await.unwrap();
		let before = queries::get_name(&mut conn, "test.test", 373610, false, false).await.unwrap().unwrap();

		let update = op_payload(&[
			("op", Opcode::NameUpdate.wire().into()),
			("txid", txid(30).into()),
			("vtxindex", 4u32.into()),
			("op_fee", 6140u32.into()),
			("value_hash", Value::from("11".repeat(20))),
			("consensus_hash", Value::from("4017d71d6c5e87c9efe8633f1dc1c425")),
		]);
		engine.begin_block(373701).await.unwrap();
		engine
			.state_transition(
				Opcode::NameUpdate,
				&update,
				373701,
				4,
				&txid(30),
				"test.test",
				&before.record.to_fields().unwrap(),
				&FieldMap::new(),
				&[],
			)
			.await
			.unwrap();
		engine.commit_block().await.unwrap();

		let after = queries::get_name(&mut conn, "test.test", 373701, false, false).await.unwrap().unwrap();
		assert_eq!(after.record.value_hash.as_deref(), Some("11".repeat(20).as_str()));
		assert_eq!(after.record.consensus_hash.as_deref(), Some("4017d71d6c5e87c9efe8633f1dc1c425"));

		// everything outside the mutate set stayed put
		let before_fields = before.record.to_fields().unwrap();
		let after_fields = after.record.to_fields().unwrap();
		let mutate = engine.catalog().backup_fields(Opcode::NameUpdate).unwrap();
		for (field, value) in &before_fields {
			if !mutate.contains(&field.as_str()) {
				assert_eq!(after_fields.get(field), Some(value), "field {} drifted", field);
			}
		}
	}

	#[tokio::test]
	async fn illegal_transition_leaves_no_trace_and_faults_the_engine() {
		let (_dir, db, mut engine) = setup().await;

		establish_namespace(&mut engine, "test", 100, 110, 120, 520000, 10).await;

		// only a preorder exists; an update cannot follow it
		let preorder = name_preorder("fail.test", 373601, 20, 40);
		engine.begin_block(373601).await.unwrap();
		engine.preorder(&preorder.to_fields().unwrap(), 373601, 20, &preorder.txid).await.unwrap();
		engine.commit_block().await.unwrap();

		let update = op_payload(&[
			("op", Opcode::NameUpdate.wire().into()),
			("txid", txid(41).into()),
			("vtxindex", 1u32.into()),
			("op_fee", 1u32.into()),
			("value_hash", Value::from("22".repeat(20))),
			("consensus_hash", Value::from(CONSENSUS_HASH)),
		]);
		engine.begin_block(373602).await.unwrap();
		let err = engine
			.state_transition(
				Opcode::NameUpdate,
				&update,
				373602,
				1,
				&txid(41),
				"fail.test",
				&preorder.to_fields().unwrap(),
				&FieldMap::new(),
				&[],
			)
			.await
			.unwrap_err();
		match err {
			NamedbError::IllegalTransition { from, to } => {
				assert_eq!(from, "NAME_PREORDER");
				assert_eq!(to, "NAME_UPDATE");
			}
			other => panic!("expected IllegalTransition, got {:?}", other),
		}

		// the engine refuses further writes until the block is aborted
		assert!(engine.is_faulted());
		assert!(matches!(engine.commit_block().await, Err(NamedbError::Faulted)));
		engine.abort_block().await.unwrap();
		assert!(!engine.is_faulted());

		// no history entry, and the preorder is untouched
		let mut conn = db.conn().await.unwrap();
		assert!(history::fetch(&mut conn, "fail.test").await.unwrap().is_empty());
		assert!(queries::get_name_preorder(&mut conn, &preorder.preorder_hash, 373602).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn reregistration_after_expiry_keeps_the_old_row() {
		let (_dir, db, mut engine) = setup().await;

		// short-lived namespace: lifetime 100 blocks
		let namespace = establish_namespace(&mut engine, "ns", 100, 110, 120, 100, 10).await;
		register_name(&mut engine, "foo.ns", &namespace, 1000, 1000, 20).await;

		let mut conn = db.conn().await.unwrap();
		assert!(queries::get_name(&mut conn, "foo.ns", 1050, false, false).await.unwrap().is_some());
		assert!(queries::get_name(&mut conn, "foo.ns", 1101, false, false).await.unwrap().is_none());

		// preorder + registration again, in one block
		register_name(&mut engine, "foo.ns", &namespace, 1200, 1200, 30).await;

		let name = queries::get_name(&mut conn, "foo.ns", 1201, false, false).await.unwrap().unwrap();
		assert_eq!(name.record.block_number, 1200);
		assert_eq!(name.record.first_registered, 1200);

		// the prior incarnation survives
		let row = sqlx::query("SELECT COUNT(*) AS count FROM name_records WHERE name = 'foo.ns'")
			.fetch_one(&mut *conn)
			.await
			.unwrap();
		let count: i64 = sqlx::Row::try_get(&row, "count").unwrap();
		assert_eq!(count, 2);
	}

	#[tokio::test]
	async fn imports_bypass_the_preorder_flow() {
		let (_dir, db, mut engine) = setup().await;

		// imports happen while the namespace is still revealed
		let preorder = namespace_preorder("imports", 100, 3, 10);
		engine.begin_block(100).await.unwrap();
		engine.preorder(&preorder.to_fields().unwrap(), 100, 3, &preorder.txid).await.unwrap();
		engine.commit_block().await.unwrap();

		let namespace = namespace_record("imports", &preorder, 110, 520000, 4, 11);
		engine.begin_block(110).await.unwrap();
		engine
			.state_create(
				Opcode::NamespaceReveal,
				&namespace.to_fields().unwrap(),
				110,
				4,
				&namespace.txid,
				"imports",
				&preorder.to_fields().unwrap(),
			)
			.await
			.unwrap();
		engine.commit_block().await.unwrap();

		let mut import = name_record("imp.imports", &namespace, &name_preorder("imp.imports", 130, 2, 50), 130, 2, 51);
		import.op = Opcode::NameImport.wire().to_string();
		import.block_number = 130;
		import.preorder_block_number = 130;
		import.first_registered = 130;
		import.last_renewed = 130;
		import.importer = Some(NAMESPACE_SENDER.to_string());
		import.importer_address = Some(NAMESPACE_ADDRESS.to_string());

		engine.begin_block(130).await.unwrap();
		engine
			.state_create_as_import(
				Opcode::NameImport,
				&import.to_fields().unwrap(),
				130,
				2,
				&import.txid,
				"imp.imports",
				None,
			)
			.await
			.unwrap();
		engine.commit_block().await.unwrap();

		let mut conn = db.conn().await.unwrap();
		let name = queries::get_name(&mut conn, "imp.imports", 130, false, true).await.unwrap().unwrap();
		assert_eq!(name.record.op, Opcode::NameImport.wire());
		let history = name.history.unwrap();
		assert!(history.get(&130).unwrap()[0].is_snapshot());

		// a second import overwrites the first
		let mut reimport = import.clone();
		reimport.value_hash = Some("33".repeat(20));
		reimport.txid = txid(52);
		reimport.vtxindex = 5;
		reimport.block_number = 131;

		engine.begin_block(131).await.unwrap();
		engine
			.state_create_as_import(
				Opcode::NameImport,
				&reimport.to_fields().unwrap(),
				131,
				5,
				&reimport.txid,
				"imp.imports",
				Some(&import.to_fields().unwrap()),
			)
			.await
			.unwrap();
		engine.commit_block().await.unwrap();

		let name = queries::get_name(&mut conn, "imp.imports", 131, false, false).await.unwrap().unwrap();
		assert_eq!(name.record.value_hash.as_deref(), Some("33".repeat(20).as_str()));
		assert_eq!(name.record.block_number, 131);

		// importing an existing name without its prior import is refused
		engine.begin_block(132).await.unwrap();
		assert!(engine
			.state_create_as_import(
				Opcode::NameImport,
				&reimport.to_fields().unwrap(),
				132,
				1,
				&txid(53),
				"imp.imports",
				None,
			)
			.await
			.is_err());
		engine.abort_block().await.unwrap();
	}

	#[tokio::test]
	async fn operations_must_be_strictly_ordered() {
		let (_dir, _db, mut engine) = setup().await;

		let preorder = namespace_preorder("order", 100, 5, 10);
		engine.begin_block(100).await.unwrap();
		engine.preorder(&preorder.to_fields().unwrap(), 100, 5, &preorder.txid).await.unwrap();

		// same (block, vtxindex) is refused
		let mut dup = namespace_preorder("order", 100, 5, 11);
		dup.txid = txid(12);
		let err = engine.preorder(&dup.to_fields().unwrap(), 100, 5, &dup.txid).await.unwrap_err();
		assert!(matches!(err, NamedbError::OutOfOrder { .. }));
		engine.abort_block().await.unwrap();

		// an operation for another block is refused
		engine.begin_block(101).await.unwrap();
		let other = namespace_preorder("other", 102, 1, 13);
		assert!(engine.preorder(&other.to_fields().unwrap(), 102, 1, &other.txid).await.is_err());
		engine.abort_block().await.unwrap();

		// blocks must advance
		engine.begin_block(101).await.unwrap();
		engine.commit_block().await.unwrap();
		assert!(matches!(engine.begin_block(101).await, Err(NamedbError::BlockOutOfOrder { .. })));
		assert!(matches!(engine.begin_block(100).await, Err(NamedbError::BlockOutOfOrder { .. })));
		engine.begin_block(102).await.unwrap();
		engine.commit_block().await.unwrap();

		// no writes outside a block
		let late = namespace_preorder("late", 103, 1, 14);
		assert!(matches!(
			engine.preorder(&late.to_fields().unwrap(), 103, 1, &late.txid).await,
			Err(NamedbError::NotInBlock)
		));
		engine.abort_block().await.unwrap_err();
	}

	#[tokio::test]
	async fn aborted_blocks_leave_no_trace() {
		let (_dir, db, mut engine) = setup().await;

		let preorder = namespace_preorder("gone", 100, 3, 10);
		engine.begin_block(100).await.unwrap();
		engine.preorder(&preorder.to_fields().unwrap(), 100, 3, &preorder.txid).await.unwrap();
		engine.abort_block().await.unwrap();

		let mut conn = db.conn().await.unwrap();
		assert!(queries::get_namespace_preorder(&mut conn, &preorder.preorder_hash, 101).await.unwrap().is_none());

		// the cursor rolled back too: the same position can be replayed
		engine.begin_block(100).await.unwrap();
		engine.preorder(&preorder.to_fields().unwrap(), 100, 3, &preorder.txid).await.unwrap();
		engine.commit_block().await.unwrap();
		assert!(queries::get_namespace_preorder(&mut conn, &preorder.preorder_hash, 101).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn duplicate_preorder_hash_is_refused() {
		let (_dir, _db, mut engine) = setup().await;

		let preorder = namespace_preorder("dup", 100, 3, 10);
		engine.begin_block(100).await.unwrap();
		engine.preorder(&preorder.to_fields().unwrap(), 100, 3, &preorder.txid).await.unwrap();
		engine.commit_block().await.unwrap();
		assert_eq!(engine.last_applied(), Some((100, 3)));

		let mut again = namespace_preorder("dup", 101, 1, 11);
		again.preorder_hash = preorder.preorder_hash.clone();
		engine.begin_block(101).await.unwrap();
		assert!(engine.preorder(&again.to_fields().unwrap(), 101, 1, &again.txid).await.is_err());
		engine.abort_block().await.unwrap();
	}

	#[tokio::test]
	async fn renewal_rides_on_registrations_wire_code() {
		let (_dir, db, mut engine) = setup().await;

		// lifetime 100: the name would lapse at 1101 without a renewal
		let namespace = establish_namespace(&mut engine, "ns", 100, 110, 120, 100, 10).await;
		register_name(&mut engine, "keep.ns", &namespace, 1000, 1000, 20).await;

		let mut conn = db.conn().await.unwrap();
		let before = queries::get_name(&mut conn, "keep.ns", 1001, false, false).await.unwrap().unwrap();

		let renewal = op_payload(&[
			("op", Opcode::NameRenewal.wire().into()),
			("txid", txid(30).into()),
			("vtxindex", 2u32.into()),
			("op_fee", 640000u32.into()),
			("last_renewed", 1090u32.into()),
		]);
		engine.begin_block(1090).await.unwrap();
		engine
			.state_transition(
				Opcode::NameRenewal,
				&renewal,
				1090,
				2,
				&txid(30),
				"keep.ns",
				&before.record.to_fields().unwrap(),
				&FieldMap::new(),
				&[],
			)
			.await
			.unwrap();
		engine.commit_block().await.unwrap();

		// alive past the original expiry now
		let renewed = queries::get_name(&mut conn, "keep.ns", 1150, false, false).await.unwrap().unwrap();
		assert_eq!(renewed.record.last_renewed, 1090);
		assert_eq!(renewed.record.first_registered, 1000);
		assert!(queries::get_name(&mut conn, "keep.ns", 1191, false, false).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn recreation_from_prior_history_overwrites_the_surviving_row() {
		let (_dir, db, mut engine) = setup().await;

		let namespace = establish_namespace(&mut engine, "ns", 100, 110, 120, 100, 10).await;
		register_name(&mut engine, "foo.ns", &namespace, 1000, 1000, 20).await;

		let mut conn = db.conn().await.unwrap();
		assert!(queries::get_name(&mut conn, "foo.ns", 1101, false, false).await.unwrap().is_none());
		let expired = queries::get_name(&mut conn, "foo.ns", 1101, true, false).await.unwrap().unwrap();

		// a fresh preorder, then a re-creation threaded through the prior
		// incarnation's last snapshot
		let preorder = name_preorder("foo.ns", 1200, 1, 30);
		engine.begin_block(1200).await.unwrap();
		engine.preorder(&preorder.to_fields().unwrap(), 1200, 1, &preorder.txid).await.unwrap();
		engine.commit_block().await.unwrap();

		let mut snapshot = expired.record.to_fields().unwrap();
		snapshot.insert(HISTORY_SNAPSHOT.to_string(), Value::Bool(true));
		let mut prior_history = History::new();
		prior_history.insert(
			1200,
			vec![crate::types::HistoryEntry { opcode: Opcode::NameRegistration, data: snapshot }],
		);

		let new_record = name_record("foo.ns", &namespace, &preorder, 1205, 2, 31);
		engine.begin_block(1205).await.unwrap();
		engine
			.state_create_from_prior_history(
				Opcode::NameRegistration,
				&new_record.to_fields().unwrap(),
				1205,
				2,
				&new_record.txid,
				"foo.ns",
				&prior_history,
				&preorder.to_fields().unwrap(),
			)
			.await
			.unwrap();
		engine.commit_block().await.unwrap();

		let revived = queries::get_name(&mut conn, "foo.ns", 1206, false, true).await.unwrap().unwrap();
		assert_eq!(revived.record.first_registered, 1205);
		assert_eq!(revived.record.block_number, 1200);

		// overwritten in place, not re-inserted
		let row = sqlx::query("SELECT COUNT(*) AS count FROM name_records WHERE name = 'foo.ns'")
			.fetch_one(&mut *conn)
			.await
			.unwrap();
		let count: i64 = sqlx::Row::try_get(&row, "count").unwrap();
		assert_eq!(count, 1);

		// the snapshot was re-anchored at the preorder's point, the preorder
		// journaled at the creation's, and the preorder row consumed
		let history = revived.history.unwrap();
		assert!(history.get(&1200).unwrap().iter().all(|entry| entry.is_snapshot()));
		assert_eq!(history.get(&1205).unwrap()[0].opcode, Opcode::NamePreorder);
		assert!(queries::get_name_preorder(&mut conn, &preorder.preorder_hash, 1206).await.unwrap().is_none());
	}
}
