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

//! Record types of the name set, and the field-map currency the record
//! operators and the history journal work in.
//!
//! Opcode payloads are per-opcode projections of these records, so the
//! write path is dynamic (`FieldMap`); the query layer hands back the
//! typed records.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NamedbError, Result};
use crate::opcodes::Opcode;

/// Column -> value mapping for one row or one opcode payload.
/// Ordered by key; the record operators bind parameters in this order.
pub type FieldMap = serde_json::Map<String, Value>;

/// Per-entity history: block id -> entries in ascending `vtxindex` order.
pub type History = BTreeMap<u64, Vec<HistoryEntry>>;

/// Marker key of a full-snapshot history payload.
pub const HISTORY_SNAPSHOT: &str = "history_snapshot";

/// One history journal entry: the JSON payload plus the opcode derived from
/// its `op` field.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
	pub opcode: Opcode,
	pub data: FieldMap,
}

impl HistoryEntry {
	/// Whether the payload is a full snapshot rather than a delta.
	pub fn is_snapshot(&self) -> bool {
		matches!(self.data.get(HISTORY_SNAPSHOT), Some(Value::Bool(true)))
	}

	pub fn vtxindex(&self) -> Option<u64> {
		self.data.get("vtxindex").and_then(Value::as_u64)
	}
}

/// A record together with its (optionally loaded) history.
#[derive(Debug, Clone)]
pub struct WithHistory<T> {
	pub record: T,
	pub history: Option<History>,
}

/// A committed hash of a future name or namespace operation.
/// Consumed when the matching reveal/registration succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preorder {
	pub preorder_hash: String,
	pub consensus_hash: String,
	pub sender: String,
	pub sender_pubkey: Option<String>,
	pub address: Option<String>,
	pub block_number: u64,
	pub op: String,
	pub op_fee: u64,
	pub txid: String,
	pub vtxindex: u32,
}

/// A revealed or ready namespace, with its pricing parameters.
/// Keyed by `(namespace_id, block_number)` so an expired reveal can be
/// re-revealed later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
	pub namespace_id: String,
	pub preorder_hash: String,
	pub version: Option<u32>,
	pub sender: String,
	pub sender_pubkey: Option<String>,
	pub address: Option<String>,
	pub recipient: String,
	pub recipient_address: Option<String>,
	pub block_number: u64,
	pub reveal_block: u64,
	pub ready_block: u64,
	pub op: String,
	pub op_fee: u64,
	pub txid: String,
	pub vtxindex: u32,
	pub lifetime: u64,
	pub coeff: u64,
	pub base: u64,
	pub buckets: Vec<u64>,
	pub nonalpha_discount: u64,
	pub no_vowel_discount: u64,
}

/// A registered or imported name.  Keyed by `(name, block_number)` so an
/// expired name can be re-registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameRecord {
	pub name: String,
	pub preorder_hash: String,
	pub name_hash128: String,
	pub namespace_id: String,
	pub namespace_block_number: u64,
	pub value_hash: Option<String>,
	pub sender: String,
	pub sender_pubkey: Option<String>,
	pub address: Option<String>,
	pub block_number: u64,
	pub preorder_block_number: u64,
	pub first_registered: u64,
	pub last_renewed: u64,
	pub revoked: bool,
	pub op: String,
	pub txid: String,
	pub vtxindex: u32,
	pub op_fee: u64,
	pub importer: Option<String>,
	pub importer_address: Option<String>,
	pub consensus_hash: Option<String>,
}

fn object_fields<T: Serialize>(record: &T) -> Result<FieldMap> {
	match serde_json::to_value(record)? {
		Value::Object(fields) => Ok(fields),
		other => Err(NamedbError::Invariant(format!("record serialized to non-object value {}", other))),
	}
}

fn record_from_fields<T: DeserializeOwned>(fields: FieldMap) -> Result<T> {
	serde_json::from_value(Value::Object(fields)).map_err(Into::into)
}

impl Preorder {
	pub fn to_fields(&self) -> Result<FieldMap> {
		object_fields(self)
	}

	pub fn from_fields(fields: &FieldMap) -> Result<Self> {
		record_from_fields(fields.clone())
	}
}

impl Namespace {
	/// `buckets` serializes to a JSON array here; the engine encodes it to
	/// text before the row hits the database.
	pub fn to_fields(&self) -> Result<FieldMap> {
		object_fields(self)
	}

	/// Accepts `buckets` either as the stored JSON text or as an array.
	pub fn from_fields(fields: &FieldMap) -> Result<Self> {
		let mut fields = fields.clone();
		if let Some(Value::String(text)) = fields.get("buckets") {
			let buckets: Value = serde_json::from_str(text)?;
			fields.insert("buckets".to_string(), buckets);
		}
		record_from_fields(fields)
	}
}

impl NameRecord {
	pub fn to_fields(&self) -> Result<FieldMap> {
		object_fields(self)
	}

	pub fn from_fields(fields: &FieldMap) -> Result<Self> {
		record_from_fields(fields.clone())
	}
}
