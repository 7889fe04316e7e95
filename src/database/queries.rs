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

//! Common Sql queries on the name set abstracted into rust functions.
//!
//! Lookups of current state filter expired records; absence is `Ok(None)`
//! or an empty vector, never an error.

use serde_json::Value;
use sqlx::sqlite::{SqliteConnection, SqliteRow};

use crate::database::{models, ops};
use crate::error::Result;
use crate::history;
use crate::opcodes::Opcode;
use crate::types::{FieldMap, NameRecord, Namespace, Preorder, WithHistory};
use crate::{NAMESPACE_PREORDER_EXPIRE, NAMESPACE_REVEAL_EXPIRE, NAME_PREORDER_EXPIRE};

/// Return type of queries that `SELECT namespace_id`
#[derive(sqlx::FromRow)]
struct NamespaceIdRow {
	namespace_id: String,
}

/// Return type of queries that `SELECT preorder_hash`
#[derive(sqlx::FromRow)]
struct PreorderHashRow {
	preorder_hash: String,
}

const NAME_NAMESPACE_JOIN: &str = "name_records JOIN namespaces ON \
	name_records.namespace_id = namespaces.namespace_id AND \
	name_records.namespace_block_number = namespaces.block_number";

/// WHERE fragment selecting name records that are not expired at the given
/// block: the namespace is ready and within its lifetime (or the name was
/// renewed recently enough), or the namespace reveal is still open.
fn where_unexpired_names(current_block: u64) -> (&'static str, Vec<Value>) {
	let fragment = "name_records.first_registered <= ? AND \
		((namespaces.op = ? AND (namespaces.ready_block + namespaces.lifetime > ? OR \
		  name_records.last_renewed + namespaces.lifetime >= ?)) OR \
		 (namespaces.op = ? AND namespaces.reveal_block <= ? AND ? < namespaces.reveal_block + ?))";
	let args = vec![
		Value::from(current_block),
		Value::from(Opcode::NamespaceReady.wire()),
		Value::from(current_block),
		Value::from(current_block),
		Value::from(Opcode::NamespaceReveal.wire()),
		Value::from(current_block),
		Value::from(current_block),
		Value::from(NAMESPACE_REVEAL_EXPIRE),
	];
	(fragment, args)
}

/// Run a query with JSON-scalar parameters, returning whole rows as field
/// maps.
pub(crate) async fn select_fields(
	conn: &mut SqliteConnection,
	sql: &str,
	args: &[Value],
) -> Result<Vec<FieldMap>> {
	let mut query = sqlx::query(sql);
	for arg in args {
		query = ops::bind_value(query, arg)?;
	}
	let rows = query.fetch_all(&mut *conn).await?;
	rows.iter().map(models::row_to_fields).collect()
}

async fn select_one_fields(conn: &mut SqliteConnection, sql: &str, args: &[Value]) -> Result<Option<FieldMap>> {
	let mut query = sqlx::query(sql);
	for arg in args {
		query = ops::bind_value(query, arg)?;
	}
	let row: Option<SqliteRow> = query.fetch_optional(&mut *conn).await?;
	row.as_ref().map(models::row_to_fields).transpose()
}

/// Get a name and optionally its history.  Does not filter revoked names;
/// expired names are returned only with `include_expired`.
pub async fn get_name(
	conn: &mut SqliteConnection,
	name: &str,
	current_block: u64,
	include_expired: bool,
	include_history: bool,
) -> Result<Option<WithHistory<NameRecord>>> {
	let fields = if include_expired {
		let sql = "SELECT * FROM name_records WHERE name = ? ORDER BY block_number DESC LIMIT 1";
		select_one_fields(conn, sql, &[Value::from(name)]).await?
	} else {
		let (fragment, mut args) = where_unexpired_names(current_block);
		let sql = format!("SELECT name_records.* FROM {} WHERE name = ? AND {}", NAME_NAMESPACE_JOIN, fragment);
		args.insert(0, Value::from(name));
		select_one_fields(conn, &sql, &args).await?
	};

	let fields = match fields {
		Some(fields) => fields,
		None => return Ok(None),
	};
	let record = NameRecord::from_fields(&fields)?;
	let history = if include_history { Some(history::fetch(conn, name).await?) } else { None };
	Ok(Some(WithHistory { record, history }))
}

/// Get a name by its preorder hash, regardless of expiry or revocation.
pub async fn get_name_by_preorder_hash(
	conn: &mut SqliteConnection,
	preorder_hash: &str,
	include_history: bool,
) -> Result<Option<WithHistory<NameRecord>>> {
	let sql = "SELECT * FROM name_records WHERE preorder_hash = ?";
	let fields = match select_one_fields(conn, sql, &[Value::from(preorder_hash)]).await? {
		Some(fields) => fields,
		None => return Ok(None),
	};
	let record = NameRecord::from_fields(&fields)?;
	let history = if include_history { Some(history::fetch(conn, &record.name).await?) } else { None };
	Ok(Some(WithHistory { record, history }))
}

/// Get an unexpired namespace, revealed or ready.
pub async fn get_namespace(
	conn: &mut SqliteConnection,
	namespace_id: &str,
	current_block: u64,
	include_history: bool,
) -> Result<Option<WithHistory<Namespace>>> {
	let sql = "SELECT * FROM namespaces WHERE namespace_id = ? AND \
		((op = ? AND reveal_block <= ? AND ? < reveal_block + ?) OR op = ?)";
	let args = vec![
		Value::from(namespace_id),
		Value::from(Opcode::NamespaceReveal.wire()),
		Value::from(current_block),
		Value::from(current_block),
		Value::from(NAMESPACE_REVEAL_EXPIRE),
		Value::from(Opcode::NamespaceReady.wire()),
	];
	namespace_result(conn, sql, &args, include_history).await
}

/// Get a namespace by its preorder hash, regardless of expiry.
pub async fn get_namespace_by_preorder_hash(
	conn: &mut SqliteConnection,
	preorder_hash: &str,
	include_history: bool,
) -> Result<Option<WithHistory<Namespace>>> {
	let sql = "SELECT * FROM namespaces WHERE preorder_hash = ?";
	namespace_result(conn, sql, &[Value::from(preorder_hash)], include_history).await
}

/// Get a namespace only while it is revealed and the reveal window is open.
pub async fn get_namespace_reveal(
	conn: &mut SqliteConnection,
	namespace_id: &str,
	current_block: u64,
	include_history: bool,
) -> Result<Option<WithHistory<Namespace>>> {
	let sql = "SELECT * FROM namespaces WHERE namespace_id = ? AND op = ? AND \
		reveal_block <= ? AND ? < reveal_block + ?";
	let args = vec![
		Value::from(namespace_id),
		Value::from(Opcode::NamespaceReveal.wire()),
		Value::from(current_block),
		Value::from(current_block),
		Value::from(NAMESPACE_REVEAL_EXPIRE),
	];
	namespace_result(conn, sql, &args, include_history).await
}

/// Get a namespace only once it is ready.
pub async fn get_namespace_ready(
	conn: &mut SqliteConnection,
	namespace_id: &str,
	include_history: bool,
) -> Result<Option<WithHistory<Namespace>>> {
	let sql = "SELECT * FROM namespaces WHERE namespace_id = ? AND op = ?";
	let args = vec![Value::from(namespace_id), Value::from(Opcode::NamespaceReady.wire())];
	namespace_result(conn, sql, &args, include_history).await
}

async fn namespace_result(
	conn: &mut SqliteConnection,
	sql: &str,
	args: &[Value],
	include_history: bool,
) -> Result<Option<WithHistory<Namespace>>> {
	let fields = match select_one_fields(conn, sql, args).await? {
		Some(fields) => fields,
		None => return Ok(None),
	};
	let record = Namespace::from_fields(&fields)?;
	let history = if include_history { Some(history::fetch(conn, &record.namespace_id).await?) } else { None };
	Ok(Some(WithHistory { record, history }))
}

/// Get an outstanding name preorder: it must still be within its expiry
/// window, and no unexpired name may have been created from it yet.
pub async fn get_name_preorder(
	conn: &mut SqliteConnection,
	preorder_hash: &str,
	current_block: u64,
) -> Result<Option<Preorder>> {
	let sql = "SELECT * FROM preorders WHERE preorder_hash = ? AND op = ? AND block_number + ? > ?";
	let args = vec![
		Value::from(preorder_hash),
		Value::from(Opcode::NamePreorder.wire()),
		Value::from(NAME_PREORDER_EXPIRE),
		Value::from(current_block),
	];
	let fields = match select_one_fields(conn, sql, &args).await? {
		Some(fields) => fields,
		None => return Ok(None),
	};

	// refuse if a live name already carries this preorder hash
	let (fragment, mut args) = where_unexpired_names(current_block);
	let sql = format!(
		"SELECT name_records.preorder_hash FROM {} WHERE name_records.preorder_hash = ? AND {}",
		NAME_NAMESPACE_JOIN, fragment
	);
	args.insert(0, Value::from(preorder_hash));
	if select_one_fields(conn, &sql, &args).await?.is_some() {
		return Ok(None);
	}

	Ok(Some(Preorder::from_fields(&fields)?))
}

/// Get an outstanding namespace preorder: within its expiry window, and the
/// namespace must not have been revealed or readied from it.
pub async fn get_namespace_preorder(
	conn: &mut SqliteConnection,
	preorder_hash: &str,
	current_block: u64,
) -> Result<Option<Preorder>> {
	let sql = "SELECT * FROM preorders WHERE preorder_hash = ? AND op = ? AND block_number + ? > ?";
	let args = vec![
		Value::from(preorder_hash),
		Value::from(Opcode::NamespacePreorder.wire()),
		Value::from(NAMESPACE_PREORDER_EXPIRE),
		Value::from(current_block),
	];
	let fields = match select_one_fields(conn, sql, &args).await? {
		Some(fields) => fields,
		None => return Ok(None),
	};

	let sql = "SELECT preorder_hash FROM namespaces WHERE preorder_hash = ? AND \
		(op = ? OR (op = ? AND reveal_block <= ? AND ? < reveal_block + ?))";
	let args = vec![
		Value::from(preorder_hash),
		Value::from(Opcode::NamespaceReady.wire()),
		Value::from(Opcode::NamespaceReveal.wire()),
		Value::from(current_block),
		Value::from(current_block),
		Value::from(NAMESPACE_REVEAL_EXPIRE),
	];
	if select_one_fields(conn, sql, &args).await?.is_some() {
		return Ok(None);
	}

	Ok(Some(Preorder::from_fields(&fields)?))
}

/// Names owned by an address; excludes revoked and expired names.
pub async fn get_names_owned_by_address(
	conn: &mut SqliteConnection,
	address: &str,
	current_block: u64,
) -> Result<Vec<String>> {
	let (fragment, mut args) = where_unexpired_names(current_block);
	let sql = format!(
		"SELECT name_records.name FROM {} WHERE name_records.address = ? AND name_records.revoked = 0 AND {} \
		 ORDER BY name_records.name",
		NAME_NAMESPACE_JOIN, fragment
	);
	args.insert(0, Value::from(address));
	name_list(conn, &sql, &args).await
}

/// Names held by a sender public-key script; excludes revoked and expired
/// names.
pub async fn get_names_by_sender(
	conn: &mut SqliteConnection,
	sender: &str,
	current_block: u64,
) -> Result<Vec<String>> {
	let (fragment, mut args) = where_unexpired_names(current_block);
	let sql = format!(
		"SELECT name_records.name FROM {} WHERE name_records.sender = ? AND name_records.revoked = 0 AND {} \
		 ORDER BY name_records.name",
		NAME_NAMESPACE_JOIN, fragment
	);
	args.insert(0, Value::from(sender));
	name_list(conn, &sql, &args).await
}

async fn name_list(conn: &mut SqliteConnection, sql: &str, args: &[Value]) -> Result<Vec<String>> {
	let rows = select_fields(conn, sql, args).await?;
	Ok(rows
		.into_iter()
		.filter_map(|mut fields| fields.remove("name"))
		.filter_map(|name| name.as_str().map(str::to_string))
		.collect())
}

/// All unexpired names, sorted, optionally paginated.
pub async fn get_all_names(
	conn: &mut SqliteConnection,
	current_block: u64,
	offset: Option<u64>,
	count: Option<u64>,
) -> Result<Vec<NameRecord>> {
	let (fragment, mut args) = where_unexpired_names(current_block);
	let mut sql =
		format!("SELECT name_records.* FROM {} WHERE {} ORDER BY name_records.name", NAME_NAMESPACE_JOIN, fragment);
	paginate(&mut sql, &mut args, offset, count);

	let rows = select_fields(conn, &sql, &args).await?;
	rows.iter().map(NameRecord::from_fields).collect()
}

/// All unexpired names under one namespace, sorted, optionally paginated.
pub async fn get_names_in_namespace(
	conn: &mut SqliteConnection,
	namespace_id: &str,
	current_block: u64,
	offset: Option<u64>,
	count: Option<u64>,
) -> Result<Vec<NameRecord>> {
	let (fragment, mut args) = where_unexpired_names(current_block);
	let mut sql = format!(
		"SELECT name_records.* FROM {} WHERE name_records.namespace_id = ? AND {} ORDER BY name_records.name",
		NAME_NAMESPACE_JOIN, fragment
	);
	args.insert(0, Value::from(namespace_id));
	paginate(&mut sql, &mut args, offset, count);

	let rows = select_fields(conn, &sql, &args).await?;
	rows.iter().map(NameRecord::from_fields).collect()
}

fn paginate(sql: &mut String, args: &mut Vec<Value>, offset: Option<u64>, count: Option<u64>) {
	if offset.is_some() || count.is_some() {
		// sqlite requires LIMIT ahead of OFFSET; -1 means unbounded
		sql.push_str(" LIMIT ?");
		args.push(count.map(Value::from).unwrap_or_else(|| Value::from(-1)));
		if let Some(offset) = offset {
			sql.push_str(" OFFSET ?");
			args.push(Value::from(offset));
		}
	}
}

/// Reverse lookup: the unrevoked, unexpired name carrying this 128-bit name
/// hash.
pub async fn get_name_from_name_hash128(
	conn: &mut SqliteConnection,
	name_hash128: &str,
	current_block: u64,
) -> Result<Option<String>> {
	let (fragment, mut args) = where_unexpired_names(current_block);
	let sql = format!(
		"SELECT name_records.name FROM {} WHERE name_records.name_hash128 = ? AND name_records.revoked = 0 AND {}",
		NAME_NAMESPACE_JOIN, fragment
	);
	args.insert(0, Value::from(name_hash128));
	Ok(name_list(conn, &sql, &args).await?.into_iter().next())
}

/// All READY namespace IDs.
pub async fn get_all_namespace_ids(conn: &mut SqliteConnection) -> Result<Vec<String>> {
	let rows = sqlx::query_as::<_, NamespaceIdRow>("SELECT namespace_id FROM namespaces WHERE op = ?")
		.bind(Opcode::NamespaceReady.wire())
		.fetch_all(&mut *conn)
		.await?;
	Ok(rows.into_iter().map(|row| row.namespace_id).collect())
}

/// All namespace IDs whose reveal window is still open.
pub async fn get_all_revealed_namespace_ids(
	conn: &mut SqliteConnection,
	current_block: u64,
) -> Result<Vec<String>> {
	let rows = sqlx::query_as::<_, NamespaceIdRow>(
		"SELECT namespace_id FROM namespaces WHERE op = ? AND reveal_block <= ? AND ? < reveal_block + ?",
	)
	.bind(Opcode::NamespaceReveal.wire())
	.bind(current_block as i64)
	.bind(current_block as i64)
	.bind(NAMESPACE_REVEAL_EXPIRE as i64)
	.fetch_all(&mut *conn)
	.await?;
	Ok(rows.into_iter().map(|row| row.namespace_id).collect())
}

/// Hashes of namespace preorders that have not lapsed yet.
pub async fn get_all_preordered_namespace_hashes(
	conn: &mut SqliteConnection,
	current_block: u64,
) -> Result<Vec<String>> {
	let rows = sqlx::query_as::<_, PreorderHashRow>(
		"SELECT preorder_hash FROM preorders WHERE op = ? AND block_number <= ? AND block_number + ? > ?",
	)
	.bind(Opcode::NamespacePreorder.wire())
	.bind(current_block as i64)
	.bind(NAMESPACE_PREORDER_EXPIRE as i64)
	.bind(current_block as i64)
	.fetch_all(&mut *conn)
	.await?;
	Ok(rows.into_iter().map(|row| row.preorder_hash).collect())
}

/// Hashes of all namespaces still being established: open preorders plus
/// open reveals.
pub async fn get_all_importing_namespace_hashes(
	conn: &mut SqliteConnection,
	current_block: u64,
) -> Result<Vec<String>> {
	let mut hashes = get_all_preordered_namespace_hashes(conn, current_block).await?;
	let rows = sqlx::query_as::<_, PreorderHashRow>(
		"SELECT preorder_hash FROM namespaces WHERE op = ? AND reveal_block <= ? AND ? < reveal_block + ?",
	)
	.bind(Opcode::NamespaceReveal.wire())
	.bind(current_block as i64)
	.bind(current_block as i64)
	.bind(NAMESPACE_REVEAL_EXPIRE as i64)
	.fetch_all(&mut *conn)
	.await?;
	hashes.extend(rows.into_iter().map(|row| row.preorder_hash));
	Ok(hashes)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test::*;
	use crate::util;
	use crate::NamedbError;

	async fn revoke(
		engine: &mut crate::StateEngine,
		name: &str,
		cur: &FieldMap,
		block_id: u64,
		tag: u8,
	) {
		let mut payload = FieldMap::new();
		payload.insert("op".to_string(), Opcode::NameRevoke.wire().into());
		payload.insert("txid".to_string(), txid(tag).into());
		payload.insert("vtxindex".to_string(), 1u32.into());
		payload.insert("op_fee".to_string(), 1u32.into());
		payload.insert("revoked".to_string(), true.into());
		payload.insert("value_hash".to_string(), Value::Null);

		engine.begin_block(block_id).await.unwrap();
		engine
			.state_transition(
				Opcode::NameRevoke,
				&payload,
				block_id,
				1,
				&txid(tag),
				name,
				cur,
				&FieldMap::new(),
				&[],
			)
			.await
			.unwrap();
		engine.commit_block().await.unwrap();
	}

	#[tokio::test]
	async fn reverse_hash_lookup_stops_at_revocation() {
		let (_dir, db, mut engine) = setup().await;

		let namespace = establish_namespace(&mut engine, "ns", 100, 110, 120, 520000, 10).await;
		register_name(&mut engine, "bar.ns", &namespace, 1000, 1000, 20).await;

		let mut conn = db.conn().await.unwrap();
		let hash = util::hash256_trunc128("bar.ns");
		assert_eq!(
			get_name_from_name_hash128(&mut conn, &hash, 1001).await.unwrap().as_deref(),
			Some("bar.ns")
		);

		let cur = get_name(&mut conn, "bar.ns", 1001, false, false).await.unwrap().unwrap();
		revoke(&mut engine, "bar.ns", &cur.record.to_fields().unwrap(), 1002, 30).await;

		assert!(get_name_from_name_hash128(&mut conn, &hash, 1003).await.unwrap().is_none());
		// the name itself still resolves (revocation is not expiry)
		let after = get_name(&mut conn, "bar.ns", 1003, false, false).await.unwrap().unwrap();
		assert!(after.record.revoked);
		assert_eq!(after.record.value_hash, None);
	}

	#[tokio::test]
	async fn owner_and_sender_lookups_exclude_revoked_names() {
		let (_dir, db, mut engine) = setup().await;

		let namespace = establish_namespace(&mut engine, "ns", 100, 110, 120, 520000, 10).await;
		register_name(&mut engine, "a.ns", &namespace, 1000, 1000, 20).await;
		register_name(&mut engine, "b.ns", &namespace, 1010, 1010, 22).await;

		let mut conn = db.conn().await.unwrap();
		assert_eq!(
			get_names_owned_by_address(&mut conn, RECIPIENT_ADDRESS, 1011).await.unwrap(),
			vec!["a.ns".to_string(), "b.ns".to_string()]
		);
		assert_eq!(
			get_names_by_sender(&mut conn, RECIPIENT, 1011).await.unwrap(),
			vec!["a.ns".to_string(), "b.ns".to_string()]
		);
		assert!(get_names_owned_by_address(&mut conn, "1NoSuchAddress", 1011).await.unwrap().is_empty());

		let cur = get_name(&mut conn, "a.ns", 1011, false, false).await.unwrap().unwrap();
		revoke(&mut engine, "a.ns", &cur.record.to_fields().unwrap(), 1012, 30).await;

		assert_eq!(
			get_names_owned_by_address(&mut conn, RECIPIENT_ADDRESS, 1013).await.unwrap(),
			vec!["b.ns".to_string()]
		);
	}

	#[tokio::test]
	async fn enumeration_is_sorted_and_paginated() {
		let (_dir, db, mut engine) = setup().await;

		let namespace = establish_namespace(&mut engine, "ns", 100, 110, 120, 520000, 10).await;
		// register out of name order
		register_name(&mut engine, "c.ns", &namespace, 1000, 1000, 20).await;
		register_name(&mut engine, "a.ns", &namespace, 1010, 1010, 22).await;
		register_name(&mut engine, "b.ns", &namespace, 1020, 1020, 24).await;

		let mut conn = db.conn().await.unwrap();
		let all = get_all_names(&mut conn, 1100, None, None).await.unwrap();
		let names: Vec<&str> = all.iter().map(|record| record.name.as_str()).collect();
		assert_eq!(names, vec!["a.ns", "b.ns", "c.ns"]);

		let page = get_all_names(&mut conn, 1100, Some(1), Some(1)).await.unwrap();
		assert_eq!(page.len(), 1);
		assert_eq!(page[0].name, "b.ns");

		let tail = get_all_names(&mut conn, 1100, Some(2), None).await.unwrap();
		assert_eq!(tail.len(), 1);
		assert_eq!(tail[0].name, "c.ns");

		let in_ns = get_names_in_namespace(&mut conn, "ns", 1100, None, Some(2)).await.unwrap();
		assert_eq!(in_ns.len(), 2);
		assert!(get_names_in_namespace(&mut conn, "other", 1100, None, None).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn name_preorder_lookup_honors_window_and_consumption() {
		let (_dir, db, mut engine) = setup().await;

		let namespace = establish_namespace(&mut engine, "ns", 100, 110, 120, 520000, 10).await;

		// an unconsumed preorder is visible only within its window
		let preorder = name_preorder("idle.ns", 1000, 5, 20);
		engine.begin_block(1000).await.unwrap();
		engine.preorder(&preorder.to_fields().unwrap(), 1000, 5, &preorder.txid).await.unwrap();
		engine.commit_block().await.unwrap();

		let mut conn = db.conn().await.unwrap();
		let found = get_name_preorder(&mut conn, &preorder.preorder_hash, 1001).await.unwrap().unwrap();
		assert_eq!(found.block_number, 1000);
		assert!(get_name_preorder(&mut conn, &preorder.preorder_hash, 1000 + crate::NAME_PREORDER_EXPIRE)
			.await
			.unwrap()
			.is_none());

		// a consumed preorder is gone, and re-committing the same hash while
		// the name lives resolves to nothing
		let record = register_name(&mut engine, "taken.ns", &namespace, 2000, 2000, 30).await;
		assert!(get_name_preorder(&mut conn, &record.preorder_hash, 2001).await.unwrap().is_none());

		let mut again = name_preorder("taken.ns", 2010, 3, 30);
		again.txid = txid(33);
		engine.begin_block(2010).await.unwrap();
		engine.preorder(&again.to_fields().unwrap(), 2010, 3, &again.txid).await.unwrap();
		engine.commit_block().await.unwrap();

		assert!(get_name_preorder(&mut conn, &again.preorder_hash, 2011).await.unwrap().is_none());
		// but the row is reachable through the name it created
		assert!(get_name_by_preorder_hash(&mut conn, &record.preorder_hash, false).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn namespace_preorder_lookup_stops_at_reveal() {
		let (_dir, db, mut engine) = setup().await;

		let preorder = namespace_preorder("pending", 100, 3, 10);
		engine.begin_block(100).await.unwrap();
		engine.preorder(&preorder.to_fields().unwrap(), 100, 3, &preorder.txid).await.unwrap();
		engine.commit_block().await.unwrap();

		let mut conn = db.conn().await.unwrap();
		assert!(get_namespace_preorder(&mut conn, &preorder.preorder_hash, 101).await.unwrap().is_some());
		assert_eq!(get_all_preordered_namespace_hashes(&mut conn, 101).await.unwrap(), vec![preorder
			.preorder_hash
			.clone()]);

		let namespace = namespace_record("pending", &preorder, 110, 520000, 4, 11);
		engine.begin_block(110).await.unwrap();
		engine
			.state_create(
				Opcode::NamespaceReveal,
				&namespace.to_fields().unwrap(),
				110,
				4,
				&namespace.txid,
				"pending",
				&preorder.to_fields().unwrap(),
			)
			.await
			.unwrap();
		engine.commit_block().await.unwrap();

		// consumed by the reveal
		assert!(get_namespace_preorder(&mut conn, &preorder.preorder_hash, 111).await.unwrap().is_none());
		assert!(get_namespace_by_preorder_hash(&mut conn, &preorder.preorder_hash, false).await.unwrap().is_some());
		assert_eq!(get_all_importing_namespace_hashes(&mut conn, 111).await.unwrap(), vec![preorder
			.preorder_hash
			.clone()]);
	}

	#[tokio::test]
	async fn namespace_id_enumeration() {
		let (_dir, db, mut engine) = setup().await;

		establish_namespace(&mut engine, "done", 100, 110, 120, 520000, 10).await;

		let preorder = namespace_preorder("open", 130, 3, 14);
		engine.begin_block(130).await.unwrap();
		engine.preorder(&preorder.to_fields().unwrap(), 130, 3, &preorder.txid).await.unwrap();
		engine.commit_block().await.unwrap();

		let namespace = namespace_record("open", &preorder, 140, 520000, 4, 15);
		engine.begin_block(140).await.unwrap();
		engine
			.state_create(
				Opcode::NamespaceReveal,
				&namespace.to_fields().unwrap(),
				140,
				4,
				&namespace.txid,
				"open",
				&preorder.to_fields().unwrap(),
			)
			.await
			.unwrap();
		engine.commit_block().await.unwrap();

		let mut conn = db.conn().await.unwrap();
		assert_eq!(get_all_namespace_ids(&mut conn).await.unwrap(), vec!["done".to_string()]);
		assert_eq!(get_all_revealed_namespace_ids(&mut conn, 141).await.unwrap(), vec!["open".to_string()]);
	}

	#[tokio::test]
	async fn typed_round_trip_through_the_row_reader() {
		let (_dir, db, mut engine) = setup().await;

		let namespace = establish_namespace(&mut engine, "ns", 100, 110, 120, 520000, 10).await;
		let record = register_name(&mut engine, "trip.ns", &namespace, 1000, 1005, 20).await;

		let mut conn = db.conn().await.unwrap();
		let fetched = get_name(&mut conn, "trip.ns", 1005, false, false).await.unwrap().unwrap();
		assert_eq!(fetched.record, record);

		let fetched = get_namespace(&mut conn, "ns", 121, false).await.unwrap().unwrap();
		assert_eq!(fetched.record.buckets, namespace.buckets);
		assert_eq!(fetched.record.lifetime, namespace.lifetime);

		// malformed sql surfaces as a storage error, not a panic
		assert!(matches!(
			select_fields(&mut conn, "SELECT * FROM no_such_table", &[]).await,
			Err(NamedbError::Sql(_))
		));
	}
}
