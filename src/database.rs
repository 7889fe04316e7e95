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

//! IO for the sqlite database holding the name set.
//! Connection management and the on-disk schema.

pub mod models;
pub mod ops;
pub mod queries;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;

use crate::error::{NamedbError, Result};

pub const PREORDERS_TABLE: &str = "preorders";
pub const NAMESPACES_TABLE: &str = "namespaces";
pub const NAME_RECORDS_TABLE: &str = "name_records";
pub const HISTORY_TABLE: &str = "history";

/// The schema, one statement per entry.
///
/// `history_id` is a fully-qualified name or a namespace ID; `history_data`
/// is a JSON-serialized map of changed fields; `buckets` is a
/// JSON-serialized array of integers.  Compound primary keys include the
/// block number so an expired name or namespace can be re-created.
const SCHEMA: &[&str] = &[
	"CREATE TABLE history( txid TEXT NOT NULL,
	                       history_id TEXT NOT NULL,
	                       block_id INT NOT NULL,
	                       vtxindex INT NOT NULL,
	                       op TEXT NOT NULL,
	                       history_data TEXT NOT NULL,
	                       PRIMARY KEY(txid,history_id,block_id,vtxindex) )",
	"CREATE INDEX history_block_id_index ON history( history_id, block_id )",
	"CREATE INDEX history_id_index ON history( history_id )",
	// rows leave this table only when a name or namespace matches them
	"CREATE TABLE preorders( preorder_hash TEXT PRIMARY KEY UNIQUE NOT NULL,
	                         consensus_hash TEXT NOT NULL,
	                         sender TEXT NOT NULL,
	                         sender_pubkey TEXT,
	                         address TEXT,
	                         block_number INT NOT NULL,
	                         op TEXT NOT NULL,
	                         op_fee INT NOT NULL,
	                         txid TEXT NOT NULL,
	                         vtxindex INT )",
	"CREATE TABLE namespaces( namespace_id TEXT NOT NULL,
	                          preorder_hash TEXT NOT NULL,
	                          version INT,
	                          sender TEXT NOT NULL,
	                          sender_pubkey TEXT,
	                          address TEXT,
	                          recipient TEXT NOT NULL,
	                          recipient_address TEXT,
	                          block_number INT NOT NULL,
	                          reveal_block INT NOT NULL,
	                          op TEXT NOT NULL,
	                          op_fee INT NOT NULL,
	                          txid TEXT NOT NULL,
	                          vtxindex INT NOT NULL,
	                          lifetime INT NOT NULL,
	                          coeff INT NOT NULL,
	                          base INT NOT NULL,
	                          buckets TEXT NOT NULL,
	                          nonalpha_discount INT NOT NULL,
	                          no_vowel_discount INT NOT NULL,
	                          ready_block INT NOT NULL,
	                          PRIMARY KEY(namespace_id,block_number) )",
	"CREATE TABLE name_records( name TEXT NOT NULL,
	                            preorder_hash TEXT NOT NULL,
	                            name_hash128 TEXT NOT NULL,
	                            namespace_id TEXT NOT NULL,
	                            namespace_block_number INT NOT NULL,
	                            value_hash TEXT,
	                            sender TEXT NOT NULL,
	                            sender_pubkey TEXT,
	                            address TEXT,
	                            block_number INT NOT NULL,
	                            preorder_block_number INT NOT NULL,
	                            first_registered INT NOT NULL,
	                            last_renewed INT NOT NULL,
	                            revoked INT NOT NULL,
	                            op TEXT NOT NULL,
	                            txid TEXT NOT NULL,
	                            vtxindex INT NOT NULL,
	                            op_fee INT NOT NULL,
	                            importer TEXT,
	                            importer_address TEXT,
	                            consensus_hash TEXT,
	                            PRIMARY KEY(name,block_number),
	                            FOREIGN KEY(namespace_id,namespace_block_number)
	                                REFERENCES namespaces(namespace_id,block_number) )",
	"CREATE INDEX hash_names_index ON name_records( name_hash128, name )",
];

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DatabaseConfig {
	/// Filesystem path of the sqlite database.
	pub path: PathBuf,
}

impl fmt::Display for DatabaseConfig {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.path.display())
	}
}

pub type DbConn = PoolConnection<Sqlite>;

/// Handle to the database: a pool for readers, plus the connect options
/// used to mint the engine's dedicated writer connection.
///
/// Foreign keys are enforced on every connection.  WAL journaling gives
/// readers a consistent snapshot while the single writer holds its
/// per-block transaction open.
#[derive(Clone)]
pub struct Database {
	pool: SqlitePool,
	options: SqliteConnectOptions,
	path: PathBuf,
}

impl Database {
	/// Create the database at `path` and install the schema.
	/// Fails if `path` already exists.
	pub async fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		if path.exists() {
			return Err(NamedbError::DatabaseExists(path.display().to_string()));
		}

		let db = Self::connect(path, true).await?;
		let mut conn = db.conn().await?;
		for statement in SCHEMA {
			sqlx::query(statement).execute(&mut *conn).await?;
		}
		log::info!("created database at {}", path.display());
		Ok(db)
	}

	/// Open an existing database.
	pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
		Self::connect(path.as_ref(), false).await
	}

	async fn connect(path: &Path, create: bool) -> Result<Self> {
		let options = SqliteConnectOptions::new()
			.filename(path)
			.create_if_missing(create)
			.foreign_keys(true)
			.journal_mode(SqliteJournalMode::Wal);
		let pool = SqlitePoolOptions::new().max_connections(4).connect_with(options.clone()).await?;
		Ok(Self { pool, options, path: path.to_path_buf() })
	}

	/// A pooled read connection.
	pub async fn conn(&self) -> Result<DbConn> {
		self.pool.acquire().await.map_err(Into::into)
	}

	/// A dedicated connection for the single writer, outside the read pool.
	pub async fn writer(&self) -> Result<SqliteConnection> {
		self.options.connect().await.map_err(Into::into)
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}
