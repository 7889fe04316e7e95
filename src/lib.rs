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

//! The name-and-namespace state database of a blockchain naming system.
//!
//! Consensus-ordered naming operations are applied by the [`StateEngine`]
//! (one transaction per block); every state change leaves a diff in the
//! history journal, so any record can be restored as of any prior block.
//! Current-state lookups live in [`database::queries`], historical ones in
//! [`replay`].

#![forbid(unsafe_code)]
#![deny(dead_code)]

pub mod database;
pub mod engine;
mod error;
pub mod history;
pub mod logger;
pub mod opcodes;
pub mod replay;
pub mod types;
pub mod util;

pub use self::database::{queries, Database, DatabaseConfig};
pub use self::engine::StateEngine;
pub use self::error::{NamedbError, Result};
pub use self::opcodes::{Opcode, OpcodeCatalog};
pub use self::types::{FieldMap, History, HistoryEntry, NameRecord, Namespace, Preorder, WithHistory};

pub const BLOCKS_PER_DAY: u64 = 144;
pub const BLOCKS_PER_YEAR: u64 = 52595;

/// Blocks until an unclaimed name preorder lapses.
pub const NAME_PREORDER_EXPIRE: u64 = BLOCKS_PER_DAY;
/// Blocks until an unrevealed namespace preorder lapses.
pub const NAMESPACE_PREORDER_EXPIRE: u64 = BLOCKS_PER_DAY;
/// Blocks a revealed namespace has to become ready.
pub const NAMESPACE_REVEAL_EXPIRE: u64 = BLOCKS_PER_YEAR;
