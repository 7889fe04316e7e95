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

//! The opcode catalog: per-opcode classification, field sets and the
//! sequence graph of legal successor operations.
//!
//! The catalog is a registry object handed to the engine at construction.
//! Any lookup for an opcode that was never registered fails with
//! `UnknownOpcode`.

use std::collections::HashMap;
use std::fmt;

use crate::error::{NamedbError, Result};
use crate::{NAMESPACE_PREORDER_EXPIRE, NAME_PREORDER_EXPIRE};

/// All operations understood by the state machine.  The `op` column stores
/// the single-character wire code of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
	NamePreorder,
	NameRegistration,
	NameUpdate,
	NameTransfer,
	NameRenewal,
	NameRevoke,
	NameImport,
	NamespacePreorder,
	NamespaceReveal,
	NamespaceReady,
}

impl Opcode {
	pub const ALL: [Opcode; 10] = [
		Opcode::NamePreorder,
		Opcode::NameRegistration,
		Opcode::NameUpdate,
		Opcode::NameTransfer,
		Opcode::NameRenewal,
		Opcode::NameRevoke,
		Opcode::NameImport,
		Opcode::NamespacePreorder,
		Opcode::NamespaceReveal,
		Opcode::NamespaceReady,
	];

	pub fn name(self) -> &'static str {
		match self {
			Opcode::NamePreorder => "NAME_PREORDER",
			Opcode::NameRegistration => "NAME_REGISTRATION",
			Opcode::NameUpdate => "NAME_UPDATE",
			Opcode::NameTransfer => "NAME_TRANSFER",
			Opcode::NameRenewal => "NAME_RENEWAL",
			Opcode::NameRevoke => "NAME_REVOKE",
			Opcode::NameImport => "NAME_IMPORT",
			Opcode::NamespacePreorder => "NAMESPACE_PREORDER",
			Opcode::NamespaceReveal => "NAMESPACE_REVEAL",
			Opcode::NamespaceReady => "NAMESPACE_READY",
		}
	}

	/// The serialized wire code.  NAME_REGISTRATION and NAME_RENEWAL share
	/// one code; `from_wire` resolves the ambiguity to NAME_REGISTRATION.
	pub fn wire(self) -> &'static str {
		match self {
			Opcode::NamePreorder => "?",
			Opcode::NameRegistration | Opcode::NameRenewal => ":",
			Opcode::NameUpdate => "+",
			Opcode::NameTransfer => ">",
			Opcode::NameRevoke => "~",
			Opcode::NameImport => ";",
			Opcode::NamespacePreorder => "*",
			Opcode::NamespaceReveal => "&",
			Opcode::NamespaceReady => "!",
		}
	}

	pub fn from_name(name: &str) -> Option<Opcode> {
		Opcode::ALL.iter().copied().find(|op| op.name() == name)
	}

	pub fn from_wire(wire: &str) -> Option<Opcode> {
		Opcode::ALL.iter().copied().find(|op| op.wire() == wire)
	}
}

impl fmt::Display for Opcode {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.name())
	}
}

/// The set of fields an opcode may change.  `All` forces full-snapshot
/// history entries for records produced by the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSet {
	All,
	Fields(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeClass {
	Preorder,
	Creation,
	Transition,
	Import,
}

/// Which of the two stateful entities an opcode acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
	Name,
	Namespace,
}

impl Entity {
	pub fn table(self) -> &'static str {
		match self {
			Entity::Name => crate::database::NAME_RECORDS_TABLE,
			Entity::Namespace => crate::database::NAMESPACES_TABLE,
		}
	}

	/// The history-id column of the entity's table.
	pub fn id_field(self) -> &'static str {
		match self {
			Entity::Name => "name",
			Entity::Namespace => "namespace_id",
		}
	}
}

/// Everything the engine needs to know about one opcode.
#[derive(Debug, Clone)]
pub struct OpcodeSpec {
	pub class: OpcodeClass,
	pub entity: Entity,
	pub mutate_fields: FieldSet,
	pub backup_fields: &'static [&'static str],
	pub consensus_fields: &'static [&'static str],
	pub successors: &'static [Opcode],
	/// Preorder opcodes only: blocks until the preorder lapses.
	pub preorder_expiry: Option<u64>,
}

pub const PREORDER_FIELDS: &[&str] = &[
	"preorder_hash",
	"consensus_hash",
	"sender",
	"sender_pubkey",
	"address",
	"block_number",
	"op",
	"op_fee",
	"txid",
	"vtxindex",
];

pub const NAME_FIELDS: &[&str] = &[
	"name",
	"preorder_hash",
	"name_hash128",
	"namespace_id",
	"namespace_block_number",
	"value_hash",
	"sender",
	"sender_pubkey",
	"address",
	"block_number",
	"preorder_block_number",
	"first_registered",
	"last_renewed",
	"revoked",
	"op",
	"txid",
	"vtxindex",
	"op_fee",
	"importer",
	"importer_address",
	"consensus_hash",
];

pub const NAMESPACE_FIELDS: &[&str] = &[
	"namespace_id",
	"preorder_hash",
	"version",
	"sender",
	"sender_pubkey",
	"address",
	"recipient",
	"recipient_address",
	"block_number",
	"reveal_block",
	"ready_block",
	"op",
	"op_fee",
	"txid",
	"vtxindex",
	"lifetime",
	"coeff",
	"base",
	"buckets",
	"nonalpha_discount",
	"no_vowel_discount",
];

const NAME_UPDATE_FIELDS: &[&str] = &["op", "txid", "vtxindex", "op_fee", "value_hash", "consensus_hash"];
const NAME_TRANSFER_FIELDS: &[&str] =
	&["op", "txid", "vtxindex", "op_fee", "sender", "sender_pubkey", "address", "value_hash", "consensus_hash"];
const NAME_RENEWAL_FIELDS: &[&str] = &["op", "txid", "vtxindex", "op_fee", "last_renewed"];
const NAME_REVOKE_FIELDS: &[&str] = &["op", "txid", "vtxindex", "op_fee", "revoked", "value_hash"];
const NAMESPACE_READY_FIELDS: &[&str] = &["op", "txid", "vtxindex", "op_fee", "ready_block"];

const NAME_STATE_SUCCESSORS: &[Opcode] =
	&[Opcode::NameUpdate, Opcode::NameTransfer, Opcode::NameRenewal, Opcode::NameRevoke];
const NAME_IMPORT_SUCCESSORS: &[Opcode] = &[
	Opcode::NameImport,
	Opcode::NamespaceReady,
	Opcode::NameUpdate,
	Opcode::NameTransfer,
	Opcode::NameRenewal,
	Opcode::NameRevoke,
];

/// Registry of opcode specifications.
#[derive(Debug, Clone, Default)]
pub struct OpcodeCatalog {
	specs: HashMap<Opcode, OpcodeSpec>,
}

impl OpcodeCatalog {
	/// An empty catalog; every lookup fails until opcodes are registered.
	pub fn new() -> Self {
		Self::default()
	}

	/// The full protocol catalog.
	pub fn standard() -> Self {
		let mut catalog = Self::new();

		catalog.register(
			Opcode::NamePreorder,
			OpcodeSpec {
				class: OpcodeClass::Preorder,
				entity: Entity::Name,
				mutate_fields: FieldSet::All,
				backup_fields: PREORDER_FIELDS,
				consensus_fields: PREORDER_FIELDS,
				successors: &[Opcode::NameRegistration],
				preorder_expiry: Some(NAME_PREORDER_EXPIRE),
			},
		);
		catalog.register(
			Opcode::NameRegistration,
			OpcodeSpec {
				class: OpcodeClass::Creation,
				entity: Entity::Name,
				mutate_fields: FieldSet::All,
				backup_fields: NAME_FIELDS,
				consensus_fields: NAME_FIELDS,
				successors: NAME_STATE_SUCCESSORS,
				preorder_expiry: None,
			},
		);
		catalog.register(
			Opcode::NameUpdate,
			OpcodeSpec {
				class: OpcodeClass::Transition,
				entity: Entity::Name,
				mutate_fields: FieldSet::Fields(NAME_UPDATE_FIELDS),
				backup_fields: NAME_UPDATE_FIELDS,
				consensus_fields: NAME_FIELDS,
				successors: NAME_STATE_SUCCESSORS,
				preorder_expiry: None,
			},
		);
		catalog.register(
			Opcode::NameTransfer,
			OpcodeSpec {
				class: OpcodeClass::Transition,
				entity: Entity::Name,
				mutate_fields: FieldSet::Fields(NAME_TRANSFER_FIELDS),
				backup_fields: NAME_TRANSFER_FIELDS,
				consensus_fields: NAME_FIELDS,
				successors: NAME_STATE_SUCCESSORS,
				preorder_expiry: None,
			},
		);
		catalog.register(
			Opcode::NameRenewal,
			OpcodeSpec {
				class: OpcodeClass::Transition,
				entity: Entity::Name,
				mutate_fields: FieldSet::Fields(NAME_RENEWAL_FIELDS),
				backup_fields: NAME_RENEWAL_FIELDS,
				consensus_fields: NAME_FIELDS,
				successors: NAME_STATE_SUCCESSORS,
				preorder_expiry: None,
			},
		);
		catalog.register(
			Opcode::NameRevoke,
			OpcodeSpec {
				class: OpcodeClass::Transition,
				entity: Entity::Name,
				mutate_fields: FieldSet::Fields(NAME_REVOKE_FIELDS),
				backup_fields: NAME_REVOKE_FIELDS,
				consensus_fields: NAME_FIELDS,
				successors: &[],
				preorder_expiry: None,
			},
		);
		catalog.register(
			Opcode::NameImport,
			OpcodeSpec {
				class: OpcodeClass::Import,
				entity: Entity::Name,
				mutate_fields: FieldSet::All,
				backup_fields: NAME_FIELDS,
				consensus_fields: NAME_FIELDS,
				successors: NAME_IMPORT_SUCCESSORS,
				preorder_expiry: None,
			},
		);
		catalog.register(
			Opcode::NamespacePreorder,
			OpcodeSpec {
				class: OpcodeClass::Preorder,
				entity: Entity::Namespace,
				mutate_fields: FieldSet::All,
				backup_fields: PREORDER_FIELDS,
				consensus_fields: PREORDER_FIELDS,
				successors: &[Opcode::NamespaceReveal],
				preorder_expiry: Some(NAMESPACE_PREORDER_EXPIRE),
			},
		);
		catalog.register(
			Opcode::NamespaceReveal,
			OpcodeSpec {
				class: OpcodeClass::Creation,
				entity: Entity::Namespace,
				mutate_fields: FieldSet::All,
				backup_fields: NAMESPACE_FIELDS,
				consensus_fields: NAMESPACE_FIELDS,
				successors: &[Opcode::NamespaceReady, Opcode::NameImport],
				preorder_expiry: None,
			},
		);
		catalog.register(
			Opcode::NamespaceReady,
			OpcodeSpec {
				class: OpcodeClass::Transition,
				entity: Entity::Namespace,
				mutate_fields: FieldSet::Fields(NAMESPACE_READY_FIELDS),
				backup_fields: NAMESPACE_READY_FIELDS,
				consensus_fields: NAMESPACE_FIELDS,
				successors: &[],
				preorder_expiry: None,
			},
		);

		catalog
	}

	pub fn register(&mut self, opcode: Opcode, spec: OpcodeSpec) {
		self.specs.insert(opcode, spec);
	}

	fn spec(&self, opcode: Opcode) -> Result<&OpcodeSpec> {
		self.specs.get(&opcode).ok_or_else(|| NamedbError::UnknownOpcode(opcode.name().to_string()))
	}

	/// Resolve a wire code into a registered opcode.
	pub fn opcode(&self, wire: &str) -> Result<Opcode> {
		let opcode = Opcode::from_wire(wire).ok_or_else(|| NamedbError::UnknownOpcode(wire.to_string()))?;
		self.spec(opcode)?;
		Ok(opcode)
	}

	/// Whether the sequence graph permits `next` directly after `cur`.
	pub fn allowed_next(&self, cur: Opcode, next: Opcode) -> Result<bool> {
		self.spec(next)?;
		Ok(self.spec(cur)?.successors.contains(&next))
	}

	pub fn mutate_fields(&self, opcode: Opcode) -> Result<FieldSet> {
		Ok(self.spec(opcode)?.mutate_fields)
	}

	pub fn backup_fields(&self, opcode: Opcode) -> Result<&'static [&'static str]> {
		Ok(self.spec(opcode)?.backup_fields)
	}

	pub fn consensus_fields(&self, opcode: Opcode) -> Result<&'static [&'static str]> {
		Ok(self.spec(opcode)?.consensus_fields)
	}

	/// The fields an operation's payload must carry: the mutate set, or the
	/// full consensus set when the mutate set is `All`.
	pub fn required_fields(&self, opcode: Opcode) -> Result<&'static [&'static str]> {
		let spec = self.spec(opcode)?;
		match spec.mutate_fields {
			FieldSet::All => Ok(spec.consensus_fields),
			FieldSet::Fields(fields) => Ok(fields),
		}
	}

	pub fn entity(&self, opcode: Opcode) -> Result<Entity> {
		Ok(self.spec(opcode)?.entity)
	}

	pub fn is_preorder(&self, opcode: Opcode) -> Result<bool> {
		Ok(self.spec(opcode)?.class == OpcodeClass::Preorder)
	}

	pub fn is_creation(&self, opcode: Opcode) -> Result<bool> {
		Ok(self.spec(opcode)?.class == OpcodeClass::Creation)
	}

	pub fn is_transition(&self, opcode: Opcode) -> Result<bool> {
		Ok(self.spec(opcode)?.class == OpcodeClass::Transition)
	}

	pub fn is_import(&self, opcode: Opcode) -> Result<bool> {
		Ok(self.spec(opcode)?.class == OpcodeClass::Import)
	}

	/// Blocks until a preorder made by `opcode` lapses.
	pub fn preorder_expiry(&self, opcode: Opcode) -> Result<u64> {
		self.spec(opcode)?
			.preorder_expiry
			.ok_or_else(|| NamedbError::Invariant(format!("'{}' has no preorder window", opcode)))
	}
}
