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

//! Name hashing helpers.

use sha2::{Digest, Sha256};

/// First 128 bits of the double-SHA256 of `data`, as lowercase hex.
/// This is the `name_hash128` column used for reverse lookups.
pub fn hash256_trunc128(data: &str) -> String {
	let first = Sha256::digest(data.as_bytes());
	let second = Sha256::digest(first);
	hex::encode(&second[..16])
}

/// Extract the namespace ID from a fully-qualified name ("id.ns" -> "ns").
pub fn namespace_from_name(name: &str) -> &str {
	match name.rfind('.') {
		Some(idx) => &name[idx + 1..],
		None => name,
	}
}
