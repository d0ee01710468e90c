// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Deterministic mapping from business keys to advisory lock identifiers.
//!
//! Advisory lock services address locks by a signed 64-bit integer, while
//! applications think in keys such as `stock:ABC`. Keys are hashed with an
//! 8-byte BLAKE2b digest so that the identifier is identical across
//! processes, hosts and releases.

use blake2::Blake2b;
use digest::Digest;
use digest::consts::U8;
use std::fmt;

type Blake2b64 = Blake2b<U8>;

/// Identifier of a lock inside the external coordination service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(i64);

impl LockId {
    pub const fn from_raw(value: i64) -> Self {
        Self(value)
    }

    pub fn from_key(key: &str) -> Self {
        to_lock_id(key)
    }

    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<LockId> for i64 {
    fn from(id: LockId) -> Self {
        id.0
    }
}

/// Returns the raw 8-byte digest of `key`.
pub fn key_digest(key: &str) -> [u8; 8] {
    let digest = Blake2b64::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest);
    bytes
}

/// Maps `key` onto the signed 64-bit range.
///
/// The digest is read as a big-endian `u64`; values above `i64::MAX` wrap
/// into the negative half, which is the same as subtracting 2^64.
pub fn to_lock_id(key: &str) -> LockId {
    let unsigned = u64::from_be_bytes(key_digest(key));
    LockId(unsigned as i64)
}
