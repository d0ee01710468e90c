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

use crate::error::Result;
use crate::locking::hashing::{LockId, key_digest, to_lock_id};

/// One line of `hash` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHash {
    pub key: String,
    pub id: LockId,
    pub digest: String,
}

impl KeyHash {
    pub fn compute(key: &str) -> Self {
        Self {
            key: key.to_string(),
            id: to_lock_id(key),
            digest: hex::encode(key_digest(key)),
        }
    }
}

pub struct HashCommand;

impl HashCommand {
    pub fn new() -> Result<Self> {
        Ok(Self)
    }

    pub fn execute(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            let hash = KeyHash::compute(key);
            println!("{}\t{}\t{}", hash.key, hash.id, hash.digest);
        }
        Ok(())
    }
}
