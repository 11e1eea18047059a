use std::collections::HashMap;
use std::collections::hash_map::Entry;

use sha1::{Digest, Sha1};
use tracing::warn;

fn key_digest(key: u64) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(key.to_be_bytes());
    hasher.finalize().into()
}

/// Connection token: the most significant 32 bits of SHA-1(key).
pub fn key_token(key: u64) -> u32 {
    let [a, b, c, d, ..] = key_digest(key);
    u32::from_be_bytes([a, b, c, d])
}

/// Initial data sequence number: the least significant 64 bits of SHA-1(key).
pub fn key_idsn(key: u64) -> u64 {
    let [_, _, _, _, _, _, _, _, _, _, _, _, idsn @ ..] = key_digest(key);
    u64::from_be_bytes(idsn)
}

/// Token to meta-connection index, shared by every subflow of a session.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: HashMap<u32, u32>,
}

impl TokenRegistry {
    /// Registers `token` for `meta`. A token already owned by another meta
    /// connection keeps its first owner.
    pub fn register(&mut self, token: u32, meta: u32) -> bool {
        match self.tokens.entry(token) {
            Entry::Vacant(slot) => {
                slot.insert(meta);
                true
            }
            Entry::Occupied(slot) if *slot.get() == meta => true,
            Entry::Occupied(slot) => {
                warn!(
                    token = format_args!("{token:#010x}"),
                    owner = *slot.get(),
                    rejected = meta,
                    "MPTCP token collision"
                );
                false
            }
        }
    }

    pub fn lookup(&self, token: u32) -> Option<u32> {
        self.tokens.get(&token).copied()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }
}
