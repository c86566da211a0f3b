//! Deterministic virtual identities for synthetic list entries.
//!
//! An id is SHA-256 over `"<namespace>:<identifier>"`, truncated to 16 bytes,
//! with the version nibble forced to 5 and the RFC 4122 variant bits set.
//! Authenticated Minecraft accounts carry version 4 ids and offline-mode
//! players version 3 ids, so a synthetic id never collides with either.
//!
//! The memo table only saves hashing work. Clearing it never changes the id
//! produced for an identifier.

use scc::HashMap;
use sha2::{Digest, Sha256};
use uuid::{Uuid, Variant};

pub const NAMESPACE: &str = "crosstab";

const VIRTUAL_VERSION: usize = 5;

/// A synthetic unique id plus the identifier it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualIdentity {
    pub id: Uuid,
    pub identifier: String,
}

/// Pure derivation, no memoization.
pub fn derive(namespace: &str, identifier: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b":");
    hasher.update(identifier.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    bytes[6] = (bytes[6] & 0x0f) | 0x50;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}

/// Whether an id has the shape this module mints.
pub fn has_virtual_shape(id: &Uuid) -> bool {
    id.get_version_num() == VIRTUAL_VERSION && id.get_variant() == Variant::RFC4122
}

/// Memoizing identity generator, safe to share between any number of callers.
pub struct IdentityGenerator {
    namespace: String,
    memo: HashMap<String, Uuid>,
    minted: HashMap<Uuid, String>,
}

impl IdentityGenerator {
    pub fn new() -> Self {
        Self::with_namespace(NAMESPACE)
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            memo: HashMap::new(),
            minted: HashMap::new(),
        }
    }

    pub fn identity_for(&self, identifier: &str) -> VirtualIdentity {
        let id = match self.memo.read_sync(identifier, |_, id| *id) {
            Some(id) => id,
            None => {
                let id = derive(&self.namespace, identifier);
                // A concurrent caller may have inserted the same value first.
                let _ = self.memo.insert_sync(identifier.to_string(), id);
                let _ = self.minted.insert_sync(id, identifier.to_string());
                id
            }
        };
        VirtualIdentity {
            id,
            identifier: identifier.to_string(),
        }
    }

    pub fn player_identity(&self, player: &Uuid, server: &str) -> VirtualIdentity {
        self.identity_for(&format!("player_{player}_{server}"))
    }

    pub fn header_identity(&self, server: &str) -> VirtualIdentity {
        self.identity_for(&format!("server_header_{server}"))
    }

    pub fn separator_identity(&self, kind: &str) -> VirtualIdentity {
        self.identity_for(&format!("separator_{kind}"))
    }

    /// True for ids this generator has handed out since the last clear.
    pub fn is_virtual(&self, id: &Uuid) -> bool {
        has_virtual_shape(id) && self.minted.read_sync(id, |_, _| ()).is_some()
    }

    pub fn cache_len(&self) -> usize {
        self.memo.len()
    }

    pub fn clear_cache(&self) {
        self.memo.clear_sync();
        self.minted.clear_sync();
    }
}

impl Default for IdentityGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_identity_is_deterministic() {
        let generator = IdentityGenerator::new();
        let first = generator.identity_for("server_header_survival");
        let second = generator.identity_for("server_header_survival");
        assert_eq!(first, second);
        assert_eq!(first.identifier, "server_header_survival");
        assert_eq!(generator.cache_len(), 1);
    }

    #[test]
    fn test_clearing_memo_keeps_outputs() {
        let generator = IdentityGenerator::new();
        let before = generator.identity_for("separator_start").id;
        generator.clear_cache();
        assert_eq!(generator.cache_len(), 0);
        assert_eq!(generator.identity_for("separator_start").id, before);
    }

    #[test]
    fn test_identity_survives_restart() {
        // A fresh generator stands in for a new process.
        let a = IdentityGenerator::new().identity_for("player_x_lobby").id;
        let b = IdentityGenerator::new().identity_for("player_x_lobby").id;
        assert_eq!(a, b);
        assert_eq!(a, derive(NAMESPACE, "player_x_lobby"));
    }

    #[test]
    fn test_distinct_identifiers_and_namespaces() {
        let generator = IdentityGenerator::new();
        assert_ne!(
            generator.identity_for("a").id,
            generator.identity_for("b").id
        );
        assert_ne!(derive("one", "a"), derive("two", "a"));
    }

    #[test]
    fn test_version_and_variant_bits() {
        for identifier in ["", "a", "server_header_lobby", "ünïcödé"] {
            let id = derive(NAMESPACE, identifier);
            assert_eq!(id.get_version_num(), 5);
            assert_eq!(id.get_variant(), Variant::RFC4122);
            assert!(has_virtual_shape(&id));
        }
        // Mojang account ids are version 4.
        let real = Uuid::parse_str("069a79f4-44e9-4726-a5be-fca90e38aaf5").unwrap();
        assert!(!has_virtual_shape(&real));
    }

    #[test]
    fn test_is_virtual() {
        let generator = IdentityGenerator::new();
        let minted = generator.header_identity("survival").id;
        assert!(generator.is_virtual(&minted));
        assert!(!generator.is_virtual(&derive(NAMESPACE, "never_minted")));
        assert!(!generator.is_virtual(&Uuid::nil()));
    }

    #[test]
    fn test_helper_identifiers() {
        let generator = IdentityGenerator::new();
        let player = Uuid::from_u128(42);
        assert_eq!(
            generator.player_identity(&player, "lobby").identifier,
            format!("player_{player}_lobby")
        );
        assert_eq!(
            generator.separator_identity("start").identifier,
            "separator_start"
        );
    }

    #[test]
    fn test_concurrent_callers_agree() {
        let generator = Arc::new(IdentityGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|i| generator.identity_for(&format!("id{i}")).id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for result in &results[1..] {
            assert_eq!(result, &results[0]);
        }
        assert_eq!(generator.cache_len(), 100);
    }
}
