//! Memoization of SCRAM's salted-password derivation.
//!
//! The iterated-HMAC derivation dominates authentication latency, so a
//! client may cache the derived key between attempts. An entry is keyed
//! by an id computed over the mechanism name, the iteration count and
//! the salt; whenever the server changes any of those, the id changes
//! and the stale entry is dropped.

use std::collections::HashMap;
use std::sync::Mutex;

/// A cache for derived salted passwords.
///
/// Implementations must be safe to share between concurrently
/// authenticating sessions. At most one entry is live per identity.
pub trait SaltedPasswordCache: Send + Sync {
    /// Returns the salted password stored for `identity`, provided its
    /// id matches. An entry with a different id must be discarded.
    fn get(&self, identity: &str, id: &str) -> Option<Vec<u8>>;

    /// Stores the salted password for `identity`, replacing any
    /// previous entry.
    fn store(&self, identity: &str, id: &str, salted_password: &[u8]);

    /// Drops the entry for `identity`.
    fn clear(&self, identity: &str);
}

struct Entry {
    id: String,
    salted_password: Vec<u8>,
}

/// An in-memory [`SaltedPasswordCache`].
#[derive(Default)]
pub struct InMemorySaltedPasswordCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemorySaltedPasswordCache {
    /// Creates an empty cache.
    pub fn new() -> InMemorySaltedPasswordCache {
        InMemorySaltedPasswordCache::default()
    }
}

impl SaltedPasswordCache for InMemorySaltedPasswordCache {
    fn get(&self, identity: &str, id: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(identity) {
            Some(entry) if entry.id == id => Some(entry.salted_password.clone()),
            Some(_) => {
                entries.remove(identity);
                None
            }
            None => None,
        }
    }

    fn store(&self, identity: &str, id: &str, salted_password: &[u8]) {
        self.entries.lock().unwrap().insert(
            identity.to_owned(),
            Entry {
                id: id.to_owned(),
                salted_password: salted_password.to_vec(),
            },
        );
    }

    fn clear(&self, identity: &str) {
        self.entries.lock().unwrap().remove(identity);
    }
}
