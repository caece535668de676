//! Client identity: tripcodes, address hashes, and privileged keys.

use crate::config::{AccessConfig, Credential};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tenvis_relay_core::Level;

const TRIP_LENGTH: usize = 6;
const HASH_LENGTH: usize = 15;
const SALT_BYTES: usize = 16;

/// Public tripcode for a secret key.
#[must_use]
pub fn tripcode(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut trip = STANDARD.encode(digest);
    trip.truncate(TRIP_LENGTH);
    trip
}

/// Hashes network addresses so moderators can ban without seeing them.
#[derive(Debug, Clone)]
pub struct AddressHasher {
    salt: String,
}

impl AddressHasher {
    #[must_use]
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// A hasher with a salt drawn from the OS generator.
    #[must_use]
    pub fn random() -> Self {
        let mut salt = [0u8; SALT_BYTES];
        OsRng.fill_bytes(&mut salt);
        Self::new(STANDARD.encode(salt))
    }

    #[must_use]
    pub fn hash(&self, address: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(address.as_bytes());
        let mut hash = URL_SAFE_NO_PAD.encode(hasher.finalize());
        hash.truncate(HASH_LENGTH);
        hash
    }
}

/// Keys that grant elevated levels on join.
#[derive(Debug, Clone, Default)]
pub struct AccessList {
    admin: Option<Credential>,
    moderators: Vec<Credential>,
}

impl AccessList {
    #[must_use]
    pub fn new(config: &AccessConfig) -> Self {
        Self {
            admin: config.admin.clone(),
            moderators: config.moderators.clone(),
        }
    }

    /// Level and trip for a join carrying `key`.
    ///
    /// Unknown keys yield a derived tripcode at user level; no key yields no
    /// trip at all.
    #[must_use]
    pub fn resolve(&self, key: Option<&str>) -> (Level, Option<String>) {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return (Level::USER, None);
        };
        if let Some(admin) = self.admin.as_ref().filter(|c| c.key == key) {
            return (Level::ADMIN, Some(admin.trip.clone()));
        }
        if let Some(moderator) = self.moderators.iter().find(|c| c.key == key) {
            return (Level::MODERATOR, Some(moderator.trip.clone()));
        }
        (Level::USER, Some(tripcode(key)))
    }
}
