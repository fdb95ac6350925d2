use std::collections::HashMap;

use util::sync::Mutex;

/// CredentialsAuthority answers local credential checks during request
/// validation: whether a username is known here, and the HMAC key to verify
/// MESSAGE-INTEGRITY with. For short-term credentials the stack passes the
/// fragment before `:`; the key is the password bytes. Long-term keys are
/// `md5(username ":" realm ":" password)`.
pub trait CredentialsAuthority {
    fn has_username(&self, username: &str) -> bool;
    fn key_for(&self, username: &str) -> Option<Vec<u8>>;
}

/// A table-backed authority, mostly useful for servers with a fixed user set
/// and for tests.
#[derive(Default)]
pub struct StaticCredentialsAuthority {
    keys: Mutex<HashMap<String, Vec<u8>>>,
}

impl StaticCredentialsAuthority {
    pub fn new() -> Self {
        StaticCredentialsAuthority::default()
    }

    /// Registers a short-term credential: the key is the password itself.
    pub fn add_short_term(&self, username: &str, password: &str) {
        let mut keys = self.keys.lock();
        keys.insert(username.to_owned(), password.as_bytes().to_vec());
    }

    /// Registers a long-term credential with the MD5-derived key.
    pub fn add_long_term(&self, username: &str, realm: &str, password: &str) {
        let integrity = stun::integrity::MessageIntegrity::new_long_term_integrity(
            username.to_owned(),
            realm.to_owned(),
            password.to_owned(),
        );
        let mut keys = self.keys.lock();
        keys.insert(username.to_owned(), integrity.0);
    }

    pub fn remove(&self, username: &str) {
        let mut keys = self.keys.lock();
        keys.remove(username);
    }
}

impl CredentialsAuthority for StaticCredentialsAuthority {
    fn has_username(&self, username: &str) -> bool {
        let keys = self.keys.lock();
        keys.contains_key(username)
    }

    fn key_for(&self, username: &str) -> Option<Vec<u8>> {
        let keys = self.keys.lock();
        keys.get(username).cloned()
    }
}
