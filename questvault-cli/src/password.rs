//! Password digests for accounts created from the command line.
//!
//! Format: `sha256$<salt>$<hex digest of salt || password>`.

use sha2::{Digest, Sha256};

const SCHEME: &str = "sha256";

/// Digest `password` with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    format!("{}${}${}", SCHEME, salt, digest(&salt, password))
}

/// Check `password` against a stored digest.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(SCHEME), Some(salt), Some(expected)) => digest(salt, password) == expected,
        _ => false,
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
