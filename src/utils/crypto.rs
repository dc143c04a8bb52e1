//! Cryptographic utilities

use rand::Rng;
use sha2::{Digest, Sha256};

/// Random alphanumeric token from the thread-local CSPRNG (ChaCha seeded
/// from the OS). Used for scratch directory and container names.
pub fn generate_secure_token(length: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();

    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Hex SHA-256 of a string. Logged in place of submitted source.
pub fn hash_string(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
