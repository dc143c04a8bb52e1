//! Utility functions

pub mod crypto;

pub use crypto::{generate_secure_token, hash_string};
