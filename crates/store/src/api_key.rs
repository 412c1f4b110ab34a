//! API key minting and verification helpers.
//!
//! Raw keys look like `sk_live_<43 url-safe base64 chars>`. Only the hex
//! SHA-256 digest is ever stored.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const API_KEY_PREFIX: &str = "sk_live_";

/// Characters of the raw key kept in clear for display.
pub const DISPLAY_PREFIX_LEN: usize = 12;

const MIN_KEY_LEN: usize = 21;

/// Hex-encoded SHA-256 of the raw key.
pub fn hash_api_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cheap shape check performed before any lookup.
pub fn is_valid_api_key_format(key: &str) -> bool {
    key.starts_with(API_KEY_PREFIX) && key.len() >= MIN_KEY_LEN
}

/// Mint a new raw key from 32 bytes of OS randomness.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{API_KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

pub(crate) fn display_prefix(raw: &str) -> String {
    raw.chars().take(DISPLAY_PREFIX_LEN).collect()
}
