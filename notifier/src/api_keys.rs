//! API key issuing and verification.
//!
//! Keys look like `nxl_<8 hex>_<64 hex>`. The `nxl_<8 hex>` part is stored in
//! clear as an indexed lookup prefix; the full key is stored only as a
//! SHA-256 hex digest. Verification loads the (normally single) key sharing
//! the presented prefix and compares digests in constant time.

use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::models::ApiKey;
use crate::store::{Result, Store};
use crate::webhook::signature::constant_time_compare;

/// Scheme marker at the start of every key.
pub const KEY_SCHEME: &str = "nxl_";

const PREFIX_ID_LEN: usize = 8;
const SECRET_LEN: usize = 64;

/// A freshly issued key. `plaintext` is shown to the user once and never stored.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub plaintext: String,
    pub prefix: String,
    pub hash: String,
}

/// Issue a new random key.
pub fn generate() -> GeneratedKey {
    let mut rng = rand::thread_rng();
    let mut id_bytes = [0u8; PREFIX_ID_LEN / 2];
    let mut secret_bytes = [0u8; SECRET_LEN / 2];
    rng.fill_bytes(&mut id_bytes);
    rng.fill_bytes(&mut secret_bytes);

    let prefix = format!("{}{}", KEY_SCHEME, hex::encode(id_bytes));
    let plaintext = format!("{}_{}", prefix, hex::encode(secret_bytes));
    let hash = hash_key(&plaintext);

    GeneratedKey {
        plaintext,
        prefix,
        hash,
    }
}

/// SHA-256 hex digest of a plaintext key.
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Lookup prefix of a presented key, `None` when the key is malformed.
pub fn key_prefix(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(KEY_SCHEME)?;
    let (id, secret) = rest.split_once('_')?;

    let is_hex = |s: &str| s.bytes().all(|b| b.is_ascii_hexdigit());
    if id.len() != PREFIX_ID_LEN || secret.len() != SECRET_LEN || !is_hex(id) || !is_hex(secret) {
        return None;
    }

    Some(&key[..KEY_SCHEME.len() + PREFIX_ID_LEN])
}

/// Resolve a presented key to its stored record.
///
/// Returns `Ok(None)` for malformed, unknown, inactive or mismatching keys.
pub async fn verify(store: &dyn Store, presented: &str) -> Result<Option<ApiKey>> {
    let Some(prefix) = key_prefix(presented) else {
        warn!(key_length = presented.len(), "api_key_malformed");
        return Ok(None);
    };

    let presented_hash = hash_key(presented);
    let candidates = store.api_keys_by_prefix(prefix).await?;

    let Some(key) = candidates
        .into_iter()
        .find(|k| k.active && constant_time_compare(&k.key_hash, &presented_hash))
    else {
        warn!(prefix = prefix, "api_key_rejected");
        return Ok(None);
    };

    if let Err(e) = store.touch_api_key(key.id, Utc::now()).await {
        warn!(key_id = %key.id, error = %e, "api_key_touch_failed");
    }

    info!(key_id = %key.id, prefix = prefix, "api_key_verified");
    Ok(Some(key))
}
