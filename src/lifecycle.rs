//! Persistence boundary hooks for `BackendConfig`.
//!
//! Repositories call `seal_for_write` right before handing a row to storage
//! and `open_after_load` right after reading one. Nothing else converts
//! between plaintext and at-rest `auth`.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::Result;
use crate::key_ring::KeyEpoch;
use crate::model::{AuthSecret, BackendConfig, StoredBackendConfig};
use crate::secret_cipher::SecretCipher;

/// Canonical string form of an `auth` map (keys sorted)
pub fn canonicalize(values: &Map<String, Value>) -> Result<String> {
    Ok(serde_json::to_string(values)?)
}

/// Why a recovered `auth` plaintext could not become a map
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedAuth {
    #[error("auth is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("auth is a JSON {0}, not an object")]
    NotAnObject(&'static str),
}

/// Parse the canonical form back into a map. An empty string is an
/// empty map; anything that is not a JSON object is an error.
pub fn parse_canonical(plaintext: &str) -> std::result::Result<Map<String, Value>, MalformedAuth> {
    if plaintext.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(plaintext) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(MalformedAuth::NotAnObject(json_kind(&other))),
        Err(e) => Err(MalformedAuth::InvalidJson(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Pre-write hook: build the storage row, encrypting `auth` only if it
/// changed since it was loaded.
pub fn seal_for_write(record: &BackendConfig, cipher: &SecretCipher) -> Result<StoredBackendConfig> {
    let auth = match record.auth.stored() {
        Some(stored) if !record.auth.is_modified() => stored.to_string(),
        _ => {
            let envelope = cipher.encrypt(&canonicalize(record.auth.values())?)?;
            debug!(record_id = %record.id, "Encrypted auth for write");
            envelope
        }
    };

    Ok(StoredBackendConfig {
        id: record.id,
        owner_id: record.owner,
        flow_id: record.flow,
        name: record.name.clone(),
        base_url: record.base_url.clone(),
        timeout_ms: record.timeout,
        retries: record.retries,
        default_headers: record.default_headers.clone(),
        auth_type: record.auth_type,
        auth,
        compression: record.compression,
        proxy: record.proxy.clone(),
        tls_skip_verify: record.tls_skip_verify,
        is_active: record.is_active,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}

/// Post-load hook: recover the plaintext `auth` map. Never fails; an
/// unrecoverable secret becomes an empty map and the stored value is kept
/// so an unmodified re-save does not destroy it.
pub fn open_after_load(row: StoredBackendConfig, cipher: &SecretCipher) -> BackendConfig {
    let values = open_auth(&row, cipher);
    let auth = AuthSecret::loaded(values, row.auth);

    BackendConfig {
        id: row.id,
        owner: row.owner_id,
        flow: row.flow_id,
        name: row.name,
        base_url: row.base_url,
        timeout: row.timeout_ms,
        retries: row.retries,
        default_headers: row.default_headers,
        auth_type: row.auth_type,
        auth,
        compression: row.compression,
        proxy: row.proxy,
        tls_skip_verify: row.tls_skip_verify,
        is_active: row.is_active,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn open_auth(row: &StoredBackendConfig, cipher: &SecretCipher) -> Map<String, Value> {
    let opened = match cipher.try_decrypt(&row.auth) {
        Ok(opened) => opened,
        Err(failure) => {
            warn!(
                record_id = %row.id,
                flow_id = %row.flow_id,
                keys = ?cipher.key_ring().describe(),
                error = %failure,
                "Could not decrypt backend config auth, using empty auth"
            );
            return Map::new();
        }
    };

    match parse_canonical(&opened.plaintext) {
        Ok(values) => values,
        Err(reason) => {
            warn!(
                record_id = %row.id,
                flow_id = %row.flow_id,
                epoch = ?opened.epoch,
                error = %reason,
                "Decrypted auth is malformed, using empty auth"
            );
            Map::new()
        }
    }
}

/// What a rotation sweep should do with one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reseal {
    /// Already encrypted under the current key
    Current,
    /// New `auth` envelope under the current key. Only the `auth` column is
    /// written back, and only if it still holds the value that was read.
    Rewrite(String),
    /// Cannot be recovered with the configured keys; left untouched
    Unrecoverable,
}

/// Decide how to bring a row's `auth` under the current key. Rows written
/// under another key or never encrypted get a fresh envelope.
pub fn reseal_row(row: &StoredBackendConfig, cipher: &SecretCipher) -> Result<Reseal> {
    let opened = match cipher.try_decrypt(&row.auth) {
        Ok(opened) => opened,
        Err(failure) => {
            warn!(record_id = %row.id, error = %failure, "Skipping unrecoverable auth during reseal");
            return Ok(Reseal::Unrecoverable);
        }
    };

    if opened.epoch == Some(KeyEpoch::Current) {
        return Ok(Reseal::Current);
    }

    let values = match parse_canonical(&opened.plaintext) {
        Ok(values) => values,
        Err(reason) => {
            warn!(record_id = %row.id, error = %reason, "Skipping malformed auth during reseal");
            return Ok(Reseal::Unrecoverable);
        }
    };

    Ok(Reseal::Rewrite(cipher.encrypt(&canonicalize(&values)?)?))
}
