//! Backend integration config records
//!
//! `BackendConfig` is what application code sees: `auth` is always a
//! plaintext map. `StoredBackendConfig` is what storage sees: `auth` is
//! always the at-rest string. The lifecycle hooks are the only bridge.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::VaultError;

/// Default request timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// How requests to the backend authenticate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AuthType {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "bearer")]
    Bearer,
    #[serde(rename = "basic")]
    Basic,
    #[serde(rename = "apiKey")]
    ApiKey,
    #[serde(rename = "oauth2_cc")]
    OAuth2ClientCredentials,
    #[serde(rename = "cookie")]
    Cookie,
    #[serde(rename = "custom")]
    Custom,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::None => "none",
            AuthType::Bearer => "bearer",
            AuthType::Basic => "basic",
            AuthType::ApiKey => "apiKey",
            AuthType::OAuth2ClientCredentials => "oauth2_cc",
            AuthType::Cookie => "cookie",
            AuthType::Custom => "custom",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(AuthType::None),
            "bearer" => Ok(AuthType::Bearer),
            "basic" => Ok(AuthType::Basic),
            "apiKey" => Ok(AuthType::ApiKey),
            "oauth2_cc" => Ok(AuthType::OAuth2ClientCredentials),
            "cookie" => Ok(AuthType::Cookie),
            "custom" => Ok(AuthType::Custom),
            other => Err(VaultError::Serialization(format!("Unknown auth type: {}", other))),
        }
    }
}

/// One default request header; order is preserved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
}

/// The plaintext `auth` map plus what is needed to write it back.
///
/// Any mutable access marks the secret as modified; only modified secrets
/// are re-encrypted on the next write.
#[derive(Clone, Default)]
pub struct AuthSecret {
    values: Map<String, Value>,
    /// At-rest form as last read from or written to storage
    stored: Option<String>,
    modified: bool,
}

impl AuthSecret {
    /// A fresh secret, not yet persisted
    pub fn new(values: Map<String, Value>) -> Self {
        Self {
            values,
            stored: None,
            modified: true,
        }
    }

    /// A secret recovered from storage, unmodified
    pub(crate) fn loaded(values: Map<String, Value>, stored: String) -> Self {
        Self {
            values,
            stored: Some(stored),
            modified: false,
        }
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace the whole map
    pub fn set(&mut self, values: Map<String, Value>) {
        self.values = values;
        self.modified = true;
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.modified = true;
        self.values.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.modified = true;
        self.values.remove(key)
    }

    /// Mutable access to the map; always counts as a modification
    pub fn values_mut(&mut self) -> &mut Map<String, Value> {
        self.modified = true;
        &mut self.values
    }

    /// Force re-encryption on the next write
    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    pub fn is_modified(&self) -> bool {
        self.modified || self.stored.is_none()
    }

    pub fn stored(&self) -> Option<&str> {
        self.stored.as_deref()
    }

    pub(crate) fn mark_persisted(&mut self, stored: String) {
        self.stored = Some(stored);
        self.modified = false;
    }
}

impl PartialEq for AuthSecret {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl fmt::Debug for AuthSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSecret")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .field("modified", &self.is_modified())
            .finish()
    }
}

impl From<Map<String, Value>> for AuthSecret {
    fn from(values: Map<String, Value>) -> Self {
        Self::new(values)
    }
}

impl Serialize for AuthSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AuthSecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::deserialize(deserializer).map(AuthSecret::new)
    }
}

/// One named HTTP backend integration owned by a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub id: Uuid,
    pub owner: Uuid,
    pub flow: Uuid,
    pub name: String,
    pub base_url: String,
    /// Milliseconds
    pub timeout: u64,
    pub retries: u32,
    pub default_headers: Vec<Header>,
    pub auth_type: AuthType,
    pub auth: AuthSecret,
    pub compression: bool,
    pub proxy: Option<Proxy>,
    pub tls_skip_verify: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackendConfig {
    pub fn new(owner: Uuid, flow: Uuid, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner,
            flow,
            name: name.into(),
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT_MS,
            retries: 0,
            default_headers: Vec::new(),
            auth_type: AuthType::None,
            auth: AuthSecret::default(),
            compression: false,
            proxy: None,
            tls_skip_verify: false,
            is_active: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_auth(mut self, auth_type: AuthType, auth: Map<String, Value>) -> Self {
        self.auth_type = auth_type;
        self.auth = AuthSecret::new(auth);
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }
}

/// Storage row; `auth` holds the at-rest string, never plaintext
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBackendConfig {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub flow_id: Uuid,
    pub name: String,
    pub base_url: String,
    pub timeout_ms: u64,
    pub retries: u32,
    pub default_headers: Vec<Header>,
    pub auth_type: AuthType,
    pub auth: String,
    pub compression: bool,
    pub proxy: Option<Proxy>,
    pub tls_skip_verify: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_type_spellings() {
        for (auth_type, text) in [
            (AuthType::None, "none"),
            (AuthType::ApiKey, "apiKey"),
            (AuthType::OAuth2ClientCredentials, "oauth2_cc"),
        ] {
            assert_eq!(auth_type.as_str(), text);
            assert_eq!(text.parse::<AuthType>().unwrap(), auth_type);
            assert_eq!(serde_json::to_value(auth_type).unwrap(), json!(text));
        }
        assert!("oauth2".parse::<AuthType>().is_err());
    }

    #[test]
    fn test_new_secret_is_modified() {
        let secret = AuthSecret::new(Map::new());
        assert!(secret.is_modified());
        assert!(AuthSecret::default().is_modified());
    }

    #[test]
    fn test_loaded_secret_tracks_changes() {
        let mut secret = AuthSecret::loaded(Map::new(), "stored".into());
        assert!(!secret.is_modified());
        assert_eq!(secret.stored(), Some("stored"));

        secret.insert("token", json!("abc"));
        assert!(secret.is_modified());

        secret.mark_persisted("sealed".into());
        assert!(!secret.is_modified());
        let _ = secret.values_mut();
        assert!(secret.is_modified());
    }

    #[test]
    fn test_debug_redacts_values() {
        let mut values = Map::new();
        values.insert("password".into(), json!("hunter2"));
        let printed = format!("{:?}", AuthSecret::new(values));
        assert!(printed.contains("password"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_record_json_uses_camel_case() {
        let record = BackendConfig::new(Uuid::new_v4(), Uuid::new_v4(), "crm", "https://crm.local")
            .with_auth(AuthType::Bearer, json!({"token": "t"}).as_object().cloned().unwrap())
            .active(true);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["baseUrl"], json!("https://crm.local"));
        assert_eq!(value["isActive"], json!(true));
        assert_eq!(value["authType"], json!("bearer"));
        assert_eq!(value["auth"], json!({"token": "t"}));
        assert_eq!(value["tlsSkipVerify"], json!(false));
    }
}
