//! Credentials handed to the catalog client.
//!
//! The client never reads global state: a [`SessionCredentials`] value is
//! built from config (or CLI overrides) and passed in at construction.
//! Client key-rings are only fetched when [`KeyRing::fetch`] is called.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use super::domain::CatalogError;
use crate::config::{self, ConfigError};

/// Session used for every catalog request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub access_token: String,
    pub country_code: String,
    pub user_id: Option<String>,
}

impl SessionCredentials {
    /// Build a session from the config file section.
    ///
    /// The country code defaults to `US` when unset.
    pub fn from_config(creds: &config::Credentials) -> Result<Self, ConfigError> {
        let access_token = creds
            .access_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::Missing("credentials.access_token"))?;

        Ok(Self {
            access_token,
            country_code: creds
                .country_code
                .clone()
                .unwrap_or_else(|| "US".to_string()),
            user_id: creds.user_id.clone(),
        })
    }

    pub fn require_user_id(&self) -> Result<&str, CatalogError> {
        self.user_id
            .as_deref()
            .ok_or_else(|| CatalogError::Malformed("session has no user id".to_string()))
    }
}

/// One published client key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientKey {
    pub platform: String,
    #[serde(default)]
    pub formats: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(deserialize_with = "bool_from_text", default)]
    pub valid: bool,
}

/// A published set of client keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRing {
    pub version: String,
    pub keys: Vec<ClientKey>,
}

/// The key-ring publishes `valid` as "True"/"False" strings.
fn bool_from_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s.eq_ignore_ascii_case("true"),
    })
}

impl KeyRing {
    /// Download a key-ring from `url`.
    pub async fn fetch(url: &str) -> Result<Self, CatalogError> {
        let response = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?
            .get(url)
            .send()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(super::adapter::to_api_error(status.as_u16(), &body));
        }

        Self::parse(&body)
    }

    pub fn parse(json: &str) -> Result<Self, CatalogError> {
        let ring: KeyRing = serde_json::from_str(json)
            .map_err(|e| CatalogError::Malformed(format!("key-ring: {e}")))?;
        if ring.keys.is_empty() {
            return Err(CatalogError::Malformed("key-ring has no keys".to_string()));
        }
        Ok(ring)
    }

    /// First key marked valid.
    pub fn first_valid(&self) -> Option<&ClientKey> {
        self.keys.iter().find(|k| k.valid)
    }

    pub fn load_from(path: &Path) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse(&contents)?)
    }

    /// Write the key-ring atomically.
    pub fn save_to(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let temp = path.with_extension("json.tmp");
        std::fs::write(&temp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&temp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RING: &str = r#"{
        "version": "1.0.1",
        "keys": [
            {"platform": "TV", "formats": "Normal/High", "clientId": "a", "clientSecret": "s1", "valid": "False"},
            {"platform": "Auto", "formats": "Master", "clientId": "b", "clientSecret": "s2", "valid": "True"}
        ]
    }"#;

    #[test]
    fn test_session_requires_token() {
        let creds = config::Credentials::default();
        assert!(matches!(
            SessionCredentials::from_config(&creds),
            Err(ConfigError::Missing(_))
        ));

        let creds = config::Credentials {
            access_token: Some("tok".into()),
            ..Default::default()
        };
        let session = SessionCredentials::from_config(&creds).unwrap();
        assert_eq!(session.country_code, "US");
        assert!(session.require_user_id().is_err());
    }

    #[test]
    fn test_key_ring_parses_text_flags() {
        let ring = KeyRing::parse(RING).unwrap();
        assert_eq!(ring.keys.len(), 2);
        assert_eq!(ring.first_valid().unwrap().client_id, "b");
    }

    #[test]
    fn test_empty_key_ring_is_rejected() {
        let err = KeyRing::parse(r#"{"version": "1", "keys": []}"#).unwrap_err();
        assert!(matches!(err, CatalogError::Malformed(_)));
    }

    #[test]
    fn test_key_ring_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("keys.json");
        let ring = KeyRing::parse(RING).unwrap();

        ring.save_to(&path).unwrap();
        assert_eq!(KeyRing::load_from(&path).unwrap(), ring);
    }
}
