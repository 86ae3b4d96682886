//! Client key-ring refresh and inspection.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::runtime::Runtime;
use tracing::info;

use crate::catalog::KeyRing;
use crate::config::{self, Config, ConfigError};

fn keys_path() -> Result<PathBuf, ConfigError> {
    let dir = config::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(dir.join("keys.json"))
}

/// Download the key-ring and store it next to the config file.
///
/// A `url` given on the command line is remembered in the config file at
/// `config_path` (default location when `None`).
pub fn cmd_keys_refresh(
    rt: &Runtime,
    config: &Config,
    config_path: Option<&Path>,
    url: Option<&str>,
) -> anyhow::Result<()> {
    let source = url
        .or(config.credentials.keys_url.as_deref())
        .ok_or(ConfigError::Missing("credentials.keys_url"))?;
    let path = keys_path()?;

    let ring = rt
        .block_on(KeyRing::fetch(source))
        .with_context(|| format!("fetching key-ring from {source}"))?;
    ring.save_to(&path)?;
    info!(version = %ring.version, keys = ring.keys.len(), "Saved key-ring");

    if let Some(url) = url {
        if config.credentials.keys_url.as_deref() != Some(url) {
            let written = remember_keys_url(config_path, url)?;
            println!("Remembered key-ring location in {}", written.display());
        }
    }

    println!(
        "Saved key-ring {} ({} keys) to {}",
        ring.version,
        ring.keys.len(),
        path.display()
    );
    for line in describe_ring(&ring).into_iter().skip(1) {
        println!("{}", line);
    }
    Ok(())
}

/// Print the stored key-ring.
pub fn cmd_keys_show() -> anyhow::Result<()> {
    let path = keys_path()?;
    let ring = KeyRing::load_from(&path).with_context(|| {
        format!(
            "reading {}; run `tidekeeper keys refresh` first",
            path.display()
        )
    })?;
    println!("{}", path.display());
    for line in describe_ring(&ring) {
        println!("{}", line);
    }
    Ok(())
}

/// Store `url` as `credentials.keys_url`, re-reading the file so that
/// command-line overrides such as `--token` are not written back.
fn remember_keys_url(config_path: Option<&Path>, url: &str) -> Result<PathBuf, ConfigError> {
    config::update(config_path, |c| c.credentials.keys_url = Some(url.to_string()))
}

fn describe_ring(ring: &KeyRing) -> Vec<String> {
    let mut lines = vec![format!("Key-ring {} ({} keys)", ring.version, ring.keys.len())];
    for key in &ring.keys {
        let mark = if key.valid { "✓" } else { "✗" };
        lines.push(format!("  {} {} ({})", mark, key.platform, key.formats));
    }
    match ring.first_valid() {
        Some(key) => lines.push(format!("First valid key: {} ({})", key.platform, key.formats)),
        None => lines.push("Warning: no key in this ring is marked valid".to_string()),
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const RING: &str = r#"{
        "version": "1.0.1",
        "keys": [
            {"platform": "TV", "formats": "Normal/High/HiFi", "clientId": "a",
             "clientSecret": "s1", "valid": "False"},
            {"platform": "Android", "formats": "Normal/High/HiFi/Master", "clientId": "b",
             "clientSecret": "s2", "valid": "True"}
        ]
    }"#;

    #[test]
    fn test_stored_ring_is_described() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        KeyRing::parse(RING).unwrap().save_to(&path).unwrap();

        let ring = KeyRing::load_from(&path).unwrap();
        let lines = describe_ring(&ring);

        assert_eq!(lines[0], "Key-ring 1.0.1 (2 keys)");
        assert_eq!(lines[1], "  ✗ TV (Normal/High/HiFi)");
        assert_eq!(lines[2], "  ✓ Android (Normal/High/HiFi/Master)");
        assert_eq!(lines[3], "First valid key: Android (Normal/High/HiFi/Master)");
    }

    #[test]
    fn test_refresh_url_is_remembered_without_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[credentials]\naccess_token = \"from-file\"\n").unwrap();

        remember_keys_url(Some(&path), "https://keys.test/ring.json").unwrap();

        let config = config::load_from(&path);
        assert_eq!(
            config.credentials.keys_url.as_deref(),
            Some("https://keys.test/ring.json")
        );
        assert_eq!(config.credentials.access_token.as_deref(), Some("from-file"));
    }
}
