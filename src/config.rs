//! Typed ingest of the YAML documents that configure a directory and its
//! listener set.
//!
//! This is the full extent of "YAML configuration loading" the core owns:
//! the types here and their validation. Deciding which path or environment
//! variable feeds [`load_directory_config`] is an external collaborator's
//! job (the CLI, a systemd unit, ...).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::hash::argon2id::Argon2idParams;
use crate::hash::registry::{ParameterSetSpec, Registry};
use crate::hash::scryptauth::ScryptAuthParams;
use crate::hash::decode_b64;

/// Mirrors the directory configuration document: `basedir`, `default`, and
/// the parameter-set table.
#[derive(Debug, Deserialize)]
pub struct DirectoryConfig {
    pub basedir: PathBuf,
    pub default: u32,
    #[serde(default)]
    pub params: Vec<ParamEntry>,
}

/// One entry of `params:`. Exactly one of `scryptauth` / `argon2id` must be
/// present; YAML can't express that constraint natively so it is checked in
/// [`DirectoryConfig::build_registry`].
#[derive(Debug, Deserialize)]
pub struct ParamEntry {
    pub id: u32,
    pub scryptauth: Option<ScryptAuthEntry>,
    pub argon2id: Option<Argon2idEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ScryptAuthEntry {
    /// Base64url-encoded 32-byte HMAC key.
    pub hmac_key: String,
    pub cost: u8,
    #[serde(default = "default_r")]
    pub r: u32,
    #[serde(default = "default_p")]
    pub p: u32,
}

const fn default_r() -> u32 {
    8
}

const fn default_p() -> u32 {
    1
}

impl ScryptAuthEntry {
    fn into_params(self) -> Result<ScryptAuthParams, ConfigError> {
        let key_bytes = decode_b64(&self.hmac_key).map_err(|e| ConfigError::InvalidParameterSet(format!("invalid hmac_key: {e}")))?;
        let hmac_key: [u8; 32] = key_bytes.try_into().map_err(|_| ConfigError::InvalidParameterSet("hmac_key must be exactly 32 bytes".into()))?;
        Ok(ScryptAuthParams { hmac_key, cost: self.cost, r: self.r, p: self.p })
    }
}

#[derive(Debug, Deserialize)]
pub struct Argon2idEntry {
    pub time: u32,
    pub memory: u32,
    pub threads: u32,
    pub length: usize,
}

impl Argon2idEntry {
    const fn into_params(self) -> Argon2idParams {
        Argon2idParams { time: self.time, memory: self.memory, threads: self.threads, length: self.length }
    }
}

impl DirectoryConfig {
    /// Reads and parses a directory configuration document.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_owned(), source })
    }

    /// Validates `params` and builds the [`Registry`] it describes.
    pub fn build_registry(self) -> Result<Registry, ConfigError> {
        let mut seen = HashSet::with_capacity(self.params.len());
        let mut entries = Vec::with_capacity(self.params.len());

        for entry in self.params {
            if entry.id == 0 {
                return Err(ConfigError::ReservedId);
            }
            if !seen.insert(entry.id) {
                return Err(ConfigError::DuplicateId(entry.id));
            }

            let spec = match (entry.scryptauth, entry.argon2id) {
                (Some(s), None) => ParameterSetSpec::ScryptAuth(s.into_params()?),
                (None, Some(a)) => ParameterSetSpec::Argon2id(a.into_params()),
                _ => return Err(ConfigError::AmbiguousAlgorithm(entry.id)),
            };
            entries.push((entry.id, spec));
        }

        if entries.is_empty() && self.default != 0 {
            return Err(ConfigError::UnknownDefault(self.default));
        }
        if !entries.is_empty() && self.default == 0 {
            return Err(ConfigError::DefaultWithoutParams);
        }

        Registry::new(entries, self.default).map_err(|e| ConfigError::InvalidParameterSet(e.to_string()))
    }
}

/// Reads `path` and builds the [`Registry`] and base directory it describes.
pub fn load_directory_config(path: &Path) -> Result<(PathBuf, Registry), ConfigError> {
    let config = DirectoryConfig::load(path)?;
    let basedir = config.basedir.clone();
    let registry = config.build_registry()?;
    Ok((basedir, registry))
}

/// One entry of the listener configuration document: a kind plus its list of
/// bind addresses (Unix socket paths for `saslauthd`, `host:port` otherwise).
/// Interfaces only — the core never binds these itself.
#[derive(Debug, Deserialize)]
pub struct ListenerGroup {
    #[serde(default)]
    pub saslauthd: Vec<String>,
    #[serde(default)]
    pub http: Vec<String>,
    #[serde(default)]
    pub https: Vec<String>,
    #[serde(default)]
    pub ldap: Vec<String>,
    #[serde(default)]
    pub ldaps: Vec<String>,
}

pub type ListenerConfig = Vec<ListenerGroup>;

/// Reads and parses a listener configuration document.
pub fn load_listener_config(path: &Path) -> Result<ListenerConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_owned(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> String {
        crate::hash::encode_b64(&[9u8; 32])
    }

    #[test]
    fn parses_a_minimal_directory_config() {
        let yaml = format!(
            "basedir: /var/lib/whawty/auth\ndefault: 1\nparams:\n  - id: 1\n    scryptauth:\n        hmac_key: {}\n        cost: 12\n",
            key()
        );
        let config: DirectoryConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.basedir, PathBuf::from("/var/lib/whawty/auth"));
        let registry = config.build_registry().unwrap();
        assert_eq!(registry.default_id().unwrap(), 1);
    }

    #[test]
    fn rejects_reserved_id_zero() {
        let yaml = format!("basedir: /x\ndefault: 0\nparams:\n  - id: 0\n    scryptauth:\n        hmac_key: {}\n        cost: 12\n", key());
        let config: DirectoryConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(matches!(config.build_registry(), Err(ConfigError::ReservedId)));
    }

    #[test]
    fn rejects_default_without_params() {
        let config: DirectoryConfig = serde_yaml::from_str("basedir: /x\ndefault: 1\nparams: []\n").unwrap();
        assert!(matches!(config.build_registry(), Err(ConfigError::UnknownDefault(1))));
    }

    #[test]
    fn rejects_ambiguous_algorithm() {
        let yaml = format!(
            "basedir: /x\ndefault: 1\nparams:\n  - id: 1\n    scryptauth:\n        hmac_key: {}\n        cost: 12\n    argon2id:\n        time: 2\n        memory: 1024\n        threads: 1\n        length: 32\n",
            key()
        );
        let config: DirectoryConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(matches!(config.build_registry(), Err(ConfigError::AmbiguousAlgorithm(1))));
    }

    #[test]
    fn parses_listener_config() {
        let yaml = "- saslauthd:\n    - /var/run/saslauthd/mux\n- http:\n    - 127.0.0.1:8080\n";
        let listeners: ListenerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(listeners.len(), 2);
        assert_eq!(listeners[0].saslauthd, vec!["/var/run/saslauthd/mux".to_owned()]);
        assert_eq!(listeners[1].http, vec!["127.0.0.1:8080".to_owned()]);
    }
}
