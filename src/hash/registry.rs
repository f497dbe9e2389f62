//! Maps parameter-set ids to concrete hashers and tracks the current default.

use std::collections::HashMap;

use crate::error::StoreError;
use crate::hash::argon2id::{Argon2idHasher, Argon2idParams};
use crate::hash::scryptauth::{ScryptAuthHasher, ScryptAuthParams};
use crate::hash::Hasher;

/// One entry of a directory's parameter-set table, before it is built into
/// a concrete [`Hasher`].
pub enum ParameterSetSpec {
    ScryptAuth(ScryptAuthParams),
    Argon2id(Argon2idParams),
}

/// Resolves a hash file's `param-id` to the [`Hasher`] that produced it, and
/// knows which parameter-set new hashes should be generated with.
pub struct Registry {
    hashers: HashMap<u32, Box<dyn Hasher>>,
    default_id: Option<u32>,
}

impl Registry {
    /// Builds a registry from `(id, spec)` pairs plus the id that should be
    /// used for new hashes. `id == 0` is reserved and rejected; `default`
    /// must reference a declared id unless `entries` is empty, in which case
    /// `default` must be `0`.
    pub fn new(entries: Vec<(u32, ParameterSetSpec)>, default: u32) -> Result<Self, StoreError> {
        if entries.is_empty() {
            if default != 0 {
                return Err(StoreError::UnknownParameterSet(default));
            }
            return Ok(Self { hashers: HashMap::new(), default_id: None });
        }

        let mut hashers = HashMap::with_capacity(entries.len());
        for (id, spec) in entries {
            if id == 0 {
                return Err(StoreError::UnsupportedFormat("parameter-set id 0 is reserved".into()));
            }
            let hasher: Box<dyn Hasher> = match spec {
                ParameterSetSpec::ScryptAuth(p) => Box::new(ScryptAuthHasher::new(p)?),
                ParameterSetSpec::Argon2id(p) => Box::new(Argon2idHasher::new(p)?),
            };
            hashers.insert(id, hasher);
        }

        if !hashers.contains_key(&default) {
            return Err(StoreError::UnknownParameterSet(default));
        }

        Ok(Self { hashers, default_id: Some(default) })
    }

    pub fn get(&self, id: u32) -> Result<&dyn Hasher, StoreError> {
        self.hashers.get(&id).map(AsRef::as_ref).ok_or(StoreError::UnknownParameterSet(id))
    }

    pub fn default_id(&self) -> Result<u32, StoreError> {
        self.default_id.ok_or_else(|| StoreError::UnsupportedFormat("no default parameter-set is configured".into()))
    }

    pub fn default_hasher(&self) -> Result<&dyn Hasher, StoreError> {
        self.get(self.default_id()?)
    }

    /// Whether a hash generated under `stored_id` should be transparently
    /// upgraded to the current default on next successful verify.
    pub fn is_upgradeable(&self, stored_id: u32) -> bool {
        self.default_id.is_some_and(|default| default != stored_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scryptauth(id: u32) -> (u32, ParameterSetSpec) {
        (id, ParameterSetSpec::ScryptAuth(ScryptAuthParams { hmac_key: [1u8; 32], cost: 4, r: 8, p: 1 }))
    }

    #[test]
    fn empty_registry_requires_default_zero() {
        assert!(Registry::new(vec![], 0).is_ok());
        assert!(Registry::new(vec![], 1).is_err());
    }

    #[test]
    fn default_must_reference_a_declared_id() {
        assert!(Registry::new(vec![scryptauth(1)], 2).is_err());
        assert!(Registry::new(vec![scryptauth(1)], 1).is_ok());
    }

    #[test]
    fn id_zero_is_rejected() {
        assert!(Registry::new(vec![scryptauth(0)], 0).is_err());
    }

    #[test]
    fn upgrade_flag_follows_the_default() {
        let registry = Registry::new(vec![scryptauth(1), scryptauth(2)], 2).unwrap();
        assert!(registry.is_upgradeable(1));
        assert!(!registry.is_upgradeable(2));
    }
}
