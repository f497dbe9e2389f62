//! `argon2id`: memory-hard password hashing via RFC 9106 Argon2id.
//!
//! Payload layout: `<b64url(salt)>:<b64url(argon2id(pw, salt))>`.

use argon2::Algorithm::Argon2id;
use argon2::Version::V0x13;
use argon2::{Argon2, Params};
use rand::rand_core::{OsRng, TryRngCore};
use subtle::ConstantTimeEq;

use crate::error::StoreError;
use crate::hash::{Hasher, decode_b64, encode_b64, split_payload};
use crate::secret::SecretString;

const SALT_LEN: usize = 16;

/// Tuning parameters for one `argon2id` parameter-set.
#[derive(Debug, Clone)]
pub struct Argon2idParams {
    pub time: u32,
    /// Memory cost in KiB.
    pub memory: u32,
    pub threads: u32,
    pub length: usize,
}

impl Argon2idParams {
    fn build(&self) -> Result<Argon2<'static>, StoreError> {
        let params = Params::new(self.memory, self.time, self.threads, Some(self.length)).map_err(|e| StoreError::UnsupportedFormat(format!("invalid argon2 parameters: {e}")))?;
        Ok(Argon2::new(Argon2id, V0x13, params))
    }
}

pub struct Argon2idHasher {
    params: Argon2idParams,
}

impl Argon2idHasher {
    pub fn new(params: Argon2idParams) -> Result<Self, StoreError> {
        params.build()?;
        Ok(Self { params })
    }
}

impl Hasher for Argon2idHasher {
    fn format_id(&self) -> &'static str {
        "argon2id"
    }

    fn is_valid_payload(&self, payload: &str) -> bool {
        let Ok((salt, hash)) = split_payload(payload) else { return false };
        decode_b64(salt).map(|s| s.len() == SALT_LEN).unwrap_or(false) && decode_b64(hash).map(|h| h.len() == self.params.length).unwrap_or(false)
    }

    fn generate(&self, password: &SecretString) -> Result<String, StoreError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.try_fill_bytes(&mut salt).map_err(|e| StoreError::UnsupportedFormat(format!("rng failed: {e}")))?;

        let argon2 = self.params.build()?;
        let mut out = vec![0u8; self.params.length];
        argon2
            .hash_password_into(password.expose_secret().as_bytes(), &salt, &mut out)
            .map_err(|e| StoreError::UnsupportedFormat(format!("argon2id derivation failed: {e}")))?;

        Ok(format!("{}:{}", encode_b64(&salt), encode_b64(&out)))
    }

    fn verify(&self, password: &SecretString, payload: &str) -> Result<bool, StoreError> {
        let (salt_b64, hash_b64) = split_payload(payload)?;
        let salt = decode_b64(salt_b64)?;
        let expected = decode_b64(hash_b64)?;

        let argon2 = self.params.build()?;
        let mut computed = vec![0u8; expected.len()];
        argon2
            .hash_password_into(password.expose_secret().as_bytes(), &salt, &mut computed)
            .map_err(|e| StoreError::UnsupportedFormat(format!("argon2id derivation failed: {e}")))?;

        Ok(bool::from(computed.as_slice().ct_eq(expected.as_slice())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> Argon2idHasher {
        Argon2idHasher::new(Argon2idParams { time: 2, memory: 19 * 1024, threads: 1, length: 32 }).unwrap()
    }

    #[test]
    fn round_trips() {
        let h = hasher();
        let pw = SecretString::from_str("correct horse battery staple");
        let payload = h.generate(&pw).unwrap();
        assert!(h.is_valid_payload(&payload));
        assert!(h.verify(&pw, &payload).unwrap());
        assert!(!h.verify(&SecretString::from_str("wrong"), &payload).unwrap());
    }

    #[test]
    fn rejects_invalid_parameters() {
        let params = Argon2idParams { time: 0, memory: 0, threads: 0, length: 32 };
        assert!(Argon2idHasher::new(params).is_err());
    }
}
