//! `hmac_sha256_scrypt`: HMAC-SHA256 over an scrypt-derived key.
//!
//! Payload layout: `<b64url(salt)>:<b64url(hmac_sha256(hmac_key, scrypt(pw, salt)))>`.
//! The HMAC key is a per-parameter-set secret baked into the config, not
//! derived from the password; it lets a compromised hash file be rotated
//! without touching every user's payload.

use hmac::{Hmac, Mac as _};
use rand::rand_core::{OsRng, TryRngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::StoreError;
use crate::hash::{Hasher, decode_b64, encode_b64, split_payload};
use crate::secret::SecretString;

const SALT_LEN: usize = 16;
const SCRYPT_OUTPUT_LEN: usize = 32;

/// Tuning parameters for one `hmac_sha256_scrypt` parameter-set.
#[derive(Debug, Clone)]
pub struct ScryptAuthParams {
    pub hmac_key: [u8; 32],
    /// `N = 2^cost`, `cost` in `1..=32`.
    pub cost: u8,
    pub r: u32,
    pub p: u32,
}

impl ScryptAuthParams {
    pub fn validate(&self) -> Result<(), StoreError> {
        if !(1..=32).contains(&self.cost) {
            return Err(StoreError::UnsupportedFormat(format!("scryptauth cost out of range: {}", self.cost)));
        }
        if self.r == 0 || self.p == 0 {
            return Err(StoreError::UnsupportedFormat("scryptauth r and p must be positive".into()));
        }
        Ok(())
    }
}

pub struct ScryptAuthHasher {
    params: ScryptAuthParams,
}

impl ScryptAuthHasher {
    pub fn new(params: ScryptAuthParams) -> Result<Self, StoreError> {
        params.validate()?;
        Ok(Self { params })
    }

    fn scrypt_derive(&self, password: &[u8], salt: &[u8]) -> Result<[u8; SCRYPT_OUTPUT_LEN], StoreError> {
        let scrypt_params = scrypt::Params::new(self.params.cost, self.params.r, self.params.p, SCRYPT_OUTPUT_LEN)
            .map_err(|e| StoreError::UnsupportedFormat(format!("invalid scrypt parameters: {e}")))?;
        let mut out = [0u8; SCRYPT_OUTPUT_LEN];
        scrypt::scrypt(password, salt, &scrypt_params, &mut out).map_err(|e| StoreError::UnsupportedFormat(format!("scrypt derivation failed: {e}")))?;
        Ok(out)
    }

    fn mac(&self, scrypt_output: &[u8]) -> Result<[u8; 32], StoreError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.params.hmac_key).map_err(|e| StoreError::UnsupportedFormat(format!("hmac init failed: {e}")))?;
        mac.update(scrypt_output);
        Ok(mac.finalize().into_bytes().into())
    }
}

impl Hasher for ScryptAuthHasher {
    fn format_id(&self) -> &'static str {
        "hmac_sha256_scrypt"
    }

    fn is_valid_payload(&self, payload: &str) -> bool {
        let Ok((salt, tag)) = split_payload(payload) else { return false };
        decode_b64(salt).map(|s| s.len() == SALT_LEN).unwrap_or(false) && decode_b64(tag).map(|t| t.len() == 32).unwrap_or(false)
    }

    fn generate(&self, password: &SecretString) -> Result<String, StoreError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.try_fill_bytes(&mut salt).map_err(|e| StoreError::UnsupportedFormat(format!("rng failed: {e}")))?;

        let derived = self.scrypt_derive(password.expose_secret().as_bytes(), &salt)?;
        let tag = self.mac(&derived)?;

        Ok(format!("{}:{}", encode_b64(&salt), encode_b64(&tag)))
    }

    fn verify(&self, password: &SecretString, payload: &str) -> Result<bool, StoreError> {
        let (salt_b64, tag_b64) = split_payload(payload)?;
        let salt = decode_b64(salt_b64)?;
        let expected_tag = decode_b64(tag_b64)?;

        let derived = self.scrypt_derive(password.expose_secret().as_bytes(), &salt)?;
        let computed_tag = self.mac(&derived)?;

        Ok(bool::from(computed_tag.ct_eq(&expected_tag)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> ScryptAuthHasher {
        ScryptAuthHasher::new(ScryptAuthParams { hmac_key: [7u8; 32], cost: 4, r: 8, p: 1 }).unwrap()
    }

    #[test]
    fn round_trips() {
        let h = hasher();
        let pw = SecretString::from_str("hunter2");
        let payload = h.generate(&pw).unwrap();
        assert!(h.is_valid_payload(&payload));
        assert!(h.verify(&pw, &payload).unwrap());
        assert!(!h.verify(&SecretString::from_str("wrong"), &payload).unwrap());
    }

    #[test]
    fn rejects_out_of_range_cost() {
        let params = ScryptAuthParams { hmac_key: [0u8; 32], cost: 0, r: 8, p: 1 };
        assert!(ScryptAuthHasher::new(params).is_err());
    }
}
