//! Pluggable password-hashing algorithms and the parameter-set registry that
//! selects between them.

pub mod argon2id;
pub mod registry;
pub mod scryptauth;

use crate::error::StoreError;
use crate::secret::SecretString;

/// Uniform contract every supported algorithm implements.
///
/// `generate` always draws fresh randomness from the OS CSPRNG; `verify`
/// never does. Both run in time independent of whether the password is
/// correct, relying on each algorithm's own constant-time comparison.
pub trait Hasher: Send + Sync {
    /// The literal stored in a hash file's first field.
    fn format_id(&self) -> &'static str;

    /// Structural validation of a payload, without attempting a comparison.
    fn is_valid_payload(&self, payload: &str) -> bool;

    /// Hashes `password` under this hasher's parameters.
    fn generate(&self, password: &SecretString) -> Result<String, StoreError>;

    /// Verifies `password` against a previously generated `payload`.
    fn verify(&self, password: &SecretString, payload: &str) -> Result<bool, StoreError>;
}

pub(crate) fn split_payload(payload: &str) -> Result<(&str, &str), StoreError> {
    payload.split_once(':').ok_or_else(|| StoreError::UnsupportedFormat(format!("malformed payload: {payload:?}")))
}

pub(crate) fn encode_b64(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn decode_b64(s: &str) -> Result<Vec<u8>, StoreError> {
    use base64::Engine as _;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(s).map_err(|e| StoreError::UnsupportedFormat(format!("invalid base64: {e}")))
}
