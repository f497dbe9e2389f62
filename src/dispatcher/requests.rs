//! Tagged request/reply types consumed by the dispatcher's worker loop.
//!
//! Every operation follows the same shape: inputs plus a oneshot reply
//! sender. Carrying the reply destination inside the request itself (rather
//! than returning a future the caller awaits separately) is what lets one
//! `select!` loop treat every operation uniformly.

use tokio::sync::oneshot;

use crate::directory::{AuthResult, UserEntryFull};
use crate::error::StoreError;
use crate::secret::SecretString;

pub type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

pub struct InitRequest {
    pub admin: String,
    pub password: SecretString,
    pub reply: Reply<()>,
}

pub struct CheckRequest {
    pub reply: Reply<()>,
}

pub struct AddRequest {
    pub user: String,
    pub password: SecretString,
    pub is_admin: bool,
    pub reply: Reply<()>,
}

pub struct UpdateRequest {
    pub user: String,
    pub password: SecretString,
    /// `None` for caller-initiated updates; `Some(())` marks a request the
    /// worker generated itself from a rehash-on-verify upgrade, whose
    /// failure must be logged rather than returned to anyone.
    pub reply: Option<Reply<()>>,
}

pub struct SetAdminRequest {
    pub user: String,
    pub is_admin: bool,
    pub reply: Reply<()>,
}

pub struct RemoveRequest {
    pub user: String,
    pub reply: Reply<()>,
}

pub struct ListRequest {
    pub reply: Reply<Vec<(String, bool)>>,
}

pub struct ListFullRequest {
    pub reply: Reply<Vec<UserEntryFull>>,
}

pub struct AuthenticateRequest {
    pub user: String,
    pub password: SecretString,
    pub reply: Reply<AuthResult>,
}

/// Out-of-band: re-reads the directory configuration file and, on success,
/// atomically swaps in the resulting `Directory`. On failure the prior
/// `Directory` is retained and the error is returned to the caller.
pub struct ReloadRequest {
    pub reply: Reply<()>,
}
