//! The cloneable send-side facade adapters use to reach the store.
//!
//! Every method builds a request, attaches a fresh oneshot reply channel,
//! enqueues the request (blocking on back pressure if the queue is full),
//! and awaits the reply. Callers never see [`crate::directory::Directory`]
//! or the dispatcher's worker loop.

use tokio::sync::oneshot;

use crate::directory::{AuthResult, UserEntryFull};
use crate::dispatcher::requests::{AddRequest, AuthenticateRequest, CheckRequest, InitRequest, ListFullRequest, ListRequest, ReloadRequest, RemoveRequest, SetAdminRequest, UpdateRequest};
use crate::error::StoreError;
use crate::secret::SecretString;

#[derive(Clone)]
pub struct StoreHandle {
    reload_tx: flume::Sender<ReloadRequest>,
    init_tx: flume::Sender<InitRequest>,
    check_tx: flume::Sender<CheckRequest>,
    add_tx: flume::Sender<AddRequest>,
    update_tx: flume::Sender<UpdateRequest>,
    set_admin_tx: flume::Sender<SetAdminRequest>,
    remove_tx: flume::Sender<RemoveRequest>,
    list_tx: flume::Sender<ListRequest>,
    list_full_tx: flume::Sender<ListFullRequest>,
    authenticate_tx: flume::Sender<AuthenticateRequest>,
}

/// Sends `req` and awaits `rx`, collapsing a dropped-reply-channel into
/// [`StoreError::Disconnected`].
async fn round_trip<T>(send_result: Result<(), flume::SendError<impl Send>>, rx: oneshot::Receiver<Result<T, StoreError>>) -> Result<T, StoreError> {
    send_result.map_err(|_| StoreError::QueueFull)?;
    rx.await.map_err(|_| StoreError::Disconnected)?
}

impl StoreHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        reload_tx: flume::Sender<ReloadRequest>,
        init_tx: flume::Sender<InitRequest>,
        check_tx: flume::Sender<CheckRequest>,
        add_tx: flume::Sender<AddRequest>,
        update_tx: flume::Sender<UpdateRequest>,
        set_admin_tx: flume::Sender<SetAdminRequest>,
        remove_tx: flume::Sender<RemoveRequest>,
        list_tx: flume::Sender<ListRequest>,
        list_full_tx: flume::Sender<ListFullRequest>,
        authenticate_tx: flume::Sender<AuthenticateRequest>,
    ) -> Self {
        Self { reload_tx, init_tx, check_tx, add_tx, update_tx, set_admin_tx, remove_tx, list_tx, list_full_tx, authenticate_tx }
    }

    /// Re-reads the directory configuration file and, on success, swaps it
    /// in atomically. On failure the previously loaded directory is
    /// retained.
    pub async fn reload(&self) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        let send = self.reload_tx.send_async(ReloadRequest { reply }).await;
        round_trip(send, rx).await
    }

    pub async fn init(&self, admin: impl Into<String>, password: SecretString) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        let send = self.init_tx.send_async(InitRequest { admin: admin.into(), password, reply }).await;
        round_trip(send, rx).await
    }

    pub async fn check(&self) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        let send = self.check_tx.send_async(CheckRequest { reply }).await;
        round_trip(send, rx).await
    }

    pub async fn add(&self, user: impl Into<String>, password: SecretString, is_admin: bool) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        let send = self.add_tx.send_async(AddRequest { user: user.into(), password, is_admin, reply }).await;
        round_trip(send, rx).await
    }

    pub async fn update(&self, user: impl Into<String>, password: SecretString) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        let send = self.update_tx.send_async(UpdateRequest { user: user.into(), password, reply: Some(reply) }).await;
        round_trip(send, rx).await
    }

    pub async fn set_admin(&self, user: impl Into<String>, is_admin: bool) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        let send = self.set_admin_tx.send_async(SetAdminRequest { user: user.into(), is_admin, reply }).await;
        round_trip(send, rx).await
    }

    pub async fn remove(&self, user: impl Into<String>) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        let send = self.remove_tx.send_async(RemoveRequest { user: user.into(), reply }).await;
        round_trip(send, rx).await
    }

    pub async fn list(&self) -> Result<Vec<(String, bool)>, StoreError> {
        let (reply, rx) = oneshot::channel();
        let send = self.list_tx.send_async(ListRequest { reply }).await;
        round_trip(send, rx).await
    }

    pub async fn list_full(&self) -> Result<Vec<UserEntryFull>, StoreError> {
        let (reply, rx) = oneshot::channel();
        let send = self.list_full_tx.send_async(ListFullRequest { reply }).await;
        round_trip(send, rx).await
    }

    pub async fn authenticate(&self, user: impl Into<String>, password: SecretString) -> Result<AuthResult, StoreError> {
        let (reply, rx) = oneshot::channel();
        let send = self.authenticate_tx.send_async(AuthenticateRequest { user: user.into(), password, reply }).await;
        round_trip(send, rx).await
    }
}
