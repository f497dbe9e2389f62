//! The single worker that owns a [`Directory`] and linearizes every
//! operation against it.
//!
//! Modeled on a channel-per-operation actor: each public operation gets its
//! own bounded queue, and one task drains all of them with a non-priority
//! `select!`. There is no lock anywhere in [`Directory`] because only this
//! worker ever touches it.

pub mod requests;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Semaphore, oneshot};
use tracing::{debug, info, warn};

use crate::directory::Directory;
use crate::error::StoreError;
use crate::secret::SecretString;
use crate::store_handle::StoreHandle;

use requests::{AddRequest, AuthenticateRequest, CheckRequest, InitRequest, ListFullRequest, ListRequest, ReloadRequest, RemoveRequest, SetAdminRequest, UpdateRequest};

const READ_WRITE_CAPACITY: usize = 10;
const INIT_CHECK_CAPACITY: usize = 1;
const REMOTE_UPGRADE_CAPACITY: usize = 10;
const REMOTE_UPGRADE_CONCURRENCY: usize = 10;

/// Where a successful-but-stale `authenticate` feeds its rehash.
pub enum UpgradePolicy {
    /// Rehash-on-verify is disabled.
    None,
    /// The update is folded back into the same dispatcher's update queue.
    Local,
    /// The update is handed to an external sink (e.g. an HTTPS endpoint);
    /// excess submissions beyond the queue's capacity are dropped.
    Remote(Arc<dyn UpgradeSink>),
}

/// A destination for rehash-on-verify records produced in [`UpgradePolicy::Remote`] mode.
pub trait UpgradeSink: Send + Sync + 'static {
    fn upgrade(&self, user: String, password: SecretString) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

struct UpgradeRecord {
    user: String,
    password: SecretString,
}

/// Spawns the dispatcher's worker task and returns a cloneable handle to it.
///
/// `hook_tx` receives a notification after every successful mutation; the
/// hook notifier on the other end owns the debounce logic. `config_path` is
/// re-read by `reload`; it is otherwise unused once `directory` is built.
pub fn spawn(directory: Directory, config_path: PathBuf, hook_tx: flume::Sender<()>, upgrade_policy: UpgradePolicy) -> StoreHandle {
    let (reload_tx, reload_rx) = flume::bounded::<ReloadRequest>(INIT_CHECK_CAPACITY);
    let (init_tx, init_rx) = flume::bounded::<InitRequest>(INIT_CHECK_CAPACITY);
    let (check_tx, check_rx) = flume::bounded::<CheckRequest>(INIT_CHECK_CAPACITY);
    let (add_tx, add_rx) = flume::bounded::<AddRequest>(READ_WRITE_CAPACITY);
    let (update_tx, update_rx) = flume::bounded::<UpdateRequest>(READ_WRITE_CAPACITY);
    let (set_admin_tx, set_admin_rx) = flume::bounded::<SetAdminRequest>(READ_WRITE_CAPACITY);
    let (remove_tx, remove_rx) = flume::bounded::<RemoveRequest>(READ_WRITE_CAPACITY);
    let (list_tx, list_rx) = flume::bounded::<ListRequest>(READ_WRITE_CAPACITY);
    let (list_full_tx, list_full_rx) = flume::bounded::<ListFullRequest>(READ_WRITE_CAPACITY);
    let (authenticate_tx, authenticate_rx) = flume::bounded::<AuthenticateRequest>(READ_WRITE_CAPACITY);

    let (remote_upgrade_tx, remote_upgrade_rx) = flume::bounded::<UpgradeRecord>(REMOTE_UPGRADE_CAPACITY);
    if let UpgradePolicy::Remote(sink) = &upgrade_policy {
        tokio::spawn(drain_remote_upgrades(remote_upgrade_rx, Arc::clone(sink)));
    }

    tokio::spawn(async move {
        let mut directory = directory;

        loop {
            tokio::select! {
                biased;

                Ok(req) = reload_rx.recv_async() => {
                    let result = Directory::from_config(&config_path);
                    log_result("reload", &result);
                    match result {
                        Ok(new_directory) => {
                            directory = new_directory;
                            let _ = req.reply.send(Ok(()));
                        }
                        Err(e) => {
                            let _ = req.reply.send(Err(e));
                        }
                    }
                }
                Ok(req) = init_rx.recv_async() => {
                    let result = directory.init(&req.admin, &req.password);
                    log_result("init", &result);
                    let _ = req.reply.send(result);
                }
                Ok(req) = check_rx.recv_async() => {
                    let result = directory.check();
                    log_result("check", &result);
                    let _ = req.reply.send(result);
                }
                Ok(req) = add_rx.recv_async() => {
                    let result = directory.add_user(&req.user, &req.password, req.is_admin);
                    log_result("add", &result);
                    if result.is_ok() {
                        notify_hook(&hook_tx);
                    }
                    let _ = req.reply.send(result);
                }
                Ok(req) = update_rx.recv_async() => {
                    let result = directory.update_user(&req.user, &req.password);
                    log_result("update", &result);
                    if result.is_ok() {
                        notify_hook(&hook_tx);
                    }
                    match req.reply {
                        Some(reply) => { let _ = reply.send(result); }
                        None => {
                            if let Err(e) = result {
                                warn!(user = %req.user, error = %e, "rehash-on-verify update failed");
                            }
                        }
                    }
                }
                Ok(req) = set_admin_rx.recv_async() => {
                    let result = directory.set_admin(&req.user, req.is_admin);
                    log_result("set_admin", &result);
                    if result.is_ok() {
                        notify_hook(&hook_tx);
                    }
                    let _ = req.reply.send(result);
                }
                Ok(req) = remove_rx.recv_async() => {
                    let result = directory.remove_user(&req.user);
                    log_result("remove", &result);
                    if result.is_ok() {
                        notify_hook(&hook_tx);
                    }
                    let _ = req.reply.send(result);
                }
                Ok(req) = list_rx.recv_async() => {
                    let result = directory.list();
                    let _ = req.reply.send(result);
                }
                Ok(req) = list_full_rx.recv_async() => {
                    let result = directory.list_full();
                    let _ = req.reply.send(result);
                }
                Ok(req) = authenticate_rx.recv_async() => {
                    let result = directory.authenticate(&req.user, &req.password);
                    debug!(user = %req.user, ok = result.is_ok(), "authenticate");

                    if let Ok(auth) = &result
                        && auth.authenticated
                        && auth.upgradeable
                    {
                        handle_upgrade(&upgrade_policy, &update_tx, &remote_upgrade_tx, req.user.clone(), SecretString::from_str(req.password.expose_secret()));
                    }

                    let _ = req.reply.send(result);
                }
                else => break,
            }
        }

        info!("dispatcher worker exiting: all request channels closed");
    });

    StoreHandle::new(reload_tx, init_tx, check_tx, add_tx, update_tx, set_admin_tx, remove_tx, list_tx, list_full_tx, authenticate_tx)
}

fn handle_upgrade(policy: &UpgradePolicy, update_tx: &flume::Sender<UpdateRequest>, remote_tx: &flume::Sender<UpgradeRecord>, user: String, password: SecretString) {
    match policy {
        UpgradePolicy::None => {}
        UpgradePolicy::Local => {
            let _ = update_tx.try_send(UpdateRequest { user, password, reply: None });
        }
        UpgradePolicy::Remote(_) => {
            if remote_tx.try_send(UpgradeRecord { user: user.clone(), password }).is_err() {
                warn!(%user, "remote upgrade queue full, dropping rehash notification");
            }
        }
    }
}

async fn drain_remote_upgrades(rx: flume::Receiver<UpgradeRecord>, sink: Arc<dyn UpgradeSink>) {
    let semaphore = Arc::new(Semaphore::new(REMOTE_UPGRADE_CONCURRENCY));

    while let Ok(record) = rx.recv_async().await {
        let sink = Arc::clone(&sink);
        let permit = Arc::clone(&semaphore).acquire_owned().await;
        tokio::spawn(async move {
            let _permit = permit;
            sink.upgrade(record.user, record.password).await;
        });
    }
}

fn notify_hook(hook_tx: &flume::Sender<()>) {
    let _ = hook_tx.try_send(());
}

fn log_result<T>(op: &'static str, result: &Result<T, StoreError>) {
    match result {
        Ok(_) => debug!(operation = op, "ok"),
        Err(e) => debug!(operation = op, error = %e, "failed"),
    }
}

/// Constructs a oneshot reply pair; a thin alias kept for symmetry with the
/// request constructors in adapter code.
pub fn reply_pair<T>() -> (oneshot::Sender<Result<T, StoreError>>, oneshot::Receiver<Result<T, StoreError>>) {
    oneshot::channel()
}
