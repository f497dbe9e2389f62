//! Debounces storm-prone mutation notifications into a bounded number of
//! external hook invocations.
//!
//! Modeled directly on the upstream hook runner: a single-writer loop keyed
//! off a pending counter and a timer that is either stopped or running.
//! The first notification while idle fires immediately; everything that
//! arrives before the rate-limit window closes is coalesced into at most
//! one more invocation when the window fires.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::{Sleep, sleep, timeout};
use tracing::{debug, warn};

/// Window during which a burst of notifications collapses into one
/// trailing invocation.
const RATE_LIMIT: Duration = Duration::from_secs(5);

/// How long a single hook executable is given to run before being killed.
const HOOK_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable every invoked hook receives, set to the store's
/// base directory.
const BASEDIR_ENV_VAR: &str = "WHAWTY_AUTH_BASEDIR";

/// Spawns the debounce loop and returns the sender mutating operations
/// notify on success.
pub fn spawn(hooks_dir: PathBuf, base_dir: PathBuf) -> flume::Sender<()> {
    let (tx, rx) = flume::bounded(32);
    tokio::spawn(run(rx, hooks_dir, base_dir));
    tx
}

async fn run(rx: flume::Receiver<()>, hooks_dir: PathBuf, base_dir: PathBuf) {
    let mut pending: u32 = 0;
    let mut timer: Option<Pin<Box<Sleep>>> = None;

    loop {
        tokio::select! {
            notified = rx.recv_async() => {
                match notified {
                    Ok(()) => {
                        if pending == 0 {
                            invoke_all(&hooks_dir, &base_dir).await;
                            timer = Some(Box::pin(sleep(RATE_LIMIT)));
                        }
                        pending += 1;
                    }
                    Err(_) => break,
                }
            }
            () = wait_timer(&mut timer) => {
                if pending > 1 {
                    invoke_all(&hooks_dir, &base_dir).await;
                }
                pending = 0;
                timer = None;
            }
        }
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(t) => t.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Scans `hooks_dir` for regular, owner-or-group-executable, non-hidden,
/// not-world-writable files and runs each with argument `update`.
async fn invoke_all(hooks_dir: &Path, base_dir: &Path) {
    let mut entries = match tokio::fs::read_dir(hooks_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %hooks_dir.display(), error = %e, "cannot read hooks directory");
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %hooks_dir.display(), error = %e, "error walking hooks directory");
                break;
            }
        };

        let path = entry.path();
        if !is_runnable_hook(&path).await {
            continue;
        }
        run_hook(&path, base_dir).await;
    }
}

async fn is_runnable_hook(path: &Path) -> bool {
    if path.file_name().and_then(|n| n.to_str()).is_some_and(|name| name.starts_with('.')) {
        return false;
    }

    let Ok(metadata) = tokio::fs::metadata(path).await else { return false };
    if !metadata.is_file() {
        return false;
    }

    let mode = metadata.permissions().mode();
    let owner_or_group_exec = mode & 0o110 != 0;
    let world_writable = mode & 0o002 != 0;
    owner_or_group_exec && !world_writable
}

async fn run_hook(path: &Path, base_dir: &Path) {
    let mut command = Command::new(path);
    command.arg("update").env(BASEDIR_ENV_VAR, base_dir).kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(hook = %path.display(), error = %e, "failed to spawn hook");
            return;
        }
    };

    match timeout(HOOK_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => debug!(hook = %path.display(), "hook completed"),
        Ok(Ok(output)) => warn!(hook = %path.display(), status = ?output.status, "hook exited with an error"),
        Ok(Err(e)) => warn!(hook = %path.display(), error = %e, "hook failed"),
        Err(_) => warn!(hook = %path.display(), timeout_secs = HOOK_TIMEOUT.as_secs(), "hook timed out, killing"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn single_notification_triggers_exactly_one_invocation() {
        let hooks = tempdir().unwrap();
        let marker = hooks.path().join("counter");
        write_counter_hook(hooks.path(), &marker);

        let tx = spawn(hooks.path().to_owned(), PathBuf::from("/base"));
        tx.send_async(()).await.unwrap();

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(fs::read_to_string(&marker).unwrap().lines().count(), 1);

        tokio::time::sleep(RATE_LIMIT + StdDuration::from_millis(200)).await;
        assert_eq!(fs::read_to_string(&marker).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn a_burst_triggers_exactly_two_invocations() {
        let hooks = tempdir().unwrap();
        let marker = hooks.path().join("counter");
        write_counter_hook(hooks.path(), &marker);

        let tx = spawn(hooks.path().to_owned(), PathBuf::from("/base"));
        for _ in 0..5 {
            tx.send_async(()).await.unwrap();
        }

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(fs::read_to_string(&marker).unwrap().lines().count(), 1);

        tokio::time::sleep(RATE_LIMIT + StdDuration::from_millis(200)).await;
        assert_eq!(fs::read_to_string(&marker).unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn hidden_and_non_executable_files_are_skipped() {
        let hooks = tempdir().unwrap();
        fs::write(hooks.path().join(".hidden"), "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(hooks.path().join(".hidden"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(hooks.path().join("not-executable"), "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(hooks.path().join("not-executable"), fs::Permissions::from_mode(0o644)).unwrap();

        invoke_all(hooks.path(), Path::new("/base")).await;
    }

    fn write_counter_hook(dir: &Path, marker: &Path) {
        let script = dir.join("count.sh");
        fs::write(&script, format!("#!/bin/sh\necho hit >> {}\n", marker.display())).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
