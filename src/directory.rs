//! Filesystem-level invariants for a base directory of per-user hash files.
//!
//! Every mutating operation here assumes it is the only writer touching
//! `base_dir` — that exclusivity is provided by the dispatcher, not by any
//! locking in this module.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::hash::registry::Registry;
use crate::hashfile::{HashRecord, Role, classify, file_name, is_valid_user_name};
use crate::secret::SecretString;

const SCRATCH_DIR: &str = ".tmp";

/// Full detail for one directory entry, used by `list_full`.
#[derive(Debug, Clone)]
pub struct UserEntryFull {
    pub user: String,
    pub is_admin: bool,
    pub valid: bool,
    pub supported: bool,
    pub format_id: Option<String>,
    pub param_id: Option<u32>,
    pub last_changed: Option<u64>,
}

/// Result of a successful `authenticate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthResult {
    pub authenticated: bool,
    pub is_admin: bool,
    pub upgradeable: bool,
    pub last_changed: u64,
}

pub struct Directory {
    base_dir: PathBuf,
    registry: Registry,
}

impl Directory {
    pub fn new(base_dir: impl Into<PathBuf>, registry: Registry) -> Self {
        Self { base_dir: base_dir.into(), registry }
    }

    /// Builds a `Directory` from a directory-configuration document at
    /// `config_path` and validates it with [`Self::check`]. Used both at
    /// startup and by the dispatcher's reload path; on any failure the
    /// caller is expected to keep whatever `Directory` it already has.
    pub fn from_config(config_path: &Path) -> Result<Self, StoreError> {
        let config = crate::config::DirectoryConfig::load(config_path)?;
        let base_dir = config.basedir.clone();
        let registry = config.build_registry()?;
        let directory = Self::new(base_dir, registry);
        directory.check()?;
        Ok(directory)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn scratch_dir(&self) -> PathBuf {
        self.base_dir.join(SCRATCH_DIR)
    }

    fn ensure_scratch_dir(&self) -> Result<(), StoreError> {
        let dir = self.scratch_dir();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700)).map_err(|e| StoreError::io(&dir, e))?;
        Ok(())
    }

    fn path_for(&self, user: &str, role: Role) -> PathBuf {
        self.base_dir.join(file_name(user, role))
    }

    fn find_existing(&self, user: &str) -> Option<(PathBuf, Role)> {
        for role in [Role::Admin, Role::User] {
            let path = self.path_for(user, role);
            if path.is_file() {
                return Some((path, role));
            }
        }
        None
    }

    /// `init(admin, password)`: requires an empty base directory (aside from
    /// the scratch subdirectory) and a registered default parameter-set.
    pub fn init(&self, admin: &str, password: &SecretString) -> Result<(), StoreError> {
        if !is_valid_user_name(admin) {
            return Err(StoreError::InvalidName(admin.to_owned()));
        }

        let mut saw_entry = false;
        for entry in fs::read_dir(&self.base_dir).map_err(|e| StoreError::io(&self.base_dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&self.base_dir, e))?;
            if entry.file_name() != SCRATCH_DIR {
                saw_entry = true;
                break;
            }
        }
        if saw_entry {
            return Err(StoreError::AlreadyExists("base directory is not empty".into()));
        }

        self.add_internal(admin, password, Role::Admin)
    }

    /// Enumerates the base directory and validates every entry; the scratch
    /// subdirectory is ignored. Fails on the first integrity violation.
    pub fn check(&self) -> Result<(), StoreError> {
        let entries = self.list_full()?;

        let mut seen = std::collections::HashSet::new();
        let mut has_supported_admin = false;
        for entry in &entries {
            if !seen.insert(entry.user.clone()) {
                return Err(StoreError::BothRolesPresent(entry.user.clone()));
            }
            if !entry.valid {
                return Err(StoreError::Malformed(entry.user.clone()));
            }
            if entry.is_admin && entry.supported {
                has_supported_admin = true;
            }
        }

        if !has_supported_admin {
            return Err(StoreError::UnsupportedFormat("no supported admin hash file present".into()));
        }

        Ok(())
    }

    /// Users whose hash file is in a currently supported format.
    pub fn list(&self) -> Result<Vec<(String, bool)>, StoreError> {
        Ok(self.list_full()?.into_iter().filter(|e| e.supported).map(|e| (e.user, e.is_admin)).collect())
    }

    /// All entries, including malformed or unsupported ones, for display
    /// and diagnostics.
    pub fn list_full(&self) -> Result<Vec<UserEntryFull>, StoreError> {
        let mut entries = Vec::new();

        let read_dir = match fs::read_dir(&self.base_dir) {
            Ok(rd) => rd,
            Err(e) => return Err(StoreError::io(&self.base_dir, e)),
        };

        for entry in read_dir {
            let entry = entry.map_err(|e| StoreError::io(&self.base_dir, e))?;
            let file_name_os = entry.file_name();
            let Some(name) = file_name_os.to_str() else { continue };
            if name == SCRATCH_DIR {
                continue;
            }
            if !entry.path().is_file() {
                continue;
            }

            let Ok((user, role)) = classify(name) else {
                entries.push(UserEntryFull {
                    user: name.to_owned(),
                    is_admin: false,
                    valid: false,
                    supported: false,
                    format_id: None,
                    param_id: None,
                    last_changed: None,
                });
                continue;
            };

            let bytes = fs::read(entry.path()).map_err(|e| StoreError::io(entry.path(), e))?;
            match HashRecord::parse(&bytes) {
                Ok(record) => {
                    let supported = self.is_supported(&record);
                    entries.push(UserEntryFull {
                        user,
                        is_admin: role.is_admin(),
                        valid: true,
                        supported,
                        format_id: Some(record.format_id),
                        param_id: Some(record.param_id),
                        last_changed: Some(record.last_changed),
                    });
                }
                Err(_) => {
                    entries.push(UserEntryFull { user, is_admin: role.is_admin(), valid: false, supported: false, format_id: None, param_id: None, last_changed: None });
                }
            }
        }

        Ok(entries)
    }

    pub fn exists(&self, user: &str) -> bool {
        self.find_existing(user).is_some()
    }

    pub fn add_user(&self, user: &str, password: &SecretString, is_admin: bool) -> Result<(), StoreError> {
        if !is_valid_user_name(user) {
            return Err(StoreError::InvalidName(user.to_owned()));
        }
        if self.exists(user) {
            return Err(StoreError::AlreadyExists(user.to_owned()));
        }
        self.add_internal(user, password, if is_admin { Role::Admin } else { Role::User })
    }

    fn add_internal(&self, user: &str, password: &SecretString, role: Role) -> Result<(), StoreError> {
        let hasher = self.registry.default_hasher()?;
        let default_id = self.registry.default_id()?;
        let payload = hasher.generate(password)?;
        let record = HashRecord::new(hasher.format_id(), now_unix(), default_id, payload);

        let dest = self.path_for(user, role);
        self.atomic_write(&dest, &record, None)
    }

    pub fn update_user(&self, user: &str, password: &SecretString) -> Result<(), StoreError> {
        let (dest, _role) = self.find_existing(user).ok_or_else(|| StoreError::NotFound(user.to_owned()))?;

        let existing = fs::read(&dest).map_err(|e| StoreError::io(&dest, e))?;
        let existing_record = HashRecord::parse(&existing)?;
        if !self.is_supported(&existing_record) {
            return Err(StoreError::UnsupportedFormat(existing_record.format_id));
        }

        let hasher = self.registry.default_hasher()?;
        let default_id = self.registry.default_id()?;
        let payload = hasher.generate(password)?;
        let record = HashRecord::new(hasher.format_id(), now_unix(), default_id, payload);

        self.atomic_write(&dest, &record, Some(&existing))
    }

    pub fn set_admin(&self, user: &str, is_admin: bool) -> Result<(), StoreError> {
        let (src, role) = self.find_existing(user).ok_or_else(|| StoreError::NotFound(user.to_owned()))?;
        let target_role = if is_admin { Role::Admin } else { Role::User };
        if role == target_role {
            return Ok(());
        }

        let dest = self.path_for(user, target_role);
        fs::rename(&src, &dest).map_err(|e| StoreError::io(&dest, e))?;
        self.fsync_dir(&self.base_dir)
    }

    pub fn remove_user(&self, user: &str) -> Result<(), StoreError> {
        if let Some((path, _role)) = self.find_existing(user) {
            fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
        }
        Ok(())
    }

    pub fn authenticate(&self, user: &str, password: &SecretString) -> Result<AuthResult, StoreError> {
        let (path, role) = self.find_existing(user).ok_or_else(|| StoreError::NotFound(user.to_owned()))?;
        let bytes = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
        let record = HashRecord::parse(&bytes)?;
        let hasher = self.resolve_hasher(&record)?;

        let authenticated = hasher.verify(password, &record.payload)?;
        let upgradeable = authenticated && self.registry.is_upgradeable(record.param_id);

        Ok(AuthResult { authenticated, is_admin: role.is_admin(), upgradeable, last_changed: record.last_changed })
    }

    /// Resolves `record`'s hasher by `param_id` and confirms its `format_id`
    /// matches the one actually stored in the file; a registered id whose
    /// algorithm disagrees with the record's `format_id` is as unknown as an
    /// id that isn't registered at all.
    fn resolve_hasher(&self, record: &HashRecord) -> Result<&dyn crate::hash::Hasher, StoreError> {
        let hasher = self.registry.get(record.param_id)?;
        if hasher.format_id() != record.format_id {
            return Err(StoreError::UnknownParameterSet(record.param_id));
        }
        Ok(hasher)
    }

    /// Whether `record` is in a format this directory can read: its
    /// `param_id` is registered, the registered hasher's `format_id` matches
    /// the one stored in the file, and the payload is structurally valid.
    fn is_supported(&self, record: &HashRecord) -> bool {
        self.resolve_hasher(record).is_ok_and(|hasher| hasher.is_valid_payload(&record.payload))
    }

    /// Steps 1-6 of the atomic write protocol: write a fresh temp file with
    /// the new first line, append the previous content after its first
    /// line (if any), fsync, rename over the destination, fsync the
    /// containing directory. `existing` is the previously read byte content
    /// of `dest`, or `None` when creating a brand-new file.
    fn atomic_write(&self, dest: &Path, record: &HashRecord, existing: Option<&[u8]>) -> Result<(), StoreError> {
        self.ensure_scratch_dir()?;

        if existing.is_none() {
            let probe = OpenOptions::new().read(true).open(dest);
            if probe.is_ok() {
                return Err(StoreError::AlreadyExists(dest.display().to_string()));
            }
        }

        let scratch = self.scratch_dir();
        let tmp_name = format!(".{}.{}", std::process::id(), scratch_suffix());
        let tmp_path = scratch.join(tmp_name);
        let mut guard = ScratchGuard::new(&tmp_path);

        {
            let mut tmp = OpenOptions::new().write(true).create_new(true).mode(0o600).open(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
            tmp.write_all(&record.serialize()).map_err(|e| StoreError::io(&tmp_path, e))?;

            if let Some(existing) = existing {
                let mut reader = BufReader::new(existing);
                let mut discard = String::new();
                reader.read_line(&mut discard).map_err(|e| StoreError::io(dest, e))?;
                std::io::copy(&mut reader, &mut tmp).map_err(|e| StoreError::io(&tmp_path, e))?;
            }

            tmp.sync_all().map_err(|e| StoreError::io(&tmp_path, e))?;
        }

        fs::rename(&tmp_path, dest).map_err(|e| StoreError::io(dest, e))?;
        guard.disarm();

        self.fsync_dir(&self.base_dir)
    }

    fn fsync_dir(&self, dir: &Path) -> Result<(), StoreError> {
        let handle = File::open(dir).map_err(|e| StoreError::io(dir, e))?;
        handle.sync_all().map_err(|e| StoreError::io(dir, e))
    }
}

/// Unlinks the temp file at `path` on drop unless [`Self::disarm`] was
/// called first. Covers every early return out of `atomic_write` — a failed
/// write, history copy, or fsync — the same way the Go original's
/// `defer os.Remove(tmp.Name())` covers every return out of its write path.
struct ScratchGuard<'a> {
    path: &'a Path,
    armed: bool,
}

impl<'a> ScratchGuard<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, armed: true }
    }

    /// Called once the rename has succeeded and the temp file no longer exists under its own name.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(self.path);
        }
    }
}

fn scratch_suffix() -> String {
    use rand::rand_core::{OsRng, TryRngCore};
    let mut bytes = [0u8; 8];
    OsRng.try_fill_bytes(&mut bytes).unwrap_or_default();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn now_unix() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::registry::ParameterSetSpec;
    use crate::hash::scryptauth::ScryptAuthParams;
    use tempfile::tempdir;

    fn test_registry(default: u32) -> Registry {
        Registry::new(vec![(1, ParameterSetSpec::ScryptAuth(ScryptAuthParams { hmac_key: [3u8; 32], cost: 4, r: 8, p: 1 }))], default).unwrap()
    }

    #[test]
    fn init_creates_the_first_admin() {
        let dir = tempdir().unwrap();
        let store = Directory::new(dir.path(), test_registry(1));
        let pw = SecretString::from_str("pw1");

        store.init("root", &pw).unwrap();

        let result = store.authenticate("root", &pw).unwrap();
        assert!(result.authenticated);
        assert!(result.is_admin);
        assert!(!result.upgradeable);

        let bad = store.authenticate("root", &SecretString::from_str("bad")).unwrap();
        assert!(!bad.authenticated);
    }

    #[test]
    fn init_rejects_non_empty_directory() {
        let dir = tempdir().unwrap();
        let store = Directory::new(dir.path(), test_registry(1));
        store.init("root", &SecretString::from_str("pw1")).unwrap();
        assert!(store.init("other", &SecretString::from_str("pw2")).is_err());
    }

    #[test]
    fn add_then_set_admin_renames_the_file() {
        let dir = tempdir().unwrap();
        let store = Directory::new(dir.path(), test_registry(1));
        store.init("root", &SecretString::from_str("pw")).unwrap();

        store.add_user("alice", &SecretString::from_str("s"), false).unwrap();
        assert!(dir.path().join("alice.user").exists());

        store.set_admin("alice", true).unwrap();
        assert!(!dir.path().join("alice.user").exists());
        assert!(dir.path().join("alice.admin").exists());

        let list = store.list().unwrap();
        assert!(list.contains(&("alice".to_owned(), true)));
    }

    #[test]
    fn update_preserves_trailing_history_lines() {
        let dir = tempdir().unwrap();
        let store = Directory::new(dir.path(), test_registry(1));
        store.init("root", &SecretString::from_str("pw")).unwrap();

        let path = dir.path().join("root.admin");
        let mut contents = fs::read(&path).unwrap();
        contents.extend_from_slice(b"legacy-history-line\n");
        fs::write(&path, &contents).unwrap();

        store.update_user("root", &SecretString::from_str("pw2")).unwrap();

        let updated = fs::read_to_string(&path).unwrap();
        assert!(updated.contains("legacy-history-line"));

        assert!(store.authenticate("root", &SecretString::from_str("pw2")).unwrap().authenticated);
    }

    #[test]
    fn update_on_missing_user_fails() {
        let dir = tempdir().unwrap();
        let store = Directory::new(dir.path(), test_registry(1));
        store.init("root", &SecretString::from_str("pw")).unwrap();
        assert!(matches!(store.update_user("ghost", &SecretString::from_str("x")), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = Directory::new(dir.path(), test_registry(1));
        store.init("root", &SecretString::from_str("pw")).unwrap();
        store.remove_user("ghost").unwrap();
        store.remove_user("ghost").unwrap();
    }

    #[test]
    fn upgrade_flag_is_set_after_default_changes() {
        let dir = tempdir().unwrap();
        let registry = Registry::new(
            vec![
                (1, ParameterSetSpec::ScryptAuth(ScryptAuthParams { hmac_key: [1u8; 32], cost: 4, r: 8, p: 1 })),
                (2, ParameterSetSpec::ScryptAuth(ScryptAuthParams { hmac_key: [2u8; 32], cost: 4, r: 8, p: 1 })),
            ],
            1,
        )
        .unwrap();
        let store = Directory::new(dir.path(), registry);
        store.init("root", &SecretString::from_str("pw")).unwrap();

        let registry2 = Registry::new(
            vec![
                (1, ParameterSetSpec::ScryptAuth(ScryptAuthParams { hmac_key: [1u8; 32], cost: 4, r: 8, p: 1 })),
                (2, ParameterSetSpec::ScryptAuth(ScryptAuthParams { hmac_key: [2u8; 32], cost: 4, r: 8, p: 1 })),
            ],
            2,
        )
        .unwrap();
        let store2 = Directory::new(dir.path(), registry2);

        let result = store2.authenticate("root", &SecretString::from_str("pw")).unwrap();
        assert!(result.authenticated);
        assert!(result.upgradeable);
    }

    #[test]
    fn check_rejects_both_roles_present() {
        let dir = tempdir().unwrap();
        let store = Directory::new(dir.path(), test_registry(1));
        store.init("root", &SecretString::from_str("pw")).unwrap();
        fs::copy(dir.path().join("root.admin"), dir.path().join("root.user")).unwrap();

        assert!(matches!(store.check(), Err(StoreError::BothRolesPresent(_))));
    }

    fn mixed_algorithm_registry(default: u32) -> Registry {
        use crate::hash::argon2id::Argon2idParams;
        Registry::new(
            vec![
                (1, ParameterSetSpec::ScryptAuth(ScryptAuthParams { hmac_key: [5u8; 32], cost: 4, r: 8, p: 1 })),
                (2, ParameterSetSpec::Argon2id(Argon2idParams { time: 2, memory: 19 * 1024, threads: 1, length: 32 })),
            ],
            default,
        )
        .unwrap()
    }

    #[test]
    fn authenticate_rejects_a_param_id_whose_registered_algorithm_disagrees_with_the_stored_format_id() {
        let dir = tempdir().unwrap();
        let store = Directory::new(dir.path(), mixed_algorithm_registry(1));
        store.init("root", &SecretString::from_str("pw")).unwrap();
        store.add_user("alice", &SecretString::from_str("s"), false).unwrap();

        // `alice.user`'s real first line is `hmac_sha256_scrypt:...:1:...`; rewrite its
        // format-id to `argon2id` while leaving `param-id` pointing at the scryptauth set.
        let path = dir.path().join("alice.user");
        let real = HashRecord::parse(&fs::read(&path).unwrap()).unwrap();
        let tampered = HashRecord::new("argon2id", real.last_changed, real.param_id, real.payload);
        fs::write(&path, tampered.serialize()).unwrap();

        let err = store.authenticate("alice", &SecretString::from_str("s")).unwrap_err();
        assert!(matches!(err, StoreError::UnknownParameterSet(1)));
    }

    #[test]
    fn update_refuses_to_overwrite_a_param_id_whose_registered_algorithm_disagrees_with_the_stored_format_id() {
        let dir = tempdir().unwrap();
        let store = Directory::new(dir.path(), mixed_algorithm_registry(1));
        store.init("root", &SecretString::from_str("pw")).unwrap();
        store.add_user("alice", &SecretString::from_str("s"), false).unwrap();

        let path = dir.path().join("alice.user");
        let real = HashRecord::parse(&fs::read(&path).unwrap()).unwrap();
        let tampered = HashRecord::new("argon2id", real.last_changed, real.param_id, real.payload.clone());
        fs::write(&path, tampered.serialize()).unwrap();

        let err = store.update_user("alice", &SecretString::from_str("new")).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedFormat(_)));

        // The file must be left untouched, and no temp file left behind.
        assert_eq!(fs::read(&path).unwrap(), tampered.serialize());
        assert!(fs::read_dir(dir.path().join(".tmp")).map(|mut d| d.next().is_none()).unwrap_or(true));
    }

}
