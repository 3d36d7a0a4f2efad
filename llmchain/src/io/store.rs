//! Per-field storage for chain run state.
//!
//! Every field of a chain's run state lives under its own key, addressed by
//! chain name. [`FsStore`] keeps one file per field under
//! `<state_root>/<chain>/`; [`MemoryStore`] keeps everything in a map and is
//! meant for tests and dry runs.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use tracing::debug;

/// Key of one independently stored state field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StateKey {
    Status,
    Round,
    StartTime,
    Handoff,
    /// Presence means a stop was requested; the value is the reason.
    StopRequest,
    /// Handoff snapshot attributed to one link.
    LinkHandoff(String),
}

impl StateKey {
    /// File name used by [`FsStore`] for this key.
    pub fn file_name(&self) -> String {
        match self {
            StateKey::Status => "status.txt".to_string(),
            StateKey::Round => "round_counter.txt".to_string(),
            StateKey::StartTime => "start_time.txt".to_string(),
            StateKey::Handoff => "handoff.md".to_string(),
            StateKey::StopRequest => "STOP".to_string(),
            StateKey::LinkHandoff(link) => format!("handoff_{link}.md"),
        }
    }

    /// Short label for logs and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            StateKey::Status => "status",
            StateKey::Round => "round",
            StateKey::StartTime => "start_time",
            StateKey::Handoff => "handoff",
            StateKey::StopRequest => "stop_request",
            StateKey::LinkHandoff(_) => "link_handoff",
        }
    }
}

/// Storage backend for chain run state.
///
/// Implementations assume a single writer per chain. Reads of keys that were
/// never written return `Ok(None)`; I/O failures are returned unchanged.
pub trait StateStore {
    /// Allocate storage for `chain` if it does not exist yet.
    fn prepare(&self, _chain: &str) -> Result<()> {
        Ok(())
    }

    fn read(&self, chain: &str, key: &StateKey) -> Result<Option<String>>;

    fn write(&self, chain: &str, key: &StateKey, value: &str) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, chain: &str, key: &StateKey) -> Result<()>;
}

impl<S: StateStore + ?Sized> StateStore for &S {
    fn prepare(&self, chain: &str) -> Result<()> {
        (**self).prepare(chain)
    }

    fn read(&self, chain: &str, key: &StateKey) -> Result<Option<String>> {
        (**self).read(chain, key)
    }

    fn write(&self, chain: &str, key: &StateKey, value: &str) -> Result<()> {
        (**self).write(chain, key, value)
    }

    fn remove(&self, chain: &str, key: &StateKey) -> Result<()> {
        (**self).remove(chain, key)
    }
}

/// Reject names that cannot be used as a single path component.
///
/// Chain and link names end up in file names, so they must be non-empty and
/// free of path separators.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("{kind} name must not be empty");
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        bail!("{kind} name {name:?} must not contain path separators");
    }
    Ok(())
}

/// Filesystem store: one directory per chain, one file per field.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn chain_dir(&self, chain: &str) -> PathBuf {
        self.root.join(chain)
    }

    pub fn path(&self, chain: &str, key: &StateKey) -> PathBuf {
        self.chain_dir(chain).join(key.file_name())
    }
}

impl StateStore for FsStore {
    fn prepare(&self, chain: &str) -> Result<()> {
        let dir = self.chain_dir(chain);
        fs::create_dir_all(&dir).with_context(|| format!("create state dir {}", dir.display()))
    }

    fn read(&self, chain: &str, key: &StateKey) -> Result<Option<String>> {
        let path = self.path(chain, key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
        }
    }

    fn write(&self, chain: &str, key: &StateKey, value: &str) -> Result<()> {
        let path = self.path(chain, key);
        debug!(path = %path.display(), field = key.label(), "writing state field");
        write_atomic(&path, value)
    }

    fn remove(&self, chain: &str, key: &StateKey) -> Result<()> {
        let path = self.path(chain, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
        }
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace state {}", path.display()))?;
    Ok(())
}

/// In-memory store, keyed by `(chain, field)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    fields: Mutex<BTreeMap<(String, StateKey), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_fields<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<(String, StateKey), String>) -> T,
    ) -> Result<T> {
        let mut fields = self
            .fields
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(f(&mut fields))
    }
}

impl StateStore for MemoryStore {
    fn read(&self, chain: &str, key: &StateKey) -> Result<Option<String>> {
        self.with_fields(|fields| fields.get(&(chain.to_string(), key.clone())).cloned())
    }

    fn write(&self, chain: &str, key: &StateKey, value: &str) -> Result<()> {
        self.with_fields(|fields| {
            fields.insert((chain.to_string(), key.clone()), value.to_string());
        })
    }

    fn remove(&self, chain: &str, key: &StateKey) -> Result<()> {
        self.with_fields(|fields| {
            fields.remove(&(chain.to_string(), key.clone()));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_store_uses_stable_file_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsStore::new(temp.path());
        store.prepare("demo").expect("prepare");
        assert!(temp.path().join("demo").is_dir());

        store
            .write("demo", &StateKey::Round, "4")
            .expect("write round");
        store
            .write("demo", &StateKey::LinkHandoff("opus-worker".to_string()), "report")
            .expect("write link");
        store
            .write("demo", &StateKey::StopRequest, "halt")
            .expect("write stop");

        let dir = temp.path().join("demo");
        assert_eq!(
            fs::read_to_string(dir.join("round_counter.txt")).expect("read"),
            "4"
        );
        assert_eq!(
            fs::read_to_string(dir.join("handoff_opus-worker.md")).expect("read"),
            "report"
        );
        assert!(dir.join("STOP").is_file());
        assert!(!dir.join("round_counter.txt.tmp").exists());
    }

    #[test]
    fn fs_store_missing_field_reads_none_and_removes_quietly() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsStore::new(temp.path());
        assert_eq!(store.read("fresh", &StateKey::Status).expect("read"), None);
        store
            .remove("fresh", &StateKey::StartTime)
            .expect("remove missing");
    }

    #[test]
    fn fs_store_propagates_io_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsStore::new(temp.path());
        // A directory where the status file should be makes the read fail.
        fs::create_dir_all(temp.path().join("broken").join("status.txt")).expect("mkdir");
        let err = store.read("broken", &StateKey::Status).unwrap_err();
        assert!(err.to_string().contains("status.txt"));
    }

    #[test]
    fn memory_store_isolates_chains() {
        let store = MemoryStore::new();
        store.write("a", &StateKey::Status, "RUNNING").expect("write");
        assert_eq!(
            store.read("a", &StateKey::Status).expect("read"),
            Some("RUNNING".to_string())
        );
        assert_eq!(store.read("b", &StateKey::Status).expect("read"), None);
        store.remove("a", &StateKey::Status).expect("remove");
        assert_eq!(store.read("a", &StateKey::Status).expect("read"), None);
    }

    #[test]
    fn names_with_separators_are_rejected() {
        assert!(validate_name("link", "opus-worker").is_ok());
        assert!(validate_name("link", "").is_err());
        assert!(validate_name("link", "../escape").is_err());
        assert!(validate_name("chain", "a\\b").is_err());
        assert!(validate_name("chain", "..").is_err());
    }
}
