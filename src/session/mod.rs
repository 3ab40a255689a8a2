//! Per-browser session identity and experiment variant assignment.
//!
//! [`SessionIdentity`] is constructed explicitly and handed to the tracker and
//! dispatcher; the values live in a [`SessionStore`] so they survive restarts
//! when a persistent store is used.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

const SESSION_KEY: &str = "friction_session_id";
const VARIANT_KEY: &str = "friction_variant";

/// Key/value persistence for session identity.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// Volatile store, used when nothing needs to survive the process.
#[derive(Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
    }
}

/// JSON file backed store. Read and write failures degrade to "absent".
pub struct FileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> HashMap<String, String> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().ok()?;
        self.load().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let Ok(_guard) = self.lock.lock() else {
            return;
        };
        let mut values = self.load();
        values.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let written = serde_json::to_string_pretty(&values)
            .map_err(|e| e.to_string())
            .and_then(|raw| std::fs::write(&self.path, raw).map_err(|e| e.to_string()));
        if let Err(e) = written {
            warn!(path = %self.path.display(), error = %e, "Failed to persist session identity");
        }
    }
}

/// Experiment arm assigned to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    A,
    B,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::B => "B",
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stable session id and variant lookup/generation.
///
/// The first lookup is cached for the life of the identity (and its clones),
/// so a store that cannot persist still yields one id per process.
#[derive(Clone)]
pub struct SessionIdentity {
    store: Arc<dyn SessionStore>,
    resolved: Arc<OnceLock<(String, Variant)>>,
}

impl SessionIdentity {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            resolved: Arc::new(OnceLock::new()),
        }
    }

    /// Identity backed by a volatile in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionStore::new()))
    }

    /// Return the persisted session id, generating one (and a variant) on
    /// first use.
    pub fn session_id(&self) -> String {
        self.resolve().0.clone()
    }

    fn resolve(&self) -> &(String, Variant) {
        self.resolved.get_or_init(|| self.load_or_create())
    }

    fn load_or_create(&self) -> (String, Variant) {
        if let Some(id) = self.store.get(SESSION_KEY) {
            return (id, self.stored_variant());
        }

        let uuid = Uuid::new_v4();
        let id = format!(
            "sess_{}{}",
            Utc::now().timestamp_millis(),
            &uuid.simple().to_string()[..9]
        );
        let variant = if uuid.as_bytes()[15] & 1 == 0 {
            Variant::A
        } else {
            Variant::B
        };

        self.store.set(SESSION_KEY, &id);
        self.store.set(VARIANT_KEY, variant.as_str());
        if self.store.get(SESSION_KEY).as_deref() != Some(id.as_str()) {
            warn!(session_id = %id, "Session store did not persist, keeping a process-local id");
        }
        info!(session_id = %id, variant = %variant, "Session started");
        (id, variant)
    }

    /// Variant of the current session; `A` when none was assigned.
    pub fn variant(&self) -> Variant {
        match self.resolved.get() {
            Some((_, variant)) => *variant,
            None => self.stored_variant(),
        }
    }

    fn stored_variant(&self) -> Variant {
        match self.store.get(VARIANT_KEY).as_deref() {
            Some("B") => Variant::B,
            _ => Variant::A,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_is_stable() {
        let identity = SessionIdentity::in_memory();
        let first = identity.session_id();
        let second = identity.session_id();
        assert_eq!(first, second);
        assert!(first.starts_with("sess_"));
    }

    #[test]
    fn test_variant_defaults_to_a() {
        let identity = SessionIdentity::in_memory();
        assert_eq!(identity.variant(), Variant::A);
    }

    #[test]
    fn test_variant_assigned_with_session() {
        let store = Arc::new(MemorySessionStore::new());
        let identity = SessionIdentity::new(store.clone());
        identity.session_id();
        let stored = store.get(VARIANT_KEY).unwrap();
        assert!(stored == "A" || stored == "B");
        assert_eq!(identity.variant().as_str(), stored);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let first = SessionIdentity::new(Arc::new(FileSessionStore::new(&path))).session_id();
        let second = SessionIdentity::new(Arc::new(FileSessionStore::new(&path))).session_id();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unwritable_store_keeps_one_id() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let store = Arc::new(FileSessionStore::new(blocker.join("session.json")));

        let identity = SessionIdentity::new(store.clone());
        let first = identity.session_id();
        assert_eq!(identity.session_id(), first);
        assert_eq!(identity.clone().session_id(), first);
        assert!(store.get(SESSION_KEY).is_none());
        assert_eq!(identity.variant(), identity.variant());
    }

    #[test]
    fn test_concurrent_first_use_agrees() {
        let identity = SessionIdentity::in_memory();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let identity = identity.clone();
                std::thread::spawn(move || identity.session_id())
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|id| id == &ids[0]));
    }

    #[test]
    fn test_file_store_missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nope.json"));
        assert!(store.get(SESSION_KEY).is_none());
    }
}
