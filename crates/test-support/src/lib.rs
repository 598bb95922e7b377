use std::{
    path::Path,
    sync::{Mutex, MutexGuard, OnceLock},
};

use tempfile::TempDir;

pub const ASSET_DIR_ENV: &str = "TASKNOTES_ASSET_DIR";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

pub fn test_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Points the asset dir and database URL at test locations and restores every
/// variable it touched on drop.
pub struct TestEnvGuard {
    _lock: MutexGuard<'static, ()>,
    previous: Vec<(String, Option<String>)>,
}

impl TestEnvGuard {
    pub fn new(temp_root: &Path, db_url: String) -> Self {
        let lock = test_lock().lock().unwrap_or_else(|err| err.into_inner());
        let mut guard = Self {
            _lock: lock,
            previous: Vec::new(),
        };
        guard.set(ASSET_DIR_ENV, &temp_root.to_string_lossy());
        guard.set(DATABASE_URL_ENV, &db_url);
        guard
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.remember(name);
        // SAFETY: tests using TestEnvGuard are serialized by test_lock.
        unsafe {
            std::env::set_var(name, value);
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.remember(name);
        // SAFETY: tests using TestEnvGuard are serialized by test_lock.
        unsafe {
            std::env::remove_var(name);
        }
    }

    fn remember(&mut self, name: &str) {
        if !self.previous.iter().any(|(known, _)| known == name) {
            self.previous
                .push((name.to_string(), std::env::var(name).ok()));
        }
    }
}

impl Drop for TestEnvGuard {
    fn drop(&mut self) {
        // SAFETY: tests using TestEnvGuard are serialized by test_lock.
        unsafe {
            for (name, value) in self.previous.iter().rev() {
                match value {
                    Some(value) => std::env::set_var(name, value),
                    None => std::env::remove_var(name),
                }
            }
        }
    }
}

/// A temp asset dir with the env guard pointed at it.
pub fn temp_env() -> (TempDir, TestEnvGuard) {
    let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));
    let guard = TestEnvGuard::new(dir.path(), "sqlite::memory:".to_string());
    (dir, guard)
}
