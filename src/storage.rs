//! Durable string-map storage: a JSON file in the config dir, plus an
//! in-memory implementation for tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

const STORE_FILENAME: &str = "storage.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("corrupt stored value for {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// String-keyed durable store. Implementations must make `set_many` and
/// `remove_many` land as a single durable operation so paired values
/// (token + user) are never observed half-written.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
    fn set_many(&self, entries: &[(&str, &str)]);
    fn remove_many(&self, keys: &[&str]);
}

fn expand_tilde(path: &str) -> PathBuf {
    let s = path.trim();
    if s.starts_with('~') {
        let rest = s.trim_start_matches('~').trim_start_matches('/');
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

fn config_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var("NUTRICHAT_CONFIG_DIR") {
        let s = override_dir.trim();
        if !s.is_empty() {
            return expand_tilde(s);
        }
    }
    #[cfg(windows)]
    {
        let appdata = std::env::var("APPDATA")
            .unwrap_or_else(|_| std::env::var("USERPROFILE").unwrap_or_default());
        PathBuf::from(appdata).join("NutriChat")
    }
    #[cfg(not(windows))]
    {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(xdg).join("nutrichat")
        } else {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
                .join("nutrichat")
        }
    }
}

/// Flat JSON object persisted in one file. A mutex serializes the
/// read-modify-write cycle; multi-key writes rewrite the file once.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn open_default() -> Self {
        Self::at(config_dir().join(STORE_FILENAME))
    }

    pub fn at(path: PathBuf) -> Self {
        FileStore {
            path,
            lock: Mutex::new(()),
        }
    }

    fn read_map(&self) -> HashMap<String, String> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    fn write_map(&self, map: &HashMap<String, String>) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(
            &self.path,
            serde_json::to_string_pretty(map).unwrap_or_else(|_| "{}".to_string()),
        );
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().ok()?;
        self.read_map().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let Ok(_guard) = self.lock.lock() else { return };
        let mut map = self.read_map();
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map);
    }

    fn remove(&self, key: &str) {
        let Ok(_guard) = self.lock.lock() else { return };
        let mut map = self.read_map();
        map.remove(key);
        self.write_map(&map);
    }

    fn set_many(&self, entries: &[(&str, &str)]) {
        let Ok(_guard) = self.lock.lock() else { return };
        let mut map = self.read_map();
        for (key, value) in entries {
            map.insert((*key).to_string(), (*value).to_string());
        }
        self.write_map(&map);
    }

    fn remove_many(&self, keys: &[&str]) {
        let Ok(_guard) = self.lock.lock() else { return };
        let mut map = self.read_map();
        for key in keys {
            map.remove(*key);
        }
        self.write_map(&map);
    }
}

/// Test and scratch store: same contract, no disk.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut map) = self.map.lock() {
            map.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut map) = self.map.lock() {
            map.remove(key);
        }
    }

    fn set_many(&self, entries: &[(&str, &str)]) {
        if let Ok(mut map) = self.map.lock() {
            for (key, value) in entries {
                map.insert((*key).to_string(), (*value).to_string());
            }
        }
    }

    fn remove_many(&self, keys: &[&str]) {
        if let Ok(mut map) = self.map.lock() {
            for key in keys {
                map.remove(*key);
            }
        }
    }
}
