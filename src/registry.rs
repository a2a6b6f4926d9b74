//! Process-wide backend registry.
//!
//! Maps a registration key — normally a bare scheme such as `s3`, but a
//! more specific URI prefix like `s3://archive/` works too — to a
//! shared [`FileSystem`]. URI dispatch consults this map and picks the
//! longest matching key.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::backend::FileSystem;
use crate::backends;

type Map = HashMap<String, Arc<dyn FileSystem>>;

fn global() -> &'static RwLock<Map> {
    static REGISTRY: OnceLock<RwLock<Map>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a filesystem under a key, replacing any previous entry.
pub fn register(key: &str, fs: Arc<dyn FileSystem>) {
    let mut map = global().write().expect("registry lock poisoned");
    map.insert(key.to_string(), fs);
}

/// Remove one registration.
pub fn unregister(key: &str) {
    let mut map = global().write().expect("registry lock poisoned");
    map.remove(key);
}

/// Remove every registration. Intended for tests.
pub fn unregister_all() {
    let mut map = global().write().expect("registry lock poisoned");
    map.clear();
}

/// Look up the filesystem registered under a key.
pub fn lookup(key: &str) -> Option<Arc<dyn FileSystem>> {
    let map = global().read().expect("registry lock poisoned");
    map.get(key).cloned()
}

/// All registration keys, sorted.
pub fn registered_schemes() -> Vec<String> {
    let map = global().read().expect("registry lock poisoned");
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    keys
}

/// Register the default instance of every built-in backend.
///
/// Explicit rather than implicit at load time; call once during process
/// start-up. Remote backends are constructed lazily and read their
/// credentials from the environment on first use, so registration never
/// touches the network.
pub fn register_defaults() {
    register("file", Arc::new(backends::os::OsFileSystem::new()));
    register("mem", Arc::new(backends::memory::MemoryFileSystem::new()));
    register("s3", Arc::new(backends::s3::filesystem()));
    register("gs", Arc::new(backends::gcs::filesystem()));
    register("az", Arc::new(backends::azure::filesystem()));
    register("sftp", Arc::new(backends::sftp::filesystem()));
    register("ftp", Arc::new(backends::ftp::filesystem()));
}
