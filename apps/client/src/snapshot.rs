//! Versioned on-disk snapshots of server reads.
//!
//! A snapshot is `{ schema, fetched_at_ms, value }`. Snapshots written by
//! older builds as `{ data, ts }` are migrated on first read and rewritten.
//! Anything else that fails to decode is discarded and reported as a miss.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SCHEMA_VERSION: u32 = 1;
/// Every cache key starts with this, so a flush leaves other keys alone.
pub const CACHE_PREFIX: &str = "cache_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub schema: u32,
    pub fetched_at_ms: i64,
    pub value: T,
}

#[derive(Deserialize)]
struct LegacyEnvelope {
    data: Value,
    ts: i64,
}

/// Raw key/value persistence. Keys are plain strings, values are JSON text.
pub trait SnapshotStore: Send + Sync {
    fn load(&self, key: &str) -> Option<String>;
    fn save(&self, key: &str, raw: &str) -> io::Result<()>;
    fn remove(&self, key: &str);
    fn keys(&self) -> Vec<String>;
}

pub(crate) enum Decoded<T> {
    Current(Envelope<T>),
    Migrated(Envelope<T>),
    Discard,
}

pub(crate) fn decode<T: DeserializeOwned>(raw: &str) -> Decoded<T> {
    let Ok(json) = serde_json::from_str::<Value>(raw) else {
        return Decoded::Discard;
    };

    if json.get("schema").is_some() {
        return match serde_json::from_value::<Envelope<T>>(json) {
            Ok(env) if env.schema == SCHEMA_VERSION => Decoded::Current(env),
            _ => Decoded::Discard,
        };
    }

    match serde_json::from_value::<LegacyEnvelope>(json) {
        Ok(legacy) => match serde_json::from_value::<T>(legacy.data) {
            Ok(value) => Decoded::Migrated(Envelope {
                schema: SCHEMA_VERSION,
                fetched_at_ms: legacy.ts,
                value,
            }),
            Err(_) => Decoded::Discard,
        },
        Err(_) => Decoded::Discard,
    }
}

/// Reads a snapshot, migrating or discarding as needed.
pub fn read<T>(store: &dyn SnapshotStore, key: &str) -> Option<Envelope<T>>
where
    T: Serialize + DeserializeOwned,
{
    let raw = store.load(key)?;
    match decode::<T>(&raw) {
        Decoded::Current(env) => Some(env),
        Decoded::Migrated(env) => {
            tracing::debug!("Migrated legacy snapshot {}", key);
            write(store, key, &env);
            Some(env)
        }
        Decoded::Discard => {
            tracing::warn!("Discarding unreadable snapshot {}", key);
            store.remove(key);
            None
        }
    }
}

/// Persists a snapshot. Failures are logged; the cache keeps working without disk.
pub fn write<T: Serialize>(store: &dyn SnapshotStore, key: &str, env: &Envelope<T>) {
    let raw = match serde_json::to_string(env) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("Failed to encode snapshot {}: {}", key, e);
            return;
        }
    };
    if let Err(e) = store.save(key, &raw) {
        tracing::warn!("Failed to save snapshot {}: {}", key, e);
    }
}

/// Drops every cache snapshot.
pub fn flush(store: &dyn SnapshotStore) -> usize {
    let keys: Vec<String> = store
        .keys()
        .into_iter()
        .filter(|k| k.starts_with(CACHE_PREFIX))
        .collect();
    for key in &keys {
        store.remove(key);
    }
    keys.len()
}

// ── File store ──

/// One JSON file per key under a directory.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.path(key)).ok()
    }

    fn save(&self, key: &str, raw: &str) -> io::Result<()> {
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(tmp, path)
    }

    fn remove(&self, key: &str) {
        let _ = fs::remove_file(self.path(key));
    }

    fn keys(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|name| name.strip_suffix(".json"))
                    .map(str::to_string)
            })
            .collect()
    }
}

// ── In-memory store ──

#[derive(Default)]
pub struct MemorySnapshotStore {
    entries: DashMap<String, String>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn save(&self, key: &str, raw: &str) -> io::Result<()> {
        self.entries.insert(key.to_string(), raw.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> FileSnapshotStore {
        let dir = std::env::temp_dir().join(format!("chocoo-snapshots-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        FileSnapshotStore::open(dir).unwrap()
    }

    #[test]
    fn test_current_schema_reads_back() {
        let store = MemorySnapshotStore::new();
        let env = Envelope {
            schema: SCHEMA_VERSION,
            fetched_at_ms: 1_000,
            value: vec![1, 2, 3],
        };
        write(&store, "cache_numbers", &env);
        assert_eq!(read::<Vec<i32>>(&store, "cache_numbers"), Some(env));
    }

    #[test]
    fn test_legacy_snapshot_is_migrated_and_rewritten() {
        let store = MemorySnapshotStore::new();
        store
            .save("cache_services", r#"{"data":["a","b"],"ts":42}"#)
            .unwrap();

        let env = read::<Vec<String>>(&store, "cache_services").unwrap();
        assert_eq!(env.value, vec!["a", "b"]);
        assert_eq!(env.fetched_at_ms, 42);

        let raw = store.load("cache_services").unwrap();
        assert!(raw.contains("\"schema\":1"));
    }

    #[test]
    fn test_unknown_schema_is_discarded() {
        let store = MemorySnapshotStore::new();
        store
            .save("cache_x", r#"{"schema":99,"fetched_at_ms":1,"value":[]}"#)
            .unwrap();
        assert!(read::<Vec<i32>>(&store, "cache_x").is_none());
        assert!(store.load("cache_x").is_none());
    }

    #[test]
    fn test_corrupt_snapshot_is_a_miss() {
        let store = MemorySnapshotStore::new();
        store.save("cache_x", "{not json").unwrap();
        assert!(read::<Vec<i32>>(&store, "cache_x").is_none());
        assert!(store.load("cache_x").is_none());
    }

    #[test]
    fn test_flush_keeps_foreign_keys() {
        let store = MemorySnapshotStore::new();
        store.save("cache_a", "1").unwrap();
        store.save("cache_b", "2").unwrap();
        store.save("identity", "\"1:client\"").unwrap();

        assert_eq!(flush(&store), 2);
        assert_eq!(store.keys(), vec!["identity".to_string()]);
    }

    #[test]
    fn test_file_store_round_trip() {
        let store = temp_store("roundtrip");
        let env = Envelope {
            schema: SCHEMA_VERSION,
            fetched_at_ms: 7,
            value: "hello".to_string(),
        };
        write(&store, "cache_slots_2025-06-02", &env);

        assert_eq!(read::<String>(&store, "cache_slots_2025-06-02"), Some(env));
        assert_eq!(store.keys(), vec!["cache_slots_2025-06-02".to_string()]);

        assert_eq!(flush(&store), 1);
        assert!(store.keys().is_empty());
        let _ = fs::remove_dir_all(store.dir());
    }
}
