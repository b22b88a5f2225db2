use doccore::ExecutorResult;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Operations whose results are expensive and deterministic for a given
/// (config, input) pair.
const CACHEABLE_OPS: &[&str] = &[
    "ocr-extract",
    "ai-classify",
    "ai-extract",
    "ai-summarize",
    "text-extract",
];

/// Content-addressed cache of executor results.
///
/// Shared by every execution of one engine instance and never
/// invalidated; the key must capture operation, config and input file
/// identities in full.
pub struct ResultCache {
    entries: Mutex<HashMap<String, ExecutorResult>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache key from operation, canonical config JSON and input file
    /// identities. serde_json maps serialize with sorted keys, so equal
    /// configs produce equal keys regardless of insertion order.
    pub fn key(operation: &str, config: &Map<String, Value>, files: &[PathBuf]) -> String {
        let config_json = serde_json::to_string(config).unwrap_or_default();
        let files = files
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join(",");
        format!("{operation}:{config_json}:{files}")
    }

    pub fn cacheable(operation: &str) -> bool {
        CACHEABLE_OPS.contains(&operation)
    }

    pub fn get(&self, key: &str) -> Option<ExecutorResult> {
        let hit = self.entries.lock().unwrap().get(key).cloned();
        match hit {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    /// Store a result, but only for whitelisted operations with a
    /// non-null structured payload.
    pub fn put(&self, operation: &str, key: String, result: &ExecutorResult) {
        if !Self::cacheable(operation) || result.data.is_null() {
            return;
        }
        self.entries.lock().unwrap().insert(key, result.clone());
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}
