//! Time-bounded cache of successful tool results.
//!
//! Owned explicitly by whoever builds the executor; there is no global
//! instance. Entries are keyed by tool name plus the canonical JSON of the
//! arguments (object keys sorted) and expire after a fixed TTL. No
//! consistency is promised across concurrent runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::types::ToolExecutionResult;
use crate::config::CacheConfig;

struct CacheEntry {
    stored_at: Instant,
    seq: u64,
    result: ToolExecutionResult,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    next_seq: u64,
}

pub struct ResultCache {
    ttl: Duration,
    max_entries: usize,
    state: Mutex<CacheState>,
}

impl ResultCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.max_entries)
    }

    fn key(tool: &str, arguments: &Value) -> String {
        format!("{tool}:{arguments}")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        // A poisoned cache only holds stale results; keep using it.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fresh cached result, if any. Expired entries are dropped on access.
    pub fn get(&self, tool: &str, arguments: &Value) -> Option<ToolExecutionResult> {
        let key = Self::key(tool, arguments);
        let mut state = self.lock();
        let expired = match state.entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                return Some(entry.result.clone())
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            state.entries.remove(&key);
        }
        None
    }

    /// Store a result. Failed results are never cached.
    pub fn insert(&self, tool: &str, arguments: &Value, result: &ToolExecutionResult) {
        if !result.success {
            return;
        }
        let key = Self::key(tool, arguments);
        let mut state = self.lock();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_entries {
            let ttl = self.ttl;
            state.entries.retain(|_, e| e.stored_at.elapsed() < ttl);
            if state.entries.len() >= self.max_entries {
                let oldest = state
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.seq)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    state.entries.remove(&oldest);
                }
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                seq,
                result: result.clone(),
            },
        );
    }

    /// Drop every entry for the named tools.
    pub fn invalidate(&self, tools: &[&str]) {
        if tools.is_empty() {
            return;
        }
        let mut state = self.lock();
        state
            .entries
            .retain(|key, _| !tools.iter().any(|t| key.starts_with(&format!("{t}:"))));
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
