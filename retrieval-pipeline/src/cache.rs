//! TTL + LRU query cache over `dashmap`. Eviction is hand-rolled on top
//! since no purpose-built cache crate covers this shape.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use common::clinical::GuidelineChunk;

#[derive(Clone)]
struct CachedEntry {
    chunks: Vec<GuidelineChunk>,
    inserted_at: Instant,
    last_accessed: Instant,
}

pub struct QueryCache {
    entries: DashMap<String, CachedEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl QueryCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries,
        }
    }

    /// Builds the cache key as a fingerprint of the query, topic hints, and
    /// `top_k`.
    pub fn key(query: &str, topic_hints: &[String], top_k: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        for hint in topic_hints {
            hasher.update(b"\0");
            hasher.update(hint.as_bytes());
        }
        hasher.update(top_k.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Vec<GuidelineChunk>> {
        let mut entry = self.entries.get_mut(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        entry.last_accessed = Instant::now();
        Some(entry.chunks.clone())
    }

    pub fn insert(&self, key: String, chunks: Vec<GuidelineChunk>) {
        let now = Instant::now();
        self.entries.insert(
            key,
            CachedEntry {
                chunks,
                inserted_at: now,
                last_accessed: now,
            },
        );
        self.evict_if_over_capacity();
    }

    fn evict_if_over_capacity(&self) {
        if self.entries.len() <= self.max_entries {
            return;
        }
        let overflow = self.entries.len() - self.max_entries;
        let mut candidates: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_accessed))
            .collect();
        candidates.sort_by_key(|(_, last_accessed)| *last_accessed);
        for (key, _) in candidates.into_iter().take(overflow) {
            self.entries.remove(&key);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk() -> GuidelineChunk {
        GuidelineChunk {
            doc_id: "doc1".to_string(),
            title: "Sepsis".to_string(),
            organization: "WHO".to_string(),
            year: Some(2021),
            topic: "sepsis".to_string(),
            categories: vec![],
            license: None,
            source_url: None,
            chunk_text: "text".to_string(),
            chunk_index: 0,
        }
    }

    #[test]
    fn hits_return_cached_value_before_ttl_expiry() {
        let cache = QueryCache::new(Duration::from_secs(60), 10);
        let key = QueryCache::key("fever", &[], 3);
        cache.insert(key.clone(), vec![sample_chunk()]);
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = QueryCache::new(Duration::from_millis(1), 10);
        let key = QueryCache::key("fever", &[], 3);
        cache.insert(key.clone(), vec![sample_chunk()]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn eviction_keeps_capacity_bounded() {
        let cache = QueryCache::new(Duration::from_secs(60), 2);
        for i in 0..5 {
            let key = QueryCache::key(&format!("query{i}"), &[], 3);
            cache.insert(key, vec![sample_chunk()]);
        }
        assert!(cache.len() <= 2);
    }
}
