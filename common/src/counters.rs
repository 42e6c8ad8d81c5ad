//! Health-endpoint counters. All fields are atomics so every component can
//! hold a shared `Arc<Counters>` and increment without locking.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Counters {
    pub differential_concise_retry_count: AtomicU64,
    pub summary_concise_retry_count: AtomicU64,
    pub rag_query_blocked_count: AtomicU64,
    pub extract_labs_fast_path_count: AtomicU64,
    pub extract_labs_llm_fallback_count: AtomicU64,
    pub session_busy_count: AtomicU64,
    pub specialist_overflow_count: AtomicU64,
    pub specialist_refusal_count: AtomicU64,
    pub validation_warning_count: AtomicU64,
    pub orchestrator_fallback_count: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            differential_concise_retry_count: self.differential_concise_retry_count.load(Ordering::Relaxed),
            summary_concise_retry_count: self.summary_concise_retry_count.load(Ordering::Relaxed),
            rag_query_blocked_count: self.rag_query_blocked_count.load(Ordering::Relaxed),
            extract_labs_fast_path_count: self.extract_labs_fast_path_count.load(Ordering::Relaxed),
            extract_labs_llm_fallback_count: self.extract_labs_llm_fallback_count.load(Ordering::Relaxed),
            session_busy_count: self.session_busy_count.load(Ordering::Relaxed),
            specialist_overflow_count: self.specialist_overflow_count.load(Ordering::Relaxed),
            specialist_refusal_count: self.specialist_refusal_count.load(Ordering::Relaxed),
            validation_warning_count: self.validation_warning_count.load(Ordering::Relaxed),
            orchestrator_fallback_count: self.orchestrator_fallback_count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct CountersSnapshot {
    pub differential_concise_retry_count: u64,
    pub summary_concise_retry_count: u64,
    pub rag_query_blocked_count: u64,
    pub extract_labs_fast_path_count: u64,
    pub extract_labs_llm_fallback_count: u64,
    pub session_busy_count: u64,
    pub specialist_overflow_count: u64,
    pub specialist_refusal_count: u64,
    pub validation_warning_count: u64,
    pub orchestrator_fallback_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn snapshot_reflects_increments() {
        let counters = Counters::new();
        counters.extract_labs_fast_path_count.fetch_add(3, Ordering::Relaxed);
        let snap = counters.snapshot();
        assert_eq!(snap.extract_labs_fast_path_count, 3);
    }
}
