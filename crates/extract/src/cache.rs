use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Prompt-keyed store of service responses, shared by every capability
/// adapter in one run.
#[derive(Clone)]
pub struct ResponseCache {
    llm_responses: Arc<DashMap<String, String>>,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            llm_responses: Arc::new(DashMap::new()),
            max_entries,
        }
    }

    /// Cache an LLM response
    pub fn set_llm_response(&self, prompt: &str, response: String) {
        if self.max_entries == 0 {
            return;
        }
        if self.llm_responses.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self.llm_responses.iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.llm_responses.remove(&key);
            }
        }
        let key = self.hash_text(prompt);
        self.llm_responses.insert(key, response);
    }

    pub fn get_llm_response(&self, prompt: &str) -> Option<String> {
        let key = self.hash_text(prompt);
        self.llm_responses.get(&key).map(|r| r.value().clone())
    }

    fn hash_text(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            llm_responses_cached: self.llm_responses.len(),
            max_entries: self.max_entries,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub llm_responses_cached: usize,
    pub max_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_by_prompt() {
        let cache = ResponseCache::new(10);
        cache.set_llm_response("prompt", "{}".to_string());

        assert_eq!(cache.get_llm_response("prompt").as_deref(), Some("{}"));
        assert!(cache.get_llm_response("other").is_none());
    }

    #[test]
    fn test_eviction_keeps_size_bounded() {
        let cache = ResponseCache::new(4);
        for i in 0..20 {
            cache.set_llm_response(&format!("p{}", i), i.to_string());
        }
        assert!(cache.stats().llm_responses_cached <= 4);
    }
}
