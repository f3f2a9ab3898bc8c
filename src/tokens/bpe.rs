//! Optional BPE calibration using the p50k tokenizer, with a content-hash cache.

use dashmap::DashMap;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tiktoken_rs::{p50k_base, CoreBPE};
use tracing::warn;

/// Cache configuration for BPE token counts
#[derive(Debug, Clone)]
struct BpeCacheConfig {
    /// Maximum number of entries in the cache
    max_entries: usize,
    /// Minimum content size to cache (bytes)
    min_content_size: usize,
    /// Maximum age for cache entries (seconds)
    max_age_seconds: u64,
}

impl Default for BpeCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 2000,
            min_content_size: 50,
            max_age_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    token_count: usize,
    last_accessed: u64,
}

/// Thread-safe token count cache keyed by MD5 of the content
struct BpeCountCache {
    cache: DashMap<String, CacheEntry>,
    config: BpeCacheConfig,
}

impl BpeCountCache {
    fn new() -> Self {
        Self {
            cache: DashMap::new(),
            config: BpeCacheConfig::default(),
        }
    }

    fn hash_content(content: &str) -> String {
        format!("{:x}", md5::compute(content.as_bytes()))
    }

    fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Drop expired entries, then the least recently used ones over the limit
    fn cleanup(&self) {
        let now = Self::current_timestamp();
        let max_age = self.config.max_age_seconds;
        self.cache
            .retain(|_, entry| now.saturating_sub(entry.last_accessed) < max_age);

        if self.cache.len() > self.config.max_entries {
            let mut entries: Vec<_> = self
                .cache
                .iter()
                .map(|item| (item.key().clone(), item.value().last_accessed))
                .collect();
            entries.sort_by_key(|(_, ts)| *ts);

            let to_remove = self.cache.len() - self.config.max_entries;
            for (key, _) in entries.into_iter().take(to_remove) {
                self.cache.remove(&key);
            }
        }
    }

    fn get_or_compute<F>(&self, content: &str, compute_fn: F) -> usize
    where
        F: FnOnce(&str) -> usize,
    {
        if content.len() < self.config.min_content_size {
            return compute_fn(content);
        }

        let hash = Self::hash_content(content);
        let now = Self::current_timestamp();
        if let Some(mut entry) = self.cache.get_mut(&hash) {
            entry.last_accessed = now;
            return entry.token_count;
        }

        let token_count = compute_fn(content);
        self.cache.insert(
            hash,
            CacheEntry {
                token_count,
                last_accessed: now,
            },
        );

        if self.cache.len() % 100 == 0 {
            self.cleanup();
        }
        token_count
    }

    fn len(&self) -> usize {
        self.cache.len()
    }
}

static BPE_CACHE: OnceLock<BpeCountCache> = OnceLock::new();

fn get_cache() -> &'static BpeCountCache {
    BPE_CACHE.get_or_init(BpeCountCache::new)
}

/// The p50k tokenizer, or None if it failed to initialize
pub fn get_tokenizer() -> Option<&'static CoreBPE> {
    static TOKENIZER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    TOKENIZER
        .get_or_init(|| match p50k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                warn!("Failed to initialize p50k tokenizer, BPE calibration disabled: {e}");
                None
            }
        })
        .as_ref()
}

/// Exact p50k token count, memoized for larger inputs
pub fn count_tokens(text: &str) -> Option<usize> {
    let tokenizer = get_tokenizer()?;
    Some(get_cache().get_or_compute(text, |content| {
        tokenizer.encode_with_special_tokens(content).len()
    }))
}

/// Exact p50k token count that bypasses the cache, for many small slices
pub fn count_tokens_uncached(text: &str) -> Option<usize> {
    get_tokenizer().map(|tokenizer| tokenizer.encode_with_special_tokens(text).len())
}

/// Number of memoized entries, for diagnostics
pub fn cached_entries() -> usize {
    get_cache().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_returns_consistent_counts() {
        let cache = BpeCountCache::new();
        let content = "This is a test string that should be cached because it's longer than 50 bytes.";
        let calls = std::cell::Cell::new(0);

        let first = cache.get_or_compute(content, |t| {
            calls.set(calls.get() + 1);
            t.split_whitespace().count()
        });
        let second = cache.get_or_compute(content, |t| {
            calls.set(calls.get() + 1);
            t.split_whitespace().count()
        });

        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_small_content_not_cached() {
        let cache = BpeCountCache::new();
        cache.get_or_compute("short", |t| t.len());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(
            BpeCountCache::hash_content("abc"),
            BpeCountCache::hash_content("abc")
        );
        assert_ne!(
            BpeCountCache::hash_content("abc"),
            BpeCountCache::hash_content("abd")
        );
    }

    #[test]
    fn test_count_tokens_with_real_tokenizer() {
        let count = count_tokens("fn main() { println!(\"Hello, world!\"); }").unwrap();
        assert!(count > 5);
        assert_eq!(count_tokens("").unwrap(), 0);
        assert_eq!(count_tokens_uncached("let x = 1;"), count_tokens("let x = 1;"));
    }
}
