//! Per-host credential cache.
//!
//! Lookups take a read lock only, so hosts that are already cached never wait
//! on a miss being filled for another host. Issuance runs without any lock
//! held; two concurrent misses for the same host may both issue, and the
//! first one stored wins.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Memoizes one credential per hostname for the life of the process.
pub struct CertCache<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> std::fmt::Debug for CertCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertCache")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

impl<T> Default for CertCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CertCache<T> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the credential for `host`, calling `issue` only on a miss.
    ///
    /// Issuance errors are returned unchanged and nothing is cached.
    pub fn fetch<E, F>(&self, host: &str, issue: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(cached) = self.entries.read().get(host) {
            return Ok(Arc::clone(cached));
        }

        let issued = Arc::new(issue()?);

        let mut entries = self.entries.write();
        let stored = entries
            .entry(host.to_string())
            .or_insert_with(|| Arc::clone(&issued));
        Ok(Arc::clone(stored))
    }

    /// Number of cached hosts.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fetch_issues_once_per_host() {
        let cache = CertCache::new();
        let calls = AtomicUsize::new(0);

        let issue = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>("credential".to_string())
        };

        let first = cache.fetch("mp.weixin.qq.com", issue).unwrap();
        let second = cache
            .fetch("mp.weixin.qq.com", || -> Result<String, String> {
                panic!("issue must not run on a hit")
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fetch_keeps_hosts_separate() {
        let cache = CertCache::new();

        let a = cache.fetch("a.example", || Ok::<_, ()>(1)).unwrap();
        let b = cache.fetch("b.example", || Ok::<_, ()>(2)).unwrap();

        assert_eq!(*a, 1);
        assert_eq!(*b, 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn fetch_propagates_issue_error() {
        let cache: CertCache<String> = CertCache::new();

        let result = cache.fetch("bad.example", || Err("issuance failed"));

        assert_eq!(result.unwrap_err(), "issuance failed");
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_fetches_share_entry() {
        let cache = Arc::new(CertCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.fetch("host", || Ok::<_, ()>(7)).unwrap())
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let stored = cache
            .fetch("host", || -> Result<i32, ()> { panic!("cached host was reissued") })
            .unwrap();

        assert!(results.iter().all(|r| Arc::ptr_eq(r, &stored)));
        assert_eq!(cache.len(), 1);
    }
}
