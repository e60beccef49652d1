use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, Weak};

use weft_transport::TaskId;

use crate::request::RequestInner;

/// A map whose values are held weakly: an entry never keeps its request
/// alive, and a stale entry behaves exactly like a missing one.
///
/// Removal is driven by the request's own drop path rather than by a
/// deallocation hook or periodic sweeping; `get` additionally prunes any
/// stale entry it happens to hit.
pub(crate) struct WeakValueMap<K, V> {
    entries: Mutex<HashMap<K, Weak<V>>>,
}

impl<K: Hash + Eq + Clone, V> WeakValueMap<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<std::sync::Arc<V>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(weak) => match weak.upgrade() {
                Some(value) => Some(value),
                None => {
                    entries.remove(key);
                    None
                }
            },
            None => None,
        }
    }

    pub(crate) fn set(&self, key: K, value: Option<Weak<V>>) {
        let mut entries = self.entries.lock().unwrap();
        match value {
            Some(weak) => {
                entries.insert(key, weak);
            }
            None => {
                entries.remove(&key);
            }
        }
    }

    pub(crate) fn contains_live(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Number of live entries. Prunes stale ones as a side effect.
    pub(crate) fn live_count(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, weak| weak.strong_count() > 0);
        entries.len()
    }
}

/// Concurrent identifier-to-request map for the whole session.
///
/// The primary index is keyed by transport task id; a secondary index keys
/// streaming-download requests by their normalized target URL so a second
/// caller asking for the same URL can join the in-flight transfer. All
/// operations are total and safe from any thread; the critical sections are
/// pure map operations under a single mutex each.
pub(crate) struct TaskRegistry {
    by_task: WeakValueMap<TaskId, RequestInner>,
    by_url: WeakValueMap<String, RequestInner>,
}

impl TaskRegistry {
    pub(crate) fn new() -> Self {
        Self {
            by_task: WeakValueMap::new(),
            by_url: WeakValueMap::new(),
        }
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<std::sync::Arc<RequestInner>> {
        self.by_task.get(&id)
    }

    pub(crate) fn set(&self, id: TaskId, request: Option<Weak<RequestInner>>) {
        self.by_task.set(id, request);
    }

    pub(crate) fn get_by_url(&self, url: &str) -> Option<std::sync::Arc<RequestInner>> {
        self.by_url.get(&normalize_url(url))
    }

    pub(crate) fn set_by_url(&self, url: &str, request: Option<Weak<RequestInner>>) {
        self.by_url.set(normalize_url(url), request);
    }

    /// Live entries in the primary index.
    pub(crate) fn in_flight(&self) -> usize {
        self.by_task.live_count()
    }

    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.by_task.contains_live(&id)
    }
}

/// Canonical form of a URL for the secondary index: scheme and host are
/// case-insensitive, the fragment never reaches the server.
pub(crate) fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
    match without_fragment.split_once("://") {
        Some((scheme, rest)) => {
            let (authority, path) = match rest.find('/') {
                Some(idx) => rest.split_at(idx),
                None => (rest, ""),
            };
            format!(
                "{}://{}{}",
                scheme.to_ascii_lowercase(),
                authority.to_ascii_lowercase(),
                path
            )
        }
        None => without_fragment.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_scheme_host_and_fragment() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM/Path?q=1#frag"),
            "https://example.com/Path?q=1"
        );
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
        assert_eq!(normalize_url("not a url"), "not a url");
    }

    #[test]
    fn weak_map_drops_entries_with_their_values() {
        let map: WeakValueMap<u64, String> = WeakValueMap::new();
        let value = std::sync::Arc::new("hello".to_string());
        map.set(7, Some(std::sync::Arc::downgrade(&value)));
        assert!(map.contains_live(&7));
        assert_eq!(map.live_count(), 1);

        drop(value);
        assert!(map.get(&7).is_none());
        assert_eq!(map.live_count(), 0);
    }

    #[test]
    fn set_none_removes() {
        let map: WeakValueMap<u64, String> = WeakValueMap::new();
        let value = std::sync::Arc::new("v".to_string());
        map.set(1, Some(std::sync::Arc::downgrade(&value)));
        map.set(1, None);
        assert!(map.get(&1).is_none());
    }

    #[test]
    fn concurrent_insert_lookup_and_drop_stay_consistent() {
        use std::sync::Arc;

        let map: Arc<WeakValueMap<u64, u64>> = Arc::new(WeakValueMap::new());
        let threads: Vec<_> = (0..8u64)
            .map(|t| {
                let map = Arc::clone(&map);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let key = t * 1_000 + i;
                        let value = Arc::new(key);
                        map.set(key, Some(Arc::downgrade(&value)));
                        assert_eq!(map.get(&key).as_deref(), Some(&key));
                        // Lookups of other threads' keys are total: live,
                        // stale and absent entries all answer.
                        let _ = map.get(&(((t + 1) % 8) * 1_000 + i));
                        let _ = map.live_count();
                        if i % 3 == 0 {
                            map.set(key, None);
                        } else {
                            drop(value);
                            assert!(map.get(&key).is_none());
                        }
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(map.live_count(), 0);
    }
}
