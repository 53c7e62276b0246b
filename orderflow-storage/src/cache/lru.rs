//! Fixed-capacity LRU cache.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use orderflow_core::Order;

use super::traits::{CacheStats, OrderCache};

/// Upper bound on slots reserved up front, so a huge configured capacity
/// does not allocate before entries arrive.
const PREALLOC_LIMIT: usize = 4096;

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Least-recently-used cache with a fixed capacity.
///
/// Entries live in a slab of nodes linked into a recency list (head is most
/// recently used, tail least). The map points keys at slab slots, so lookup,
/// insertion, promotion and eviction are all O(1). Entries are only removed
/// by eviction or [`clear`](Self::clear); an evicted slot is reused by the
/// entry that displaced it.
///
/// A capacity of zero stores nothing.
#[derive(Debug)]
pub struct LruCache<K, V> {
    map: HashMap<K, usize>,
    nodes: Vec<Node<K, V>>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(capacity: usize) -> Self {
        let reserve = capacity.min(PREALLOC_LIMIT);
        Self {
            map: HashMap::with_capacity(reserve),
            nodes: Vec::with_capacity(reserve),
            head: None,
            tail: None,
            capacity,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Look up `key` and promote it to most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.map.get(key).copied() {
            Some(idx) => {
                self.hits += 1;
                self.touch(idx);
                Some(&self.nodes[idx].value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Look up `key` without touching recency or counters.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key).map(|&idx| &self.nodes[idx].value)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Insert or overwrite `key`, making it most recently used.
    ///
    /// Returns the entry evicted to stay within capacity, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.map.get(&key) {
            self.nodes[idx].value = value;
            self.touch(idx);
            return None;
        }

        if self.capacity == 0 {
            self.evictions += 1;
            return Some((key, value));
        }

        if self.nodes.len() < self.capacity {
            let idx = self.nodes.len();
            self.nodes.push(Node {
                key: key.clone(),
                value,
                prev: None,
                next: None,
            });
            self.map.insert(key, idx);
            self.push_front(idx);
            return None;
        }

        // Full: the least recently used slot is recycled for the new entry.
        let idx = self.tail?;
        self.unlink(idx);
        let old_key = std::mem::replace(&mut self.nodes[idx].key, key.clone());
        let old_value = std::mem::replace(&mut self.nodes[idx].value, value);
        self.map.remove(&old_key);
        self.map.insert(key, idx);
        self.push_front(idx);
        self.evictions += 1;
        Some((old_key, old_value))
    }

    /// Insert entries in iteration order until the cache is full; the rest
    /// are dropped. The first entry inserted ends up least recently used.
    /// Returns the number of entries inserted.
    pub fn bulk_load<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut loaded = 0;
        for (key, value) in entries {
            if !self.map.contains_key(&key) && self.map.len() >= self.capacity {
                break;
            }
            self.put(key, value);
            loaded += 1;
        }
        loaded
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.map.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            keys.push(self.nodes[idx].key.clone());
            cursor = self.nodes[idx].next;
        }
        keys
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.head = None;
        self.tail = None;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.map.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[idx].prev = None;
        self.nodes[idx].next = None;
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = None;
        self.nodes[idx].next = self.head;
        if let Some(old_head) = self.head {
            self.nodes[old_head].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}

// ============================================================================
// SHARED ORDER CACHE
// ============================================================================

/// Thread-safe order cache: an [`LruCache`] behind one exclusive lock.
///
/// A poisoned lock is recovered rather than propagated. Every mutation is a
/// handful of index writes with no user code in between, so a panicking
/// holder cannot leave the list half-linked.
#[derive(Debug)]
pub struct SharedLruCache {
    inner: Mutex<LruCache<String, Arc<Order>>>,
}

impl SharedLruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Arc<Order>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.lock().keys_by_recency()
    }

    /// Whether `order_uid` is cached, without touching recency.
    pub fn contains(&self, order_uid: &str) -> bool {
        self.lock().contains(order_uid)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl OrderCache for SharedLruCache {
    fn get(&self, order_uid: &str) -> Option<Arc<Order>> {
        let found = self.lock().get(order_uid).cloned();
        if found.is_some() {
            tracing::debug!(order_uid, "Cache hit");
        } else {
            tracing::debug!(order_uid, "Cache miss");
        }
        found
    }

    fn put(&self, order: Arc<Order>) {
        let key = order.order_uid.clone();
        let evicted = self.lock().put(key, order);
        if let Some((evicted_uid, _)) = evicted {
            tracing::debug!(order_uid = %evicted_uid, "Evicted least recently used order");
        }
    }

    fn bulk_load(&self, orders: Vec<Arc<Order>>) -> usize {
        self.lock()
            .bulk_load(orders.into_iter().map(|order| (order.order_uid.clone(), order)))
    }

    fn stats(&self) -> CacheStats {
        self.lock().stats()
    }

    fn clear(&self) {
        self.lock().clear();
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone)]
    enum Op {
        Get(u8),
        Put(u8, u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..12).prop_map(Op::Get),
            (0u8..12, any::<u32>()).prop_map(|(k, v)| Op::Put(k, v)),
        ]
    }

    /// Reference model: a deque ordered MRU first.
    fn model_touch(model: &mut VecDeque<(u8, u32)>, key: u8) -> Option<u32> {
        let pos = model.iter().position(|(k, _)| *k == key)?;
        let entry = model.remove(pos)?;
        model.push_front(entry);
        Some(entry.1)
    }

    proptest! {
        #[test]
        fn prop_size_never_exceeds_capacity(
            capacity in 0usize..8,
            ops in proptest::collection::vec(op_strategy(), 0..200),
        ) {
            let mut cache = LruCache::new(capacity);
            for op in ops {
                match op {
                    Op::Get(k) => { cache.get(&k); }
                    Op::Put(k, v) => { cache.put(k, v); }
                }
                prop_assert!(cache.len() <= capacity);
                prop_assert_eq!(cache.keys_by_recency().len(), cache.len());
            }
        }

        #[test]
        fn prop_matches_reference_model(
            capacity in 1usize..6,
            ops in proptest::collection::vec(op_strategy(), 0..200),
        ) {
            let mut cache = LruCache::new(capacity);
            let mut model: VecDeque<(u8, u32)> = VecDeque::new();

            for op in ops {
                match op {
                    Op::Get(k) => {
                        let expected = model_touch(&mut model, k);
                        prop_assert_eq!(cache.get(&k).copied(), expected);
                    }
                    Op::Put(k, v) => {
                        let expected_eviction = if model_touch(&mut model, k).is_some() {
                            if let Some(front) = model.front_mut() {
                                front.1 = v;
                            }
                            None
                        } else {
                            model.push_front((k, v));
                            if model.len() > capacity { model.pop_back() } else { None }
                        };
                        prop_assert_eq!(cache.put(k, v), expected_eviction);
                    }
                }

                let expected_keys: Vec<u8> = model.iter().map(|(k, _)| *k).collect();
                prop_assert_eq!(cache.keys_by_recency(), expected_keys);
            }
        }
    }
}
