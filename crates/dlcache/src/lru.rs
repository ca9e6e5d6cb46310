//! Access-ordered index
//!
//! Hash lookup plus an intrusive doubly-linked recency list stored in a node
//! arena. `push` and a successful `get` move the key to the most recently
//! used end; victims are taken from the least recently used end. Unlike a
//! capacity-bounded cache the index never evicts on its own: the caller
//! decides what leaves, because eviction has to touch the filesystem and the
//! journal.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use ahash::RandomState;

/// Node in the recency list
struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Key/value map ordered by recency of access
pub struct LruIndex<K, V> {
    map: HashMap<K, usize, RandomState>,
    nodes: Vec<Option<Node<K, V>>>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    free_list: Vec<usize>,
}

impl<K, V> Default for LruIndex<K, V>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> LruIndex<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            map: HashMap::with_hasher(RandomState::new()),
            nodes: Vec::new(),
            head: None,
            tail: None,
            free_list: Vec::new(),
        }
    }

    /// Look up a key and mark it most recently used
    pub fn get<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        self.move_to_front(idx);
        self.nodes[idx].as_mut().map(|node| &mut node.value)
    }

    /// Look up a key without touching recency
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        self.nodes[idx].as_ref().map(|node| &node.value)
    }

    /// Mutable lookup without touching recency
    pub fn peek_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        self.nodes[idx].as_mut().map(|node| &mut node.value)
    }

    /// Insert or replace a value and mark the key most recently used
    ///
    /// Returns the previous value, if any.
    pub fn push(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&idx) = self.map.get(&key) {
            self.move_to_front(idx);
            return self.nodes[idx]
                .as_mut()
                .map(|node| std::mem::replace(&mut node.value, value));
        }

        let idx = self.alloc_node();
        self.nodes[idx] = Some(Node {
            key: key.clone(),
            value,
            prev: None,
            next: self.head,
        });
        self.link_front(idx);
        self.map.insert(key, idx);
        None
    }

    /// Remove a key, returning its value
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.map.remove(key)?;
        self.unlink(idx);
        self.free_list.push(idx);
        self.nodes[idx].take().map(|node| node.value)
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no keys are present
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate from least to most recently used
    pub fn iter_lru(&self) -> Iter<'_, K, V> {
        Iter {
            nodes: &self.nodes,
            cursor: self.tail,
        }
    }

    /// Drop every entry the predicate rejects, keeping relative order
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let doomed: Vec<K> = self
            .iter_lru()
            .filter(|(k, v)| !keep(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            self.remove(&key);
        }
    }

    fn link_front(&mut self, idx: usize) {
        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }

        self.unlink(idx);

        if let Some(node) = &mut self.nodes[idx] {
            node.prev = None;
            node.next = self.head;
        }
        self.link_front(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match &self.nodes[idx] {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = next;
                }
            }
            None => self.head = next,
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = &mut self.nodes[next_idx] {
                    next_node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn alloc_node(&mut self) -> usize {
        if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            let idx = self.nodes.len();
            self.nodes.push(None);
            idx
        }
    }
}

/// Iterator from the least recently used end
pub struct Iter<'a, K, V> {
    nodes: &'a [Option<Node<K, V>>],
    cursor: Option<usize>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let nodes = self.nodes;
        let node = nodes[self.cursor?].as_ref()?;
        self.cursor = node.prev;
        Some((&node.key, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(index: &LruIndex<i32, &'static str>) -> Vec<i32> {
        index.iter_lru().map(|(k, _)| *k).collect()
    }

    #[test]
    fn test_push_and_get() {
        let mut index = LruIndex::new();

        index.push(1, "a");
        index.push(2, "b");

        assert_eq!(index.get(&1).copied(), Some("a"));
        assert_eq!(index.get(&2).copied(), Some("b"));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_insertion_order_without_access() {
        let mut index = LruIndex::new();

        index.push(1, "a");
        index.push(2, "b");
        index.push(3, "c");

        assert_eq!(order(&index), vec![1, 2, 3]);
    }

    #[test]
    fn test_get_moves_to_front() {
        let mut index = LruIndex::new();

        index.push(1, "a");
        index.push(2, "b");
        index.push(3, "c");
        index.get(&1);

        assert_eq!(order(&index), vec![2, 3, 1]);
    }

    #[test]
    fn test_peek_keeps_order() {
        let mut index = LruIndex::new();

        index.push(1, "a");
        index.push(2, "b");

        assert_eq!(index.peek(&1), Some(&"a"));
        *index.peek_mut(&1).unwrap() = "z";

        assert_eq!(order(&index), vec![1, 2]);
        assert_eq!(index.peek(&1), Some(&"z"));
    }

    #[test]
    fn test_push_existing_replaces_and_moves() {
        let mut index = LruIndex::new();

        index.push(1, "a");
        index.push(2, "b");

        assert_eq!(index.push(1, "c"), Some("a"));
        assert_eq!(order(&index), vec![2, 1]);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_remove_relinks_neighbours() {
        let mut index = LruIndex::new();

        index.push(1, "a");
        index.push(2, "b");
        index.push(3, "c");

        assert_eq!(index.remove(&2), Some("b"));
        assert_eq!(order(&index), vec![1, 3]);

        assert_eq!(index.remove(&1), Some("a"));
        assert_eq!(index.remove(&3), Some("c"));
        assert!(index.is_empty());
        assert_eq!(order(&index), Vec::<i32>::new());
    }

    #[test]
    fn test_slot_reuse_after_remove() {
        let mut index = LruIndex::new();

        index.push(1, "a");
        index.push(2, "b");
        index.remove(&1);
        index.push(3, "c");

        assert_eq!(order(&index), vec![2, 3]);
        assert_eq!(index.nodes.len(), 2);
    }

    #[test]
    fn test_retain() {
        let mut index = LruIndex::new();

        index.push(1, "a");
        index.push(2, "b");
        index.push(3, "c");
        index.retain(|k, _| k % 2 == 1);

        assert_eq!(order(&index), vec![1, 3]);
    }

    #[test]
    fn test_borrowed_lookup() {
        let mut index: LruIndex<String, u32> = LruIndex::new();

        index.push("foo".to_string(), 1);

        assert_eq!(index.get("foo").copied(), Some(1));
        assert_eq!(index.remove("foo"), Some(1));
    }
}
