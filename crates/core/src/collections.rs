//! Persistent collections: list, vector, map, set.
//!
//! "Mutation" always yields a new collection; backing storage is shared
//! until a write forces a copy (`Rc::make_mut`). The map and set preserve
//! insertion order for iteration, as the language requires, by building on
//! `indexmap` behind a `Key` wrapper that makes arbitrary Values hashable
//! with equality compatible with `=`.

use crate::value::{eql_total, hash_value, Value};
use indexmap::{IndexMap, IndexSet};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A Value usable as a hashed key. Equality is `=` semantics made total:
/// NaN equals itself here so the map contract (reflexivity) holds.
#[derive(Debug, Clone)]
pub struct Key(pub Value);

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        eql_total(&self.0, &other.0)
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.0, state);
    }
}

#[derive(Debug)]
pub struct ListNode {
    pub first: Value,
    pub rest: Option<Rc<ListNode>>,
}

/// A counted cons chain. `cons` at the head is O(1) and shares the tail.
#[derive(Debug, Clone, Default)]
pub struct PersistentList {
    head: Option<Rc<ListNode>>,
    count: usize,
    meta: Option<Rc<PersistentMap>>,
}

impl PersistentList {
    pub fn empty() -> Self {
        PersistentList::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        let count = items.len();
        let mut head = None;
        for item in items.into_iter().rev() {
            head = Some(Rc::new(ListNode {
                first: item,
                rest: head,
            }));
        }
        PersistentList {
            head,
            count,
            meta: None,
        }
    }

    pub fn cons(&self, v: Value) -> Self {
        PersistentList {
            head: Some(Rc::new(ListNode {
                first: v,
                rest: self.head.clone(),
            })),
            count: self.count + 1,
            meta: None,
        }
    }

    pub fn first(&self) -> Option<&Value> {
        self.head.as_ref().map(|n| &n.first)
    }

    /// `rest` of the empty list is the empty list.
    pub fn rest(&self) -> Self {
        match &self.head {
            Some(node) => PersistentList {
                head: node.rest.clone(),
                count: self.count - 1,
                meta: None,
            },
            None => PersistentList::empty(),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn iter(&self) -> ListIter<'_> {
        ListIter {
            node: self.head.as_deref(),
        }
    }

    pub fn head_node(&self) -> Option<&ListNode> {
        self.head.as_deref()
    }

    pub fn meta(&self) -> Option<&PersistentMap> {
        self.meta.as_deref()
    }

    pub fn with_meta(&self, meta: Option<PersistentMap>) -> Self {
        PersistentList {
            head: self.head.clone(),
            count: self.count,
            meta: meta.map(Rc::new),
        }
    }
}

pub struct ListIter<'a> {
    node: Option<&'a ListNode>,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<&'a Value> {
        let node = self.node?;
        self.node = node.rest.as_deref();
        Some(&node.first)
    }
}

/// An indexed sequence with shared backing storage. Writes copy only when
/// the backing vector is shared.
#[derive(Debug, Clone)]
pub struct PersistentVector {
    items: Rc<Vec<Value>>,
    meta: Option<Rc<PersistentMap>>,
}

impl Default for PersistentVector {
    fn default() -> Self {
        PersistentVector {
            items: Rc::new(Vec::new()),
            meta: None,
        }
    }
}

impl PersistentVector {
    pub fn empty() -> Self {
        PersistentVector::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        PersistentVector {
            items: Rc::new(items),
            meta: None,
        }
    }

    /// `conj` at the tail.
    pub fn conj(&self, v: Value) -> Self {
        let mut items = self.items.clone();
        Rc::make_mut(&mut items).push(v);
        PersistentVector {
            items,
            meta: self.meta.clone(),
        }
    }

    pub fn nth(&self, idx: usize) -> Option<&Value> {
        self.items.get(idx)
    }

    /// Replace the element at `idx`, or append when `idx == count`.
    pub fn assoc_idx(&self, idx: usize, v: Value) -> Option<Self> {
        if idx > self.items.len() {
            return None;
        }
        let mut items = self.items.clone();
        let vec = Rc::make_mut(&mut items);
        if idx == vec.len() {
            vec.push(v);
        } else {
            vec[idx] = v;
        }
        Some(PersistentVector {
            items,
            meta: self.meta.clone(),
        })
    }

    /// Logical slice; copies, which the contract permits.
    pub fn subvec(&self, start: usize, end: usize) -> Option<Self> {
        if start > end || end > self.items.len() {
            return None;
        }
        Some(PersistentVector::from_vec(self.items[start..end].to_vec()))
    }

    pub fn pop(&self) -> Option<Self> {
        if self.items.is_empty() {
            return None;
        }
        let mut items = self.items.clone();
        Rc::make_mut(&mut items).pop();
        Some(PersistentVector {
            items,
            meta: self.meta.clone(),
        })
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    pub fn meta(&self) -> Option<&PersistentMap> {
        self.meta.as_deref()
    }

    pub fn with_meta(&self, meta: Option<PersistentMap>) -> Self {
        PersistentVector {
            items: self.items.clone(),
            meta: meta.map(Rc::new),
        }
    }
}

/// An insertion-preserving persistent map keyed by `=`.
#[derive(Debug, Clone)]
pub struct PersistentMap {
    entries: Rc<IndexMap<Key, Value>>,
    meta: Option<Rc<PersistentMap>>,
}

impl Default for PersistentMap {
    fn default() -> Self {
        PersistentMap {
            entries: Rc::new(IndexMap::new()),
            meta: None,
        }
    }
}

impl PersistentMap {
    pub fn empty() -> Self {
        PersistentMap::default()
    }

    pub fn from_pairs(pairs: Vec<(Value, Value)>) -> Self {
        let mut entries = IndexMap::with_capacity(pairs.len());
        for (k, v) in pairs {
            entries.insert(Key(k), v);
        }
        PersistentMap {
            entries: Rc::new(entries),
            meta: None,
        }
    }

    /// `assoc` replaces by key; a fresh key appends in iteration order.
    pub fn assoc(&self, k: Value, v: Value) -> Self {
        let mut entries = self.entries.clone();
        Rc::make_mut(&mut entries).insert(Key(k), v);
        PersistentMap {
            entries,
            meta: self.meta.clone(),
        }
    }

    /// `dissoc` preserves the order of the remaining entries.
    pub fn dissoc(&self, k: &Value) -> Self {
        if !self.entries.contains_key(&Key(k.clone())) {
            return self.clone();
        }
        let mut entries = self.entries.clone();
        Rc::make_mut(&mut entries).shift_remove(&Key(k.clone()));
        PersistentMap {
            entries,
            meta: self.meta.clone(),
        }
    }

    pub fn get(&self, k: &Value) -> Option<&Value> {
        self.entries.get(&Key(k.clone()))
    }

    pub fn contains_key(&self, k: &Value) -> bool {
        self.entries.contains_key(&Key(k.clone()))
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (&k.0, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.keys().map(|k| &k.0)
    }

    pub fn vals(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }

    pub fn meta(&self) -> Option<&PersistentMap> {
        self.meta.as_deref()
    }

    pub fn with_meta(&self, meta: Option<PersistentMap>) -> Self {
        PersistentMap {
            entries: self.entries.clone(),
            meta: meta.map(Rc::new),
        }
    }
}

/// An insertion-preserving persistent set of `=`-unique members.
#[derive(Debug, Clone)]
pub struct PersistentSet {
    entries: Rc<IndexSet<Key>>,
    meta: Option<Rc<PersistentMap>>,
}

impl Default for PersistentSet {
    fn default() -> Self {
        PersistentSet {
            entries: Rc::new(IndexSet::new()),
            meta: None,
        }
    }
}

impl PersistentSet {
    pub fn empty() -> Self {
        PersistentSet::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        let mut entries = IndexSet::with_capacity(items.len());
        for item in items {
            entries.insert(Key(item));
        }
        PersistentSet {
            entries: Rc::new(entries),
            meta: None,
        }
    }

    pub fn conj(&self, v: Value) -> Self {
        if self.entries.contains(&Key(v.clone())) {
            return self.clone();
        }
        let mut entries = self.entries.clone();
        Rc::make_mut(&mut entries).insert(Key(v));
        PersistentSet {
            entries,
            meta: self.meta.clone(),
        }
    }

    pub fn disj(&self, v: &Value) -> Self {
        if !self.entries.contains(&Key(v.clone())) {
            return self.clone();
        }
        let mut entries = self.entries.clone();
        Rc::make_mut(&mut entries).shift_remove(&Key(v.clone()));
        PersistentSet {
            entries,
            meta: self.meta.clone(),
        }
    }

    pub fn contains(&self, v: &Value) -> bool {
        self.entries.contains(&Key(v.clone()))
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|k| &k.0)
    }

    pub fn meta(&self) -> Option<&PersistentMap> {
        self.meta.as_deref()
    }

    pub fn with_meta(&self, meta: Option<PersistentMap>) -> Self {
        PersistentSet {
            entries: self.entries.clone(),
            meta: meta.map(Rc::new),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_cons_shares_tail() {
        let base = PersistentList::from_vec(vec![Value::Int(2), Value::Int(3)]);
        let longer = base.cons(Value::Int(1));
        assert_eq!(base.count(), 2);
        assert_eq!(longer.count(), 3);
        assert_eq!(longer.first(), Some(&Value::Int(1)));
        assert_eq!(base.first(), Some(&Value::Int(2)));
    }

    #[test]
    fn test_list_rest_of_empty_is_empty() {
        let empty = PersistentList::empty();
        assert!(empty.rest().is_empty());
    }

    #[test]
    fn test_vector_conj_is_persistent() {
        let a = PersistentVector::from_vec(vec![Value::Int(1)]);
        let b = a.conj(Value::Int(2));
        assert_eq!(a.count(), 1);
        assert_eq!(b.count(), 2);
        assert_eq!(b.nth(1), Some(&Value::Int(2)));
    }

    #[test]
    fn test_map_insertion_order_preserved() {
        let m = PersistentMap::empty()
            .assoc(Value::Int(2), Value::Int(20))
            .assoc(Value::Int(1), Value::Int(10))
            .assoc(Value::Int(3), Value::Int(30));
        let keys: Vec<Value> = m.keys().cloned().collect();
        assert_eq!(keys, vec![Value::Int(2), Value::Int(1), Value::Int(3)]);
        // dissoc keeps the order of the survivors
        let m = m.dissoc(&Value::Int(1));
        let keys: Vec<Value> = m.keys().cloned().collect();
        assert_eq!(keys, vec![Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_map_numeric_key_promotion() {
        let m = PersistentMap::empty().assoc(Value::Int(1), Value::Int(10));
        assert_eq!(m.get(&Value::Float(1.0)), Some(&Value::Int(10)));
    }

    #[test]
    fn test_set_conj_disj() {
        let s = PersistentSet::from_vec(vec![Value::Int(1), Value::Int(2)]);
        assert!(s.contains(&Value::Int(1)));
        let s2 = s.conj(Value::Int(1));
        assert_eq!(s2.count(), 2);
        let s3 = s.disj(&Value::Int(1));
        assert!(!s3.contains(&Value::Int(1)));
        assert!(s.contains(&Value::Int(1)));
    }

    #[test]
    fn test_subvec_bounds() {
        let v = PersistentVector::from_vec(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let s = v.subvec(1, 3).unwrap();
        assert_eq!(s.as_slice(), &[Value::Int(2), Value::Int(3)]);
        assert!(v.subvec(2, 4).is_none());
    }
}
