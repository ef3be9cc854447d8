//! Mark-sweep collection over the mutable cell graph, with free pools.
//!
//! Immutable values are reclaimed by reference counting the moment the last
//! holder drops them; what refcounts cannot reclaim is a cycle, and cycles
//! can only be closed through a mutable cell (an atom holding a closure
//! that captured the atom, a lazy-seq whose cached tail is itself, ...).
//! The heap therefore registers every mutable cell at allocation, tracks an
//! allocation-debt estimate, and at safe points marks from the environment
//! roots and sweeps: a dead cell has its interior cleared, which snaps the
//! cycle and lets the refcounts unwind.
//!
//! Safe points are the completion of a top-level form, the REPL prompt and
//! the gaps between cache-restored definitions; the VM requests a
//! collection mid-run when the debt crosses the threshold and the request
//! is honored at the next boundary, where no evaluator frame is live.
//!
//! The free pools recycle `Vec<Value>` backing buffers by size class so
//! collection-heavy code reuses capacity instead of round-tripping the
//! host allocator.

use crate::value::{
    AtomCell, DelayCell, FilterChain, LazySeqCell, MultiFnCell, ProtocolCell, Value, VolatileCell,
};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::debug;

/// Size classes for the buffer pools, by capacity.
const POOL_CLASSES: [usize; 4] = [8, 32, 128, 512];
const POOL_CAP: usize = 32;

/// Default allocation debt before a collection is requested.
const DEFAULT_THRESHOLD: usize = 4 * 1024 * 1024;

/// Rough per-allocation cost estimates, in bytes.
const CELL_COST: usize = 64;

#[derive(Debug)]
enum HeapEntry {
    Atom(Weak<AtomCell>),
    Volatile(Weak<VolatileCell>),
    Delay(Weak<DelayCell>),
    Lazy(Weak<LazySeqCell>),
    Multi(Weak<MultiFnCell>),
    Protocol(Weak<ProtocolCell>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub live: usize,
    pub cleared: usize,
    pub collections: u64,
}

pub struct Heap {
    registry: RefCell<Vec<HeapEntry>>,
    /// Bytes allocated since the last collection (an estimate).
    debt: Cell<usize>,
    threshold: Cell<usize>,
    enabled: Cell<bool>,
    collections: Cell<u64>,
    pools: RefCell<[Vec<Vec<Value>>; 4]>,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            registry: RefCell::new(Vec::new()),
            debt: Cell::new(0),
            threshold: Cell::new(DEFAULT_THRESHOLD),
            enabled: Cell::new(true),
            collections: Cell::new(0),
            pools: RefCell::new([Vec::new(), Vec::new(), Vec::new(), Vec::new()]),
        }
    }

    pub fn note_alloc(&self, bytes: usize) {
        self.debt.set(self.debt.get().saturating_add(bytes));
    }

    pub fn debt(&self) -> usize {
        self.debt.get()
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.set(on);
    }

    pub fn set_threshold(&self, threshold: usize) {
        self.threshold.set(threshold);
    }

    /// After a bootstrap-cache restore: keep collection off the startup
    /// path without shrinking an operator-raised threshold.
    pub fn rebase_threshold(&self) {
        let wanted = self.debt.get().saturating_mul(2);
        self.threshold.set(self.threshold.get().max(wanted));
        self.debt.set(0);
    }

    pub fn should_collect(&self) -> bool {
        self.enabled.get() && self.debt.get() > self.threshold.get()
    }

    pub fn live_cells(&self) -> usize {
        self.registry.borrow().len()
    }

    // --- cell allocation -------------------------------------------------

    pub fn alloc_atom(&self, value: Value, meta: Option<crate::collections::PersistentMap>) -> Value {
        let cell = Rc::new(AtomCell {
            value: RefCell::new(value),
            meta: RefCell::new(meta),
            mark: Cell::new(false),
        });
        self.registry
            .borrow_mut()
            .push(HeapEntry::Atom(Rc::downgrade(&cell)));
        self.note_alloc(CELL_COST);
        Value::Atom(cell)
    }

    pub fn alloc_volatile(&self, value: Value) -> Value {
        let cell = Rc::new(VolatileCell {
            value: RefCell::new(value),
            mark: Cell::new(false),
        });
        self.registry
            .borrow_mut()
            .push(HeapEntry::Volatile(Rc::downgrade(&cell)));
        self.note_alloc(CELL_COST);
        Value::Volatile(cell)
    }

    pub fn alloc_delay(&self, thunk: Value) -> Value {
        let cell = Rc::new(DelayCell {
            thunk: RefCell::new(Some(thunk)),
            cached: RefCell::new(None),
            mark: Cell::new(false),
        });
        self.registry
            .borrow_mut()
            .push(HeapEntry::Delay(Rc::downgrade(&cell)));
        self.note_alloc(CELL_COST);
        Value::Delay(cell)
    }

    pub fn alloc_lazy(&self, thunk: Value) -> Value {
        let cell = Rc::new(LazySeqCell {
            thunk: RefCell::new(Some(thunk)),
            cached: RefCell::new(None),
            chain: RefCell::new(None),
            mark: Cell::new(false),
        });
        self.registry
            .borrow_mut()
            .push(HeapEntry::Lazy(Rc::downgrade(&cell)));
        self.note_alloc(CELL_COST);
        Value::LazySeq(cell)
    }

    pub fn alloc_lazy_chain(&self, source: Value, preds: Vec<Value>) -> Value {
        let cell = Rc::new(LazySeqCell {
            thunk: RefCell::new(None),
            cached: RefCell::new(None),
            chain: RefCell::new(Some(FilterChain { source, preds })),
            mark: Cell::new(false),
        });
        self.registry
            .borrow_mut()
            .push(HeapEntry::Lazy(Rc::downgrade(&cell)));
        self.note_alloc(CELL_COST);
        Value::LazySeq(cell)
    }

    pub fn alloc_multifn(&self, name: Rc<str>, dispatch: Value, default_key: Value) -> Value {
        let cell = Rc::new(MultiFnCell {
            name,
            dispatch: RefCell::new(dispatch),
            methods: RefCell::new(indexmap::IndexMap::new()),
            default_key,
            prefers: RefCell::new(Vec::new()),
            mark: Cell::new(false),
        });
        self.registry
            .borrow_mut()
            .push(HeapEntry::Multi(Rc::downgrade(&cell)));
        self.note_alloc(CELL_COST);
        Value::MultiFn(cell)
    }

    pub fn alloc_protocol(&self, name: Rc<str>, sigs: crate::collections::PersistentMap) -> Value {
        let cell = Rc::new(ProtocolCell {
            name,
            sigs: RefCell::new(sigs),
            impls: RefCell::new(indexmap::IndexMap::new()),
            mark: Cell::new(false),
        });
        self.registry
            .borrow_mut()
            .push(HeapEntry::Protocol(Rc::downgrade(&cell)));
        self.note_alloc(CELL_COST);
        Value::Protocol(cell)
    }

    // --- buffer pools ----------------------------------------------------

    fn class_for(cap: usize) -> Option<usize> {
        POOL_CLASSES.iter().position(|c| cap <= *c)
    }

    /// A cleared buffer with at least `cap` capacity, recycled when one is
    /// pooled.
    pub fn take_buffer(&self, cap: usize) -> Vec<Value> {
        if let Some(class) = Self::class_for(cap) {
            let mut pools = self.pools.borrow_mut();
            for c in class..POOL_CLASSES.len() {
                if let Some(mut buf) = pools[c].pop() {
                    buf.clear();
                    return buf;
                }
            }
        }
        Vec::with_capacity(cap)
    }

    pub fn recycle_buffer(&self, buf: Vec<Value>) {
        let cap = buf.capacity();
        if cap == 0 {
            return;
        }
        if let Some(class) = POOL_CLASSES.iter().rposition(|c| *c <= cap) {
            let mut pools = self.pools.borrow_mut();
            if pools[class].len() < POOL_CAP {
                pools[class].push(buf);
            }
        }
    }

    // --- collection ------------------------------------------------------

    /// One mark-sweep cycle. Dead cells have their interiors cleared to
    /// break cycles; the refcounts reclaim the rest.
    pub fn collect(&self, roots: &[Value]) -> GcStats {
        mark_from(roots);
        let mut cleared = 0usize;
        let mut registry = self.registry.borrow_mut();
        registry.retain(|entry| match entry {
            HeapEntry::Atom(w) => match w.upgrade() {
                None => false,
                Some(cell) => {
                    if cell.mark.replace(false) {
                        true
                    } else {
                        if let Ok(mut v) = cell.value.try_borrow_mut() {
                            *v = Value::Nil;
                        }
                        if let Ok(mut m) = cell.meta.try_borrow_mut() {
                            *m = None;
                        }
                        cleared += 1;
                        false
                    }
                }
            },
            HeapEntry::Volatile(w) => match w.upgrade() {
                None => false,
                Some(cell) => {
                    if cell.mark.replace(false) {
                        true
                    } else {
                        if let Ok(mut v) = cell.value.try_borrow_mut() {
                            *v = Value::Nil;
                        }
                        cleared += 1;
                        false
                    }
                }
            },
            HeapEntry::Delay(w) => match w.upgrade() {
                None => false,
                Some(cell) => {
                    if cell.mark.replace(false) {
                        true
                    } else {
                        if let Ok(mut t) = cell.thunk.try_borrow_mut() {
                            *t = None;
                        }
                        if let Ok(mut c) = cell.cached.try_borrow_mut() {
                            *c = None;
                        }
                        cleared += 1;
                        false
                    }
                }
            },
            HeapEntry::Lazy(w) => match w.upgrade() {
                None => false,
                Some(cell) => {
                    if cell.mark.replace(false) {
                        true
                    } else {
                        if let Ok(mut t) = cell.thunk.try_borrow_mut() {
                            *t = None;
                        }
                        if let Ok(mut c) = cell.cached.try_borrow_mut() {
                            *c = None;
                        }
                        if let Ok(mut ch) = cell.chain.try_borrow_mut() {
                            *ch = None;
                        }
                        cleared += 1;
                        false
                    }
                }
            },
            HeapEntry::Multi(w) => match w.upgrade() {
                None => false,
                Some(cell) => {
                    if cell.mark.replace(false) {
                        true
                    } else {
                        if let Ok(mut d) = cell.dispatch.try_borrow_mut() {
                            *d = Value::Nil;
                        }
                        if let Ok(mut m) = cell.methods.try_borrow_mut() {
                            m.clear();
                        }
                        if let Ok(mut p) = cell.prefers.try_borrow_mut() {
                            p.clear();
                        }
                        cleared += 1;
                        false
                    }
                }
            },
            HeapEntry::Protocol(w) => match w.upgrade() {
                None => false,
                Some(cell) => {
                    if cell.mark.replace(false) {
                        true
                    } else {
                        if let Ok(mut i) = cell.impls.try_borrow_mut() {
                            i.clear();
                        }
                        cleared += 1;
                        false
                    }
                }
            },
        });
        self.debt.set(0);
        self.collections.set(self.collections.get() + 1);
        let stats = GcStats {
            live: registry.len(),
            cleared,
            collections: self.collections.get(),
        };
        debug!(live = stats.live, cleared = stats.cleared, "gc cycle");
        stats
    }
}

/// Worklist mark so arbitrarily deep structures never recurse the native
/// stack away.
fn mark_from(roots: &[Value]) {
    let mut work: Vec<Value> = roots.to_vec();
    while let Some(v) = work.pop() {
        mark_value(&v, &mut work);
    }
}

fn mark_value(v: &Value, work: &mut Vec<Value>) {
    match v {
        Value::Nil
        | Value::Bool(_)
        | Value::Int(_)
        | Value::Float(_)
        | Value::Char(_)
        | Value::Str(_)
        | Value::Keyword(_)
        | Value::Symbol(_)
        | Value::Regex(_)
        | Value::Builtin(_) => {}
        Value::List(l) => work.extend(l.iter().cloned()),
        Value::Vector(vec) => work.extend(vec.iter().cloned()),
        Value::Map(m) => {
            for (k, val) in m.iter() {
                work.push(k.clone());
                work.push(val.clone());
            }
        }
        Value::Set(s) => work.extend(s.iter().cloned()),
        Value::Cons(c) => {
            work.push(c.first.clone());
            work.push(c.rest.clone());
        }
        Value::Fn(c) => {
            work.extend(c.captures.iter().cloned());
            if let Some(meta) = &c.meta {
                work.push(Value::Map(meta.clone()));
            }
        }
        Value::Atom(cell) => {
            if !cell.mark.replace(true) {
                work.push(cell.value.borrow().clone());
                if let Some(meta) = cell.meta.borrow().clone() {
                    work.push(Value::Map(meta));
                }
            }
        }
        Value::Volatile(cell) => {
            if !cell.mark.replace(true) {
                work.push(cell.value.borrow().clone());
            }
        }
        Value::Delay(cell) => {
            if !cell.mark.replace(true) {
                if let Some(t) = cell.thunk.borrow().clone() {
                    work.push(t);
                }
                if let Some(c) = cell.cached.borrow().clone() {
                    work.push(c);
                }
            }
        }
        Value::LazySeq(cell) => {
            if !cell.mark.replace(true) {
                if let Some(t) = cell.thunk.borrow().clone() {
                    work.push(t);
                }
                if let Some(c) = cell.cached.borrow().clone() {
                    work.push(c);
                }
                if let Some(chain) = cell.chain.borrow().clone() {
                    work.push(chain.source);
                    work.extend(chain.preds);
                }
            }
        }
        Value::MultiFn(cell) => {
            if !cell.mark.replace(true) {
                work.push(cell.dispatch.borrow().clone());
                work.push(cell.default_key.clone());
                for (k, m) in cell.methods.borrow().iter() {
                    work.push(k.0.clone());
                    work.push(m.clone());
                }
                for (a, b) in cell.prefers.borrow().iter() {
                    work.push(a.clone());
                    work.push(b.clone());
                }
            }
        }
        Value::Protocol(cell) => {
            if !cell.mark.replace(true) {
                work.push(Value::Map(cell.sigs.borrow().clone()));
                for (k, impls) in cell.impls.borrow().iter() {
                    work.push(k.0.clone());
                    for (_, f) in impls.iter() {
                        work.push(f.clone());
                    }
                }
            }
        }
        Value::ProtocolFn(pf) => {
            // mark through to the protocol's implementations
            if !pf.protocol.mark.replace(true) {
                for (k, impls) in pf.protocol.impls.borrow().iter() {
                    work.push(k.0.clone());
                    for (_, f) in impls.iter() {
                        work.push(f.clone());
                    }
                }
            }
        }
        Value::Var(_) => {
            // var contents are rooted by the environment walk
        }
        Value::Reduced(inner) => work.push((**inner).clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_cycle_is_cleared() {
        let heap = Heap::new();
        let atom = heap.alloc_atom(Value::Nil, None);
        // close a cycle: the atom holds a vector holding the atom
        if let Value::Atom(cell) = &atom {
            *cell.value.borrow_mut() = Value::vector(vec![atom.clone()]);
        }
        assert_eq!(heap.live_cells(), 1);
        let stats = heap.collect(&[]);
        assert_eq!(stats.cleared, 1);
        assert_eq!(heap.live_cells(), 0);
        // the cell interior was snapped, so dropping `atom` frees it
        if let Value::Atom(cell) = &atom {
            assert_eq!(*cell.value.borrow(), Value::Nil);
        }
    }

    #[test]
    fn test_rooted_cell_survives() {
        let heap = Heap::new();
        let atom = heap.alloc_atom(Value::Int(7), None);
        let stats = heap.collect(std::slice::from_ref(&atom));
        assert_eq!(stats.cleared, 0);
        assert_eq!(heap.live_cells(), 1);
        if let Value::Atom(cell) = &atom {
            assert_eq!(*cell.value.borrow(), Value::Int(7));
        }
    }

    #[test]
    fn test_refcount_freed_entries_pruned() {
        let heap = Heap::new();
        for _ in 0..100 {
            let _ = heap.alloc_volatile(Value::Int(1));
        }
        // every cell already dropped; registry prunes without clearing
        let stats = heap.collect(&[]);
        assert_eq!(stats.cleared, 0);
        assert_eq!(stats.live, 0);
    }

    #[test]
    fn test_threshold_trigger_and_rebase() {
        let heap = Heap::new();
        heap.set_threshold(100);
        assert!(!heap.should_collect());
        heap.note_alloc(200);
        assert!(heap.should_collect());
        heap.rebase_threshold();
        assert!(!heap.should_collect());
        assert_eq!(heap.debt(), 0);
    }

    #[test]
    fn test_buffer_pool_recycles_capacity() {
        let heap = Heap::new();
        let mut buf = heap.take_buffer(16);
        buf.push(Value::Int(1));
        let cap = buf.capacity();
        heap.recycle_buffer(buf);
        let again = heap.take_buffer(16);
        assert!(again.capacity() >= cap.min(16));
        assert!(again.is_empty());
    }
}
