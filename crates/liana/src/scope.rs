//! Variable scopes.
//!
//! A scope chain is a list of maps, innermost last; lookup and assignment
//! walk from the tail. The maps themselves live in the arena so closures can
//! share them with the evaluation that created them: a captured chain sees
//! later `std.set` mutations, which is what makes closure counters work.
//!
//! Copy-on-write discipline: entering a block snapshots `(chain, cow)` and
//! sets `cow = true`; the first `std.let` afterwards forks the chain by
//! pushing a fresh innermost map and clears the flag. Leaving the block
//! restores the snapshot, so bindings introduced inside never leak out,
//! while `std.set` on an outer binding mutates the shared map in place and
//! stays visible.

use indexmap::IndexMap;

use crate::{
    heap::{Heap, HeapData, HeapId},
    value::Value,
};

/// A chain of scope maps, outermost first.
#[derive(Debug, Clone, Default)]
pub struct ScopeChain {
    frames: Vec<HeapId>,
}

/// Saved `(chain, cow)` state for restoring on block exit.
#[derive(Debug, Clone)]
pub struct ScopeSnapshot {
    pub(crate) frames: Vec<HeapId>,
    pub(crate) cow: bool,
}

impl ScopeChain {
    /// A chain with a single fresh root scope.
    pub fn with_root(heap: &mut Heap) -> Self {
        let root = heap.alloc(HeapData::Object(IndexMap::new()));
        Self { frames: vec![root] }
    }

    /// Pushes a fresh innermost scope map.
    ///
    /// This allocates an arena slot; callers in the evaluation path charge
    /// gas for it (`ScriptContext::declare` for copy-on-write forks,
    /// `call_lambda` for parameter frames).
    pub fn push_frame(&mut self, heap: &mut Heap) {
        let frame = heap.alloc(HeapData::Object(IndexMap::new()));
        self.frames.push(frame);
    }

    /// Reads a variable through the chain. Absent names read as `Null`.
    #[must_use]
    pub fn lookup(&self, name: &str, heap: &Heap) -> Option<Value> {
        for frame in self.frames.iter().rev() {
            if let HeapData::Object(map) = heap.get(*frame)
                && let Some(value) = map.get(name)
            {
                return Some(*value);
            }
        }
        None
    }

    /// Binds a name in the innermost scope, shadowing any outer binding.
    pub fn declare(&self, name: &str, value: Value, heap: &mut Heap) {
        let frame = *self.frames.last().expect("scope chain has a root");
        if let HeapData::Object(map) = heap.get_mut(frame) {
            map.insert(name.to_owned(), value);
        }
    }

    /// Updates the nearest existing binding. Returns false when no scope in
    /// the chain holds the name.
    pub fn assign(&self, name: &str, value: Value, heap: &mut Heap) -> bool {
        for frame in self.frames.iter().rev() {
            if let HeapData::Object(map) = heap.get_mut(*frame)
                && let Some(slot) = map.get_mut(name)
            {
                *slot = value;
                return true;
            }
        }
        false
    }

    /// Whether the innermost scope already holds the name. Used by the
    /// optimizer's purity analysis, not by evaluation.
    #[must_use]
    pub fn declared_innermost(&self, name: &str, heap: &Heap) -> bool {
        let frame = *self.frames.last().expect("scope chain has a root");
        match heap.get(frame) {
            HeapData::Object(map) => map.contains_key(name),
            _ => false,
        }
    }

    pub(crate) fn snapshot(&self, cow: bool) -> ScopeSnapshot {
        ScopeSnapshot {
            frames: self.frames.clone(),
            cow,
        }
    }

    pub(crate) fn restore(&mut self, snapshot: ScopeSnapshot) -> bool {
        self.frames = snapshot.frames;
        snapshot.cow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadowing_and_restore() {
        let mut heap = Heap::new();
        let mut chain = ScopeChain::with_root(&mut heap);
        chain.declare("x", Value::Num(1.0), &mut heap);

        let snapshot = chain.snapshot(false);
        chain.push_frame(&mut heap);
        chain.declare("x", Value::Num(2.0), &mut heap);
        assert_eq!(chain.lookup("x", &heap).unwrap().as_num(), Some(2.0));

        chain.restore(snapshot);
        assert_eq!(chain.lookup("x", &heap).unwrap().as_num(), Some(1.0));
    }

    #[test]
    fn assign_walks_outward() {
        let mut heap = Heap::new();
        let mut chain = ScopeChain::with_root(&mut heap);
        chain.declare("x", Value::Num(1.0), &mut heap);
        chain.push_frame(&mut heap);
        assert!(chain.assign("x", Value::Num(5.0), &mut heap));
        assert_eq!(chain.lookup("x", &heap).unwrap().as_num(), Some(5.0));
        assert!(!chain.assign("missing", Value::Null, &mut heap));
    }

    #[test]
    fn captured_chain_sees_later_assignments() {
        let mut heap = Heap::new();
        let mut chain = ScopeChain::with_root(&mut heap);
        chain.push_frame(&mut heap);
        chain.declare("c", Value::Num(0.0), &mut heap);
        let captured = chain.clone();
        assert!(chain.assign("c", Value::Num(3.0), &mut heap));
        assert_eq!(captured.lookup("c", &heap).unwrap().as_num(), Some(3.0));
    }
}
