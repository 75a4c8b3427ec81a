//! Incremental topological ordering of stages and tasks.
//!
//! [`OrderedGraph`] keeps its values in a resolved run order that satisfies
//! every `before`/`after` constraint between present nodes. Inserting a node
//! only touches the region between its latest predecessor and its earliest
//! successor (Pearce–Kelly style) instead of re-sorting the whole graph:
//!
//! - no successors: the node is appended
//! - every predecessor already precedes every successor: the node is placed
//!   right before its earliest successor
//! - otherwise the nodes reachable from the successors inside the affected
//!   region are moved behind the new node, keeping their relative order
//!
//! Unconstrained nodes therefore keep insertion order. A constraint may name a
//! key that is not present yet; it is parked until that key is inserted.

use std::fmt::Display;
use std::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

/// Reasons an insertion was rejected. The graph is untouched in both cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OrderError<K> {
    Duplicate(K),
    Cycle { key: K, conflict: String },
}

/// `from` runs before `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Edge<K> {
    from: K,
    to: K,
}

impl<K: PartialEq> Edge<K> {
    fn other(&self, key: &K) -> &K {
        if self.from == *key { &self.to } else { &self.from }
    }

    fn touches(&self, key: &K) -> bool {
        self.from == *key || self.to == *key
    }
}

enum Placement<K> {
    At(usize),
    Reorder {
        start: usize,
        end: usize,
        moved: FxHashSet<K>,
    },
}

#[derive(Debug)]
pub(crate) struct OrderedGraph<K, V> {
    items: Vec<(K, V)>,
    positions: FxHashMap<K, usize>,
    successors: FxHashMap<K, SmallVec<[K; 4]>>,
    predecessors: FxHashMap<K, SmallVec<[K; 4]>>,
    /// Constraints as declared by each present node.
    declared: FxHashMap<K, Vec<Edge<K>>>,
    /// Missing key -> (declaring node, constraint) waiting for it.
    pending: FxHashMap<K, Vec<(K, Edge<K>)>>,
}

impl<K, V> Default for OrderedGraph<K, V> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            positions: FxHashMap::default(),
            successors: FxHashMap::default(),
            predecessors: FxHashMap::default(),
            declared: FxHashMap::default(),
            pending: FxHashMap::default(),
        }
    }
}

impl<K, V> OrderedGraph<K, V>
where
    K: Clone + Eq + Hash + Display,
{
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub(crate) fn contains(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }

    pub(crate) fn position(&self, key: &K) -> Option<usize> {
        self.positions.get(key).copied()
    }

    pub(crate) fn get(&self, key: &K) -> Option<&V> {
        let index = self.position(key)?;
        self.items.get(index).map(|(_, value)| value)
    }

    pub(crate) fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let index = self.position(key)?;
        self.items.get_mut(index).map(|(_, value)| value)
    }

    /// Keys in run order.
    pub(crate) fn keys(&self) -> impl Iterator<Item = &K> {
        self.items.iter().map(|(key, _)| key)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &V> {
        self.items.iter().map(|(_, value)| value)
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.items.iter_mut().map(|(_, value)| value)
    }

    /// Inserts `key` so that it runs before every key in `before` and after
    /// every key in `after`.
    pub(crate) fn insert(
        &mut self,
        key: K,
        value: V,
        before: &[K],
        after: &[K],
    ) -> Result<(), OrderError<K>> {
        if self.positions.contains_key(&key) {
            return Err(OrderError::Duplicate(key));
        }

        let own: Vec<Edge<K>> = before
            .iter()
            .map(|target| Edge { from: key.clone(), to: target.clone() })
            .chain(after.iter().map(|target| Edge { from: target.clone(), to: key.clone() }))
            .collect();

        if own.iter().any(|edge| edge.from == edge.to) {
            return Err(OrderError::Cycle {
                conflict: format!("{key} cannot be ordered relative to itself"),
                key,
            });
        }

        let mut active = Vec::new();
        let mut parked = Vec::new();
        for edge in &own {
            let other = edge.other(&key);
            if self.positions.contains_key(other) {
                active.push(edge.clone());
            } else {
                parked.push((other.clone(), edge.clone()));
            }
        }
        if let Some(waiting) = self.pending.get(&key) {
            active.extend(waiting.iter().map(|(_, edge)| edge.clone()));
        }

        let predecessors: Vec<&K> = active
            .iter()
            .filter(|edge| edge.to == key)
            .map(|edge| &edge.from)
            .collect();
        let successors: Vec<&K> = active
            .iter()
            .filter(|edge| edge.from == key)
            .map(|edge| &edge.to)
            .collect();

        let lower = predecessors.iter().filter_map(|k| self.position(k)).max();
        let upper = successors.iter().filter_map(|k| self.position(k)).min();

        let placement = match (lower, upper) {
            (_, None) => Placement::At(self.items.len()),
            (None, Some(upper)) => Placement::At(upper),
            (Some(lower), Some(upper)) if lower < upper => Placement::At(upper),
            (Some(lower), Some(upper)) => {
                let moved = self.reachable_within(&successors, lower);
                if let Some(conflict) = predecessors.iter().find(|p| moved.contains(**p)) {
                    let via = successors
                        .iter()
                        .find(|s| self.reaches_within(s, conflict, lower))
                        .map_or_else(|| (*conflict).clone(), |s| (*s).clone());
                    return Err(OrderError::Cycle {
                        conflict: format!(
                            "it must run after {conflict} and before {via}, but {via} already runs before {conflict}"
                        ),
                        key,
                    });
                }
                Placement::Reorder { start: upper, end: lower, moved }
            }
        };

        // Commit. Nothing below can fail.
        match placement {
            Placement::At(index) => self.items.insert(index, (key.clone(), value)),
            Placement::Reorder { start, end, moved } => {
                let region: Vec<(K, V)> = self.items.drain(start..=end).collect();
                let (shifted, mut kept): (Vec<_>, Vec<_>) =
                    region.into_iter().partition(|(k, _)| moved.contains(k));
                kept.push((key.clone(), value));
                kept.extend(shifted);
                self.items.splice(start..start, kept);
            }
        }

        for edge in active {
            self.link(&edge);
        }
        self.pending.remove(&key);
        for (missing, edge) in parked {
            self.pending.entry(missing).or_default().push((key.clone(), edge));
        }
        self.declared.insert(key, own);
        self.reindex();

        Ok(())
    }

    /// Removes `key`, leaving the remaining order intact.
    ///
    /// Constraints other nodes declared against `key` are parked again, so
    /// re-inserting the key restores them.
    pub(crate) fn remove(&mut self, key: &K) -> Option<V> {
        let index = self.position(key)?;
        let (_, value) = self.items.remove(index);

        if let Some(successors) = self.successors.remove(key) {
            for successor in successors {
                if let Some(list) = self.predecessors.get_mut(&successor) {
                    list.retain(|k| k != key);
                }
            }
        }
        if let Some(predecessors) = self.predecessors.remove(key) {
            for predecessor in predecessors {
                if let Some(list) = self.successors.get_mut(&predecessor) {
                    list.retain(|k| k != key);
                }
            }
        }

        self.declared.remove(key);
        for waiting in self.pending.values_mut() {
            waiting.retain(|(declarer, _)| declarer != key);
        }
        self.pending.retain(|_, waiting| !waiting.is_empty());

        for (declarer, edges) in &self.declared {
            for edge in edges.iter().filter(|edge| edge.touches(key)) {
                self.pending
                    .entry(key.clone())
                    .or_default()
                    .push((declarer.clone(), edge.clone()));
            }
        }

        self.reindex();
        Some(value)
    }

    fn link(&mut self, edge: &Edge<K>) {
        self.successors
            .entry(edge.from.clone())
            .or_default()
            .push(edge.to.clone());
        self.predecessors
            .entry(edge.to.clone())
            .or_default()
            .push(edge.from.clone());
    }

    fn reindex(&mut self) {
        self.positions.clear();
        for (index, (key, _)) in self.items.iter().enumerate() {
            self.positions.insert(key.clone(), index);
        }
    }

    /// Nodes reachable from `starts` without leaving positions `..=limit`.
    fn reachable_within(&self, starts: &[&K], limit: usize) -> FxHashSet<K> {
        let within = |k: &K| self.position(k).is_some_and(|p| p <= limit);

        let mut seen = FxHashSet::default();
        let mut stack: Vec<K> = starts
            .iter()
            .copied()
            .filter(|k| within(*k))
            .cloned()
            .collect();
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(next) = self.successors.get(&current) {
                stack.extend(next.iter().filter(|k| within(*k) && !seen.contains(*k)).cloned());
            }
        }
        seen
    }

    fn reaches_within(&self, from: &K, to: &K, limit: usize) -> bool {
        self.reachable_within(&[from], limit).contains(to)
    }
}
