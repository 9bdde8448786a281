//! The may-point-to relation at one program point

use std::collections::HashMap;
use std::fmt;

use crate::ast::ids::ObjectId;
use crate::engine::object::ObjectSet;
use crate::lifetimes::lifetime::Lifetime;

/// Whether an assignment replaces or accumulates
///
/// A strong update is only legal when the destination is a singleton,
/// single-valued object; everything else must union.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Strong,
    Weak,
}

/// Partial map from pointer objects to their may-point-to sets
///
/// Only pointer/reference-typed objects get entries; a missing entry
/// means "points to nothing known yet". Field and base containment is not
/// stored here — that is the repository's fixed structural graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointsToMap {
    edges: HashMap<ObjectId, ObjectSet>,
}

impl PointsToMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The points-to set of `pointer` (empty if no entry)
    pub fn points_to(&self, pointer: ObjectId) -> ObjectSet {
        self.edges.get(&pointer).cloned().unwrap_or_default()
    }

    pub fn has_entry(&self, pointer: ObjectId) -> bool {
        self.edges.contains_key(&pointer)
    }

    /// Replace or union the points-to set of one pointer
    pub fn set_points_to(&mut self, pointer: ObjectId, pointees: ObjectSet, mode: UpdateMode) {
        match mode {
            UpdateMode::Strong => {
                self.edges.insert(pointer, pointees);
            }
            UpdateMode::Weak => {
                self.edges.entry(pointer).or_default().union_with(&pointees);
            }
        }
    }

    /// Union `new_pointees` into every pointer in `pointers`
    pub fn extend(&mut self, pointers: &ObjectSet, new_pointees: &ObjectSet) {
        for pointer in pointers.iter() {
            self.edges
                .entry(pointer)
                .or_default()
                .union_with(new_pointees);
        }
    }

    /// Union of the points-to sets of every object in `pointers`
    pub fn pointees_of(&self, pointers: &ObjectSet) -> ObjectSet {
        let mut result = ObjectSet::new();
        for pointer in pointers.iter() {
            if let Some(set) = self.edges.get(&pointer) {
                result.union_with(set);
            }
        }
        result
    }

    /// Pointers whose own lifetime is `lifetime`, in id order
    pub fn all_pointers_with_lifetime(
        &self,
        lifetime: Lifetime,
        lifetime_of: impl Fn(ObjectId) -> Lifetime,
    ) -> Vec<ObjectId> {
        let mut pointers: Vec<ObjectId> = self
            .edges
            .keys()
            .copied()
            .filter(|&o| lifetime_of(o) == lifetime)
            .collect();
        pointers.sort();
        pointers
    }

    /// Pointer-wise union of two maps
    pub fn join(&self, other: &PointsToMap) -> PointsToMap {
        let mut result = self.clone();
        for (&pointer, pointees) in &other.edges {
            result.edges.entry(pointer).or_default().union_with(pointees);
        }
        result
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &ObjectSet)> {
        self.edges.iter().map(|(&pointer, set)| (pointer, set))
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl fmt::Display for PointsToMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pointers: Vec<ObjectId> = self.edges.keys().copied().collect();
        pointers.sort();
        for pointer in pointers {
            writeln!(f, "{} -> {}", pointer, self.edges[&pointer])?;
        }
        Ok(())
    }
}
