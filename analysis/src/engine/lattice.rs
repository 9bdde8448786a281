//! The dataflow lattice element
//!
//! Each program point carries either a `(PointsToMap, LifetimeConstraints)`
//! pair or an error that poisoned the analysis of this function. Error is
//! the top element: joining anything with an error yields the error.
//! Bottom (an unreachable block) is represented by the analyzer as the
//! absence of a state, not as a lattice value.

use std::fmt;

use crate::engine::points_to_map::PointsToMap;
use crate::lifetimes::constraints::LifetimeConstraints;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifetimeLattice {
    Value(PointsToMap, LifetimeConstraints),
    Error(String),
}

impl LifetimeLattice {
    pub fn new(points_to: PointsToMap, constraints: LifetimeConstraints) -> Self {
        LifetimeLattice::Value(points_to, constraints)
    }

    pub fn error(message: impl Into<String>) -> Self {
        LifetimeLattice::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LifetimeLattice::Error(_))
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            LifetimeLattice::Error(message) => Some(message),
            _ => None,
        }
    }

    pub fn points_to(&self) -> Option<&PointsToMap> {
        match self {
            LifetimeLattice::Value(map, _) => Some(map),
            _ => None,
        }
    }

    pub fn constraints(&self) -> Option<&LifetimeConstraints> {
        match self {
            LifetimeLattice::Value(_, constraints) => Some(constraints),
            _ => None,
        }
    }

    /// Control-flow merge: pointer-wise union of points-to, set union of
    /// constraints, error absorbs
    pub fn join(&self, other: &LifetimeLattice) -> LifetimeLattice {
        match (self, other) {
            (LifetimeLattice::Error(message), _) => LifetimeLattice::Error(message.clone()),
            (_, LifetimeLattice::Error(message)) => LifetimeLattice::Error(message.clone()),
            (
                LifetimeLattice::Value(map_a, constraints_a),
                LifetimeLattice::Value(map_b, constraints_b),
            ) => {
                let mut constraints = constraints_a.clone();
                constraints.merge(constraints_b);
                LifetimeLattice::Value(map_a.join(map_b), constraints)
            }
        }
    }
}

impl fmt::Display for LifetimeLattice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifetimeLattice::Error(message) => write!(f, "error: {}", message),
            LifetimeLattice::Value(map, constraints) => {
                write!(f, "{} constraints, points-to:\n{}", constraints.len(), map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ids::{LifetimeVarId, ObjectId};
    use crate::engine::object::ObjectSet;
    use crate::engine::points_to_map::UpdateMode;
    use crate::lifetimes::lifetime::Lifetime;

    fn v(raw: u32) -> Lifetime {
        Lifetime::Variable(LifetimeVarId::from_raw(raw))
    }

    fn value_with_edge(from: u32, to: u32) -> LifetimeLattice {
        let mut map = PointsToMap::new();
        map.set_points_to(
            ObjectId::from_raw(from),
            ObjectSet::singleton(ObjectId::from_raw(to)),
            UpdateMode::Strong,
        );
        LifetimeLattice::new(map, LifetimeConstraints::new())
    }

    #[test]
    fn join_is_idempotent_commutative() {
        let a = value_with_edge(0, 1);
        let b = value_with_edge(0, 2);

        assert_eq!(a.join(&a), a);
        assert_eq!(a.join(&b), b.join(&a));
    }

    #[test]
    fn join_is_associative() {
        let a = value_with_edge(0, 1);
        let b = value_with_edge(0, 2);
        let c = value_with_edge(3, 4);
        assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
    }

    #[test]
    fn error_absorbs() {
        let value = value_with_edge(0, 1);
        let error = LifetimeLattice::error("callee analysis failed");
        assert!(value.join(&error).is_error());
        assert!(error.join(&value).is_error());
        assert_eq!(
            error.error_message(),
            Some("callee analysis failed")
        );
    }

    #[test]
    fn join_unions_constraints() {
        let mut constraints_a = LifetimeConstraints::new();
        constraints_a.add_outlives(v(0), v(1));
        let mut constraints_b = LifetimeConstraints::new();
        constraints_b.add_outlives(v(1), v(2));

        let a = LifetimeLattice::new(PointsToMap::new(), constraints_a);
        let b = LifetimeLattice::new(PointsToMap::new(), constraints_b);
        let joined = a.join(&b);
        let constraints = joined.constraints().unwrap();
        assert_eq!(constraints.len(), 2);
        assert!(constraints.implies(v(0), v(2)));
    }
}
