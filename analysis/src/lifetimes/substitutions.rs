//! Idempotent lifetime-variable substitutions

use std::collections::HashMap;

use crate::ast::ids::LifetimeVarId;
use crate::lifetimes::lifetime::Lifetime;

/// A function from lifetime variables to lifetimes
///
/// Substitutions may chain (`'a -> 'b`, `'b -> 'static`); lookup follows
/// chains to a fixed point, so applying a substitution twice equals
/// applying it once.
#[derive(Debug, Clone, Default)]
pub struct LifetimeSubstitutions {
    map: HashMap<LifetimeVarId, Lifetime>,
}

impl LifetimeSubstitutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `var` stands for `target`
    ///
    /// Mapping a variable to itself is dropped; re-mapping an
    /// already-substituted variable keeps the earlier entry (the earlier
    /// unification already routed everything through it).
    pub fn add(&mut self, var: LifetimeVarId, target: Lifetime) {
        if target == Lifetime::Variable(var) {
            return;
        }
        self.map.entry(var).or_insert(target);
    }

    /// Resolve a lifetime through the substitution
    pub fn apply(&self, lifetime: Lifetime) -> Lifetime {
        let mut current = lifetime;
        // Chains are acyclic by construction of `add`; the bound guards
        // against pathological input all the same.
        for _ in 0..self.map.len() + 1 {
            match current {
                Lifetime::Variable(v) => match self.map.get(&v) {
                    Some(&next) if next != current => current = next,
                    _ => return current,
                },
                concrete => return concrete,
            }
        }
        current
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Fold another substitution into this one
    pub fn merge(&mut self, other: &LifetimeSubstitutions) {
        for (&var, &target) in &other.map {
            self.add(var, target);
        }
    }
}
