//! Outlives constraints between lifetimes
//!
//! A constraint `(long, short)` states that `long` outlives `short`.
//! The set stores its generating pairs; transitive closure is computed
//! lazily when queried. Applying a constraint set to a signature unifies
//! the lifetimes it relates, because the signature language can only
//! express lifetime equality, never strict ordering.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::ast::ids::LifetimeVarId;
use crate::lifetimes::function_lifetimes::FunctionLifetimes;
use crate::lifetimes::lifetime::Lifetime;
use crate::lifetimes::substitutions::LifetimeSubstitutions;
use crate::lifetimes::type_lifetimes::Variance;

/// A set of outlives constraints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifetimeConstraints {
    /// Generating pairs `(long, short)`, ordered for determinism
    outlives: BTreeSet<(Lifetime, Lifetime)>,
}

/// The constraint set is unsatisfiable: some lifetime is forced to be
/// both `'static` and `'local`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintApplicationError {
    pub message: String,
}

impl fmt::Display for ConstraintApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ConstraintApplicationError {}

impl LifetimeConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `long >= short`
    pub fn add_outlives(&mut self, long: Lifetime, short: Lifetime) {
        if long != short {
            self.outlives.insert((long, short));
        }
    }

    /// Record `a == b`
    pub fn add_equal(&mut self, a: Lifetime, b: Lifetime) {
        self.add_outlives(a, b);
        self.add_outlives(b, a);
    }

    pub fn merge(&mut self, other: &LifetimeConstraints) {
        self.outlives.extend(other.outlives.iter().copied());
    }

    pub fn all_constraints(&self) -> impl Iterator<Item = (Lifetime, Lifetime)> + '_ {
        self.outlives.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.outlives.is_empty()
    }

    pub fn len(&self) -> usize {
        self.outlives.len()
    }

    /// Whether `long >= short` follows from the set
    ///
    /// Includes the implicit rules: reflexivity, `'static` outlives
    /// everything, and everything outlives `'local`.
    pub fn implies(&self, long: Lifetime, short: Lifetime) -> bool {
        if long == short || long == Lifetime::Static || short == Lifetime::Local {
            return true;
        }
        // DFS over the generating pairs from `long`.
        let mut edges: HashMap<Lifetime, Vec<Lifetime>> = HashMap::new();
        for &(l, s) in &self.outlives {
            edges.entry(l).or_default().push(s);
        }
        let mut stack = vec![long];
        let mut visited = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if current == short {
                return true;
            }
            if let Some(nexts) = edges.get(&current) {
                stack.extend(nexts.iter().copied());
            }
        }
        false
    }

    /// Constraints required for a callable with signature `base` to be
    /// used wherever `constraining` is expected
    ///
    /// The traversal builds a substitution from `base`'s variables to
    /// `constraining`'s lifetimes; pure renamings generate nothing, so the
    /// result is empty exactly when the two signatures are structurally
    /// interchangeable in this direction. When `constraining` conflates
    /// two distinct `base` lifetimes, the emitted pair relates `base`'s
    /// own lifetimes; other mismatches are expressed over `constraining`'s.
    pub fn for_callable_substitution(
        base: &FunctionLifetimes,
        constraining: &FunctionLifetimes,
    ) -> LifetimeConstraints {
        let mut out = LifetimeConstraints::new();
        let mut mapping: HashMap<LifetimeVarId, Lifetime> = HashMap::new();
        let mut first_binder: HashMap<Lifetime, Lifetime> = HashMap::new();

        let mut handle = |base_lt: Lifetime, con_lt: Lifetime, variance: Variance| {
            let base_resolved = match base_lt {
                Lifetime::Variable(v) => {
                    if let Some(&mapped) = mapping.get(&v) {
                        mapped
                    } else {
                        mapping.insert(v, con_lt);
                        match first_binder.get(&con_lt).copied() {
                            Some(earlier) if earlier != base_lt => {
                                // `constraining` conflates two distinct
                                // base lifetimes; they must unify.
                                out.add_equal(earlier, base_lt);
                            }
                            Some(_) => {}
                            None => {
                                first_binder.insert(con_lt, base_lt);
                            }
                        }
                        return;
                    }
                }
                concrete => concrete,
            };
            if base_resolved == con_lt {
                return;
            }
            match variance {
                Variance::Covariant => out.add_outlives(base_resolved, con_lt),
                Variance::Contravariant => out.add_outlives(con_lt, base_resolved),
                Variance::Invariant => out.add_equal(base_resolved, con_lt),
            }
        };

        if let (Some(base_this), Some(con_this)) =
            (&base.this_lifetimes, &constraining.this_lifetimes)
        {
            base_this.visit_pairs(con_this, Variance::Contravariant, &mut handle);
        }
        for (base_param, con_param) in base
            .param_lifetimes
            .iter()
            .zip(constraining.param_lifetimes.iter())
        {
            base_param.visit_pairs(con_param, Variance::Contravariant, &mut handle);
        }
        base.return_lifetimes.visit_pairs(
            &constraining.return_lifetimes,
            Variance::Covariant,
            &mut handle,
        );

        out
    }

    /// Rewrite a signature so every constraint is satisfied
    ///
    /// Generating pairs collapse into equivalence classes via union-find:
    /// `('v, 'static)` forces the variable to `'static`, `('local, 'v)`
    /// forces it to `'local`, variable pairs unify, and the vacuous
    /// directions (`'static` on the long side, `'local` on the short) are
    /// skipped. A class forced to both `'static` and `'local` is
    /// unsatisfiable. Idempotent: applying the returned substitution a
    /// second time changes nothing.
    pub fn apply_to_function_lifetimes(
        &self,
        lifetimes: &mut FunctionLifetimes,
    ) -> Result<LifetimeSubstitutions, ConstraintApplicationError> {
        let mut uf = UnionFind::default();
        for &(long, short) in &self.outlives {
            match (long, short) {
                (l, s) if l == s => {}
                (Lifetime::Static, _) => {}
                (_, Lifetime::Static) => uf.union(long, Lifetime::Static),
                (Lifetime::Local, _) => uf.union(short, Lifetime::Local),
                (_, Lifetime::Local) => {}
                _ => uf.union(long, short),
            }
        }

        let mut subst = LifetimeSubstitutions::new();
        for (members, representative) in uf.classes()? {
            for member in members {
                if let Lifetime::Variable(v) = member {
                    if member != representative {
                        subst.add(v, representative);
                    }
                }
            }
        }
        lifetimes.substitute(&subst);
        Ok(subst)
    }
}

/// Union-find over lifetimes with static/local forcing
#[derive(Debug, Default)]
struct UnionFind {
    parent: HashMap<Lifetime, Lifetime>,
}

impl UnionFind {
    fn find(&mut self, x: Lifetime) -> Lifetime {
        let parent = *self.parent.entry(x).or_insert(x);
        if parent == x {
            return x;
        }
        let root = self.find(parent);
        self.parent.insert(x, root);
        root
    }

    fn union(&mut self, x: Lifetime, y: Lifetime) {
        let root_x = self.find(x);
        let root_y = self.find(y);
        if root_x != root_y {
            self.parent.insert(root_x, root_y);
        }
    }

    /// Members and representative of every class
    ///
    /// Representative preference: `'static`, then `'local`, then the
    /// lowest variable id. A class containing both constants is
    /// unsatisfiable.
    fn classes(
        &mut self,
    ) -> Result<Vec<(Vec<Lifetime>, Lifetime)>, ConstraintApplicationError> {
        let mut by_root: HashMap<Lifetime, Vec<Lifetime>> = HashMap::new();
        let keys: Vec<Lifetime> = self.parent.keys().copied().collect();
        for key in keys {
            let root = self.find(key);
            by_root.entry(root).or_default().push(key);
        }
        let mut classes = Vec::new();
        for (_, mut members) in by_root {
            members.sort();
            let has_static = members.contains(&Lifetime::Static);
            let has_local = members.contains(&Lifetime::Local);
            if has_static && has_local {
                return Err(ConstraintApplicationError {
                    message: "constraint set requires a lifetime to be both 'static and 'local"
                        .to_string(),
                });
            }
            let representative = if has_static {
                Lifetime::Static
            } else if has_local {
                Lifetime::Local
            } else {
                // `members` is sorted and Variable sorts after the
                // constants, so the first variable is the lowest id.
                members[0]
            };
            classes.push((members, representative));
        }
        // Deterministic output order.
        classes.sort_by_key(|(members, _)| members[0]);
        Ok(classes)
    }
}

/// Structural equivalence of two signatures: each can substitute for the
/// other with no additional constraints
pub fn is_isomorphic(a: &FunctionLifetimes, b: &FunctionLifetimes) -> bool {
    LifetimeConstraints::for_callable_substitution(a, b).is_empty()
        && LifetimeConstraints::for_callable_substitution(b, a).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ids::LifetimeVarId;
    use crate::lifetimes::type_lifetimes::{ObjectLifetimes, ValueLifetimes};

    fn v(raw: u32) -> Lifetime {
        Lifetime::Variable(LifetimeVarId::from_raw(raw))
    }

    fn ptr(lifetime: Lifetime) -> ValueLifetimes {
        ValueLifetimes::Pointer(Box::new(ObjectLifetimes {
            lifetime,
            value: ValueLifetimes::Scalar,
        }))
    }

    fn sig(params: Vec<ValueLifetimes>, ret: ValueLifetimes) -> FunctionLifetimes {
        FunctionLifetimes {
            this_lifetimes: None,
            param_lifetimes: params,
            return_lifetimes: ret,
        }
    }

    #[test]
    fn closure_includes_implicit_rules() {
        let mut constraints = LifetimeConstraints::new();
        constraints.add_outlives(v(0), v(1));
        constraints.add_outlives(v(1), v(2));

        assert!(constraints.implies(v(0), v(2)));
        assert!(constraints.implies(v(0), v(0)));
        assert!(constraints.implies(Lifetime::Static, v(2)));
        assert!(constraints.implies(v(0), Lifetime::Local));
        assert!(!constraints.implies(v(2), v(0)));
    }

    #[test]
    fn apply_unifies_variable_chain() {
        let mut constraints = LifetimeConstraints::new();
        constraints.add_outlives(v(0), v(2));

        let mut lifetimes = sig(vec![ptr(v(0)), ptr(v(1))], ptr(v(2)));
        constraints
            .apply_to_function_lifetimes(&mut lifetimes)
            .unwrap();
        assert_eq!(lifetimes.signature_string(), "a, b -> a");
    }

    #[test]
    fn apply_forces_static_and_keeps_vacuous_pairs_inert() {
        let mut constraints = LifetimeConstraints::new();
        constraints.add_outlives(v(0), Lifetime::Static);
        // Vacuous: 'static outlives everything already.
        constraints.add_outlives(Lifetime::Static, v(1));

        let mut lifetimes = sig(vec![ptr(v(0)), ptr(v(1))], ValueLifetimes::Scalar);
        constraints
            .apply_to_function_lifetimes(&mut lifetimes)
            .unwrap();
        assert_eq!(lifetimes.signature_string(), "static, a");
    }

    #[test]
    fn apply_forces_local() {
        let mut constraints = LifetimeConstraints::new();
        constraints.add_outlives(Lifetime::Local, v(0));

        let mut lifetimes = sig(vec![], ptr(v(0)));
        constraints
            .apply_to_function_lifetimes(&mut lifetimes)
            .unwrap();
        assert_eq!(lifetimes.signature_string(), "-> local");
    }

    #[test]
    fn static_local_collision_is_unsatisfiable() {
        let mut constraints = LifetimeConstraints::new();
        constraints.add_outlives(Lifetime::Local, Lifetime::Static);

        let mut lifetimes = sig(vec![], ValueLifetimes::Scalar);
        assert!(constraints
            .apply_to_function_lifetimes(&mut lifetimes)
            .is_err());
    }

    #[test]
    fn apply_is_idempotent() {
        let mut constraints = LifetimeConstraints::new();
        constraints.add_equal(v(0), v(1));

        let mut lifetimes = sig(vec![ptr(v(0)), ptr(v(1))], ptr(v(1)));
        constraints
            .apply_to_function_lifetimes(&mut lifetimes)
            .unwrap();
        let first = lifetimes.clone();
        constraints
            .apply_to_function_lifetimes(&mut lifetimes)
            .unwrap();
        assert_eq!(first, lifetimes);
    }

    #[test]
    fn callable_substitution_ignores_pure_renaming() {
        let a = sig(vec![ptr(v(0))], ptr(v(0)));
        let b = sig(vec![ptr(v(7))], ptr(v(7)));
        assert!(LifetimeConstraints::for_callable_substitution(&a, &b).is_empty());
        assert!(is_isomorphic(&a, &b));
    }

    #[test]
    fn callable_substitution_detects_conflation() {
        // base: independent params, returns the first.
        let base = sig(vec![ptr(v(0)), ptr(v(1))], ptr(v(0)));
        // constraining: both params share one lifetime.
        let tied = sig(vec![ptr(v(5)), ptr(v(5))], ptr(v(5)));

        let constraints = LifetimeConstraints::for_callable_substitution(&base, &tied);
        assert!(constraints.implies(v(0), v(1)));
        assert!(constraints.implies(v(1), v(0)));
        assert!(!is_isomorphic(&base, &tied));
    }

    #[test]
    fn callable_substitution_relates_constraining_side() {
        // base (a callee signature): returns its parameter.
        let callee = sig(vec![ptr(v(0))], ptr(v(0)));
        // constraining (a call site): distinct argument/result lifetimes.
        let call_site = sig(vec![ptr(v(10))], ptr(v(11)));

        let constraints = LifetimeConstraints::for_callable_substitution(&callee, &call_site);
        assert!(constraints.implies(v(10), v(11)));
    }

    #[test]
    fn signature_round_trip_is_isomorphic() {
        let mut constraints = LifetimeConstraints::new();
        constraints.add_outlives(v(0), v(2));

        let original = sig(vec![ptr(v(0)), ptr(v(1))], ptr(v(2)));
        let mut applied = original.clone();
        constraints
            .apply_to_function_lifetimes(&mut applied)
            .unwrap();

        let mut reapplied = original.clone();
        constraints
            .apply_to_function_lifetimes(&mut reapplied)
            .unwrap();
        assert!(is_isomorphic(&applied, &reapplied));
    }
}
