//! Lifetime trees matching the shape of declared types
//!
//! A value of compound type carries one lifetime per reference layer plus
//! one per record lifetime parameter. [`ValueLifetimes`] describes the
//! lifetimes of a *value* of some type; [`ObjectLifetimes`] adds the
//! lifetime of the object holding the value. Traversals are explicit per
//! variant.

use serde::{Deserialize, Serialize};

use crate::ast::ids::TypeId;
use crate::ast::types::{TypeArena, TypeKind};
use crate::lifetimes::lifetime::Lifetime;
use crate::lifetimes::substitutions::LifetimeSubstitutions;

/// Position polarity during paired signature traversal
///
/// Parameters are contravariant and returns covariant at the outermost
/// reference layer; everything below the first dereference is invariant
/// because callees may write through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variance {
    Covariant,
    Contravariant,
    Invariant,
}

/// Lifetimes of a value, following its type's shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueLifetimes {
    /// No lifetimes (scalars, void)
    Scalar,
    /// Pointer or reference: the lifetimes of the pointee object
    Pointer(Box<ObjectLifetimes>),
    /// Record: one lifetime argument per declared lifetime parameter
    Record(Vec<(String, Lifetime)>),
}

/// Lifetimes of an object: its own plus those of the value it holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLifetimes {
    pub lifetime: Lifetime,
    pub value: ValueLifetimes,
}

impl ValueLifetimes {
    /// Build the tree for `ty`, minting a lifetime per position
    pub fn for_type(arena: &TypeArena, ty: TypeId, mint: &mut dyn FnMut() -> Lifetime) -> Self {
        match arena.kind(ty) {
            TypeKind::Void | TypeKind::Scalar => ValueLifetimes::Scalar,
            TypeKind::Pointer(pointee) | TypeKind::Reference(pointee) => {
                let pointee = *pointee;
                let lifetime = mint();
                ValueLifetimes::Pointer(Box::new(ObjectLifetimes {
                    lifetime,
                    value: ValueLifetimes::for_type(arena, pointee, mint),
                }))
            }
            TypeKind::Record(record) => {
                let params = arena.record(*record).lifetime_params.clone();
                ValueLifetimes::Record(
                    params.into_iter().map(|name| (name, mint())).collect(),
                )
            }
        }
    }

    /// Whether the tree contains no lifetimes at all
    pub fn is_empty(&self) -> bool {
        match self {
            ValueLifetimes::Scalar => true,
            ValueLifetimes::Pointer(_) => false,
            ValueLifetimes::Record(args) => args.is_empty(),
        }
    }

    pub fn for_each_lifetime(&self, visit: &mut dyn FnMut(Lifetime)) {
        match self {
            ValueLifetimes::Scalar => {}
            ValueLifetimes::Pointer(pointee) => pointee.for_each_lifetime(visit),
            ValueLifetimes::Record(args) => {
                for (_, lifetime) in args {
                    visit(*lifetime);
                }
            }
        }
    }

    pub fn has_any(&self, predicate: &dyn Fn(Lifetime) -> bool) -> bool {
        let mut found = false;
        self.for_each_lifetime(&mut |lifetime| found |= predicate(lifetime));
        found
    }

    pub fn substitute(&mut self, subst: &LifetimeSubstitutions) {
        match self {
            ValueLifetimes::Scalar => {}
            ValueLifetimes::Pointer(pointee) => pointee.substitute(subst),
            ValueLifetimes::Record(args) => {
                for (_, lifetime) in args {
                    *lifetime = subst.apply(*lifetime);
                }
            }
        }
    }

    /// Shape-preserving rewrite of every lifetime position
    pub fn map_lifetimes(&self, rewrite: &mut dyn FnMut(Lifetime) -> Lifetime) -> Self {
        match self {
            ValueLifetimes::Scalar => ValueLifetimes::Scalar,
            ValueLifetimes::Pointer(pointee) => {
                ValueLifetimes::Pointer(Box::new(pointee.map_lifetimes(rewrite)))
            }
            ValueLifetimes::Record(args) => ValueLifetimes::Record(
                args.iter()
                    .map(|(name, lifetime)| (name.clone(), rewrite(*lifetime)))
                    .collect(),
            ),
        }
    }

    /// The outermost pointee lifetime, if this is a pointer tree
    pub fn pointee_lifetime(&self) -> Option<Lifetime> {
        match self {
            ValueLifetimes::Pointer(pointee) => Some(pointee.lifetime),
            _ => None,
        }
    }

    pub fn as_pointee(&self) -> Option<&ObjectLifetimes> {
        match self {
            ValueLifetimes::Pointer(pointee) => Some(pointee),
            _ => None,
        }
    }

    /// Visit corresponding lifetimes of two same-shaped trees
    ///
    /// The variance passed to `visit` is `top` for the outermost reference
    /// layer and `Invariant` below it. Shape mismatches end the walk on
    /// that branch; callers validate shapes separately.
    pub fn visit_pairs(
        &self,
        other: &ValueLifetimes,
        top: Variance,
        visit: &mut dyn FnMut(Lifetime, Lifetime, Variance),
    ) {
        match (self, other) {
            (ValueLifetimes::Pointer(a), ValueLifetimes::Pointer(b)) => {
                visit(a.lifetime, b.lifetime, top);
                a.value.visit_pairs(&b.value, Variance::Invariant, visit);
            }
            (ValueLifetimes::Record(a), ValueLifetimes::Record(b)) => {
                for ((_, la), (_, lb)) in a.iter().zip(b.iter()) {
                    visit(*la, *lb, Variance::Invariant);
                }
            }
            _ => {}
        }
    }
}

impl ObjectLifetimes {
    pub fn for_each_lifetime(&self, visit: &mut dyn FnMut(Lifetime)) {
        visit(self.lifetime);
        self.value.for_each_lifetime(visit);
    }

    pub fn has_any(&self, predicate: &dyn Fn(Lifetime) -> bool) -> bool {
        let mut found = false;
        self.for_each_lifetime(&mut |lifetime| found |= predicate(lifetime));
        found
    }

    pub fn substitute(&mut self, subst: &LifetimeSubstitutions) {
        self.lifetime = subst.apply(self.lifetime);
        self.value.substitute(subst);
    }

    /// Shape-preserving rewrite of every lifetime position
    pub fn map_lifetimes(&self, rewrite: &mut dyn FnMut(Lifetime) -> Lifetime) -> Self {
        ObjectLifetimes {
            lifetime: rewrite(self.lifetime),
            value: self.value.map_lifetimes(rewrite),
        }
    }

    /// Paired traversal including the objects' own lifetimes
    pub fn visit_pairs(
        &self,
        other: &ObjectLifetimes,
        top: Variance,
        visit: &mut dyn FnMut(Lifetime, Lifetime, Variance),
    ) {
        visit(self.lifetime, other.lifetime, top);
        self.value.visit_pairs(&other.value, Variance::Invariant, visit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ids::{LifetimeVarId, RecordId};
    use crate::ast::types::RecordDecl;
    use crate::lifetimes::lifetime::LifetimeFactory;

    fn v(raw: u32) -> Lifetime {
        Lifetime::Variable(LifetimeVarId::from_raw(raw))
    }

    #[test]
    fn shape_follows_type() {
        let mut arena = TypeArena::new();
        let int = arena.scalar();
        let pp = arena.pointer_to(int);
        let ppp = arena.pointer_to(pp);

        let factory = LifetimeFactory::new();
        let tree = ValueLifetimes::for_type(&arena, ppp, &mut || factory.fresh());

        let mut lifetimes = Vec::new();
        tree.for_each_lifetime(&mut |l| lifetimes.push(l));
        assert_eq!(lifetimes.len(), 2);
        assert_ne!(lifetimes[0], lifetimes[1]);

        let scalar = ValueLifetimes::for_type(&arena, int, &mut || factory.fresh());
        assert!(scalar.is_empty());
    }

    #[test]
    fn record_args_match_declared_params() {
        let mut arena = TypeArena::new();
        let mut record = RecordDecl::new(RecordId::from_raw(0), "Holder");
        record.lifetime_params = vec!["a".into(), "b".into()];
        let record_id = arena.add_record(record);
        let record_ty = arena.record_type(record_id);

        let factory = LifetimeFactory::new();
        let tree = ValueLifetimes::for_type(&arena, record_ty, &mut || factory.fresh());
        match &tree {
            ValueLifetimes::Record(args) => {
                assert_eq!(args.len(), 2);
                assert_eq!(args[0].0, "a");
                assert_eq!(args[1].0, "b");
            }
            other => panic!("expected record lifetimes, got {:?}", other),
        }
    }

    #[test]
    fn substitute_rewrites_every_position() {
        let mut arena = TypeArena::new();
        let int = arena.scalar();
        let pp = arena.pointer_to(int);
        let ppp = arena.pointer_to(pp);

        let mut next = 0;
        let mut tree = ValueLifetimes::for_type(&arena, ppp, &mut || {
            let l = v(next);
            next += 1;
            l
        });

        let mut subst = LifetimeSubstitutions::new();
        subst.add(LifetimeVarId::from_raw(0), Lifetime::Static);
        subst.add(LifetimeVarId::from_raw(1), Lifetime::Local);
        tree.substitute(&subst);

        let mut lifetimes = Vec::new();
        tree.for_each_lifetime(&mut |l| lifetimes.push(l));
        assert_eq!(lifetimes, vec![Lifetime::Static, Lifetime::Local]);
        assert!(tree.has_any(&|l| l.is_local()));
    }

    #[test]
    fn paired_visit_reports_variance_flip() {
        let mut arena = TypeArena::new();
        let int = arena.scalar();
        let pp = arena.pointer_to(int);
        let ppp = arena.pointer_to(pp);

        let mut next = 0;
        let a = ValueLifetimes::for_type(&arena, ppp, &mut || {
            let l = v(next);
            next += 1;
            l
        });
        let b = ValueLifetimes::for_type(&arena, ppp, &mut || {
            let l = v(next);
            next += 1;
            l
        });

        let mut seen = Vec::new();
        a.visit_pairs(&b, Variance::Contravariant, &mut |la, lb, variance| {
            seen.push((la, lb, variance))
        });
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].2, Variance::Contravariant);
        assert_eq!(seen[1].2, Variance::Invariant);
    }
}
