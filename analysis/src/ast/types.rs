//! Type system interface consumed by the analysis
//!
//! The engine does not type-check; it only needs pointee extraction,
//! record membership, field lookup, and the pointer/reference predicate.
//! Types are interned in a [`TypeArena`] and referenced by [`TypeId`].

use std::collections::HashMap;

use crate::ast::ids::collections::IdMap;
use crate::ast::ids::{FieldId, RecordId, TypeId};

/// Structure of a type, as far as lifetime analysis cares
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Void,
    /// Any lifetime-less scalar (int, bool, char, enums)
    Scalar,
    /// `T*`
    Pointer(TypeId),
    /// `T&` — treated like a pointer that is always bound
    Reference(TypeId),
    /// A class or struct
    Record(RecordId),
}

/// Interning arena for types
///
/// Structural interning keeps `TypeId` comparisons meaningful: two
/// `Pointer(t)` registrations yield the same id.
#[derive(Debug, Default)]
pub struct TypeArena {
    kinds: Vec<TypeKind>,
    interned: HashMap<TypeKind, TypeId>,
    records: IdMap<RecordId, RecordDecl>,
}

impl TypeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.interned.get(&kind) {
            return id;
        }
        let id = TypeId::from_raw(self.kinds.len() as u32);
        self.kinds.push(kind.clone());
        self.interned.insert(kind, id);
        id
    }

    pub fn void(&mut self) -> TypeId {
        self.intern(TypeKind::Void)
    }

    pub fn scalar(&mut self) -> TypeId {
        self.intern(TypeKind::Scalar)
    }

    pub fn pointer_to(&mut self, pointee: TypeId) -> TypeId {
        self.intern(TypeKind::Pointer(pointee))
    }

    pub fn reference_to(&mut self, referent: TypeId) -> TypeId {
        self.intern(TypeKind::Reference(referent))
    }

    pub fn record_type(&mut self, record: RecordId) -> TypeId {
        self.intern(TypeKind::Record(record))
    }

    pub fn kind(&self, ty: TypeId) -> &TypeKind {
        &self.kinds[ty.as_raw() as usize]
    }

    /// Whether values of this type carry a points-to set
    pub fn is_pointer_like(&self, ty: TypeId) -> bool {
        matches!(
            self.kind(ty),
            TypeKind::Pointer(_) | TypeKind::Reference(_)
        )
    }

    /// The pointee/referent, if `ty` is pointer-like
    pub fn pointee_of(&self, ty: TypeId) -> Option<TypeId> {
        match self.kind(ty) {
            TypeKind::Pointer(p) | TypeKind::Reference(p) => Some(*p),
            _ => None,
        }
    }

    pub fn record_of(&self, ty: TypeId) -> Option<RecordId> {
        match self.kind(ty) {
            TypeKind::Record(r) => Some(*r),
            _ => None,
        }
    }

    /// Number of pointer layers until a non-pointer type is reached
    pub fn indirection_depth(&self, ty: TypeId) -> usize {
        let mut depth = 0;
        let mut cur = ty;
        while let Some(pointee) = self.pointee_of(cur) {
            depth += 1;
            cur = pointee;
        }
        depth
    }

    // Record registry.

    pub fn add_record(&mut self, record: RecordDecl) -> RecordId {
        let id = record.id;
        self.records.insert(id, record);
        id
    }

    pub fn record(&self, id: RecordId) -> &RecordDecl {
        &self.records[&id]
    }

    pub fn field(&self, record: RecordId, field: FieldId) -> Option<&FieldDecl> {
        self.record(record).fields.iter().find(|f| f.id == field)
    }

    /// Look up the record that declares `field`, searching bases too
    pub fn field_owner(&self, record: RecordId, field: FieldId) -> Option<RecordId> {
        if self.field(record, field).is_some() {
            return Some(record);
        }
        for &base in &self.record(record).bases {
            if let Some(owner) = self.field_owner(base, field) {
                return Some(owner);
            }
        }
        None
    }
}

/// A class or struct declaration
///
/// `lifetime_params` name the record's lifetime parameters; pointer-typed
/// fields bind their pointee lifetime to one of them. The base list and
/// field list together form the structural containment graph the object
/// repository mirrors; it must be acyclic.
#[derive(Debug, Clone)]
pub struct RecordDecl {
    pub id: RecordId,
    pub name: String,
    pub fields: Vec<FieldDecl>,
    /// Direct base classes, in declaration order
    pub bases: Vec<RecordId>,
    pub lifetime_params: Vec<String>,
}

impl RecordDecl {
    pub fn new(id: RecordId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            fields: Vec::new(),
            bases: Vec::new(),
            lifetime_params: Vec::new(),
        }
    }
}

/// A field within a record
#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub id: FieldId,
    pub name: String,
    pub ty: TypeId,
    /// For pointer-like fields: which of the record's lifetime parameters
    /// bounds the pointee
    pub pointee_param: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_structural() {
        let mut arena = TypeArena::new();
        let int = arena.scalar();
        let p1 = arena.pointer_to(int);
        let p2 = arena.pointer_to(int);
        assert_eq!(p1, p2);
        assert_ne!(p1, int);
        assert_eq!(arena.pointee_of(p1), Some(int));
        assert!(arena.is_pointer_like(p1));
        assert!(!arena.is_pointer_like(int));
    }

    #[test]
    fn indirection_depth_counts_layers() {
        let mut arena = TypeArena::new();
        let int = arena.scalar();
        let pp = arena.pointer_to(int);
        let ppp = arena.pointer_to(pp);
        assert_eq!(arena.indirection_depth(int), 0);
        assert_eq!(arena.indirection_depth(pp), 1);
        assert_eq!(arena.indirection_depth(ppp), 2);
    }

    #[test]
    fn field_lookup_searches_bases() {
        let mut arena = TypeArena::new();
        let int = arena.scalar();
        let base_id = RecordId::from_raw(0);
        let derived_id = RecordId::from_raw(1);

        let mut base = RecordDecl::new(base_id, "Base");
        let field = FieldId::from_raw(0);
        base.fields.push(FieldDecl {
            id: field,
            name: "value".into(),
            ty: int,
            pointee_param: None,
        });
        arena.add_record(base);

        let mut derived = RecordDecl::new(derived_id, "Derived");
        derived.bases.push(base_id);
        arena.add_record(derived);

        assert_eq!(arena.field_owner(derived_id, field), Some(base_id));
        assert_eq!(arena.field_owner(base_id, field), Some(base_id));
    }
}
