//! The object graph of one function under analysis
//!
//! The repository mints every abstract memory cell the dataflow ever
//! touches: parameter cells and their declared pointee chains, the `this`
//! pointee, the return slot, locals, globals, field and base subobjects,
//! and the per-call-site objects that stand in for callee results.
//! Identities are stable for the repository's lifetime and are never
//! recycled; the structural graph (fields, bases, declared pointees) is
//! fixed at creation and never overwritten by the dataflow.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::ast::func::{FunctionDecl, TranslationUnit};
use crate::ast::ids::collections::{IdMap, IdSet};
use crate::ast::ids::{ExprId, FieldId, IdGenerator, ObjectId, RecordId, TypeId, VarId};
use crate::engine::object::{Object, ObjectSet};
use crate::engine::points_to_map::{PointsToMap, UpdateMode};
use crate::lifetimes::function_lifetimes::FunctionLifetimes;
use crate::lifetimes::lifetime::{Lifetime, LifetimeFactory};
use crate::lifetimes::type_lifetimes::{ObjectLifetimes, ValueLifetimes};

/// Object graph and lifetime skeleton for one function
pub struct ObjectRepository<'tu> {
    tu: &'tu TranslationUnit,
    func: &'tu FunctionDecl,
    factory: LifetimeFactory,
    ids: IdGenerator<ObjectId>,
    objects: IdMap<ObjectId, Object>,

    /// Parameter and local cells
    var_objects: IdMap<VarId, ObjectId>,
    /// Translation-unit globals touched by this function
    global_objects: IdMap<VarId, ObjectId>,
    /// The object `this` points at, for non-static methods
    this_object: Option<ObjectId>,
    return_object: ObjectId,

    /// Structural containment, fixed at creation or first query
    field_objects: HashMap<(ObjectId, FieldId), ObjectId>,
    base_objects: HashMap<(ObjectId, RecordId), ObjectId>,
    /// Lifetime arguments of record objects, per declared parameter name
    record_args: HashMap<(ObjectId, String), Lifetime>,
    /// Declared pointee of each pointer object; anchors extension
    /// constraints even when the points-to entry has been overwritten
    initial_pointees: IdMap<ObjectId, ObjectId>,

    /// Objects eligible for strong updates
    single_valued: IdSet<ObjectId>,

    /// Deterministic per-call-site materialization
    call_lifetimes: HashMap<(ExprId, u32), Lifetime>,
    call_objects: HashMap<(ExprId, u32), ObjectId>,

    original_lifetimes: FunctionLifetimes,
    /// Entry points-to edges (declared pointee chains)
    initial_points_to: PointsToMap,
}

impl<'tu> ObjectRepository<'tu> {
    pub fn new(tu: &'tu TranslationUnit, func: &'tu FunctionDecl) -> Self {
        let factory = LifetimeFactory::new();
        let original_lifetimes =
            FunctionLifetimes::for_decl(&tu.types, func, &mut || factory.fresh());

        let mut repo = Self {
            tu,
            func,
            factory,
            ids: IdGenerator::new(),
            objects: IdMap::default(),
            var_objects: IdMap::default(),
            global_objects: IdMap::default(),
            this_object: None,
            return_object: ObjectId::invalid(),
            field_objects: HashMap::new(),
            base_objects: HashMap::new(),
            record_args: HashMap::new(),
            initial_pointees: IdMap::default(),
            single_valued: IdSet::default(),
            call_lifetimes: HashMap::new(),
            call_objects: HashMap::new(),
            original_lifetimes: FunctionLifetimes {
                this_lifetimes: None,
                param_lifetimes: Vec::new(),
                return_lifetimes: ValueLifetimes::Scalar,
            },
            initial_points_to: PointsToMap::new(),
        };
        let original = original_lifetimes;

        // `this` pointee.
        if let Some(this_lifetimes) = &original.this_lifetimes {
            let record = func
                .this_record()
                .expect("this lifetimes imply a this record");
            let ty = record_type_of(tu, record);
            let this_object = repo.mint(ty, this_lifetimes.lifetime);
            repo.store_record_args(this_object, &this_lifetimes.value);
            repo.this_object = Some(this_object);
        }

        // Parameter cells with their declared pointee chains.
        for (param, tree) in func.params.iter().zip(original.param_lifetimes.iter()) {
            let cell = repo.mint(param.ty, Lifetime::Local);
            repo.single_valued.insert(cell);
            repo.attach_declared_pointees(cell, param.ty, tree, true);
            repo.var_objects.insert(param.var, cell);
        }

        // Return slot: pointee chain is registered but the slot starts
        // pointing at nothing.
        let return_object = repo.mint(func.return_ty, Lifetime::Local);
        repo.single_valued.insert(return_object);
        repo.attach_declared_pointees(return_object, func.return_ty, &original.return_lifetimes, false);
        repo.return_object = return_object;

        repo.original_lifetimes = original;
        repo
    }

    fn mint(&mut self, ty: TypeId, lifetime: Lifetime) -> ObjectId {
        let id = self.ids.mint();
        self.objects.insert(id, Object { id, ty, lifetime });
        id
    }

    /// Record the lifetime arguments a record-typed object was created with
    fn store_record_args(&mut self, object: ObjectId, value: &ValueLifetimes) {
        if let ValueLifetimes::Record(args) = value {
            for (name, lifetime) in args {
                self.record_args.insert((object, name.clone()), *lifetime);
            }
        }
    }

    /// Mint the declared pointee chain of a pointer object from its
    /// lifetime tree; `with_edges` controls whether the entry state
    /// points at the chain
    fn attach_declared_pointees(
        &mut self,
        object: ObjectId,
        ty: TypeId,
        tree: &ValueLifetimes,
        with_edges: bool,
    ) {
        let Some(pointee_lifetimes) = tree.as_pointee() else {
            self.store_record_args(object, tree);
            return;
        };
        let Some(pointee_ty) = self.tu.types.pointee_of(ty) else {
            return;
        };
        let pointee = self.mint(pointee_ty, pointee_lifetimes.lifetime);
        self.initial_pointees.insert(object, pointee);
        if with_edges {
            self.initial_points_to
                .set_points_to(object, ObjectSet::singleton(pointee), UpdateMode::Strong);
        }
        self.attach_declared_pointees(pointee, pointee_ty, &pointee_lifetimes.value, with_edges);
    }

    // Accessors.

    pub fn func(&self) -> &'tu FunctionDecl {
        self.func
    }

    pub fn translation_unit(&self) -> &'tu TranslationUnit {
        self.tu
    }

    pub fn object(&self, id: ObjectId) -> &Object {
        &self.objects[&id]
    }

    pub fn lifetime_of(&self, id: ObjectId) -> Lifetime {
        self.objects[&id].lifetime
    }

    pub fn type_of(&self, id: ObjectId) -> TypeId {
        self.objects[&id].ty
    }

    pub fn this_object(&self) -> Option<ObjectId> {
        self.this_object
    }

    pub fn return_object(&self) -> ObjectId {
        self.return_object
    }

    pub fn param_objects(&self) -> Vec<ObjectId> {
        self.func
            .params
            .iter()
            .filter_map(|p| self.var_objects.get(&p.var).copied())
            .collect()
    }

    /// The skeleton signature with fresh variables, before constraints
    pub fn original_function_lifetimes(&self) -> FunctionLifetimes {
        self.original_lifetimes.clone()
    }

    /// Entry-state points-to edges
    pub fn initial_points_to_map(&self) -> PointsToMap {
        self.initial_points_to.clone()
    }

    /// Objects that are certainly one concrete cell at entry: parameter
    /// cells, locals, and the return slot, but nothing reached through a
    /// pointer dereference
    pub fn initial_single_valued_objects(&self) -> ObjectSet {
        self.single_valued.iter().copied().collect()
    }

    pub fn is_single_valued(&self, object: ObjectId) -> bool {
        self.single_valued.contains(&object)
    }

    /// Declared pointee of a pointer object, if one was registered
    pub fn initial_pointee(&self, object: ObjectId) -> Option<ObjectId> {
        self.initial_pointees.get(&object).copied()
    }

    /// The cell of a parameter or local; locals materialize lazily
    pub fn var_object(&mut self, var: VarId) -> Option<ObjectId> {
        if let Some(&object) = self.var_objects.get(&var) {
            return Some(object);
        }
        if let Some(local) = self.func.local(var) {
            let ty = local.ty;
            let cell = self.mint(ty, Lifetime::Local);
            self.single_valued.insert(cell);
            // Local record cells get fresh lifetime arguments on demand;
            // local pointer cells start with no pointee.
            self.var_objects.insert(var, cell);
            return Some(cell);
        }
        None
    }

    /// The cell of a translation-unit global; static lifetime, with a
    /// static pointee chain for pointer-typed globals
    pub fn global_object(&mut self, var: VarId) -> Option<ObjectId> {
        if let Some(&object) = self.global_objects.get(&var) {
            return Some(object);
        }
        let global = self.tu.globals.get(&var)?;
        let ty = global.ty;
        let cell = self.mint(ty, Lifetime::Static);
        self.global_objects.insert(var, cell);
        let mut cursor = cell;
        let mut cursor_ty = ty;
        while let Some(pointee_ty) = self.tu.types.pointee_of(cursor_ty) {
            let pointee = self.mint(pointee_ty, Lifetime::Static);
            self.initial_pointees.insert(cursor, pointee);
            self.initial_points_to.set_points_to(
                cursor,
                ObjectSet::singleton(pointee),
                UpdateMode::Strong,
            );
            cursor = pointee;
            cursor_ty = pointee_ty;
        }
        Some(cell)
    }

    /// The lifetime argument of a record object for one declared
    /// parameter; fresh for record objects not rooted in the signature
    pub fn record_arg(&mut self, object: ObjectId, param: &str) -> Lifetime {
        if let Some(&lifetime) = self.record_args.get(&(object, param.to_string())) {
            return lifetime;
        }
        let lifetime = self.factory.fresh();
        self.record_args
            .insert((object, param.to_string()), lifetime);
        lifetime
    }

    /// The subobject of `object` holding `field`; total for structurally
    /// valid queries, stable across calls
    pub fn field_object(&mut self, object: ObjectId, field: FieldId) -> Option<ObjectId> {
        if let Some(&existing) = self.field_objects.get(&(object, field)) {
            return Some(existing);
        }
        let record = self.tu.types.record_of(self.type_of(object))?;
        let owner = self.tu.types.field_owner(record, field)?;
        // A field declared in a base class lives in the base subobject.
        let holder = if owner == record {
            object
        } else {
            self.base_object(object, owner)?
        };
        if let Some(&existing) = self.field_objects.get(&(holder, field)) {
            self.field_objects.insert((object, field), existing);
            return Some(existing);
        }
        let decl = self.tu.types.field(owner, field)?.clone();
        let parent_lifetime = self.lifetime_of(holder);
        let field_object = self.mint(decl.ty, parent_lifetime);
        self.store_field_pointees(field_object, &decl, holder);
        self.field_objects.insert((holder, field), field_object);
        if holder != object {
            self.field_objects.insert((object, field), field_object);
        }
        Some(field_object)
    }

    /// Pointer-typed fields point, at entry, at an object whose lifetime
    /// is the record's bound lifetime argument
    fn store_field_pointees(
        &mut self,
        field_object: ObjectId,
        decl: &crate::ast::types::FieldDecl,
        holder: ObjectId,
    ) {
        let Some(mut pointee_ty) = self.tu.types.pointee_of(decl.ty) else {
            return;
        };
        let lifetime = match &decl.pointee_param {
            Some(param) => self.record_arg(holder, param),
            None => self.lifetime_of(holder),
        };
        let mut cursor = field_object;
        loop {
            let pointee = self.mint(pointee_ty, lifetime);
            self.initial_pointees.insert(cursor, pointee);
            self.initial_points_to.set_points_to(
                cursor,
                ObjectSet::singleton(pointee),
                UpdateMode::Strong,
            );
            cursor = pointee;
            match self.tu.types.pointee_of(pointee_ty) {
                Some(deeper) => pointee_ty = deeper,
                None => break,
            }
        }
    }

    /// The base-class subobject of `object`
    pub fn base_object(&mut self, object: ObjectId, base: RecordId) -> Option<ObjectId> {
        if let Some(&existing) = self.base_objects.get(&(object, base)) {
            return Some(existing);
        }
        let record = self.tu.types.record_of(self.type_of(object))?;
        if !has_base(self.tu, record, base) {
            return None;
        }
        let ty = record_type_of(self.tu, base);
        let lifetime = self.lifetime_of(object);
        let subobject = self.mint(ty, lifetime);
        // Same-named lifetime parameters carry over from the derived
        // object; parameters the base adds get fresh arguments lazily.
        let base_params = self.tu.types.record(base).lifetime_params.clone();
        for param in base_params {
            if let Some(&arg) = self.record_args.get(&(object, param.clone())) {
                self.record_args.insert((subobject, param), arg);
            }
        }
        self.base_objects.insert((object, base), subobject);
        Some(subobject)
    }

    /// Cached call-site lifetime variable, keyed by call expression and
    /// position ordinal so repeated transfer visits agree
    pub fn call_lifetime(&mut self, call: ExprId, ordinal: u32) -> Lifetime {
        if let Some(&lifetime) = self.call_lifetimes.get(&(call, ordinal)) {
            return lifetime;
        }
        let lifetime = self.factory.fresh();
        self.call_lifetimes.insert((call, ordinal), lifetime);
        lifetime
    }

    /// Cached call-result object, keyed like [`Self::call_lifetime`]
    pub fn call_object(&mut self, call: ExprId, ordinal: u32, ty: TypeId, lifetime: Lifetime) -> ObjectId {
        if let Some(&object) = self.call_objects.get(&(call, ordinal)) {
            return object;
        }
        let object = self.mint(ty, lifetime);
        self.call_objects.insert((call, ordinal), object);
        object
    }

    pub fn fresh_lifetime(&self) -> Lifetime {
        self.factory.fresh()
    }

    /// Human-readable dump for debug snapshots
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        ids.sort();
        for id in ids {
            let object = &self.objects[&id];
            let role = if Some(id) == self.this_object {
                " this"
            } else if id == self.return_object {
                " return"
            } else if self.single_valued.contains(&id) {
                " cell"
            } else {
                ""
            };
            let _ = writeln!(out, "{} : {} {}{}", id, object.ty, object.lifetime, role);
        }
        out
    }
}

fn record_type_of(tu: &TranslationUnit, record: RecordId) -> TypeId {
    // The arena interns structurally, so re-interning is a lookup; but the
    // arena is behind a shared reference here, so search the record types
    // the TU registered instead.
    tu.record_types
        .get(&record)
        .copied()
        .expect("record type registered at TU construction")
}

fn has_base(tu: &TranslationUnit, record: RecordId, base: RecordId) -> bool {
    if record == base {
        return true;
    }
    tu.types
        .record(record)
        .bases
        .iter()
        .any(|&b| has_base(tu, b, base))
}
