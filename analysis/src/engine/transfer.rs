//! The dataflow transfer function
//!
//! Given the current `(PointsToMap, LifetimeConstraints)` state and one
//! statement or terminator, produce the successor state. The transfer is
//! total and deterministic: objects materialized for call results are
//! cached per `(call expression, position ordinal)` so repeated visits of
//! the same statement during fixed-point iteration produce identical
//! identities.
//!
//! Update discipline:
//! - plain assignment to a singleton, single-valued cell is a strong
//!   update with no constraint generation (the old pointees are simply
//!   replaced);
//! - everything else (weak updates, initializers, returns) goes through
//!   points-to set extension, which joins the new pointees' lifetimes
//!   with the destination's declared pointee lifetimes, layer by layer.

use std::collections::HashMap;

use indexmap::IndexMap;
use log::trace;

use crate::ast::expr::{Expr, ExprKind, Stmt};
use crate::ast::ids::{ExprId, FuncId, LifetimeVarId, TypeId};
use crate::engine::object::ObjectSet;
use crate::engine::object_repository::ObjectRepository;
use crate::engine::points_to_map::{PointsToMap, UpdateMode};
use crate::engine::FunctionLifetimesOrError;
use crate::lifetimes::constraints::LifetimeConstraints;
use crate::lifetimes::function_lifetimes::FunctionLifetimes;
use crate::lifetimes::lifetime::Lifetime;
use crate::lifetimes::type_lifetimes::{ObjectLifetimes, ValueLifetimes};

/// Whether an initializer replaces existing pointees or keeps them
///
/// `Keep` is for after-the-fact folding of constructor member
/// initializers, where the body may already have written the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPointeeBehavior {
    Ignore,
    Keep,
}

/// Failures inside the transfer; they poison the lattice, not the driver
pub type TransferResult<T> = Result<T, String>;

/// Transfer-function state shared across one function's analysis
pub struct TransferContext<'a, 'tu> {
    pub repo: &'a mut ObjectRepository<'tu>,
    pub callee_lifetimes: &'a IndexMap<FuncId, FunctionLifetimesOrError>,
}

impl<'a, 'tu> TransferContext<'a, 'tu> {
    pub fn new(
        repo: &'a mut ObjectRepository<'tu>,
        callee_lifetimes: &'a IndexMap<FuncId, FunctionLifetimesOrError>,
    ) -> Self {
        Self {
            repo,
            callee_lifetimes,
        }
    }

    fn is_pointer_like(&self, ty: TypeId) -> bool {
        self.repo.translation_unit().types.is_pointer_like(ty)
    }

    /// Pointees of a set, falling back to declared pointee chains
    ///
    /// Objects that materialize lazily (fields, globals) register their
    /// declared pointees with the repository after the entry state was
    /// copied, so a pointer without a dataflow entry still reads as
    /// pointing at its declared pointee.
    fn pointees_of(&self, map: &PointsToMap, pointers: &ObjectSet) -> ObjectSet {
        let mut result = ObjectSet::new();
        for pointer in pointers.iter() {
            if map.has_entry(pointer) {
                result.union_with(&map.points_to(pointer));
            } else if let Some(declared) = self.repo.initial_pointee(pointer) {
                result.insert(declared);
            }
        }
        result
    }

    /// Apply one statement to the state
    pub fn transfer_statement(
        &mut self,
        stmt: &Stmt,
        map: &mut PointsToMap,
        constraints: &mut LifetimeConstraints,
    ) -> TransferResult<()> {
        match stmt {
            Stmt::Decl { var, init } => {
                let cell = self
                    .repo
                    .var_object(*var)
                    .ok_or_else(|| format!("declaration of unknown variable {}", var))?;
                if let Some(init) = init {
                    self.transfer_initializer(
                        cell,
                        init,
                        TargetPointeeBehavior::Ignore,
                        map,
                        constraints,
                    )?;
                }
                Ok(())
            }
            Stmt::Assign { lhs, rhs } => {
                let targets = self.eval_lvalue(lhs, map, constraints)?;
                if self.is_pointer_like(lhs.ty) {
                    let new_pointees = self.eval_pointer(rhs, map, constraints)?;
                    let strong_target = targets
                        .as_singleton()
                        .filter(|&o| self.repo.is_single_valued(o));
                    if let Some(target) = strong_target {
                        trace!("strong update {} <- {}", targets, new_pointees);
                        map.set_points_to(target, new_pointees, UpdateMode::Strong);
                    } else {
                        trace!("weak update {} <- {}", targets, new_pointees);
                        self.handle_points_to_set_extension(
                            &targets,
                            &new_pointees,
                            UpdateMode::Weak,
                            map,
                            constraints,
                        );
                    }
                } else {
                    self.process_effects(rhs, map, constraints)?;
                }
                Ok(())
            }
            Stmt::Expr(expr) => self.process_effects(expr, map, constraints),
            Stmt::Construct { target, ctor, args } => {
                let constructed = self.eval_lvalue(target, map, constraints)?;
                self.call_effects(target.id, *ctor, Some(constructed), args, map, constraints)?;
                Ok(())
            }
        }
    }

    /// Initialize `dest` from `init`, generating extension constraints
    pub fn transfer_initializer(
        &mut self,
        dest: crate::ast::ids::ObjectId,
        init: &Expr,
        behavior: TargetPointeeBehavior,
        map: &mut PointsToMap,
        constraints: &mut LifetimeConstraints,
    ) -> TransferResult<()> {
        if self.is_pointer_like(self.repo.type_of(dest)) {
            let new_pointees = self.eval_pointer(init, map, constraints)?;
            let mode = match behavior {
                TargetPointeeBehavior::Ignore => UpdateMode::Strong,
                TargetPointeeBehavior::Keep => UpdateMode::Weak,
            };
            self.handle_points_to_set_extension(
                &ObjectSet::singleton(dest),
                &new_pointees,
                mode,
                map,
                constraints,
            );
            Ok(())
        } else {
            self.process_effects(init, map, constraints)
        }
    }

    /// Fold a `return` into the return slot
    pub fn transfer_return(
        &mut self,
        value: Option<&Expr>,
        map: &mut PointsToMap,
        constraints: &mut LifetimeConstraints,
    ) -> TransferResult<()> {
        let Some(value) = value else {
            return Ok(());
        };
        if self.is_pointer_like(value.ty) {
            let pointees = self.eval_pointer(value, map, constraints)?;
            let slot = ObjectSet::singleton(self.repo.return_object());
            self.handle_points_to_set_extension(
                &slot,
                &pointees,
                UpdateMode::Weak,
                map,
                constraints,
            );
            Ok(())
        } else {
            self.process_effects(value, map, constraints)
        }
    }

    /// Union new pointees into pointers and join lifetimes with the
    /// pointers' declared pointee chains, layer by layer
    pub fn handle_points_to_set_extension(
        &mut self,
        pointers: &ObjectSet,
        new_pointees: &ObjectSet,
        mode: UpdateMode,
        map: &mut PointsToMap,
        constraints: &mut LifetimeConstraints,
    ) {
        // Lifetimes join against each pointer's declared pointee chain
        // before the map changes, so the deeper levels see the incoming
        // pointees' own edges, not the freshly written ones.
        for pointer in pointers.iter() {
            let mut declared = self.repo.initial_pointee(pointer);
            let mut level = new_pointees.clone();
            while let Some(decl) = declared {
                let declared_lifetime = self.repo.lifetime_of(decl);
                for incoming in level.iter() {
                    constraints.add_equal(self.repo.lifetime_of(incoming), declared_lifetime);
                }
                declared = self.repo.initial_pointee(decl);
                level = self.pointees_of(map, &level);
            }
        }
        match mode {
            UpdateMode::Weak => map.extend(pointers, new_pointees),
            UpdateMode::Strong => {
                for pointer in pointers.iter() {
                    map.set_points_to(pointer, new_pointees.clone(), UpdateMode::Strong);
                }
            }
        }
    }

    /// Objects an lvalue expression denotes
    pub fn eval_lvalue(
        &mut self,
        expr: &Expr,
        map: &mut PointsToMap,
        constraints: &mut LifetimeConstraints,
    ) -> TransferResult<ObjectSet> {
        match &expr.kind {
            ExprKind::VarRef(var) => {
                let object = self
                    .repo
                    .var_object(*var)
                    .or_else(|| self.repo.global_object(*var))
                    .ok_or_else(|| format!("reference to unknown variable {}", var))?;
                Ok(ObjectSet::singleton(object))
            }
            ExprKind::Deref(inner) => self.eval_pointer(inner, map, constraints),
            ExprKind::Member { base, field } => {
                let bases = self.eval_lvalue(base, map, constraints)?;
                let mut fields = ObjectSet::new();
                for object in bases.iter() {
                    let field_object = self
                        .repo
                        .field_object(object, *field)
                        .ok_or_else(|| format!("no field {} on {}", field, object))?;
                    fields.insert(field_object);
                }
                Ok(fields)
            }
            ExprKind::BaseOf { base, record } => {
                let bases = self.eval_lvalue(base, map, constraints)?;
                let mut subobjects = ObjectSet::new();
                for object in bases.iter() {
                    let subobject = self
                        .repo
                        .base_object(object, *record)
                        .ok_or_else(|| format!("{} is not a base of {}", record, object))?;
                    subobjects.insert(subobject);
                }
                Ok(subobjects)
            }
            _ => Err("expression is not an lvalue".to_string()),
        }
    }

    /// Pointee set of a pointer-valued expression
    pub fn eval_pointer(
        &mut self,
        expr: &Expr,
        map: &mut PointsToMap,
        constraints: &mut LifetimeConstraints,
    ) -> TransferResult<ObjectSet> {
        match &expr.kind {
            ExprKind::NullPtr => Ok(ObjectSet::new()),
            ExprKind::AddressOf(inner) => self.eval_lvalue(inner, map, constraints),
            ExprKind::This => {
                let this = self
                    .repo
                    .this_object()
                    .ok_or_else(|| "'this' used outside a method".to_string())?;
                Ok(ObjectSet::singleton(this))
            }
            ExprKind::PtrOffset { base, offset } => {
                self.process_effects(offset, map, constraints)?;
                self.eval_pointer(base, map, constraints)
            }
            ExprKind::Call {
                callee,
                receiver,
                args,
            } => {
                let receiver_objects = match receiver {
                    Some(receiver) => Some(self.eval_pointer(receiver, map, constraints)?),
                    None => None,
                };
                self.call_effects(expr.id, *callee, receiver_objects, args, map, constraints)
            }
            ExprKind::VarRef(_) | ExprKind::Deref(_) | ExprKind::Member { .. }
            | ExprKind::BaseOf { .. } => {
                let cells = self.eval_lvalue(expr, map, constraints)?;
                Ok(self.pointees_of(map, &cells))
            }
            ExprKind::IntLiteral(_) | ExprKind::Binary { .. } => {
                Err("scalar expression used as a pointer".to_string())
            }
        }
    }

    /// Evaluate an expression only for its side effects (nested calls)
    pub fn process_effects(
        &mut self,
        expr: &Expr,
        map: &mut PointsToMap,
        constraints: &mut LifetimeConstraints,
    ) -> TransferResult<()> {
        match &expr.kind {
            ExprKind::Call {
                callee,
                receiver,
                args,
            } => {
                let receiver_objects = match receiver {
                    Some(receiver) => Some(self.eval_pointer(receiver, map, constraints)?),
                    None => None,
                };
                self.call_effects(expr.id, *callee, receiver_objects, args, map, constraints)?;
                Ok(())
            }
            ExprKind::VarRef(_)
            | ExprKind::This
            | ExprKind::IntLiteral(_)
            | ExprKind::NullPtr => Ok(()),
            ExprKind::AddressOf(inner) | ExprKind::Deref(inner) => {
                self.process_effects(inner, map, constraints)
            }
            ExprKind::Member { base, .. } | ExprKind::BaseOf { base, .. } => {
                self.process_effects(base, map, constraints)
            }
            ExprKind::PtrOffset { base, offset } => {
                self.process_effects(base, map, constraints)?;
                self.process_effects(offset, map, constraints)
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                self.process_effects(lhs, map, constraints)?;
                self.process_effects(rhs, map, constraints)
            }
        }
    }

    /// Apply a call: adapt the callee's signature to the call site, merge
    /// the resulting constraints, and bind the result to per-call-site
    /// return objects
    pub fn call_effects(
        &mut self,
        call: ExprId,
        callee: FuncId,
        receiver_objects: Option<ObjectSet>,
        args: &[Expr],
        map: &mut PointsToMap,
        constraints: &mut LifetimeConstraints,
    ) -> TransferResult<ObjectSet> {
        let tu = self.repo.translation_unit();
        let callee_id = tu.canonical(callee);
        let callee_decl = tu
            .function(callee_id)
            .ok_or_else(|| format!("call to unknown function {}", callee_id))?;
        let callee_name = callee_decl.name.clone();
        let callee_return_ty = callee_decl.return_ty;
        let callee_sig = match self.callee_lifetimes.get(&callee_id) {
            Some(Ok(sig)) => sig.clone(),
            Some(Err(error)) => {
                return Err(format!("callee '{}' has no usable lifetimes: {}", callee_name, error))
            }
            None => return Err(format!("no lifetimes known for callee '{}'", callee_name)),
        };

        let mut ordinal = 0u32;

        // The callee's variables live in its own repository's id space;
        // rename them into cached call-site variables so the adaptation
        // constraints cannot collide with this function's variables.
        let callee_sig = callee_sig.rename_variables(&mut || {
            let slot = ordinal;
            ordinal += 1;
            self.repo.call_lifetime(call, slot)
        });

        let mut binding: HashMap<LifetimeVarId, Lifetime> = HashMap::new();

        // The call-site view of the callee's signature, assembled from
        // the argument evaluation.
        let this_lifetimes = match (&callee_sig.this_lifetimes, receiver_objects) {
            (Some(callee_this), Some(objects)) => Some(self.instantiate_object_level(
                callee_this,
                &objects,
                call,
                &mut ordinal,
                &mut binding,
                map,
                constraints,
            )),
            (Some(_), None) => {
                return Err(format!("method '{}' called without a receiver", callee_name))
            }
            _ => None,
        };

        let mut param_lifetimes = Vec::with_capacity(callee_sig.param_lifetimes.len());
        for (tree, arg) in callee_sig.param_lifetimes.iter().zip(args.iter()) {
            param_lifetimes.push(self.instantiate_param(
                tree,
                arg,
                call,
                &mut ordinal,
                &mut binding,
                map,
                constraints,
            )?);
        }
        // Variadic tails still get evaluated for their effects.
        for arg in args.iter().skip(callee_sig.param_lifetimes.len()) {
            self.process_effects(arg, map, constraints)?;
        }

        let return_lifetimes = self.instantiate_return(
            &callee_sig.return_lifetimes,
            call,
            &mut ordinal,
            &binding,
        );

        let call_site_sig = FunctionLifetimes {
            this_lifetimes,
            param_lifetimes,
            return_lifetimes: return_lifetimes.clone(),
        };
        let adapted =
            LifetimeConstraints::for_callable_substitution(&callee_sig, &call_site_sig);
        trace!(
            "call '{}' at {}: {} adaptation constraints",
            callee_name,
            call,
            adapted.len()
        );
        constraints.merge(&adapted);

        // Bind the result to materialized return objects.
        Ok(self.materialize_call_result(call, callee_return_ty, &return_lifetimes, &mut ordinal, map))
    }

    /// Call-site lifetime for one callee signature position
    ///
    /// If every actual object at the position agrees on a lifetime, that
    /// lifetime is used directly; otherwise a cached per-call-site
    /// variable joins them. The ordinal advances either way so cache keys
    /// stay stable across fixed-point visits.
    fn position_lifetime(
        &mut self,
        callee_lifetime: Lifetime,
        actual: &[Lifetime],
        call: ExprId,
        ordinal: &mut u32,
        binding: &mut HashMap<LifetimeVarId, Lifetime>,
        constraints: &mut LifetimeConstraints,
    ) -> Lifetime {
        let slot = *ordinal;
        *ordinal += 1;
        let position = if !actual.is_empty() && actual.iter().all(|&l| l == actual[0]) {
            actual[0]
        } else {
            let variable = self.repo.call_lifetime(call, slot);
            for &lifetime in actual {
                constraints.add_outlives(lifetime, variable);
            }
            variable
        };
        if let Lifetime::Variable(var) = callee_lifetime {
            binding.entry(var).or_insert(position);
        }
        position
    }

    fn instantiate_param(
        &mut self,
        callee_tree: &ValueLifetimes,
        arg: &Expr,
        call: ExprId,
        ordinal: &mut u32,
        binding: &mut HashMap<LifetimeVarId, Lifetime>,
        map: &mut PointsToMap,
        constraints: &mut LifetimeConstraints,
    ) -> TransferResult<ValueLifetimes> {
        match callee_tree {
            ValueLifetimes::Scalar => {
                self.process_effects(arg, map, constraints)?;
                Ok(ValueLifetimes::Scalar)
            }
            ValueLifetimes::Pointer(pointee) => {
                let objects = self.eval_pointer(arg, map, constraints)?;
                Ok(ValueLifetimes::Pointer(Box::new(
                    self.instantiate_object_level(
                        pointee,
                        &objects,
                        call,
                        ordinal,
                        binding,
                        map,
                        constraints,
                    ),
                )))
            }
            ValueLifetimes::Record(params) => {
                // By-value record argument: lifetime arguments come from
                // the argument object itself.
                let objects = self.eval_lvalue(arg, map, constraints)?;
                let params = params.clone();
                let mut instantiated = Vec::with_capacity(params.len());
                for (name, callee_lifetime) in params {
                    let actual: Vec<Lifetime> = objects
                        .iter()
                        .map(|o| self.repo.record_arg(o, &name))
                        .collect();
                    let lifetime = self.position_lifetime(
                        callee_lifetime,
                        &actual,
                        call,
                        ordinal,
                        binding,
                        constraints,
                    );
                    instantiated.push((name, lifetime));
                }
                Ok(ValueLifetimes::Record(instantiated))
            }
        }
    }

    /// Instantiate one pointee level of the callee's signature from the
    /// actual objects flowing into it, descending through points-to
    fn instantiate_object_level(
        &mut self,
        callee_level: &ObjectLifetimes,
        objects: &ObjectSet,
        call: ExprId,
        ordinal: &mut u32,
        binding: &mut HashMap<LifetimeVarId, Lifetime>,
        map: &mut PointsToMap,
        constraints: &mut LifetimeConstraints,
    ) -> ObjectLifetimes {
        let actual: Vec<Lifetime> = objects.iter().map(|o| self.repo.lifetime_of(o)).collect();
        let lifetime = self.position_lifetime(
            callee_level.lifetime,
            &actual,
            call,
            ordinal,
            binding,
            constraints,
        );
        let value = match &callee_level.value {
            ValueLifetimes::Scalar => ValueLifetimes::Scalar,
            ValueLifetimes::Pointer(deeper) => {
                let deeper_objects = self.pointees_of(map, objects);
                ValueLifetimes::Pointer(Box::new(self.instantiate_object_level(
                    deeper,
                    &deeper_objects,
                    call,
                    ordinal,
                    binding,
                    map,
                    constraints,
                )))
            }
            ValueLifetimes::Record(params) => {
                let params = params.clone();
                let mut instantiated = Vec::with_capacity(params.len());
                for (name, callee_lifetime) in params {
                    let actual: Vec<Lifetime> = objects
                        .iter()
                        .map(|o| self.repo.record_arg(o, &name))
                        .collect();
                    let lifetime = self.position_lifetime(
                        callee_lifetime,
                        &actual,
                        call,
                        ordinal,
                        binding,
                        constraints,
                    );
                    instantiated.push((name, lifetime));
                }
                ValueLifetimes::Record(instantiated)
            }
        };
        ObjectLifetimes { lifetime, value }
    }

    /// The call-site view of the callee's return: parameter-bound
    /// variables resolve through the binding, unbound ones get cached
    /// call-site variables, constants stay
    fn instantiate_return(
        &mut self,
        callee_return: &ValueLifetimes,
        call: ExprId,
        ordinal: &mut u32,
        binding: &HashMap<LifetimeVarId, Lifetime>,
    ) -> ValueLifetimes {
        let mut resolve = |lifetime: Lifetime| -> Lifetime {
            let slot = *ordinal;
            *ordinal += 1;
            match lifetime {
                Lifetime::Variable(var) => binding
                    .get(&var)
                    .copied()
                    .unwrap_or_else(|| self.repo.call_lifetime(call, slot)),
                concrete => concrete,
            }
        };
        callee_return.map_lifetimes(&mut resolve)
    }

    /// Per-call-site objects standing in for the callee's return value
    fn materialize_call_result(
        &mut self,
        call: ExprId,
        return_ty: TypeId,
        return_lifetimes: &ValueLifetimes,
        ordinal: &mut u32,
        map: &mut PointsToMap,
    ) -> ObjectSet {
        let tu = self.repo.translation_unit();
        let Some(mut pointee_ty) = tu.types.pointee_of(return_ty) else {
            return ObjectSet::new();
        };
        let mut level = return_lifetimes.as_pointee();
        let mut chain = Vec::new();
        while let Some(object_lifetimes) = level {
            chain.push((pointee_ty, object_lifetimes.lifetime));
            match (
                &object_lifetimes.value,
                self.repo.translation_unit().types.pointee_of(pointee_ty),
            ) {
                (ValueLifetimes::Pointer(deeper), Some(deeper_ty)) => {
                    pointee_ty = deeper_ty;
                    level = Some(deeper);
                }
                _ => level = None,
            }
        }

        let mut previous: Option<crate::ast::ids::ObjectId> = None;
        let mut first = None;
        for (ty, lifetime) in chain {
            let slot = *ordinal;
            *ordinal += 1;
            let object = self.repo.call_object(call, slot, ty, lifetime);
            if let Some(prev) = previous {
                map.set_points_to(prev, ObjectSet::singleton(object), UpdateMode::Weak);
            } else {
                first = Some(object);
            }
            previous = Some(object);
        }
        match first {
            Some(object) => ObjectSet::singleton(object),
            None => ObjectSet::new(),
        }
    }
}
