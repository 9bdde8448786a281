//! Per-function fixed-point analysis
//!
//! Monotone worklist iteration over the CFG in reverse post-order until
//! the lattice stabilizes, then, at the exit block: surface lattice
//! errors, fold constructor member-initializers (they are not always part
//! of the CFG elements), run the static-reachability closure, and
//! snapshot the result for signature reconstruction.

use std::collections::VecDeque;

use diagnostics::Severity;
use indexmap::IndexMap;
use log::{debug, trace};

use crate::ast::func::{FunctionDecl, TranslationUnit};
use crate::ast::ids::collections::{IdMap, IdSet};
use crate::ast::ids::{BlockId, FuncId, ObjectId};
use crate::cfg::{ControlFlowGraph, Terminator};
use crate::engine::lattice::LifetimeLattice;
use crate::engine::object_repository::ObjectRepository;
use crate::engine::points_to_map::PointsToMap;
use crate::engine::transfer::{TargetPointeeBehavior, TransferContext};
use crate::engine::{
    AnalysisOptions, DiagnosticSink, FunctionAnalysisError, FunctionLifetimesOrError,
};
use crate::lifetimes::constraints::LifetimeConstraints;
use crate::lifetimes::function_lifetimes::FunctionLifetimes;
use crate::lifetimes::lifetime::Lifetime;
use crate::lifetimes::substitutions::LifetimeSubstitutions;

/// Snapshot of one function's analysis, frozen at the exit block
pub struct FunctionAnalysis<'tu> {
    pub repository: ObjectRepository<'tu>,
    pub points_to_map: PointsToMap,
    pub constraints: LifetimeConstraints,
    pub subst: LifetimeSubstitutions,
}

impl<'tu> FunctionAnalysis<'tu> {
    /// An analysis with no body effects: the repository skeleton alone
    ///
    /// Used for pure-virtual methods and for seeding recursive cycles.
    pub fn skeleton(repository: ObjectRepository<'tu>) -> Self {
        Self {
            repository,
            points_to_map: PointsToMap::new(),
            constraints: LifetimeConstraints::new(),
            subst: LifetimeSubstitutions::new(),
        }
    }
}

/// Analyze one function against already-known callee lifetimes
pub fn analyze_single_function<'tu>(
    tu: &'tu TranslationUnit,
    func: &'tu FunctionDecl,
    callee_lifetimes: &IndexMap<FuncId, FunctionLifetimesOrError>,
    options: &AnalysisOptions,
) -> Result<FunctionAnalysis<'tu>, FunctionAnalysisError> {
    let mut repository = ObjectRepository::new(tu, func);

    if func.is_pure_virtual() {
        return Ok(FunctionAnalysis::skeleton(repository));
    }

    let mut points_to_map;
    let mut constraints;

    // Defaulted default constructors always take the synthesis path, even
    // when a frontend happened to give them a body.
    let default_ctor = func.is_defaulted && is_default_constructor(func);
    if default_ctor {
        points_to_map = repository.initial_points_to_map();
        constraints = LifetimeConstraints::new();
        analyze_defaulted_function(tu, func, callee_lifetimes, &mut repository, &mut constraints)?;
    } else if let Some(cfg) = &func.body {
        (points_to_map, constraints) =
            analyze_function_body(func, cfg, callee_lifetimes, &mut repository, options)?;
    } else if func.is_defaulted {
        return Err(FunctionAnalysisError::DefaultedNotImplemented {
            name: func.name.clone(),
        });
    } else {
        return Err(FunctionAnalysisError::DeclarationOnly {
            name: func.name.clone(),
        });
    }

    let mut subst = LifetimeSubstitutions::new();
    propagate_static_to_pointees(&repository, &points_to_map, &mut subst)?;

    Ok(FunctionAnalysis {
        repository,
        points_to_map,
        constraints,
        subst,
    })
}

fn is_default_constructor(func: &FunctionDecl) -> bool {
    func.is_constructor() && func.params.is_empty()
}

/// Worklist fixed point over the body CFG
fn analyze_function_body<'tu>(
    func: &FunctionDecl,
    cfg: &ControlFlowGraph,
    callee_lifetimes: &IndexMap<FuncId, FunctionLifetimesOrError>,
    repository: &mut ObjectRepository<'tu>,
    options: &AnalysisOptions,
) -> Result<(PointsToMap, LifetimeConstraints), FunctionAnalysisError> {
    debug!("analyzing body of '{}'", func.name);
    let entry_state = LifetimeLattice::new(
        repository.initial_points_to_map(),
        LifetimeConstraints::new(),
    );

    let order = cfg.reverse_post_order();
    let mut out_states: IdMap<BlockId, LifetimeLattice> = IdMap::default();
    let mut worklist: VecDeque<BlockId> = order.iter().copied().collect();
    let mut queued: IdSet<BlockId> = order.iter().copied().collect();

    let mut visits = 0usize;
    let budget = cfg.blocks.len().saturating_mul(options.block_visit_factor).max(16);

    while let Some(block_id) = worklist.pop_front() {
        queued.remove(&block_id);
        visits += 1;
        if visits > budget {
            return Err(FunctionAnalysisError::TransferFailure {
                message: format!(
                    "dataflow for '{}' did not stabilize within {} block visits",
                    func.name, budget
                ),
            });
        }

        let Some(block) = cfg.block(block_id) else {
            continue;
        };

        // Entry state: join of predecessor out-states; unreachable blocks
        // (no computed predecessor state) stay at bottom.
        let mut in_state = if block_id == cfg.entry {
            Some(entry_state.clone())
        } else {
            None
        };
        for &pred in &block.predecessors {
            if let Some(pred_out) = out_states.get(&pred) {
                in_state = Some(match in_state {
                    Some(state) => state.join(pred_out),
                    None => pred_out.clone(),
                });
            }
        }
        let Some(in_state) = in_state else {
            continue;
        };

        let out_state = transfer_block(repository, callee_lifetimes, block_id, cfg, in_state);
        let changed = out_states.get(&block_id) != Some(&out_state);
        if changed {
            trace!("block {} changed", block_id);
            out_states.insert(block_id, out_state);
            for successor in cfg.successors(block_id) {
                if queued.insert(successor) {
                    worklist.push_back(successor);
                }
            }
        }
    }

    // The fixed point is read at the exit block. A function whose exit is
    // unreachable (an infinite loop) contributes nothing beyond its entry
    // state.
    let exit_state = out_states
        .remove(&cfg.exit)
        .unwrap_or_else(|| entry_state.clone());
    let (mut points_to_map, mut constraints) = match exit_state {
        LifetimeLattice::Error(message) => {
            return Err(FunctionAnalysisError::TransferFailure { message })
        }
        LifetimeLattice::Value(map, constraints) => (map, constraints),
    };

    if constraints.len() > options.max_constraints {
        return Err(FunctionAnalysisError::TransferFailure {
            message: format!(
                "constraint set for '{}' exceeded {} entries",
                func.name, options.max_constraints
            ),
        });
    }

    // Member initializers are folded after the dataflow: member lifetimes
    // depend only on `this` and the record's lifetime arguments, never on
    // what the initializers were, so late processing is sound.
    fold_constructor_initializers(
        func,
        callee_lifetimes,
        repository,
        &mut points_to_map,
        &mut constraints,
    )?;

    add_static_reachability_constraints(repository, &points_to_map, &mut constraints);

    Ok((points_to_map, constraints))
}

fn transfer_block(
    repository: &mut ObjectRepository<'_>,
    callee_lifetimes: &IndexMap<FuncId, FunctionLifetimesOrError>,
    block_id: BlockId,
    cfg: &ControlFlowGraph,
    state: LifetimeLattice,
) -> LifetimeLattice {
    let (mut map, mut constraints) = match state {
        LifetimeLattice::Value(map, constraints) => (map, constraints),
        error => return error,
    };
    let Some(block) = cfg.block(block_id) else {
        return LifetimeLattice::Value(map, constraints);
    };

    let mut ctx = TransferContext::new(repository, callee_lifetimes);
    for stmt in &block.statements {
        if let Err(message) = ctx.transfer_statement(stmt, &mut map, &mut constraints) {
            return LifetimeLattice::error(message);
        }
    }
    let result = match &block.terminator {
        Terminator::Return { value } => {
            ctx.transfer_return(value.as_ref(), &mut map, &mut constraints)
        }
        Terminator::Branch { condition, .. } => {
            ctx.process_effects(condition, &mut map, &mut constraints)
        }
        Terminator::Jump { .. } | Terminator::Unreachable => Ok(()),
    };
    match result {
        Ok(()) => LifetimeLattice::Value(map, constraints),
        Err(message) => LifetimeLattice::error(message),
    }
}

/// Fold `: field(expr)` initializers into the exit state
fn fold_constructor_initializers(
    func: &FunctionDecl,
    callee_lifetimes: &IndexMap<FuncId, FunctionLifetimesOrError>,
    repository: &mut ObjectRepository<'_>,
    map: &mut PointsToMap,
    constraints: &mut LifetimeConstraints,
) -> Result<(), FunctionAnalysisError> {
    let inits = func.constructor_inits();
    if inits.is_empty() {
        return Ok(());
    }
    let Some(this_object) = repository.this_object() else {
        return Err(FunctionAnalysisError::TransferFailure {
            message: format!("constructor '{}' has no 'this' object", func.name),
        });
    };
    let inits = inits.to_vec();
    let mut ctx = TransferContext::new(repository, callee_lifetimes);
    for init in &inits {
        let Some(field_object) = ctx.repo.field_object(this_object, init.field) else {
            return Err(FunctionAnalysisError::TransferFailure {
                message: format!("constructor '{}' initializes unknown field", func.name),
            });
        };
        ctx.transfer_initializer(
            field_object,
            &init.value,
            TargetPointeeBehavior::Keep,
            map,
            constraints,
        )
        .map_err(|message| FunctionAnalysisError::TransferFailure { message })?;
    }
    Ok(())
}

/// Constraint guise of the static closure: record `'static >= l(o)` for
/// every object reachable from a static-lifetime pointer
fn add_static_reachability_constraints(
    repository: &ObjectRepository<'_>,
    map: &PointsToMap,
    constraints: &mut LifetimeConstraints,
) {
    let mut stack =
        map.all_pointers_with_lifetime(Lifetime::Static, |o| repository.lifetime_of(o));
    let mut visited: IdSet<ObjectId> = IdSet::default();
    while let Some(object) = stack.pop() {
        if !visited.insert(object) {
            continue;
        }
        constraints.add_outlives(Lifetime::Static, repository.lifetime_of(object));
        for pointee in map.points_to(object).iter() {
            stack.push(pointee);
        }
    }
}

/// Substitution guise of the static closure: collapse every variable
/// reachable from a static pointer to `'static`; a reachable local is a
/// fatal error
fn propagate_static_to_pointees(
    repository: &ObjectRepository<'_>,
    map: &PointsToMap,
    subst: &mut LifetimeSubstitutions,
) -> Result<(), FunctionAnalysisError> {
    let mut stack =
        map.all_pointers_with_lifetime(Lifetime::Static, |o| repository.lifetime_of(o));
    let mut visited: IdSet<ObjectId> = IdSet::default();
    while let Some(object) = stack.pop() {
        if !visited.insert(object) {
            continue;
        }
        match repository.lifetime_of(object) {
            Lifetime::Local => return Err(FunctionAnalysisError::StaticPointsToLocal),
            Lifetime::Variable(var) => subst.add(var, Lifetime::Static),
            Lifetime::Static => {}
        }
        for pointee in map.points_to(object).iter() {
            stack.push(pointee);
        }
    }
    Ok(())
}

/// Synthesized analysis of a defaulted default constructor: bind the
/// default constructor of every base subobject and record-typed field
fn analyze_defaulted_function(
    tu: &TranslationUnit,
    func: &FunctionDecl,
    callee_lifetimes: &IndexMap<FuncId, FunctionLifetimesOrError>,
    repository: &mut ObjectRepository<'_>,
    constraints: &mut LifetimeConstraints,
) -> Result<(), FunctionAnalysisError> {
    let Some(record) = func.this_record() else {
        return Err(FunctionAnalysisError::DefaultedNotImplemented {
            name: func.name.clone(),
        });
    };
    let Some(this_object) = repository.this_object() else {
        return Err(FunctionAnalysisError::TransferFailure {
            message: format!("defaulted constructor '{}' has no 'this' object", func.name),
        });
    };

    let record_decl = tu.types.record(record);
    let bases = record_decl.bases.clone();
    let fields: Vec<_> = record_decl.fields.clone();

    for base in bases {
        if let Some(base_ctor) = default_constructor_of(tu, base) {
            let Some(subobject) = repository.base_object(this_object, base) else {
                continue;
            };
            transfer_default_constructor(
                tu,
                base_ctor,
                subobject,
                callee_lifetimes,
                repository,
                constraints,
            )?;
        }
    }
    for field in fields {
        let Some(field_record) = tu.types.record_of(field.ty) else {
            continue;
        };
        if let Some(field_ctor) = default_constructor_of(tu, field_record) {
            let Some(subobject) = repository.field_object(this_object, field.id) else {
                continue;
            };
            transfer_default_constructor(
                tu,
                field_ctor,
                subobject,
                callee_lifetimes,
                repository,
                constraints,
            )?;
        }
    }
    Ok(())
}

/// The default constructor a record declares, if any
pub fn default_constructor_of(tu: &TranslationUnit, record: crate::ast::RecordId) -> Option<FuncId> {
    tu.functions
        .values()
        .find(|f| {
            matches!(&f.kind, crate::ast::FunctionKind::Constructor { record: r, .. } if *r == record)
                && f.params.is_empty()
                && f.id == f.canonical
        })
        .map(|f| f.id)
}

/// Bind a subobject to its default constructor's `this` lifetimes
fn transfer_default_constructor(
    tu: &TranslationUnit,
    ctor: FuncId,
    subobject: ObjectId,
    callee_lifetimes: &IndexMap<FuncId, FunctionLifetimesOrError>,
    repository: &mut ObjectRepository<'_>,
    constraints: &mut LifetimeConstraints,
) -> Result<(), FunctionAnalysisError> {
    let ctor_id = tu.canonical(ctor);
    let ctor_sig = match callee_lifetimes.get(&ctor_id) {
        Some(Ok(sig)) => sig.clone(),
        _ => {
            let name = tu
                .function(ctor_id)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| ctor_id.to_string());
            return Err(FunctionAnalysisError::TransferFailure {
                message: format!("no lifetimes for constructor '{}'", name),
            });
        }
    };
    // Rename the constructor's variables into this function's space; the
    // synthesis runs once, so fresh variables stay deterministic.
    let ctor_sig = ctor_sig.rename_variables(&mut || repository.fresh_lifetime());
    let Some(ctor_this) = &ctor_sig.this_lifetimes else {
        return Ok(());
    };

    // The call-site view of the constructor's `this`: the subobject's own
    // lifetime and its record arguments.
    let args = match &ctor_this.value {
        crate::lifetimes::type_lifetimes::ValueLifetimes::Record(params) => params
            .iter()
            .map(|(name, _)| (name.clone(), repository.record_arg(subobject, name)))
            .collect(),
        _ => Vec::new(),
    };
    let call_site_sig = FunctionLifetimes {
        this_lifetimes: Some(crate::lifetimes::type_lifetimes::ObjectLifetimes {
            lifetime: repository.lifetime_of(subobject),
            value: crate::lifetimes::type_lifetimes::ValueLifetimes::Record(args),
        }),
        param_lifetimes: Vec::new(),
        return_lifetimes: crate::lifetimes::type_lifetimes::ValueLifetimes::Scalar,
    };
    let adapted = LifetimeConstraints::for_callable_substitution(&ctor_sig, &call_site_sig);
    constraints.merge(&adapted);
    Ok(())
}

/// Build the function's signature from a frozen analysis
///
/// Also usable with an empty ([`FunctionAnalysis::skeleton`]) analysis to
/// produce a signature with fully independent lifetimes.
pub fn construct_function_lifetimes(
    func: &FunctionDecl,
    analysis: FunctionAnalysis<'_>,
    reporter: &DiagnosticSink,
) -> FunctionLifetimesOrError {
    let FunctionAnalysis {
        repository,
        points_to_map: _,
        constraints,
        subst,
    } = analysis;

    let mut result = repository.original_function_lifetimes();
    result.substitute(&subst);
    if constraints.apply_to_function_lifetimes(&mut result).is_err() {
        reporter(
            func.loc,
            &FunctionAnalysisError::StaticPointsToLocal.to_string(),
            Severity::Error,
        );
        return Err(FunctionAnalysisError::StaticPointsToLocal);
    }

    diagnose_return_local(func, &result, reporter)?;
    Ok(result)
}

/// The return-local check: no `'local` may appear in the signature
fn diagnose_return_local(
    func: &FunctionDecl,
    lifetimes: &FunctionLifetimes,
    reporter: &DiagnosticSink,
) -> Result<(), FunctionAnalysisError> {
    let contains_local = |tree: &crate::lifetimes::type_lifetimes::ValueLifetimes| {
        tree.has_any(&|l| l.is_local())
    };

    for (param, tree) in func.params.iter().zip(lifetimes.param_lifetimes.iter()) {
        if contains_local(tree) {
            let error = FunctionAnalysisError::ReturnsLocalThroughParam {
                param: param.name.clone(),
            };
            reporter(param.loc, &error.to_string(), Severity::Error);
            return Err(error);
        }
    }

    if let Some(this) = &lifetimes.this_lifetimes {
        if this.has_any(&|l| l.is_local()) {
            let error = FunctionAnalysisError::ReturnsLocalThroughThis;
            reporter(func.loc, &error.to_string(), Severity::Error);
            return Err(error);
        }
    }

    if contains_local(&lifetimes.return_lifetimes) {
        let error = FunctionAnalysisError::ReturnsLocalAsReturn;
        reporter(func.loc, &error.to_string(), Severity::Error);
        return Err(error);
    }

    Ok(())
}
