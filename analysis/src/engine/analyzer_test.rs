//! Unit tests for the per-function analyzer and transfer function

use indexmap::IndexMap;

use crate::ast::build::{FunctionBuilder, TranslationUnitBuilder};
use crate::ast::func::TranslationUnit;
use crate::ast::ids::FuncId;
use crate::engine::analyzer::{analyze_single_function, construct_function_lifetimes};
use crate::engine::object_repository::ObjectRepository;
use crate::engine::points_to_map::PointsToMap;
use crate::engine::transfer::TransferContext;
use crate::engine::{AnalysisOptions, FunctionLifetimesOrError};
use crate::lifetimes::constraints::{is_isomorphic, LifetimeConstraints};
use crate::lifetimes::lifetime::Lifetime;

fn no_callees() -> IndexMap<FuncId, FunctionLifetimesOrError> {
    IndexMap::new()
}

/// `left ⊑ right`: every points-to edge of `left` appears in `right`
fn map_le(left: &PointsToMap, right: &PointsToMap) -> bool {
    left.iter().all(|(pointer, pointees)| {
        let rhs = right.points_to(pointer);
        pointees.iter().all(|p| rhs.contains(p))
    })
}

/// int* f(int* q) { int* p; p = q; }  (body kept for direct transfer)
fn copy_function() -> (TranslationUnit, FuncId) {
    let mut tub = TranslationUnitBuilder::new();
    let int = tub.int_type();
    let pint = tub.ptr(int);

    let id = tub.next_func_id();
    let mut f = FunctionBuilder::new(id, "f", pint);
    let q = f.param("q", pint);
    let p = f.local("p", pint);
    let entry = f.entry();
    f.decl_stmt(entry, p, None);
    let lhs = f.var(p, pint);
    let rhs = f.var(q, pint);
    f.assign(entry, lhs, rhs);
    let ret = f.var(p, pint);
    f.ret(entry, Some(ret));
    tub.add_function(f.build());
    (tub.finish(), id)
}

#[test]
fn strong_update_replaces_and_generates_no_constraints() {
    let (tu, id) = copy_function();
    let decl = tu.function(id).unwrap();
    let mut repo = ObjectRepository::new(&tu, decl);
    let mut map = repo.initial_points_to_map();
    let mut constraints = LifetimeConstraints::new();

    let callees = no_callees();
    let mut ctx = TransferContext::new(&mut repo, &callees);
    let body = decl.body.as_ref().unwrap();
    let entry = body.block(body.entry).unwrap();
    for stmt in &entry.statements {
        ctx.transfer_statement(stmt, &mut map, &mut constraints)
            .unwrap();
    }

    // After `p = q`, p's cell points exactly at q's declared pointee.
    let q_cell = ctx.repo.var_object(decl.params[0].var).unwrap();
    let p_cell = ctx.repo.var_object(decl.locals.keys().copied().next().unwrap()).unwrap();
    assert_eq!(map.points_to(p_cell), map.points_to(q_cell));
    // A strong update into a local emits no outlives constraints.
    assert!(constraints.is_empty());
}

#[test]
fn weak_update_through_deref_accumulates() {
    // void f(int** pp, int* q, int* r) { *pp = q; *pp = r; }
    let mut tub = TranslationUnitBuilder::new();
    let void = tub.void_type();
    let int = tub.int_type();
    let pint = tub.ptr(int);
    let ppint = tub.ptr(pint);

    let id = tub.next_func_id();
    let mut f = FunctionBuilder::new(id, "f", void);
    let pp = f.param("pp", ppint);
    let q = f.param("q", pint);
    let r = f.param("r", pint);
    let entry = f.entry();
    for source in [q, r] {
        let lhs = {
            let ptr = f.var(pp, ppint);
            f.deref(ptr, pint)
        };
        let rhs = f.var(source, pint);
        f.assign(entry, lhs, rhs);
    }
    f.ret(entry, None);
    tub.add_function(f.build());
    let tu = tub.finish();

    let decl = tu.function(id).unwrap();
    let mut repo = ObjectRepository::new(&tu, decl);
    let mut map = repo.initial_points_to_map();
    let mut constraints = LifetimeConstraints::new();

    let callees = no_callees();
    let mut ctx = TransferContext::new(&mut repo, &callees);
    let body = decl.body.as_ref().unwrap();
    let entry_block = body.block(body.entry).unwrap();
    for stmt in &entry_block.statements {
        ctx.transfer_statement(stmt, &mut map, &mut constraints)
            .unwrap();
    }

    // Both stores survive: the target is reached through a dereference,
    // so the update is weak.
    let pp_cell = ctx.repo.var_object(pp).unwrap();
    let q_cell = ctx.repo.var_object(q).unwrap();
    let r_cell = ctx.repo.var_object(r).unwrap();
    let pp_pointee = map.points_to(pp_cell).as_singleton().unwrap();
    let stored = map.points_to(pp_pointee);
    for source_cell in [q_cell, r_cell] {
        let source_pointee = map.points_to(source_cell).as_singleton().unwrap();
        assert!(stored.contains(source_pointee));
    }
    // Weak updates join lifetimes with the declared pointee layer.
    assert!(!constraints.is_empty());
}

#[test]
fn single_valued_objects_are_cells_not_pointees() {
    let (tu, id) = copy_function();
    let decl = tu.function(id).unwrap();
    let mut repo = ObjectRepository::new(&tu, decl);

    let single_valued = repo.initial_single_valued_objects();
    for param_cell in repo.param_objects() {
        assert!(single_valued.contains(param_cell));
        // The declared pointee is reached through a dereference and must
        // only ever see weak updates.
        let pointee = repo.initial_pointee(param_cell).unwrap();
        assert!(!repo.is_single_valued(pointee));
    }
    assert!(single_valued.contains(repo.return_object()));

    // Locals join the set when they materialize.
    let local = decl.locals.keys().copied().next().unwrap();
    let local_cell = repo.var_object(local).unwrap();
    assert!(repo.is_single_valued(local_cell));
}

#[test]
fn transfer_is_monotone_on_comparable_states() {
    let (tu, id) = copy_function();
    let decl = tu.function(id).unwrap();
    let mut repo = ObjectRepository::new(&tu, decl);

    let smaller = repo.initial_points_to_map();
    // A strictly larger state: q's cell may also point at the return
    // slot's declared pointee (any extra repository object works).
    let mut larger = smaller.clone();
    let q_cell = repo.var_object(decl.params[0].var).unwrap();
    let extra = repo.initial_pointee(repo.return_object()).unwrap();
    larger.set_points_to(
        q_cell,
        [extra].into_iter().collect(),
        crate::engine::points_to_map::UpdateMode::Weak,
    );
    assert!(map_le(&smaller, &larger));

    let callees = no_callees();
    let body = decl.body.as_ref().unwrap();
    let entry = body.block(body.entry).unwrap();

    let mut out_small = smaller.clone();
    let mut out_large = larger.clone();
    let mut constraints = LifetimeConstraints::new();
    let mut ctx = TransferContext::new(&mut repo, &callees);
    for stmt in &entry.statements {
        ctx.transfer_statement(stmt, &mut out_small, &mut constraints)
            .unwrap();
        ctx.transfer_statement(stmt, &mut out_large, &mut constraints)
            .unwrap();
    }
    assert!(map_le(&out_small, &out_large));
}

#[test]
fn signature_round_trip_is_isomorphic_to_reported_result() {
    let (tu, id) = copy_function();
    let decl = tu.function(id).unwrap();
    let options = AnalysisOptions::default();

    let analysis = analyze_single_function(&tu, decl, &no_callees(), &options).unwrap();
    let original = analysis.repository.original_function_lifetimes();
    let constraints = analysis.constraints.clone();
    let subst_applied = {
        let mut sig = original.clone();
        sig.substitute(&analysis.subst);
        constraints.apply_to_function_lifetimes(&mut sig).unwrap();
        sig
    };

    let reported = construct_function_lifetimes(decl, analysis, &crate::engine::noop_diagnostic_sink).unwrap();
    assert!(is_isomorphic(&subst_applied, &reported));
    assert_eq!(reported.signature_string(), "a -> a");
}

#[test]
fn loops_reach_a_fixed_point() {
    // int* f(int* a, int c) { int* p; while (c) { p = a; } return p; }
    let mut tub = TranslationUnitBuilder::new();
    let int = tub.int_type();
    let pint = tub.ptr(int);

    let id = tub.next_func_id();
    let mut f = FunctionBuilder::new(id, "f", pint);
    let a = f.param("a", pint);
    let c = f.param("c", int);
    let p = f.local("p", pint);

    let entry = f.entry();
    let cond_block = f.block();
    let body_block = f.block();
    let done_block = f.block();

    f.decl_stmt(entry, p, None);
    f.jump(entry, cond_block);
    let cond = f.var(c, int);
    f.branch(cond_block, cond, body_block, done_block);
    let lhs = f.var(p, pint);
    let rhs = f.var(a, pint);
    f.assign(body_block, lhs, rhs);
    f.jump(body_block, cond_block);
    let ret = f.var(p, pint);
    f.ret(done_block, Some(ret));
    tub.add_function(f.build());
    let tu = tub.finish();

    let decl = tu.function(id).unwrap();
    let options = AnalysisOptions::default();
    let analysis = analyze_single_function(&tu, decl, &no_callees(), &options).unwrap();
    let reported = construct_function_lifetimes(decl, analysis, &crate::engine::noop_diagnostic_sink).unwrap();
    assert_eq!(reported.signature_string(), "a, () -> a");
}

#[test]
fn static_reachability_closure_is_recorded_and_substituted() {
    // int* gp; int* f(int* p) { gp = p; return p; }
    let mut tub = TranslationUnitBuilder::new();
    let int = tub.int_type();
    let pint = tub.ptr(int);
    let gp = tub.global("gp", pint);

    let id = tub.next_func_id();
    let mut f = FunctionBuilder::new(id, "f", pint);
    let p = f.param("p", pint);
    let entry = f.entry();
    let lhs = f.var(gp, pint);
    let rhs = f.var(p, pint);
    f.assign(entry, lhs, rhs);
    let ret = f.var(p, pint);
    f.ret(entry, Some(ret));
    tub.add_function(f.build());
    let tu = tub.finish();

    let decl = tu.function(id).unwrap();
    let options = AnalysisOptions::default();
    let analysis = analyze_single_function(&tu, decl, &no_callees(), &options).unwrap();

    // Constraint guise: 'static >= l(o) recorded for reachable objects.
    let has_static_edge = analysis
        .constraints
        .all_constraints()
        .any(|(long, _)| long == Lifetime::Static);
    assert!(has_static_edge);
    // Substitution guise: the param pointee variable collapses to
    // 'static, and no local is reachable from a static pointer.
    assert!(!analysis.subst.is_empty());

    let reported = construct_function_lifetimes(decl, analysis, &crate::engine::noop_diagnostic_sink).unwrap();
    assert_eq!(reported.signature_string(), "static -> static");
}
