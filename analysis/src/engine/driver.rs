//! Cross-function driver
//!
//! Walks the call graph leaves-first so that every function is analyzed
//! after its callees, detects recursive cycles by scanning the visit
//! stack and iterates them to a fixed point, and widens virtual base
//! methods with the overrides this translation unit defines. Results
//! (including failures) are cached per canonical function id; one
//! function's failure never aborts the traversal.

use diagnostics::Severity;
use indexmap::{IndexMap, IndexSet};
use log::{debug, info, warn};

use crate::ast::func::{ExternalAnnotations, FunctionDecl, TranslationUnit};
use crate::ast::ids::FuncId;
use crate::ast::{ExprKind, Stmt};
use crate::cfg::Terminator;
use crate::engine::analyzer::{
    analyze_single_function, construct_function_lifetimes, default_constructor_of,
    FunctionAnalysis,
};
use crate::engine::object_repository::ObjectRepository;
use crate::engine::{
    noop_diagnostic_sink, AnalysisOptions, DiagnosticSink, FunctionAnalysisError,
    FunctionDebugInfo, FunctionDebugInfoMap, FunctionLifetimesOrError,
};
use crate::lifetimes::constraints::{is_isomorphic, LifetimeConstraints};

/// One entry of the visit stack
#[derive(Debug, Clone, Copy)]
struct VisitedCallStackEntry {
    func: FuncId,
    in_cycle: bool,
    in_overrides_traversal: bool,
}

/// Base virtual methods mapped to the overrides this TU defines
type BaseToOverrides = IndexMap<FuncId, IndexSet<FuncId>>;

struct Driver<'a> {
    tu: &'a TranslationUnit,
    annotations: &'a ExternalAnnotations,
    reporter: &'a DiagnosticSink,
    options: &'a AnalysisOptions,
    base_to_overrides: BaseToOverrides,
    analyzed: IndexMap<FuncId, FunctionLifetimesOrError>,
    visited: Vec<VisitedCallStackEntry>,
    debug_info: FunctionDebugInfoMap,
}

impl<'a> Driver<'a> {
    fn new(
        tu: &'a TranslationUnit,
        annotations: &'a ExternalAnnotations,
        reporter: &'a DiagnosticSink,
        options: &'a AnalysisOptions,
    ) -> Self {
        Self {
            tu,
            annotations,
            reporter,
            options,
            base_to_overrides: build_base_to_overrides(tu),
            analyzed: IndexMap::new(),
            visited: Vec::new(),
            debug_info: FunctionDebugInfoMap::default(),
        }
    }

    /// Recursive leaves-first analysis of one function
    ///
    /// Cycle handling: a function found already on the visit stack marks
    /// everything from that point up as one cycle; members are left on
    /// the stack and analyzed together once control returns to the
    /// cycle's entry point.
    fn analyze_function_recursive(&mut self, func: FuncId) {
        let func = self.tu.canonical(func);
        let Some(decl) = self.tu.function(func) else {
            self.analyzed.insert(
                func,
                Err(FunctionAnalysisError::TransferFailure {
                    message: format!("call to function {} not present in translation unit", func),
                }),
            );
            return;
        };

        if decl.is_builtin {
            return;
        }

        let is_analyzed = self.analyzed.contains_key(&func);
        let is_virtual = decl.is_virtual();
        let is_pure_virtual = decl.is_pure_virtual();

        // Declaration-only functions take their lifetimes from external
        // annotations.
        if !decl.has_definition() && !is_pure_virtual && !is_analyzed {
            self.analyzed
                .insert(func, annotation_lifetimes(decl, self.annotations));
            return;
        }

        let in_overrides_traversal = self
            .visited
            .last()
            .map(|entry| entry.in_overrides_traversal)
            .unwrap_or(false);

        if is_analyzed && !in_overrides_traversal {
            return;
        }

        // The cycle check is skipped during an overrides traversal: the
        // traversal legitimately revisits methods it started from.
        if !in_overrides_traversal && self.find_and_mark_cycle(func) {
            return;
        }

        let callees = match self.get_callees(decl) {
            Ok(callees) => callees,
            Err(error) => {
                self.analyzed.insert(func, Err(error));
                return;
            }
        };

        let func_in_visited = self.visited.len();
        self.visited.push(VisitedCallStackEntry {
            func,
            in_cycle: false,
            in_overrides_traversal: false,
        });

        for callee in callees {
            if !self.analyzed.contains_key(&callee) {
                self.analyze_function_recursive(callee);
            }
        }

        // Virtual methods: walk up to the base methods first; once inside
        // an overrides traversal, walk down through the overrides so the
        // base's lifetimes can be constrained by each of them.
        let mut bases: IndexSet<FuncId> = IndexSet::new();
        let mut overrides: IndexSet<FuncId> = IndexSet::new();
        if is_virtual {
            self.visited[func_in_visited].in_overrides_traversal = true;
            if !in_overrides_traversal {
                collect_base_methods(self.tu, func, &mut bases);
                for base in bases.iter().copied().collect::<Vec<_>>() {
                    self.analyze_function_recursive(base);
                }
            } else if let Some(found) = self.base_to_overrides.get(&func) {
                overrides = found.clone();
                for derived in overrides.iter().copied().collect::<Vec<_>>() {
                    self.analyze_function_recursive(derived);
                }
            }
            self.visited[func_in_visited].in_overrides_traversal = false;
        }

        debug_assert_eq!(self.visited[func_in_visited].func, func);

        // Three cases by the cycle marking of this stack entry.
        if func_in_visited > 0
            && self.visited[func_in_visited].in_cycle
            && self.visited[func_in_visited - 1].in_cycle
        {
            // In a cycle but not its entry point: defer, and leave the
            // entry on the stack for the entry point to collect.
            return;
        }

        if !self.visited[func_in_visited].in_cycle {
            if bases.is_empty() {
                self.analyze_and_record(func, decl);
            } else {
                // An overrides traversal was initiated from the base
                // methods and has already produced this function's entry.
                debug_assert!(self.analyzed.contains_key(&func));
                if !self.analyzed.contains_key(&func) {
                    self.analyze_and_record(func, decl);
                }
            }
        } else {
            // Entry point of a recursive cycle.
            let cycle: Vec<FuncId> = self.visited[func_in_visited..]
                .iter()
                .map(|entry| entry.func)
                .collect();
            if let Err(error) = self.analyze_recursive_functions(&cycle) {
                warn!("recursive cycle failed: {}", error);
                for member in cycle {
                    self.analyzed.insert(member, Err(error.clone()));
                }
            }
        }

        if in_overrides_traversal {
            if let Err(error) = self.update_function_lifetimes_with_overrides(func, &overrides) {
                self.analyzed.insert(func, Err(error));
            }
        }

        self.visited.truncate(func_in_visited);
    }

    fn analyze_and_record(&mut self, func: FuncId, decl: &'a FunctionDecl) {
        debug!("analyzing '{}'", decl.name);
        let result = match analyze_single_function(self.tu, decl, &self.analyzed, self.options) {
            Ok(analysis) => {
                if self.options.record_debug_info {
                    self.debug_info.insert(
                        func,
                        FunctionDebugInfo {
                            object_repository: analysis.repository.dump(),
                            points_to_map: analysis.points_to_map.to_string(),
                        },
                    );
                }
                construct_function_lifetimes(decl, analysis, self.reporter)
            }
            Err(error) => {
                if error == FunctionAnalysisError::StaticPointsToLocal {
                    (self.reporter)(decl.loc, &error.to_string(), Severity::Error);
                }
                Err(error)
            }
        };
        self.analyzed.insert(func, result);
    }

    /// Fixed-point solver for one recursive cycle
    ///
    /// Members are seeded with fully disconnected signatures, then
    /// re-analyzed in stack order until nothing changes structurally.
    /// The bound is `max(param count) + 1` iterations: each round can tie
    /// at most one more parameter into the signatures.
    fn analyze_recursive_functions(
        &mut self,
        cycle: &[FuncId],
    ) -> Result<(), FunctionAnalysisError> {
        info!("solving recursive cycle of {} functions", cycle.len());
        let mut expected_iterations: u64 = 0;
        for &func in cycle {
            let Some(decl) = self.tu.function(func) else {
                continue;
            };
            expected_iterations = expected_iterations.max(decl.num_params() as u64);
            let skeleton = FunctionAnalysis::skeleton(ObjectRepository::new(self.tu, decl));
            let seed = construct_function_lifetimes(decl, skeleton, self.reporter)?;
            self.analyzed.insert(func, Ok(seed));
        }
        // One extra round to observe that nothing changed.
        expected_iterations += 1;

        let mut changed = true;
        let mut iterations: u64 = 0;
        while changed {
            changed = false;
            iterations += 1;
            if iterations > expected_iterations {
                return Err(FunctionAnalysisError::RecursionNotConverging {
                    iterations: expected_iterations,
                });
            }
            for &func in cycle {
                let Some(decl) = self.tu.function(func) else {
                    continue;
                };
                let analysis =
                    analyze_single_function(self.tu, decl, &self.analyzed, self.options)?;
                let lifetimes = construct_function_lifetimes(decl, analysis, self.reporter)?;
                let unchanged = matches!(
                    self.analyzed.get(&func),
                    Some(Ok(existing)) if is_isomorphic(existing, &lifetimes)
                );
                if !unchanged {
                    self.analyzed.insert(func, Ok(lifetimes));
                    changed = true;
                }
            }
        }
        Ok(())
    }

    /// Constrain a virtual base method by each of its immediate overrides
    fn update_function_lifetimes_with_overrides(
        &mut self,
        func: FuncId,
        overrides: &IndexSet<FuncId>,
    ) -> Result<(), FunctionAnalysisError> {
        if overrides.is_empty() {
            return Ok(());
        }
        let Some(decl) = self.tu.function(func) else {
            return Ok(());
        };
        let Some(base_record) = decl.this_record() else {
            return Ok(());
        };
        let Some(Ok(mut base_lifetimes)) = self.analyzed.get(&func).cloned() else {
            return Ok(());
        };
        debug_assert!(base_lifetimes.is_valid_for_decl(decl));

        for &overriding in overrides {
            let Some(override_decl) = self.tu.function(overriding) else {
                continue;
            };
            if override_decl.num_params() != decl.num_params() {
                return Err(FunctionAnalysisError::OverrideArityMismatch {
                    base: decl.name.clone(),
                    derived: override_decl.name.clone(),
                });
            }
            let Some(Ok(override_lifetimes)) = self.analyzed.get(&overriding) else {
                continue;
            };
            let reshaped = override_lifetimes.for_overridden_method(&self.tu.types, base_record);
            // The override's variables come from a different repository;
            // renumber them past the base's so the widening constraints
            // land on the intended lifetimes.
            let mut next_var = base_lifetimes.max_variable_id().map_or(0, |m| m + 1);
            let reshaped = reshaped.rename_variables(&mut || {
                let var = crate::ast::ids::LifetimeVarId::from_raw(next_var);
                next_var += 1;
                crate::lifetimes::lifetime::Lifetime::Variable(var)
            });
            let widening =
                LifetimeConstraints::for_callable_substitution(&base_lifetimes, &reshaped);
            widening
                .apply_to_function_lifetimes(&mut base_lifetimes)
                .map_err(|error| FunctionAnalysisError::TransferFailure {
                    message: format!(
                        "widening '{}' with override '{}': {}",
                        decl.name, override_decl.name, error
                    ),
                })?;
        }
        self.analyzed.insert(func, Ok(base_lifetimes));
        Ok(())
    }

    /// Mark a cycle if `func` is already on the visit stack
    fn find_and_mark_cycle(&mut self, func: FuncId) -> bool {
        let Some(position) = self
            .visited
            .iter()
            .rposition(|entry| entry.func == func)
        else {
            return false;
        };
        for entry in &mut self.visited[position..] {
            entry.in_cycle = true;
        }
        true
    }

    /// Callee discovery: scan the body, or synthesize for defaulted
    /// functions
    fn get_callees(&self, decl: &FunctionDecl) -> Result<IndexSet<FuncId>, FunctionAnalysisError> {
        if decl.is_pure_virtual() {
            return Ok(IndexSet::new());
        }
        let Some(cfg) = &decl.body else {
            if decl.is_defaulted {
                return self.get_defaulted_callees(decl);
            }
            return Err(FunctionAnalysisError::DeclarationOnly {
                name: decl.name.clone(),
            });
        };

        let callees = std::cell::RefCell::new(IndexSet::new());
        let mut collect = |expr: &crate::ast::Expr| {
            if let ExprKind::Call { callee, .. } = &expr.kind {
                callees.borrow_mut().insert(self.tu.canonical(*callee));
            }
        };

        let mut block_ids: Vec<_> = cfg.blocks.keys().copied().collect();
        block_ids.sort();
        for block_id in block_ids {
            let Some(block) = cfg.block(block_id) else {
                continue;
            };
            for stmt in &block.statements {
                if let Stmt::Construct { ctor, .. } = stmt {
                    callees.borrow_mut().insert(self.tu.canonical(*ctor));
                }
                stmt.walk_exprs(&mut collect);
            }
            match &block.terminator {
                Terminator::Return { value: Some(value) } => value.walk(&mut collect),
                Terminator::Branch { condition, .. } => condition.walk(&mut collect),
                _ => {}
            }
        }
        for init in decl.constructor_inits() {
            init.value.walk(&mut collect);
        }
        Ok(callees.into_inner())
    }

    /// Callees of a defaulted default constructor: the default
    /// constructors of bases and record-typed fields
    fn get_defaulted_callees(
        &self,
        decl: &FunctionDecl,
    ) -> Result<IndexSet<FuncId>, FunctionAnalysisError> {
        let Some(record) = decl.this_record() else {
            return Err(FunctionAnalysisError::DefaultedNotImplemented {
                name: decl.name.clone(),
            });
        };
        if !(decl.is_constructor() && decl.params.is_empty()) {
            return Err(FunctionAnalysisError::DefaultedNotImplemented {
                name: decl.name.clone(),
            });
        }
        let mut callees = IndexSet::new();
        let record_decl = self.tu.types.record(record);
        for &base in &record_decl.bases {
            if let Some(ctor) = default_constructor_of(self.tu, base) {
                callees.insert(self.tu.canonical(ctor));
            }
        }
        for field in &record_decl.fields {
            if let Some(field_record) = self.tu.types.record_of(field.ty) {
                if let Some(ctor) = default_constructor_of(self.tu, field_record) {
                    callees.insert(self.tu.canonical(ctor));
                }
            }
        }
        Ok(callees)
    }
}

/// Lifetimes for a declaration-only function, from external annotations
fn annotation_lifetimes(
    decl: &FunctionDecl,
    annotations: &ExternalAnnotations,
) -> FunctionLifetimesOrError {
    match annotations.lookup(&decl.name) {
        Some(lifetimes) if lifetimes.is_valid_for_decl(decl) => Ok(lifetimes.clone()),
        Some(_) => Err(FunctionAnalysisError::TransferFailure {
            message: format!("annotation for '{}' does not match its signature", decl.name),
        }),
        None => Err(FunctionAnalysisError::DeclarationOnly {
            name: decl.name.clone(),
        }),
    }
}

/// Roots of a method's override chains
///
/// Each method only names its immediate bases, so ancestors are collected
/// recursively; a method with no overridden bases is its own root.
fn collect_base_methods(tu: &TranslationUnit, func: FuncId, roots: &mut IndexSet<FuncId>) {
    let Some(decl) = tu.function(func) else {
        return;
    };
    let overridden: &[FuncId] = decl
        .method_info()
        .map(|info| info.overridden.as_slice())
        .unwrap_or(&[]);
    if overridden.is_empty() {
        roots.insert(func);
        return;
    }
    for &base in overridden {
        collect_base_methods(tu, tu.canonical(base), roots);
    }
}

/// The base-to-overrides map for one translation unit, built once
fn build_base_to_overrides(tu: &TranslationUnit) -> BaseToOverrides {
    let mut map: BaseToOverrides = IndexMap::new();
    for func in tu.definitions() {
        let Some(decl) = tu.canonical_decl(func) else {
            continue;
        };
        let Some(info) = decl.method_info() else {
            continue;
        };
        if !info.is_virtual {
            continue;
        }
        for &base in &info.overridden {
            map.entry(tu.canonical(base))
                .or_default()
                .insert(tu.canonical(func));
        }
    }
    map
}

/// Analyze every function definition of a translation unit
///
/// The definition list may name the same definition more than once; ids
/// are canonicalized at intake, so re-entries are no-ops.
pub fn analyze_translation_unit(
    tu: &TranslationUnit,
    annotations: &ExternalAnnotations,
    reporter: Option<&DiagnosticSink>,
    options: &AnalysisOptions,
) -> IndexMap<FuncId, FunctionLifetimesOrError> {
    let reporter = reporter.unwrap_or(&noop_diagnostic_sink);
    let mut driver = Driver::new(tu, annotations, reporter, options);
    info!(
        "analyzing translation unit with {} function definitions",
        tu.definition_order.len()
    );
    for func in tu.definitions() {
        driver.analyze_function_recursive(func);
    }
    driver.analyzed
}

/// Analyze a single function (and, transitively, its callees)
pub fn analyze_function(
    tu: &TranslationUnit,
    func: FuncId,
    annotations: &ExternalAnnotations,
    options: &AnalysisOptions,
    debug_info: Option<&mut FunctionDebugInfo>,
) -> FunctionLifetimesOrError {
    let mut driver = Driver::new(tu, annotations, &noop_diagnostic_sink, options);
    let canonical = tu.canonical(func);
    driver.analyze_function_recursive(canonical);
    if let Some(out) = debug_info {
        if let Some(info) = driver.debug_info.get(&canonical) {
            *out = info.clone();
        }
    }
    driver
        .analyzed
        .swap_remove(&canonical)
        .unwrap_or(Err(FunctionAnalysisError::DeclarationOnly {
            name: tu
                .function(canonical)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| canonical.to_string()),
        }))
}

/// Analyze a primary translation unit plus a placeholder unit standing in
/// for uninstantiated templates
///
/// The placeholder unit's results are renamed back onto the primary
/// unit's declarations through each function's stable `template_key`;
/// everything else about the placeholder unit is ordinary analysis.
pub fn analyze_translation_unit_with_placeholder(
    tu: &TranslationUnit,
    placeholder_tu: &TranslationUnit,
    annotations: &ExternalAnnotations,
    result_callback: &mut dyn FnMut(FuncId, &FunctionLifetimesOrError),
    reporter: Option<&DiagnosticSink>,
    options: &AnalysisOptions,
) {
    let primary = analyze_translation_unit(tu, annotations, reporter, options);
    let placeholder = analyze_translation_unit(placeholder_tu, annotations, reporter, options);

    for (&func, result) in &primary {
        result_callback(func, result);
    }

    // Remap placeholder results whose template key names a primary
    // declaration.
    for (&placeholder_func, result) in &placeholder {
        let Some(key) = placeholder_tu
            .function(placeholder_func)
            .and_then(|decl| decl.template_key.as_deref())
        else {
            continue;
        };
        let Some((&primary_func, _)) = tu
            .functions
            .iter()
            .find(|(_, decl)| decl.template_key.as_deref() == Some(key))
        else {
            continue;
        };
        if !primary.contains_key(&primary_func) {
            result_callback(primary_func, result);
        }
    }
}
