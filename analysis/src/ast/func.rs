//! Function declarations and the translation unit
//!
//! A [`FunctionDecl`] carries everything the driver and the per-function
//! analyzer need: canonical identity, parameters with types, the `this`
//! record for methods, the optional body CFG, virtual status with the
//! overridden-method list, the defaulted flag, and constructor
//! member-initializers.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ast::expr::MemberInit;
use crate::ast::ids::collections::IdMap;
use crate::ast::ids::{FuncId, RecordId, TypeId, VarId};
use crate::ast::SourceLocation;
use crate::cfg::ControlFlowGraph;
use crate::lifetimes::function_lifetimes::FunctionLifetimes;

/// A declared parameter
#[derive(Debug, Clone)]
pub struct Param {
    pub var: VarId,
    pub name: String,
    pub ty: TypeId,
    pub loc: SourceLocation,
}

/// A local variable declaration
#[derive(Debug, Clone)]
pub struct VarDecl {
    pub id: VarId,
    pub name: String,
    pub ty: TypeId,
    pub loc: SourceLocation,
}

/// Method-specific attributes
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub record: RecordId,
    pub is_virtual: bool,
    pub is_pure_virtual: bool,
    pub is_static: bool,
    /// Immediate overridden base methods (canonical ids)
    pub overridden: Vec<FuncId>,
}

/// What kind of callable a declaration is
#[derive(Debug, Clone)]
pub enum FunctionKind {
    Free,
    Method(MethodInfo),
    Constructor {
        record: RecordId,
        inits: Vec<MemberInit>,
    },
}

/// A function declaration as consumed by the analysis
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub id: FuncId,
    /// Canonical identity; re-declarations share one canonical id
    pub canonical: FuncId,
    pub name: String,
    pub params: Vec<Param>,
    pub locals: IdMap<VarId, VarDecl>,
    pub return_ty: TypeId,
    pub kind: FunctionKind,
    /// Compiler-synthesized (`= default`)
    pub is_defaulted: bool,
    /// Compiler built-in; never analyzed
    pub is_builtin: bool,
    pub body: Option<ControlFlowGraph>,
    pub loc: SourceLocation,
    /// Stable key linking placeholder instantiations back to their
    /// uninstantiated template (see the placeholder-TU entry point)
    pub template_key: Option<String>,
}

impl FunctionDecl {
    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    pub fn method_info(&self) -> Option<&MethodInfo> {
        match &self.kind {
            FunctionKind::Method(info) => Some(info),
            _ => None,
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.method_info().is_some_and(|m| m.is_virtual)
    }

    pub fn is_pure_virtual(&self) -> bool {
        self.method_info().is_some_and(|m| m.is_pure_virtual)
    }

    pub fn is_constructor(&self) -> bool {
        matches!(self.kind, FunctionKind::Constructor { .. })
    }

    /// The record whose instances `this` points at, if any
    pub fn this_record(&self) -> Option<RecordId> {
        match &self.kind {
            FunctionKind::Free => None,
            FunctionKind::Method(info) => (!info.is_static).then_some(info.record),
            FunctionKind::Constructor { record, .. } => Some(*record),
        }
    }

    pub fn constructor_inits(&self) -> &[MemberInit] {
        match &self.kind {
            FunctionKind::Constructor { inits, .. } => inits,
            _ => &[],
        }
    }

    /// Whether this declaration has anything to analyze
    pub fn has_definition(&self) -> bool {
        self.body.is_some() || self.is_defaulted
    }

    pub fn param(&self, index: usize) -> &Param {
        &self.params[index]
    }

    pub fn local(&self, var: VarId) -> Option<&VarDecl> {
        self.locals.get(&var)
    }

    /// The declared type of a parameter or local
    pub fn var_type(&self, var: VarId) -> Option<TypeId> {
        self.params
            .iter()
            .find(|p| p.var == var)
            .map(|p| p.ty)
            .or_else(|| self.locals.get(&var).map(|l| l.ty))
    }

    pub fn var_name(&self, var: VarId) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.var == var)
            .map(|p| p.name.as_str())
            .or_else(|| self.locals.get(&var).map(|l| l.name.as_str()))
    }
}

/// Everything the engine sees of one translation unit
///
/// `definition_order` lists function definitions in source order and may
/// contain the same definition more than once; the driver canonicalizes
/// at intake. Static storage (globals and function-scope statics, which
/// frontends lower to globals) lives in `globals`.
#[derive(Debug, Default)]
pub struct TranslationUnit {
    pub types: crate::ast::types::TypeArena,
    pub functions: IndexMap<FuncId, FunctionDecl>,
    pub definition_order: Vec<FuncId>,
    pub globals: IdMap<VarId, VarDecl>,
    /// Interned `TypeId` of each registered record
    pub record_types: IdMap<RecordId, TypeId>,
}

impl TranslationUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&self, id: FuncId) -> Option<&FunctionDecl> {
        self.functions.get(&id)
    }

    /// Resolve an id to its canonical declaration id
    pub fn canonical(&self, id: FuncId) -> FuncId {
        self.functions.get(&id).map(|f| f.canonical).unwrap_or(id)
    }

    /// The canonical declaration for an id
    pub fn canonical_decl(&self, id: FuncId) -> Option<&FunctionDecl> {
        let canonical = self.canonical(id);
        self.functions.get(&canonical)
    }

    /// Function definitions in source order, canonicalized, duplicates kept
    pub fn definitions(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.definition_order.iter().map(|&id| self.canonical(id))
    }
}

/// Lifetimes supplied from source annotations for declaration-only
/// functions, keyed by function name
///
/// Serializable so hosts can ship annotation tables as sidecar JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalAnnotations {
    annotations: HashMap<String, FunctionLifetimes>,
}

impl ExternalAnnotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, lifetimes: FunctionLifetimes) {
        self.annotations.insert(name.into(), lifetimes);
    }

    pub fn lookup(&self, name: &str) -> Option<&FunctionLifetimes> {
        self.annotations.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }
}
