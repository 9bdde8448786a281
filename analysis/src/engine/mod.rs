//! The analysis core
//!
//! Dependency order, leaves first: objects and the points-to map, the
//! lattice over them, the object repository that seeds a function's
//! object graph, the transfer function, the per-function analyzer, and
//! the cross-function driver on top.

use std::fmt;

use diagnostics::Severity;

use crate::ast::ids::collections::IdMap;
use crate::ast::{FuncId, SourceLocation};
use crate::lifetimes::function_lifetimes::FunctionLifetimes;

pub mod analyzer;
pub mod driver;
pub mod lattice;
pub mod object;
pub mod object_repository;
pub mod points_to_map;
pub mod transfer;

#[cfg(test)]
mod analyzer_test;

/// Callback through which user-facing findings are reported
pub type DiagnosticSink = dyn Fn(SourceLocation, &str, Severity);

/// Convenience alias used by the driver's public signatures
pub type DiagnosticReporter<'a> = &'a DiagnosticSink;

/// Sink that discards every finding
pub fn noop_diagnostic_sink(_: SourceLocation, _: &str, _: Severity) {}

/// Tuning knobs for the engine
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Per-function worklist bound: `blocks * factor` block visits
    pub block_visit_factor: usize,
    /// Capture per-function debug snapshots (repository and points-to
    /// dumps) alongside results
    pub record_debug_info: bool,
    /// Guard against runaway constraint generation
    pub max_constraints: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            block_visit_factor: 64,
            record_debug_info: false,
            max_constraints: 100_000,
        }
    }
}

/// Debug snapshot of one function's analysis
#[derive(Debug, Clone, Default)]
pub struct FunctionDebugInfo {
    pub object_repository: String,
    pub points_to_map: String,
}

/// Debug snapshots per function
pub type FunctionDebugInfoMap = IdMap<FuncId, FunctionDebugInfo>;

/// Why a function could not be given a lifetime signature
///
/// Errors are first-class values in the analysis cache; they do not
/// unwind the driver, and every member of a failed recursive cycle
/// carries the same error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionAnalysisError {
    /// A pointer of static lifetime was made to point at local storage
    StaticPointsToLocal,
    ReturnsLocalThroughParam { param: String },
    ReturnsLocalThroughThis,
    ReturnsLocalAsReturn,
    RecursionNotConverging { iterations: u64 },
    /// No body and no external annotation
    DeclarationOnly { name: String },
    /// Unsupported kind of defaulted function
    DefaultedNotImplemented { name: String },
    OverrideArityMismatch { base: String, derived: String },
    /// Wraps lower-level AST/CFG/transfer failures
    TransferFailure { message: String },
}

impl fmt::Display for FunctionAnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionAnalysisError::StaticPointsToLocal => write!(
                f,
                "attempted to make a pointer of static lifetime point at an object of local lifetime"
            ),
            FunctionAnalysisError::ReturnsLocalThroughParam { param } => write!(
                f,
                "function returns reference to a local through parameter '{}'",
                param
            ),
            FunctionAnalysisError::ReturnsLocalThroughThis => {
                write!(f, "function returns reference to a local through 'this'")
            }
            FunctionAnalysisError::ReturnsLocalAsReturn => {
                write!(f, "function returns reference to a local")
            }
            FunctionAnalysisError::RecursionNotConverging { iterations } => write!(
                f,
                "recursive cycle requires more than the expected {} iterations to resolve",
                iterations
            ),
            FunctionAnalysisError::DeclarationOnly { name } => {
                write!(f, "'{}' is declaration-only and carries no annotations", name)
            }
            FunctionAnalysisError::DefaultedNotImplemented { name } => {
                write!(f, "unsupported kind of defaulted function: '{}'", name)
            }
            FunctionAnalysisError::OverrideArityMismatch { base, derived } => write!(
                f,
                "parameter count mismatch between '{}' and its override '{}'",
                base, derived
            ),
            FunctionAnalysisError::TransferFailure { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for FunctionAnalysisError {}

/// A cached per-function result
pub type FunctionLifetimesOrError = Result<FunctionLifetimes, FunctionAnalysisError>;
