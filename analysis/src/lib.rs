//! Static lifetime inference for C-family translation units
//!
//! Given an already-parsed syntax tree and per-function control-flow
//! graphs, this crate infers, for every parameter, the implicit `this`,
//! and the return value of each function, a set of symbolic lifetimes and
//! a partial order among them such that no reference reachable from an
//! output outlives any of the inputs it may alias.
//!
//! Architecture:
//! ```,ignore
//! AST + CFG → ObjectRepository → dataflow over (PointsToMap, Constraints)
//!           → signature reconstruction → cross-function driver → results
//! ```
//!
//! The driver walks the call graph leaves-first, iterates recursive cycles
//! to a fixed point, and widens virtual base methods with their overrides.
//! Results are cached per canonical function; one function's failure never
//! aborts the translation-unit traversal.

pub mod ast;
pub mod cfg;
pub mod engine;
pub mod lifetimes;
pub mod logging;

pub use engine::driver::{
    analyze_function, analyze_translation_unit, analyze_translation_unit_with_placeholder,
};
pub use engine::{AnalysisOptions, DiagnosticReporter, FunctionAnalysisError};
pub use lifetimes::function_lifetimes::FunctionLifetimes;
