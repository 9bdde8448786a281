//! Lifetime primitives
//!
//! A lifetime is a symbolic tag: `'static`, `'local`, or a fresh variable.
//! Lifetimes carry no duration; everything the analysis knows about them
//! lives in the constraint set. The tree types in [`type_lifetimes`]
//! mirror the shape of a declared type (one lifetime per reference layer
//! plus record lifetime arguments), and [`function_lifetimes`] assembles
//! those trees into a function signature.

pub mod constraints;
pub mod function_lifetimes;
pub mod lifetime;
pub mod substitutions;
pub mod type_lifetimes;

pub use constraints::{is_isomorphic, ConstraintApplicationError, LifetimeConstraints};
pub use function_lifetimes::FunctionLifetimes;
pub use lifetime::{Lifetime, LifetimeFactory};
pub use substitutions::LifetimeSubstitutions;
pub use type_lifetimes::{ObjectLifetimes, ValueLifetimes, Variance};
