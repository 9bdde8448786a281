//! Typed identifiers used throughout the analysis
//!
//! Each id type is a lightweight wrapper around `u32` so that function,
//! type, object, and lifetime identifiers cannot be mixed up. Identity is
//! stable for the lifetime of the structure that minted it; ids are never
//! recycled.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Shared behavior of all id types
pub trait IdType: Copy + Clone + PartialEq + Eq + std::hash::Hash + fmt::Debug {
    fn from_raw(raw: u32) -> Self;
    fn as_raw(self) -> u32;
    fn is_valid(self) -> bool;
    fn invalid() -> Self;
}

macro_rules! define_id_type {
    (
        $(#[$meta:meta])*
        $name:ident, $prefix:literal
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(u32);

        impl $name {
            /// Create an id from a raw u32 value
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            /// The raw u32 value of this id
            pub const fn as_raw(self) -> u32 {
                self.0
            }

            /// `u32::MAX` is reserved as the invalid sentinel
            pub const fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }

            pub const fn invalid() -> Self {
                Self(u32::MAX)
            }
        }

        impl IdType for $name {
            fn from_raw(raw: u32) -> Self {
                Self::from_raw(raw)
            }

            fn as_raw(self) -> u32 {
                self.as_raw()
            }

            fn is_valid(self) -> bool {
                self.is_valid()
            }

            fn invalid() -> Self {
                Self::invalid()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}{}", $prefix, self.0)
                } else {
                    write!(f, "{}<invalid>", $prefix)
                }
            }
        }
    };
}

define_id_type! {
    /// Canonical identity of a function declaration
    FuncId, "fn"
}

define_id_type! {
    /// A type held in the [`TypeArena`](crate::ast::types::TypeArena)
    TypeId, "ty"
}

define_id_type! {
    /// A record (class/struct) declaration
    RecordId, "rec"
}

define_id_type! {
    /// A field within a record
    FieldId, "fld"
}

define_id_type! {
    /// A parameter or local variable within a function
    VarId, "var"
}

define_id_type! {
    /// A typed expression node
    ExprId, "ex"
}

define_id_type! {
    /// A basic block in a control-flow graph
    BlockId, "bb"
}

define_id_type! {
    /// An abstract memory cell minted by the object repository
    ObjectId, "obj"
}

define_id_type! {
    /// A lifetime variable
    LifetimeVarId, "'v"
}

/// Monotone generator for one id type
///
/// Thread-safe; panics on exhaustion rather than recycling the invalid
/// sentinel.
#[derive(Debug)]
pub struct IdGenerator<T: IdType> {
    next: std::sync::atomic::AtomicU32,
    _marker: std::marker::PhantomData<T>,
}

impl<T: IdType> Default for IdGenerator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: IdType> IdGenerator<T> {
    pub const fn new() -> Self {
        Self {
            next: std::sync::atomic::AtomicU32::new(0),
            _marker: std::marker::PhantomData,
        }
    }

    pub const fn starting_at(first: u32) -> Self {
        Self {
            next: std::sync::atomic::AtomicU32::new(first),
            _marker: std::marker::PhantomData,
        }
    }

    /// Mint the next id
    pub fn mint(&self) -> T {
        let raw = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if raw == u32::MAX {
            panic!(
                "id generator exhausted for {}",
                std::any::type_name::<T>()
            );
        }
        T::from_raw(raw)
    }

    /// Number of ids minted so far
    pub fn minted(&self) -> u32 {
        self.next.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Convenience aliases for id-keyed collections
pub mod collections {
    use std::collections::{HashMap, HashSet};

    /// Hash map keyed by an id type
    pub type IdMap<K, V> = HashMap<K, V>;

    /// Hash set of ids
    pub type IdSet<T> = HashSet<T>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip_and_sentinel() {
        let id = FuncId::from_raw(7);
        assert_eq!(id.as_raw(), 7);
        assert!(id.is_valid());
        assert!(!FuncId::invalid().is_valid());
        assert_ne!(id, FuncId::from_raw(8));
    }

    #[test]
    fn generator_is_monotone() {
        let generator: IdGenerator<ObjectId> = IdGenerator::new();
        let a = generator.mint();
        let b = generator.mint();
        assert_ne!(a, b);
        assert!(a < b);
        assert_eq!(generator.minted(), 2);
    }

    #[test]
    fn display_includes_prefix() {
        assert_eq!(BlockId::from_raw(3).to_string(), "bb3");
        assert_eq!(LifetimeVarId::from_raw(0).to_string(), "'v0");
        assert_eq!(FuncId::invalid().to_string(), "fn<invalid>");
    }
}
