//! The symbolic lifetime tag

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::ids::{IdGenerator, LifetimeVarId};

/// A symbolic lifetime
///
/// `Static` and `Local` are the two distinguished constants: every
/// lifetime is outlived by `Static` and outlives `Local`. `Variable`
/// lifetimes are fresh symbols related to each other only through the
/// constraint set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Lifetime {
    Static,
    Local,
    Variable(LifetimeVarId),
}

impl Lifetime {
    pub fn is_static(self) -> bool {
        self == Lifetime::Static
    }

    pub fn is_local(self) -> bool {
        self == Lifetime::Local
    }

    pub fn is_variable(self) -> bool {
        matches!(self, Lifetime::Variable(_))
    }

    pub fn as_variable(self) -> Option<LifetimeVarId> {
        match self {
            Lifetime::Variable(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifetime::Static => write!(f, "'static"),
            Lifetime::Local => write!(f, "'local"),
            Lifetime::Variable(v) => write!(f, "{}", v),
        }
    }
}

/// Mints fresh lifetime variables
///
/// One factory per object repository; ids are never reused, so two
/// distinct variables never compare equal.
#[derive(Debug, Default)]
pub struct LifetimeFactory {
    vars: IdGenerator<LifetimeVarId>,
}

impl LifetimeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&self) -> Lifetime {
        Lifetime::Variable(self.vars.mint())
    }

    pub fn minted(&self) -> u32 {
        self.vars.minted()
    }
}
