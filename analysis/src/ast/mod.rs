//! The syntax-tree interface consumed by the analysis
//!
//! Parsing is outside this crate: a frontend (or the [`build`] module, for
//! hosts and tests that assemble programs programmatically) produces a
//! [`TranslationUnit`] of typed declarations and per-function control-flow
//! graphs, and the engine only reads them.

use std::fmt;

pub mod build;
pub mod expr;
pub mod func;
pub mod ids;
pub mod types;

pub use expr::{BinOp, Expr, ExprKind, MemberInit, Stmt};
pub use func::{
    ExternalAnnotations, FunctionDecl, FunctionKind, MethodInfo, Param, TranslationUnit, VarDecl,
};
pub use ids::{
    BlockId, ExprId, FieldId, FuncId, IdGenerator, LifetimeVarId, ObjectId, RecordId, TypeId,
    VarId,
};
pub use types::{FieldDecl, RecordDecl, TypeArena, TypeKind};

/// A position in the analyzed source
///
/// Kept separate from `source_map::SourceSpan`: locations here come from
/// the frontend and may be unresolved; hosts convert them to spans when
/// rendering diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceLocation {
    pub file_id: u32,
    /// 1-based
    pub line: u32,
    /// 1-based
    pub column: u32,
    pub byte_offset: u32,
}

impl SourceLocation {
    pub const fn new(file_id: u32, line: u32, column: u32, byte_offset: u32) -> Self {
        Self {
            file_id,
            line,
            column,
            byte_offset,
        }
    }

    pub const fn unknown() -> Self {
        Self::new(u32::MAX, 0, 0, 0)
    }

    pub const fn is_valid(self) -> bool {
        self.file_id != u32::MAX
    }

    /// Resolve this location to a zero-width span for diagnostics
    pub fn to_span(self, sources: &source_map::SourceMap) -> Option<source_map::SourceSpan> {
        if !self.is_valid() {
            return None;
        }
        let file_id = source_map::FileId::new(self.file_id);
        let file = sources.file(file_id)?;
        Some(source_map::SourceSpan::point(
            file_id,
            file.position_of(self.byte_offset),
        ))
    }
}

impl Default for SourceLocation {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}:{}:{}", self.file_id, self.line, self.column)
        } else {
            write!(f, "<unknown>")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_resolves_to_span() {
        let mut sources = source_map::SourceMap::new();
        let file = sources.add_file("t.cc", "int* f();\n");
        let loc = SourceLocation::new(file.as_u32(), 1, 6, 5);
        let span = loc.to_span(&sources).unwrap();
        assert_eq!(span.start.line, 1);
        assert_eq!(span.start.column, 6);

        assert!(SourceLocation::unknown().to_span(&sources).is_none());
        assert_eq!(SourceLocation::unknown().to_string(), "<unknown>");
    }
}
