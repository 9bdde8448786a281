//! Lifetime-specific diagnostic builders
//!
//! Helper constructors for the findings the analysis engine reports,
//! so hosts render them with consistent codes and wording.

use crate::{Diagnostic, DiagnosticBuilder, SourceSpan};

/// Common lifetime diagnostic constructors
pub struct LifetimeDiagnostics;

impl LifetimeDiagnostics {
    /// A function's inferred signature would let a reference to one of its
    /// locals escape through the named parameter.
    pub fn returns_local_through_param(span: SourceSpan, param_name: &str) -> Diagnostic {
        DiagnosticBuilder::error(
            format!(
                "function returns reference to a local through parameter '{}'",
                param_name
            ),
            span,
        )
        .code("L0101")
        .label(span, "parameter declared here")
        .build()
    }

    /// A reference to a local escapes through the implicit `this` object.
    pub fn returns_local_through_this(span: SourceSpan) -> Diagnostic {
        DiagnosticBuilder::error("function returns reference to a local through 'this'", span)
            .code("L0102")
            .build()
    }

    /// The return value itself refers to function-local storage.
    pub fn returns_local(span: SourceSpan) -> Diagnostic {
        DiagnosticBuilder::error("function returns reference to a local", span)
            .code("L0103")
            .build()
    }

    /// A pointer of static lifetime was made to point at local storage.
    pub fn static_points_to_local(span: SourceSpan) -> Diagnostic {
        DiagnosticBuilder::error(
            "attempted to make a pointer of static lifetime point at an object of local lifetime",
            span,
        )
        .code("L0104")
        .build()
    }

    /// A recursive call cycle failed to reach a lifetime fixed point.
    pub fn recursion_not_converging(span: SourceSpan, iterations: u64) -> Diagnostic {
        DiagnosticBuilder::error(
            format!(
                "recursive cycle requires more than the expected {} iterations to resolve",
                iterations
            ),
            span,
        )
        .code("L0105")
        .build()
    }
}
