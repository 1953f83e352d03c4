// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler phases.
// Diagnostics are located on IR operations (function + op), not source text:
// the passes run on an in-memory program.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::id::OpId;
use crate::index::IndexError;
use crate::ir::Program;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // E00xx: program loading
    pub const E0001: DiagCode = DiagCode("E0001"); // undefined value name
    pub const E0002: DiagCode = DiagCode("E0002"); // value name defined twice
    pub const E0003: DiagCode = DiagCode("E0003"); // malformed operation

    // E01xx: shape inference
    pub const E0100: DiagCode = DiagCode("E0100"); // uses disagree in rank
    pub const E0101: DiagCode = DiagCode("E0101"); // no use bounds the value
    pub const E0102: DiagCode = DiagCode("E0102"); // shape dimension < 1
    pub const E0103: DiagCode = DiagCode("E0103"); // bounds already finalized
    pub const E0104: DiagCode = DiagCode("E0104"); // bound or extent overflows i64

    // E06xx: post-pass verification
    pub const E0600: DiagCode = DiagCode("E0600");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Location ─────────────────────────────────────────────────────────────

/// Where a diagnostic points: a function, and optionally one of its ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub func: String,
    pub op: Option<(OpId, &'static str)>,
}

impl Location {
    pub fn func(name: &str) -> Self {
        Location {
            func: name.to_string(),
            op: None,
        }
    }

    pub fn op(program: &Program, func: &str, op: OpId) -> Self {
        Location {
            func: func.to_string(),
            op: Some((op, program.op(op).name())),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Some((id, name)) => write!(f, "@{}, op {} ({})", self.func, id, name),
            None => write!(f, "@{}", self.func),
        }
    }
}

// ── Related location ─────────────────────────────────────────────────────

/// A secondary location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedLocation {
    pub location: Location,
    pub label: String,
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining a propagated constraint failure.
#[derive(Debug, Clone)]
pub struct CauseRecord {
    pub message: String,
    pub location: Option<Location>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub location: Location,
    pub message: String,
    pub hint: Option<String>,
    pub related: Vec<RelatedLocation>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, related locations, or causes.
    pub fn new(level: DiagLevel, location: Location, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            location,
            message: message.into(),
            hint: None,
            related: Vec::new(),
            cause_chain: Vec::new(),
        }
    }

    /// Shorthand for an error-level diagnostic carrying `code`.
    pub fn error(code: DiagCode, location: Location, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, location, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related location.
    pub fn with_related(mut self, location: Location, label: impl Into<String>) -> Self {
        self.related.push(RelatedLocation {
            location,
            label: label.into(),
        });
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, location: Option<Location>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            location,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

/// Error for failed index arithmetic: rank mismatch is E0100, overflow E0104.
pub fn index_error(err: IndexError, location: Location, context: &str) -> Diagnostic {
    let code = match err {
        IndexError::RankMismatch { .. } => codes::E0100,
        IndexError::Overflow => codes::E0104,
    };
    Diagnostic::error(code, location, format!("{}: {}", context, err))
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        write!(f, "\n  --> {}", self.location)?;
        for related in &self.related {
            write!(f, "\n  note: {} ({})", related.label, related.location)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn here() -> Location {
        Location::func("laplace")
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, here(), "something failed");
        assert_eq!(format!("{d}"), "error: something failed\n  --> @laplace");
    }

    #[test]
    fn display_with_code_and_op() {
        let loc = Location {
            func: "laplace".to_string(),
            op: Some((OpId(4), "stencil.apply")),
        };
        let d = Diagnostic::error(codes::E0102, loc, "expected shape to have non-zero entries");
        assert_eq!(
            format!("{d}"),
            "error[E0102]: expected shape to have non-zero entries\n  --> @laplace, op #4 (stencil.apply)"
        );
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::new(DiagLevel::Warning, here(), "rank mismatch")
            .with_code(codes::E0100)
            .with_hint("make every consumer iterate over the same rank")
            .with_related(here(), "producer here")
            .with_cause("widened by access extent", Some(here()));

        assert_eq!(d.code, Some(codes::E0100));
        assert_eq!(
            d.hint.as_deref(),
            Some("make every consumer iterate over the same rank")
        );
        assert_eq!(d.related.len(), 1);
        assert_eq!(d.cause_chain.len(), 1);
        assert!(!d.is_error());
    }
}
