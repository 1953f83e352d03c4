// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's shape passes, their dependency edges, and the
// artifacts they produce. Used by the pipeline runner to compute minimal pass
// subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (program loading is outside the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    ExtentAnalysis,
    ShapeInference,
    VerifyShapes,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Extents,   // AccessExtents
    Shapes,    // ShapeSummary (bounds/types committed in the program)
    ShapeCert, // ShapeCert
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::ExtentAnalysis => PassDescriptor {
            name: "extent_analysis",
            inputs: &[],
            outputs: &[ArtifactId::Extents],
            invariants: "every accessed (apply, operand) pair has a min/max offset box",
        },
        PassId::ShapeInference => PassDescriptor {
            name: "shape_inference",
            inputs: &[PassId::ExtentAnalysis],
            outputs: &[ArtifactId::Shapes],
            invariants: "loads/applies bounded, result types static, operand types in sync",
        },
        PassId::VerifyShapes => PassDescriptor {
            name: "verify_shapes",
            inputs: &[PassId::ShapeInference],
            outputs: &[ArtifactId::ShapeCert],
            invariants: "V1-V4 obligations hold",
        },
    }
}

// ── Stage certificates ─────────────────────────────────────────────────────

/// Machine-checkable evidence that a pass met its postconditions.
pub trait StageCert {
    /// True if every obligation holds.
    fn all_pass(&self) -> bool;
    /// Named obligations with their outcome, in a stable order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 3] = [
    PassId::ExtentAnalysis,
    PassId::ShapeInference,
    PassId::VerifyShapes,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
