// verify.rs — Postconditions of shape inference (V1-V4)
//
// Checks what downstream passes rely on after shape inference: every
// shape-inferable op of every stencil program has committed bounds, its
// results carry static shapes equal to `ub - lb`, and declared operand types of
// shaped consumers agree with the values they consume.
//
// Preconditions: shape inference ran without error diagnostics.
// Postconditions: none (read-only).
// Failure modes: none; failed obligations are reported in the certificate.
// Side effects: none.

use crate::ir::{OpKind, Operation, Program, Type};
use crate::pass::StageCert;

/// Machine-checkable evidence for shape inference postconditions (V1-V4).
#[derive(Debug, Clone)]
pub struct ShapeCert {
    /// V1: Every shape-inferable op has bounds.
    pub v1_bounds_finalized: bool,
    /// V2: Every result of those ops is a temp with a static shape.
    pub v2_static_result_types: bool,
    /// V3: Each such result shape equals `ub - lb`.
    pub v3_shape_matches_bounds: bool,
    /// V4: Shaped consumers declare the operand types of the values they read.
    pub v4_operand_types_consistent: bool,
}

impl StageCert for ShapeCert {
    fn all_pass(&self) -> bool {
        self.v1_bounds_finalized
            && self.v2_static_result_types
            && self.v3_shape_matches_bounds
            && self.v4_operand_types_consistent
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("V1_bounds_finalized", self.v1_bounds_finalized),
            ("V2_static_result_types", self.v2_static_result_types),
            ("V3_shape_matches_bounds", self.v3_shape_matches_bounds),
            (
                "V4_operand_types_consistent",
                self.v4_operand_types_consistent,
            ),
        ]
    }
}

/// Verify shape inference postconditions over all stencil programs.
pub fn verify_shapes(program: &Program) -> ShapeCert {
    let top_level: Vec<&Operation> = program
        .functions
        .iter()
        .filter(|f| f.stencil_program)
        .flat_map(|f| f.body.iter().map(|&id| program.op(id)))
        .collect();
    let inferable: Vec<&Operation> = top_level
        .iter()
        .copied()
        .filter(|op| op.is_shape_inferable())
        .collect();

    ShapeCert {
        v1_bounds_finalized: inferable.iter().all(|op| op.bounds().is_some()),
        v2_static_result_types: inferable.iter().all(|op| verify_v2(program, op)),
        v3_shape_matches_bounds: inferable.iter().all(|op| verify_v3(program, op)),
        v4_operand_types_consistent: top_level
            .iter()
            .filter(|op| op.is_shaped())
            .all(|op| verify_v4(program, op)),
    }
}

fn verify_v2(program: &Program, op: &Operation) -> bool {
    op.results.iter().all(|&r| {
        program
            .value_type(r)
            .as_temp()
            .is_some_and(|t| !t.has_dynamic_shape())
    })
}

fn verify_v3(program: &Program, op: &Operation) -> bool {
    let Some(expected) = op.bounds().and_then(|b| b.shape()) else {
        return false;
    };
    op.results.iter().all(|&r| {
        program
            .value_type(r)
            .as_temp()
            .and_then(|t| t.static_shape())
            == Some(expected.as_slice())
    })
}

/// V4: operand types of `op` match the consumed temps; apply body arguments
/// mirror the declared operand types.
fn verify_v4(program: &Program, op: &Operation) -> bool {
    let operands_ok = op
        .operands
        .iter()
        .zip(&op.operand_types)
        .all(|(&v, declared)| match program.value_type(v) {
            actual @ Type::Temp(_) => actual == declared,
            _ => true,
        });
    let args_ok = match (&op.kind, &op.body) {
        (OpKind::Apply { .. }, Some(body)) => body
            .args
            .iter()
            .zip(&op.operand_types)
            .all(|(&arg, declared)| program.value_type(arg) == declared),
        _ => true,
    };
    operands_ok && args_ok
}
