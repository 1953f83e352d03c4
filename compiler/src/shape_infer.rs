// shape_infer.rs — Shape inference for stencil programs
//
// Walks the entry block of every stencil-program function in reverse program
// order. For each shape-inferable op (load, apply) it folds the bounds of all
// shaped consumers of its results, widened by the consumers' access extents,
// into one iteration domain, commits it, and retypes the results (and the
// consumers' declared operand types) with the concrete shape `ub - lb`.
//
// Consumers precede producers in reverse order, so every consumer's bounds are
// final when its producer is visited; a single pass suffices.
//
// Preconditions: `extents` was computed on this program before any op is
//   inferred; results of shape-inferable ops have dynamic temp types.
// Postconditions: on success every shape-inferable op of every stencil program
//   has bounds and static result types; operand types of shaped consumers match.
// Failure modes: rank mismatch between uses (E0100), no bounding use (E0101),
//   shape dimension < 1 (E0102), bounds already committed (E0103), widened
//   bounds or shape overflowing i64 (E0104). The first error stops the pass;
//   ops finalized before it keep their bounds.
// Side effects: mutates bounds and types in `program`.

use crate::diag::{codes, index_error, Diagnostic, Location};
use crate::extent::AccessExtents;
use crate::id::OpId;
use crate::index::{self, format_index, Index, IndexError};
use crate::ir::{Bounds, Program, TempType, Type, Use};

// ── Public types ────────────────────────────────────────────────────────────

/// Bounds and shape committed for one op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferredShape {
    pub func: String,
    pub op: OpId,
    pub bounds: Bounds,
    pub shape: Index,
}

#[derive(Debug, Clone, Default)]
pub struct ShapeSummary {
    /// Committed shapes in the order they were inferred (reverse program order).
    pub inferred: Vec<InferredShape>,
    /// Functions left untouched because they are not stencil programs.
    pub skipped_functions: Vec<String>,
}

#[derive(Debug)]
pub struct ShapeInferResult {
    pub summary: ShapeSummary,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Infer shapes for every stencil-program function of `program`.
pub fn infer_shapes(program: &mut Program, extents: &AccessExtents) -> ShapeInferResult {
    let mut summary = ShapeSummary::default();
    let mut diagnostics = Vec::new();
    for func in 0..program.functions.len() {
        if !program.functions[func].stencil_program {
            summary
                .skipped_functions
                .push(program.functions[func].name.clone());
            continue;
        }
        if let Err(diag) = infer_function(program, func, extents, &mut summary.inferred) {
            diagnostics.push(diag);
            break;
        }
    }
    ShapeInferResult {
        summary,
        diagnostics,
    }
}

/// Infer shapes for one function, appending committed shapes to `out`.
pub fn infer_function(
    program: &mut Program,
    func: usize,
    extents: &AccessExtents,
    out: &mut Vec<InferredShape>,
) -> Result<(), Diagnostic> {
    let name = program.functions[func].name.clone();
    let body = program.functions[func].body.clone();
    for &op in body.iter().rev() {
        if program.op(op).is_shape_inferable() {
            out.push(infer_op(program, &name, op, extents)?);
        }
    }
    Ok(())
}

// ── Per-op inference ────────────────────────────────────────────────────────

fn infer_op(
    program: &mut Program,
    func: &str,
    op: OpId,
    extents: &AccessExtents,
) -> Result<InferredShape, Diagnostic> {
    let mut lower = Index::new();
    let mut upper = Index::new();
    let results = program.op(op).results.clone();
    for &result in &results {
        for &use_ in program.uses(result) {
            extend_bounds(program, func, op, use_, extents, &mut lower, &mut upper)?;
        }
    }

    let here = Location::op(program, func, op);
    let shape = index::sub(&upper, &lower).map_err(|err| {
        let context = format!(
            "cannot derive a shape from bounds {} to {}",
            format_index(&lower),
            format_index(&upper)
        );
        index_error(err, here.clone(), &context)
    })?;
    if shape.is_empty() {
        return Err(Diagnostic::error(
            codes::E0101,
            here,
            "expected shape to have non-zero size",
        )
        .with_hint("no shaped operation consumes the results of this operation"));
    }
    if shape.iter().any(|&size| size < 1) {
        return Err(Diagnostic::error(
            codes::E0102,
            here,
            "expected shape to have non-zero entries",
        )
        .with_hint(format!(
            "bounds {} to {} give shape {}",
            format_index(&lower),
            format_index(&upper),
            format_index(&shape)
        )));
    }

    let bounds = Bounds::new(lower, upper);
    program
        .finalize_shape(op, bounds.clone())
        .map_err(|e| Diagnostic::error(codes::E0103, here.clone(), e.to_string()))?;

    for &result in &results {
        let element = match program.value_type(result).as_temp() {
            Some(temp) => {
                debug_assert!(
                    temp.has_dynamic_shape(),
                    "expected result types to have dynamic shape"
                );
                temp.element
            }
            None => continue,
        };
        let ty = Type::Temp(TempType::with_shape(element, shape.clone()));
        program.set_result_type(result, ty.clone());
        let uses = program.uses(result).to_vec();
        for use_ in uses {
            if program.op(use_.user).is_shaped() {
                program.set_operand_type(use_.user, use_.operand, ty.clone());
            }
        }
    }

    Ok(InferredShape {
        func: func.to_string(),
        op,
        bounds,
        shape,
    })
}

/// Fold the bounds one use imposes on `producer` into `lower` / `upper`.
/// Uses by ops without bounds (or with undetermined bounds) impose nothing.
fn extend_bounds(
    program: &Program,
    func: &str,
    producer: OpId,
    use_: Use,
    extents: &AccessExtents,
    lower: &mut Index,
    upper: &mut Index,
) -> Result<(), Diagnostic> {
    let user = program.op(use_.user);
    let Some(bounds) = user.bounds() else {
        return Ok(());
    };
    let value = user.operands[use_.operand];

    let rank_mismatch = |message: String| {
        Diagnostic::error(codes::E0100, Location::op(program, func, user.id), message)
            .with_related(
                Location::op(program, func, producer),
                "while inferring bounds for this operation",
            )
    };

    let widen = |base: &[i64], by: &[i64]| {
        index::add(base, by).map_err(|err| match err {
            IndexError::RankMismatch { .. } => rank_mismatch(format!(
                "access extent of operand {} ({}) does not match the rank of the operation",
                use_.operand, value
            )),
            IndexError::Overflow => Diagnostic::error(
                codes::E0104,
                Location::op(program, func, user.id),
                format!(
                    "widening {} by extent {} of operand {} ({}) overflows i64",
                    format_index(base),
                    format_index(by),
                    use_.operand,
                    value
                ),
            )
            .with_related(
                Location::op(program, func, producer),
                "while inferring bounds for this operation",
            ),
        })
    };

    let (lb, ub) = match extents.lookup(user.id, value) {
        Some(extent) => (
            widen(&bounds.lb, &extent.negative)?,
            widen(&bounds.ub, &extent.positive)?,
        ),
        None => (bounds.lb.clone(), bounds.ub.clone()),
    };

    if lower.is_empty() && upper.is_empty() {
        *lower = lb;
        *upper = ub;
        return Ok(());
    }

    let rank = user.rank();
    let merged = if lower.len() == rank && upper.len() == rank {
        index::min(lower.as_slice(), &lb)
            .and_then(|l| Ok((l, index::max(upper.as_slice(), &ub)?)))
            .ok()
    } else {
        None
    };
    match merged {
        Some((l, u)) => {
            *lower = l;
            *upper = u;
            Ok(())
        }
        None => Err(rank_mismatch(format!(
            "expected operations to have the same rank (operand {} ({}) is used at rank {}, earlier uses at rank {})",
            use_.operand,
            value,
            rank,
            lower.len()
        ))),
    }
}
