// extent.rs — Access extent analysis for stencil apply operations
//
// For every apply op, computes per operand the bounding box of all offsets at
// which the operand is read inside the apply body. Body argument `i` stands for
// operand `i`; accesses are attributed to the operand value, so an operand
// passed twice accumulates the accesses of both arguments.
//
// Preconditions: apply bodies end with a return.
// Postconditions: the map is complete and immutable once `analyze` returns.
// Failure modes: an access or unroll whose rank differs from the operand's
//   earlier accesses (E0100), or offset arithmetic overflowing i64 (E0104).
//   The loader rejects mismatched ranks up front.
// Side effects: none.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::diag::{index_error, Diagnostic, Location};
use crate::id::{OpId, ValueId};
use crate::index::{self, Index, IndexError};
use crate::ir::{Function, OpKind, Operation, Program};

/// Most negative and most positive offset observed per dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extent {
    pub negative: Index,
    pub positive: Index,
}

impl Extent {
    /// Extent of a single access: both ends at `offset`.
    pub fn at(offset: &[i64]) -> Self {
        Extent {
            negative: offset.to_vec(),
            positive: offset.to_vec(),
        }
    }

    /// Widen to cover `offset`. Left unchanged on error.
    pub fn include(&mut self, offset: &[i64]) -> Result<(), IndexError> {
        let negative = index::min(&self.negative, offset)?;
        let positive = index::max(&self.positive, offset)?;
        self.negative = negative;
        self.positive = positive;
        Ok(())
    }

    /// Remove the replication width of an unrolled body from the positive end.
    fn adjust_for_unroll(&mut self, unroll: &[i64]) -> Result<(), IndexError> {
        self.positive = index::unroll_adjust(&self.positive, unroll)?;
        Ok(())
    }
}

/// Extent map keyed by (apply op, operand value).
#[derive(Debug, Default, Clone)]
pub struct AccessExtents {
    extents: HashMap<OpId, HashMap<ValueId, Extent>>,
}

impl AccessExtents {
    /// Analyse every stencil-program function of `program`. Stops at the
    /// first access that cannot be folded.
    pub fn analyze(program: &Program) -> Result<Self, Diagnostic> {
        let mut extents = AccessExtents::default();
        for func in program.functions.iter().filter(|f| f.stencil_program) {
            extents.record_function(program, func)?;
        }
        Ok(extents)
    }

    fn record_function(&mut self, program: &Program, func: &Function) -> Result<(), Diagnostic> {
        let mut failure = None;
        program.walk(&func.body, &mut |op: &Operation| {
            if failure.is_none() && matches!(op.kind, OpKind::Apply { .. }) {
                failure = self.record_apply(program, &func.name, op).err();
            }
        });
        failure.map_or(Ok(()), Err)
    }

    fn record_apply(
        &mut self,
        program: &Program,
        func_name: &str,
        apply: &Operation,
    ) -> Result<(), Diagnostic> {
        let Some(body) = &apply.body else {
            return Ok(());
        };
        let arg_to_operand: HashMap<ValueId, ValueId> = body
            .args
            .iter()
            .copied()
            .zip(apply.operands.iter().copied())
            .collect();

        let mut per_operand: HashMap<ValueId, Extent> = HashMap::new();
        let mut failure = None;
        program.walk(&body.ops, &mut |op: &Operation| {
            let OpKind::Access { offset } = &op.kind else {
                return;
            };
            if failure.is_some() {
                return;
            }
            let Some(&operand) = op.operands.first().and_then(|a| arg_to_operand.get(a)) else {
                return;
            };
            match per_operand.entry(operand) {
                Entry::Occupied(mut e) => {
                    if let Err(err) = e.get_mut().include(offset) {
                        let location = Location::op(program, func_name, op.id);
                        failure = Some(index_error(err, location, "cannot fold access offset"));
                    }
                }
                Entry::Vacant(e) => {
                    e.insert(Extent::at(offset));
                }
            }
        });
        if let Some(diag) = failure {
            return Err(diag);
        }

        // TODO: revisit once shape inference can run ahead of unrolling; the
        // adjustment only exists because the body is already replicated here.
        if let Some(ret) = program.terminator(apply.id) {
            if let OpKind::Return {
                unroll: Some(unroll),
            } = &ret.kind
            {
                for extent in per_operand.values_mut() {
                    extent.adjust_for_unroll(unroll).map_err(|err| {
                        let location = Location::op(program, func_name, ret.id);
                        index_error(err, location, "cannot apply unroll to extent")
                    })?;
                }
            }
        }

        if !per_operand.is_empty() {
            self.extents.insert(apply.id, per_operand);
        }
        Ok(())
    }

    /// Extent of `value` as read by `op`. `None` means no access was recorded,
    /// which callers treat as zero widening.
    pub fn lookup(&self, op: OpId, value: ValueId) -> Option<&Extent> {
        self.extents.get(&op)?.get(&value)
    }

    /// Number of recorded (op, operand) pairs.
    pub fn len(&self) -> usize {
        self.extents.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries sorted by (op, value), for deterministic reporting.
    pub fn entries(&self) -> Vec<(OpId, ValueId, &Extent)> {
        let mut out: Vec<_> = self
            .extents
            .iter()
            .flat_map(|(&op, per_operand)| {
                per_operand
                    .iter()
                    .map(move |(&value, extent)| (op, value, extent))
            })
            .collect();
        out.sort_by_key(|&(op, value, _)| (op, value));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FunctionBuilder;
    use crate::diag::codes;
    use crate::ir::{ArithKind, Bounds, ElementType, Type};

    fn field(rank: usize) -> Type {
        Type::Field {
            element: ElementType::F64,
            rank,
        }
    }

    /// load → apply(accesses at `offsets`, optional unroll) → store.
    /// Returns (program, apply op, loaded value).
    fn single_apply(offsets: &[Vec<i64>], unroll: Option<Index>) -> (Program, OpId, ValueId) {
        let rank = offsets[0].len();
        let mut program = Program::new();
        let mut f = FunctionBuilder::new(&mut program, "k", vec![field(rank), field(rank)]);
        let (input, output) = (f.arg(0), f.arg(1));
        let t = f.load(input);
        let mut apply = f.apply(&[t]);
        let arg = apply.arg(0);
        let apply_op = apply.op();
        let reads: Vec<ValueId> = offsets.iter().map(|o| apply.access(arg, o.clone())).collect();
        let copies = unroll.as_deref().map_or(1, |u| index::volume(u).unwrap()) as usize;
        let returned: Vec<ValueId> = (0..copies).map(|i| reads[i % reads.len()]).collect();
        apply.ret(&returned, unroll);
        let out = apply.finish().unwrap();
        f.store(out[0], output, Bounds::new(vec![0; rank], vec![8; rank]));
        (program, apply_op, t)
    }

    #[test]
    fn extent_is_componentwise_min_max() {
        let (program, apply, t) =
            single_apply(&[vec![-1, 0], vec![1, 0], vec![0, 2], vec![0, -3]], None);
        let extents = AccessExtents::analyze(&program).unwrap();
        assert_eq!(
            extents.lookup(apply, t),
            Some(&Extent {
                negative: vec![-1, -3],
                positive: vec![1, 2],
            })
        );
    }

    #[test]
    fn first_access_seeds_both_ends() {
        let (program, apply, t) = single_apply(&[vec![2, 3]], None);
        let extents = AccessExtents::analyze(&program).unwrap();
        assert_eq!(extents.lookup(apply, t), Some(&Extent::at(&[2, 3])));
    }

    #[test]
    fn unroll_is_applied_once_per_apply() {
        // Three accesses, one adjustment: positive = max - unroll + 1.
        let (program, apply, t) = single_apply(
            &[vec![0, 0], vec![0, 1], vec![0, 2]],
            Some(vec![1, 2]),
        );
        let extents = AccessExtents::analyze(&program).unwrap();
        let extent = extents.lookup(apply, t).unwrap();
        assert_eq!(extent.negative, vec![0, 0]);
        assert_eq!(extent.positive, vec![0, 1]);
    }

    #[test]
    fn unaccessed_pairs_are_absent() {
        let (program, apply, _) = single_apply(&[vec![0, 0]], None);
        let extents = AccessExtents::analyze(&program).unwrap();
        let field_arg = program.functions[0].args[0];
        assert_eq!(extents.lookup(apply, field_arg), None);
        assert_eq!(extents.lookup(OpId(999), field_arg), None);
        assert_eq!(extents.len(), 1);
    }

    #[test]
    fn operand_passed_twice_merges_both_arguments() {
        let mut program = Program::new();
        let mut f = FunctionBuilder::new(&mut program, "k", vec![field(1), field(1)]);
        let (input, output) = (f.arg(0), f.arg(1));
        let t = f.load(input);
        let mut apply = f.apply(&[t, t]);
        let apply_op = apply.op();
        let (a, b) = (apply.arg(0), apply.arg(1));
        let x = apply.access(a, vec![-2]);
        let y = apply.access(b, vec![3]);
        let s = apply.arith(ArithKind::Sub, x, y);
        apply.ret(&[s], None);
        let out = apply.finish().unwrap();
        f.store(out[0], output, Bounds::new(vec![0], vec![4]));

        let extents = AccessExtents::analyze(&program).unwrap();
        assert_eq!(
            extents.lookup(apply_op, t),
            Some(&Extent {
                negative: vec![-2],
                positive: vec![3],
            })
        );
    }

    #[test]
    fn non_stencil_functions_are_skipped() {
        let mut program = Program::new();
        let mut f = FunctionBuilder::new(&mut program, "host", vec![field(1), field(1)]);
        f.set_stencil_program(false);
        let (input, output) = (f.arg(0), f.arg(1));
        let t = f.load(input);
        let mut apply = f.apply(&[t]);
        let arg = apply.arg(0);
        let x = apply.access(arg, vec![1]);
        apply.ret(&[x], None);
        let out = apply.finish().unwrap();
        f.store(out[0], output, Bounds::new(vec![0], vec![4]));

        assert!(AccessExtents::analyze(&program).unwrap().is_empty());
    }

    #[test]
    fn mixed_access_ranks_are_reported() {
        let mut program = Program::new();
        let mut f = FunctionBuilder::new(&mut program, "k", vec![field(2), field(2)]);
        let (input, output) = (f.arg(0), f.arg(1));
        let t = f.load(input);
        let mut apply = f.apply(&[t]);
        let arg = apply.arg(0);
        let x = apply.access(arg, vec![0, 1]);
        let y = apply.access(arg, vec![1]);
        let s = apply.arith(ArithKind::Add, x, y);
        apply.ret(&[s], None);
        let out = apply.finish().unwrap();
        f.store(out[0], output, Bounds::new(vec![0, 0], vec![4, 4]));

        let err = AccessExtents::analyze(&program).unwrap_err();
        assert_eq!(err.code, Some(codes::E0100));
        assert_eq!(err.location.op.map(|(_, name)| name), Some("stencil.access"));
    }

    #[test]
    fn unroll_adjustment_overflow_is_reported() {
        let (program, _, _) = single_apply(&[vec![i64::MIN]], Some(vec![2]));
        let err = AccessExtents::analyze(&program).unwrap_err();
        assert_eq!(err.code, Some(codes::E0104));
        assert_eq!(err.location.op.map(|(_, name)| name), Some("stencil.return"));
    }
}
