// builder.rs — Programmatic construction of stencil programs
//
// `FunctionBuilder` appends top-level ops to a function's entry block;
// `ApplyBuilder` fills one apply body and derives the apply's result types from
// its return when finished. Result types start out with a dynamic shape.
//
// Failure modes: an apply body without a return, or an unrolled return whose
//   operand count is not a multiple of the unroll volume. A program whose
//   builder failed should be discarded.

use std::fmt;

use crate::id::{OpId, ValueId};
use crate::index::{self, Index};
use crate::ir::{ArithKind, Block, Bounds, OpKind, Program, TempType, Type, ValueDef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    MissingReturn,
    UnevenReturn { operands: usize, unroll: Index },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::MissingReturn => write!(f, "apply body must end with stencil.return"),
            BuildError::UnevenReturn { operands, unroll } => write!(
                f,
                "return has {} operands, not a multiple of the volume of unroll {}",
                operands,
                index::format_index(unroll)
            ),
        }
    }
}

pub struct FunctionBuilder<'p> {
    program: &'p mut Program,
    func: usize,
}

impl<'p> FunctionBuilder<'p> {
    /// Start a new stencil-program function with the given argument types.
    pub fn new(program: &'p mut Program, name: &str, arg_types: Vec<Type>) -> Self {
        let func = program.add_function(name, true, arg_types);
        FunctionBuilder { program, func }
    }

    /// Mark whether the function is a stencil program (default: true).
    pub fn set_stencil_program(&mut self, stencil_program: bool) {
        self.program.functions[self.func].stencil_program = stencil_program;
    }

    pub fn arg(&self, i: usize) -> ValueId {
        self.program.functions[self.func].args[i]
    }

    pub fn load(&mut self, field: ValueId) -> ValueId {
        let element = self.program.value_type(field).element_type();
        let op = self
            .program
            .new_op(OpKind::Load { bounds: None }, vec![field], None);
        let result = self
            .program
            .push_result(op, Type::Temp(TempType::dynamic(element)));
        self.append(op);
        result
    }

    pub fn store(&mut self, value: ValueId, field: ValueId, bounds: Bounds) -> OpId {
        let op = self
            .program
            .new_op(OpKind::Store { bounds }, vec![value, field], None);
        self.append(op);
        op
    }

    /// Begin an apply over `operands`. The op joins the entry block on `finish`.
    pub fn apply(&mut self, operands: &[ValueId]) -> ApplyBuilder<'_> {
        let op = self
            .program
            .new_op(OpKind::Apply { bounds: None }, operands.to_vec(), None);
        let mut args = Vec::with_capacity(operands.len());
        for (index, &operand) in operands.iter().enumerate() {
            let ty = self.program.value_type(operand).clone();
            args.push(self.program.new_value(
                ty,
                ValueDef::Arg {
                    owner: Some(op),
                    index,
                },
            ));
        }
        self.program.op_mut(op).body = Some(Block {
            args: args.clone(),
            ops: Vec::new(),
        });
        ApplyBuilder {
            program: &mut *self.program,
            func: self.func,
            op,
            args,
        }
    }

    fn append(&mut self, op: OpId) {
        self.program.functions[self.func].body.push(op);
    }
}

pub struct ApplyBuilder<'f> {
    program: &'f mut Program,
    func: usize,
    op: OpId,
    args: Vec<ValueId>,
}

impl<'f> ApplyBuilder<'f> {
    pub fn op(&self) -> OpId {
        self.op
    }

    pub fn arg(&self, i: usize) -> ValueId {
        self.args[i]
    }

    pub fn args(&self) -> &[ValueId] {
        &self.args
    }

    pub fn access(&mut self, arg: ValueId, offset: Index) -> ValueId {
        let element = self.program.value_type(arg).element_type();
        let op = self
            .program
            .new_op(OpKind::Access { offset }, vec![arg], Some(self.op));
        let result = self.program.push_result(op, Type::Element(element));
        self.append(op);
        result
    }

    pub fn arith(&mut self, kind: ArithKind, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.program.value_type(lhs).clone();
        let op = self
            .program
            .new_op(OpKind::Arith(kind), vec![lhs, rhs], Some(self.op));
        let result = self.program.push_result(op, ty);
        self.append(op);
        result
    }

    pub fn ret(&mut self, values: &[ValueId], unroll: Option<Index>) {
        let op = self
            .program
            .new_op(OpKind::Return { unroll }, values.to_vec(), Some(self.op));
        self.append(op);
    }

    /// Close the body and create one dynamic temp result per returned value
    /// (per unrolled group of values when the return carries an unroll factor).
    pub fn finish(mut self) -> Result<Vec<ValueId>, BuildError> {
        let (operand_types, unroll) = match self.program.terminator(self.op) {
            Some(term) => match &term.kind {
                OpKind::Return { unroll } => (term.operand_types.clone(), unroll.clone()),
                _ => return Err(BuildError::MissingReturn),
            },
            None => return Err(BuildError::MissingReturn),
        };

        let per_result = unroll.as_deref().map_or(Some(1), index::volume).unwrap_or(0);
        if per_result < 1 || operand_types.len() as i64 % per_result != 0 {
            return Err(BuildError::UnevenReturn {
                operands: operand_types.len(),
                unroll: unroll.unwrap_or_default(),
            });
        }

        let mut results = Vec::new();
        for ty in operand_types.iter().step_by(per_result as usize) {
            let temp = Type::Temp(TempType::dynamic(ty.element_type()));
            results.push(self.program.push_result(self.op, temp));
        }
        self.program.functions[self.func].body.push(self.op);
        Ok(results)
    }

    fn append(&mut self, op: OpId) {
        if let Some(body) = self.program.op_mut(self.op).body.as_mut() {
            body.ops.push(op);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ElementType;

    fn field(element: ElementType) -> Type {
        Type::Field { element, rank: 2 }
    }

    #[test]
    fn apply_results_follow_return_element_types() {
        let mut program = Program::new();
        let mut f = FunctionBuilder::new(&mut program, "k", vec![field(ElementType::F32)]);
        let input = f.arg(0);
        let t = f.load(input);
        let mut apply = f.apply(&[t]);
        let arg = apply.arg(0);
        let x = apply.access(arg, vec![0, 0]);
        let y = apply.access(arg, vec![0, 1]);
        let s = apply.arith(ArithKind::Mul, x, y);
        apply.ret(&[s, x], None);
        let results = apply.finish().unwrap();

        assert_eq!(results.len(), 2);
        for r in results {
            assert_eq!(
                program.value_type(r),
                &Type::Temp(TempType::dynamic(ElementType::F32))
            );
        }
    }

    #[test]
    fn unrolled_return_groups_operands_per_result() {
        let mut program = Program::new();
        let mut f = FunctionBuilder::new(&mut program, "k", vec![field(ElementType::F64)]);
        let input = f.arg(0);
        let t = f.load(input);
        let mut apply = f.apply(&[t]);
        let arg = apply.arg(0);
        let a = apply.access(arg, vec![0, 0]);
        let b = apply.access(arg, vec![0, 1]);
        apply.ret(&[a, b], Some(vec![1, 2]));
        let results = apply.finish().unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn uneven_unrolled_return_is_rejected() {
        let mut program = Program::new();
        let mut f = FunctionBuilder::new(&mut program, "k", vec![field(ElementType::F64)]);
        let input = f.arg(0);
        let t = f.load(input);
        let mut apply = f.apply(&[t]);
        let arg = apply.arg(0);
        let a = apply.access(arg, vec![0, 0]);
        apply.ret(&[a], Some(vec![1, 2]));
        assert_eq!(
            apply.finish(),
            Err(BuildError::UnevenReturn {
                operands: 1,
                unroll: vec![1, 2]
            })
        );
    }

    #[test]
    fn overflowing_unroll_volume_is_rejected() {
        let mut program = Program::new();
        let mut f = FunctionBuilder::new(&mut program, "k", vec![field(ElementType::F64)]);
        let input = f.arg(0);
        let t = f.load(input);
        let mut apply = f.apply(&[t]);
        let arg = apply.arg(0);
        let a = apply.access(arg, vec![0, 0]);
        apply.ret(&[a], Some(vec![i64::MAX, 2]));
        assert!(matches!(
            apply.finish(),
            Err(BuildError::UnevenReturn { operands: 1, .. })
        ));
    }

    #[test]
    fn missing_return_is_rejected() {
        let mut program = Program::new();
        let mut f = FunctionBuilder::new(&mut program, "k", vec![field(ElementType::F64)]);
        let input = f.arg(0);
        let t = f.load(input);
        let mut apply = f.apply(&[t]);
        let arg = apply.arg(0);
        apply.access(arg, vec![0, 0]);
        assert_eq!(apply.finish(), Err(BuildError::MissingReturn));
    }
}
