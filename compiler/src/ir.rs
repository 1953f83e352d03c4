// ir.rs — Minimal stencil IR consumed by the shape passes
//
// Flat arenas of operations and values indexed by `OpId` / `ValueId`, with
// use lists maintained on construction. Operations are a closed tagged variant
// over the stencil op set; capabilities ("shaped", "shape-inferable") are
// answered by matching on the variant.
//
// Preconditions: programs are built through `builder` (or the loader), which
//   keeps use lists and operand types in sync with operands.
// Postconditions: bounds of shape-inferable ops are written at most once.
// Failure modes: `FinalizeError` on a second commit or on an op without the
//   shape-inference capability.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{IdAllocator, OpId, ValueId};
use crate::index::{self, format_index, Index};

// ── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    F32,
    F64,
    I32,
    I64,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
        };
        f.write_str(s)
    }
}

/// Shape of a temp value. `Dynamic` until shape inference commits sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Dynamic,
    Static(Index),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempType {
    pub element: ElementType,
    pub shape: Shape,
}

impl TempType {
    pub fn dynamic(element: ElementType) -> Self {
        TempType {
            element,
            shape: Shape::Dynamic,
        }
    }

    pub fn with_shape(element: ElementType, shape: Index) -> Self {
        TempType {
            element,
            shape: Shape::Static(shape),
        }
    }

    pub fn has_dynamic_shape(&self) -> bool {
        matches!(self.shape, Shape::Dynamic)
    }

    pub fn static_shape(&self) -> Option<&[i64]> {
        match &self.shape {
            Shape::Static(dims) => Some(dims),
            Shape::Dynamic => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    /// Scalar flowing inside an apply body.
    Element(ElementType),
    /// External storage passed into a stencil program.
    Field { element: ElementType, rank: usize },
    /// Grid value flowing between stencil operations.
    Temp(TempType),
}

impl Type {
    pub fn element_type(&self) -> ElementType {
        match self {
            Type::Element(e) => *e,
            Type::Field { element, .. } => *element,
            Type::Temp(t) => t.element,
        }
    }

    pub fn as_temp(&self) -> Option<&TempType> {
        match self {
            Type::Temp(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Element(e) => write!(f, "{}", e),
            Type::Field { element, rank } => {
                write!(f, "!stencil.field<{}{}>", "?x".repeat(*rank), element)
            }
            Type::Temp(t) => match &t.shape {
                Shape::Dynamic => write!(f, "!stencil.temp<*x{}>", t.element),
                Shape::Static(dims) => {
                    write!(f, "!stencil.temp<")?;
                    for d in dims {
                        write!(f, "{}x", d)?;
                    }
                    write!(f, "{}>", t.element)
                }
            },
        }
    }
}

// ── Bounds ──────────────────────────────────────────────────────────────────

/// Rectangular iteration domain `[lb, ub)` of a shaped operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub lb: Index,
    pub ub: Index,
}

impl Bounds {
    pub fn new(lb: Index, ub: Index) -> Self {
        Bounds { lb, ub }
    }

    pub fn rank(&self) -> usize {
        self.lb.len()
    }

    /// `ub - lb`, or `None` if the two ends disagree in rank or the size
    /// does not fit in `i64`.
    pub fn shape(&self) -> Option<Index> {
        index::sub(&self.ub, &self.lb).ok()
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} : {})", format_index(&self.lb), format_index(&self.ub))
    }
}

// ── Operations ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArithKind {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithKind {
    pub fn name(self) -> &'static str {
        match self {
            ArithKind::Add => "arith.add",
            ArithKind::Sub => "arith.sub",
            ArithKind::Mul => "arith.mul",
            ArithKind::Div => "arith.div",
        }
    }
}

/// The closed set of operations the stencil passes understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    /// Reads a field into a temp. Operands: `[field]`.
    Load { bounds: Option<Bounds> },
    /// Stencil computation with a body block; body argument `i` stands for operand `i`.
    Apply { bounds: Option<Bounds> },
    /// Reads a body argument at a relative offset. Operands: `[body arg]`.
    Access { offset: Index },
    Arith(ArithKind),
    /// Apply terminator. With an unroll factor, carries `results × Π unroll` operands.
    Return { unroll: Option<Index> },
    /// Writes a temp into a field over fixed bounds. Operands: `[temp, field]`.
    Store { bounds: Bounds },
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Load { .. } => "stencil.load",
            OpKind::Apply { .. } => "stencil.apply",
            OpKind::Access { .. } => "stencil.access",
            OpKind::Arith(kind) => kind.name(),
            OpKind::Return { .. } => "stencil.return",
            OpKind::Store { .. } => "stencil.store",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub args: Vec<ValueId>,
    pub ops: Vec<OpId>,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub id: OpId,
    pub kind: OpKind,
    pub operands: Vec<ValueId>,
    /// Declared operand types, stored independently of the producing values.
    pub operand_types: Vec<Type>,
    pub results: Vec<ValueId>,
    pub body: Option<Block>,
    pub parent: Option<OpId>,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Ops owning an iteration domain (load, apply, store).
    pub fn is_shaped(&self) -> bool {
        matches!(
            self.kind,
            OpKind::Load { .. } | OpKind::Apply { .. } | OpKind::Store { .. }
        )
    }

    /// Ops whose domain is derived from their consumers (load, apply).
    pub fn is_shape_inferable(&self) -> bool {
        matches!(self.kind, OpKind::Load { .. } | OpKind::Apply { .. })
    }

    /// Current bounds of a shaped op; `None` while undetermined or for unshaped ops.
    pub fn bounds(&self) -> Option<&Bounds> {
        match &self.kind {
            OpKind::Load { bounds } | OpKind::Apply { bounds } => bounds.as_ref(),
            OpKind::Store { bounds } => Some(bounds),
            _ => None,
        }
    }

    pub fn rank(&self) -> usize {
        self.bounds().map_or(0, Bounds::rank)
    }
}

// ── Values ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    Result { op: OpId, index: usize },
    /// `owner` is the apply whose body declares the argument; `None` for function arguments.
    Arg { owner: Option<OpId>, index: usize },
}

/// One operand slot referring to a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub user: OpId,
    pub operand: usize,
}

#[derive(Debug, Clone)]
pub struct ValueInfo {
    pub id: ValueId,
    pub ty: Type,
    pub def: ValueDef,
    pub uses: Vec<Use>,
}

// ── Program ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// Only stencil programs are analysed and shape-inferred.
    pub stencil_program: bool,
    pub args: Vec<ValueId>,
    /// Entry block, in program order.
    pub body: Vec<OpId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeError {
    AlreadyFinalized,
    NotShapeInferable,
}

impl fmt::Display for FinalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalizeError::AlreadyFinalized => write!(f, "bounds are already finalized"),
            FinalizeError::NotShapeInferable => {
                write!(f, "operation does not support shape inference")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub functions: Vec<Function>,
    ops: Vec<Operation>,
    values: Vec<ValueInfo>,
    ids: IdAllocator,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(&self, id: OpId) -> &Operation {
        &self.ops[id.index()]
    }

    pub fn value(&self, id: ValueId) -> &ValueInfo {
        &self.values[id.index()]
    }

    pub fn value_type(&self, id: ValueId) -> &Type {
        &self.values[id.index()].ty
    }

    pub fn uses(&self, id: ValueId) -> &[Use] {
        &self.values[id.index()].uses
    }

    pub fn ops(&self) -> impl Iterator<Item = &Operation> {
        self.ops.iter()
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Last op of the op's body block, if it has one.
    pub fn terminator(&self, op: OpId) -> Option<&Operation> {
        let body = self.op(op).body.as_ref()?;
        body.ops.last().map(|&id| self.op(id))
    }

    /// Pre-order walk over `roots` and everything nested in their bodies.
    pub fn walk<F: FnMut(&Operation)>(&self, roots: &[OpId], f: &mut F) {
        for &id in roots {
            let op = self.op(id);
            f(op);
            if let Some(body) = &op.body {
                self.walk(&body.ops, f);
            }
        }
    }

    // ── Construction (builder-facing) ──

    pub(crate) fn add_function(
        &mut self,
        name: &str,
        stencil_program: bool,
        arg_types: Vec<Type>,
    ) -> usize {
        let mut args = Vec::with_capacity(arg_types.len());
        for (index, ty) in arg_types.into_iter().enumerate() {
            args.push(self.new_value(ty, ValueDef::Arg { owner: None, index }));
        }
        self.functions.push(Function {
            name: name.to_string(),
            stencil_program,
            args,
            body: Vec::new(),
        });
        self.functions.len() - 1
    }

    pub(crate) fn new_value(&mut self, ty: Type, def: ValueDef) -> ValueId {
        let id = self.ids.alloc_value();
        self.values.push(ValueInfo {
            id,
            ty,
            def,
            uses: Vec::new(),
        });
        id
    }

    /// Create an op, snapshot its operand types and register its uses.
    pub(crate) fn new_op(
        &mut self,
        kind: OpKind,
        operands: Vec<ValueId>,
        parent: Option<OpId>,
    ) -> OpId {
        let id = self.ids.alloc_op();
        let operand_types = operands.iter().map(|&v| self.value_type(v).clone()).collect();
        for (operand, &v) in operands.iter().enumerate() {
            self.values[v.index()].uses.push(Use { user: id, operand });
        }
        self.ops.push(Operation {
            id,
            kind,
            operands,
            operand_types,
            results: Vec::new(),
            body: None,
            parent,
        });
        id
    }

    pub(crate) fn push_result(&mut self, op: OpId, ty: Type) -> ValueId {
        let index = self.op(op).results.len();
        let v = self.new_value(ty, ValueDef::Result { op, index });
        self.ops[op.index()].results.push(v);
        v
    }

    pub(crate) fn op_mut(&mut self, id: OpId) -> &mut Operation {
        &mut self.ops[id.index()]
    }

    // ── Shape commit ──

    /// Commit the bounds of a shape-inferable op. Write-once.
    pub fn finalize_shape(&mut self, op: OpId, new_bounds: Bounds) -> Result<(), FinalizeError> {
        match &mut self.ops[op.index()].kind {
            OpKind::Load { bounds } | OpKind::Apply { bounds } => {
                if bounds.is_some() {
                    return Err(FinalizeError::AlreadyFinalized);
                }
                *bounds = Some(new_bounds);
                Ok(())
            }
            _ => Err(FinalizeError::NotShapeInferable),
        }
    }

    pub fn set_result_type(&mut self, value: ValueId, ty: Type) {
        self.values[value.index()].ty = ty;
    }

    /// Update the declared type of operand `operand` of `user`. For an apply
    /// the corresponding body argument is retyped as well.
    pub fn set_operand_type(&mut self, user: OpId, operand: usize, ty: Type) {
        let op = &mut self.ops[user.index()];
        let arg = match (&op.kind, &op.body) {
            (OpKind::Apply { .. }, Some(body)) => body.args.get(operand).copied(),
            _ => None,
        };
        if let Some(slot) = op.operand_types.get_mut(operand) {
            *slot = ty.clone();
        }
        if let Some(arg) = arg {
            self.values[arg.index()].ty = ty;
        }
    }
}

// ── Textual dump ────────────────────────────────────────────────────────────

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for func in &self.functions {
            write!(f, "func @{}(", func.name)?;
            for (i, &arg) in func.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} : {}", arg, self.value_type(arg))?;
            }
            write!(f, ")")?;
            if func.stencil_program {
                write!(f, " attributes {{stencil.program}}")?;
            }
            writeln!(f, " {{")?;
            for &op in &func.body {
                self.fmt_op(f, op, 1)?;
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}

impl Program {
    fn fmt_op(&self, f: &mut fmt::Formatter<'_>, id: OpId, depth: usize) -> fmt::Result {
        let op = self.op(id);
        let pad = "  ".repeat(depth);
        write!(f, "{}", pad)?;
        if !op.results.is_empty() {
            write!(f, "{} = ", join_values(&op.results))?;
        }
        write!(f, "{}", op.name())?;
        match &op.kind {
            OpKind::Load { bounds } => {
                write!(f, " {}", join_values(&op.operands))?;
                if let Some(b) = bounds {
                    write!(f, " {}", b)?;
                }
            }
            OpKind::Apply { bounds } => {
                write!(f, " (")?;
                if let Some(body) = &op.body {
                    for (i, (&arg, &operand)) in body.args.iter().zip(&op.operands).enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{} = {} : {}", arg, operand, op.operand_types[i])?;
                    }
                }
                write!(f, ")")?;
                if let Some(b) = bounds {
                    write!(f, " {}", b)?;
                }
            }
            OpKind::Access { offset } => {
                write!(f, " {} {}", join_values(&op.operands), format_index(offset))?;
            }
            OpKind::Arith(_) => write!(f, " {}", join_values(&op.operands))?,
            OpKind::Return { unroll } => {
                write!(f, " {}", join_values(&op.operands))?;
                if let Some(u) = unroll {
                    write!(f, " unroll {}", format_index(u))?;
                }
                write!(f, " : {}", join_types(&op.operand_types))?;
            }
            OpKind::Store { bounds } => {
                if let [value, field] = op.operands[..] {
                    write!(f, " {} to {}", value, field)?;
                }
                write!(f, " {}", bounds)?;
                if let Some(ty) = op.operand_types.first() {
                    write!(f, " : {}", ty)?;
                }
            }
        }
        if !op.results.is_empty() {
            let types: Vec<Type> = op
                .results
                .iter()
                .map(|&r| self.value_type(r).clone())
                .collect();
            write!(f, " : {}", join_types(&types))?;
        }
        match &op.body {
            Some(body) => {
                writeln!(f, " {{")?;
                for &nested in &body.ops {
                    self.fmt_op(f, nested, depth + 1)?;
                }
                writeln!(f, "{}}}", pad)
            }
            None => writeln!(f),
        }
    }
}

fn join_values(values: &[ValueId]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    parts.join(", ")
}

fn join_types(types: &[Type]) -> String {
    let parts: Vec<String> = types.iter().map(|t| t.to_string()).collect();
    parts.join(", ")
}
