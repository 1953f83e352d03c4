// report.rs — Machine-readable summaries for `--emit shapes` / `--emit extents`

use serde::Serialize;

use crate::extent::AccessExtents;
use crate::index::Index;
use crate::ir::Program;
use crate::shape_infer::ShapeSummary;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ShapeReport {
    pub functions: Vec<FunctionShapes>,
    pub skipped_functions: Vec<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FunctionShapes {
    pub name: String,
    pub ops: Vec<OpShape>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct OpShape {
    pub op: u32,
    pub name: &'static str,
    pub lb: Index,
    pub ub: Index,
    pub shape: Index,
}

impl ShapeReport {
    /// Group inferred shapes by function, ops in program order.
    pub fn new(program: &Program, summary: &ShapeSummary) -> Self {
        let mut functions = Vec::new();
        for func in program.functions.iter().filter(|f| f.stencil_program) {
            let ops = func
                .body
                .iter()
                .filter_map(|&id| {
                    summary
                        .inferred
                        .iter()
                        .find(|s| s.op == id)
                        .map(|s| OpShape {
                            op: id.0,
                            name: program.op(id).name(),
                            lb: s.bounds.lb.clone(),
                            ub: s.bounds.ub.clone(),
                            shape: s.shape.clone(),
                        })
                })
                .collect();
            functions.push(FunctionShapes {
                name: func.name.clone(),
                ops,
            });
        }
        ShapeReport {
            functions,
            skipped_functions: summary.skipped_functions.clone(),
        }
    }

    pub fn to_json(&self) -> String {
        to_pretty_json(self)
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ExtentReport {
    pub applies: Vec<ApplyExtents>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ApplyExtents {
    pub op: u32,
    pub operands: Vec<OperandExtent>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct OperandExtent {
    pub value: u32,
    pub negative: Index,
    pub positive: Index,
}

impl ExtentReport {
    pub fn new(extents: &AccessExtents) -> Self {
        let mut applies: Vec<ApplyExtents> = Vec::new();
        for (op, value, extent) in extents.entries() {
            let operand = OperandExtent {
                value: value.0,
                negative: extent.negative.clone(),
                positive: extent.positive.clone(),
            };
            match applies.last_mut() {
                Some(last) if last.op == op.0 => last.operands.push(operand),
                _ => applies.push(ApplyExtents {
                    op: op.0,
                    operands: vec![operand],
                }),
            }
        }
        ExtentReport { applies }
    }

    pub fn to_json(&self) -> String {
        to_pretty_json(self)
    }
}

fn to_pretty_json<T: Serialize>(value: &T) -> String {
    let mut out = serde_json::to_string_pretty(value).unwrap_or_default();
    out.push('\n');
    out
}
