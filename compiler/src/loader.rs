// loader.rs — JSON program descriptions → stencil IR
//
// The CLI's input format: a serde-deserialized description of functions whose
// ops name their values with strings. Names are resolved per function (apply
// bodies have their own scope holding the body parameters and body results)
// and the IR is built with `builder`.
//
// Preconditions: none.
// Postconditions: `program` is `Some` iff no error diagnostic was produced.
// Failure modes: undefined names (E0001), duplicate names (E0002), malformed
//   operations (E0003), including ranks that disagree within a store or an
//   apply (operands, access offsets, unroll). Errors stop the current function;
//   remaining functions are still checked so that all of them are reported.
// Side effects: none.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::builder::{ApplyBuilder, FunctionBuilder};
use crate::diag::{codes, Diagnostic, Location};
use crate::id::ValueId;
use crate::index::{format_index, Index};
use crate::ir::{ArithKind, Bounds, ElementType, Program, Type};

// ── Source schema ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramSource {
    pub functions: Vec<FunctionSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSource {
    pub name: String,
    #[serde(default = "default_true")]
    pub stencil_program: bool,
    #[serde(default)]
    pub args: Vec<ArgSource>,
    pub ops: Vec<OpSource>,
}

fn default_true() -> bool {
    true
}

/// A field argument of a function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgSource {
    pub name: String,
    pub element: ElementType,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpSource {
    Load {
        result: String,
        field: String,
    },
    Apply {
        results: Vec<String>,
        operands: Vec<String>,
        params: Vec<String>,
        body: Vec<BodyOpSource>,
    },
    Store {
        value: String,
        field: String,
        lb: Index,
        ub: Index,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BodyOpSource {
    Access {
        result: String,
        param: String,
        offset: Index,
    },
    Arith {
        result: String,
        kind: ArithKind,
        lhs: String,
        rhs: String,
    },
    Return {
        operands: Vec<String>,
        #[serde(default)]
        unroll: Option<Index>,
    },
}

// ── Public entry points ─────────────────────────────────────────────────────

/// Result of loading a program description.
#[derive(Debug)]
pub struct LoadResult {
    pub program: Option<Program>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Decode a JSON program description.
pub fn parse_json(text: &str) -> Result<ProgramSource, serde_json::Error> {
    serde_json::from_str(text)
}

/// Build the IR for a decoded program description.
pub fn load(source: &ProgramSource) -> LoadResult {
    let mut program = Program::new();
    let mut diagnostics = Vec::new();
    for func in &source.functions {
        if let Err(diag) = load_function(&mut program, func) {
            diagnostics.push(diag);
        }
    }
    LoadResult {
        program: diagnostics.is_empty().then_some(program),
        diagnostics,
    }
}

// ── Name scopes ─────────────────────────────────────────────────────────────

struct Scope<'s> {
    func: &'s str,
    names: HashMap<&'s str, ValueId>,
}

impl<'s> Scope<'s> {
    fn new(func: &'s str) -> Self {
        Scope {
            func,
            names: HashMap::new(),
        }
    }

    fn define(&mut self, name: &'s str, value: ValueId) -> Result<(), Diagnostic> {
        if self.names.insert(name, value).is_some() {
            return Err(Diagnostic::error(
                codes::E0002,
                Location::func(self.func),
                format!("value `{}` is defined more than once", name),
            ));
        }
        Ok(())
    }

    fn get(&self, name: &str) -> Result<ValueId, Diagnostic> {
        self.names.get(name).copied().ok_or_else(|| {
            Diagnostic::error(
                codes::E0001,
                Location::func(self.func),
                format!("undefined value `{}`", name),
            )
        })
    }
}

fn malformed(func: &str, message: impl Into<String>) -> Diagnostic {
    Diagnostic::error(codes::E0003, Location::func(func), message)
}

/// Fix `rank` to `found`, or fail if an earlier part fixed a different one.
fn unify_rank(
    func: &str,
    rank: &mut Option<usize>,
    found: usize,
    what: impl FnOnce() -> String,
) -> Result<(), Diagnostic> {
    match *rank {
        Some(expected) if expected != found => Err(malformed(
            func,
            format!("{} has rank {}, expected rank {}", what(), found, expected),
        )),
        _ => {
            *rank = Some(found);
            Ok(())
        }
    }
}

// ── Function loading ────────────────────────────────────────────────────────

fn load_function(program: &mut Program, src: &FunctionSource) -> Result<(), Diagnostic> {
    let arg_types = src
        .args
        .iter()
        .map(|a| Type::Field {
            element: a.element,
            rank: a.rank,
        })
        .collect();
    let mut f = FunctionBuilder::new(program, &src.name, arg_types);
    f.set_stencil_program(src.stencil_program);

    // Rank of every value whose rank is known: field args, loads, and the
    // results of applies with at least one ranked part.
    let mut ranks: HashMap<ValueId, usize> = HashMap::new();
    let mut scope = Scope::new(&src.name);
    for (i, arg) in src.args.iter().enumerate() {
        scope.define(&arg.name, f.arg(i))?;
        ranks.insert(f.arg(i), arg.rank);
    }

    for op in &src.ops {
        match op {
            OpSource::Load { result, field } => {
                let field = scope.get(field)?;
                let v = f.load(field);
                scope.define(result, v)?;
                if let Some(&rank) = ranks.get(&field) {
                    ranks.insert(v, rank);
                }
            }
            OpSource::Store {
                value,
                field,
                lb,
                ub,
            } => {
                if lb.len() != ub.len() {
                    return Err(malformed(
                        &src.name,
                        format!(
                            "store of `{}` has bounds of different rank ({} and {})",
                            value,
                            lb.len(),
                            ub.len()
                        ),
                    ));
                }
                let v = scope.get(value)?;
                let field_value = scope.get(field)?;
                let mut rank = Some(lb.len());
                for (name, id) in [(value, v), (field, field_value)] {
                    if let Some(&found) = ranks.get(&id) {
                        unify_rank(&src.name, &mut rank, found, || {
                            format!("store of `{}` over {}: `{}`", value, format_index(lb), name)
                        })?;
                    }
                }
                f.store(v, field_value, Bounds::new(lb.clone(), ub.clone()));
            }
            OpSource::Apply {
                results,
                operands,
                params,
                body,
            } => {
                if params.len() != operands.len() {
                    return Err(malformed(
                        &src.name,
                        format!(
                            "apply has {} operands but {} params",
                            operands.len(),
                            params.len()
                        ),
                    ));
                }
                let operand_values = operands
                    .iter()
                    .map(|name| scope.get(name))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut rank = None;
                for (name, v) in operands.iter().zip(&operand_values) {
                    if let Some(&found) = ranks.get(v) {
                        unify_rank(&src.name, &mut rank, found, || {
                            format!("apply operand `{}`", name)
                        })?;
                    }
                }

                let mut apply = f.apply(&operand_values);
                let mut body_scope = Scope::new(&src.name);
                for (i, param) in params.iter().enumerate() {
                    body_scope.define(param, apply.arg(i))?;
                }
                load_body(&mut apply, &mut body_scope, &mut rank, body)?;
                let values = apply
                    .finish()
                    .map_err(|e| malformed(&src.name, e.to_string()))?;

                if values.len() != results.len() {
                    return Err(malformed(
                        &src.name,
                        format!(
                            "apply returns {} values but names {} results",
                            values.len(),
                            results.len()
                        ),
                    ));
                }
                for (name, v) in results.iter().zip(values) {
                    scope.define(name, v)?;
                    if let Some(rank) = rank {
                        ranks.insert(v, rank);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Load an apply body. Access offsets and the unroll must share `rank`, the
/// rank of the apply's operands when known.
fn load_body<'s>(
    apply: &mut ApplyBuilder<'_>,
    scope: &mut Scope<'s>,
    rank: &mut Option<usize>,
    body: &'s [BodyOpSource],
) -> Result<(), Diagnostic> {
    for (i, op) in body.iter().enumerate() {
        match op {
            BodyOpSource::Access {
                result,
                param,
                offset,
            } => {
                let arg = scope.get(param)?;
                if !apply.args().contains(&arg) {
                    return Err(malformed(
                        scope.func,
                        format!("access reads `{}`, which is not an apply parameter", param),
                    ));
                }
                unify_rank(scope.func, rank, offset.len(), || {
                    format!(
                        "access `{}` reading `{}` at offset {}",
                        result,
                        param,
                        format_index(offset)
                    )
                })?;
                let v = apply.access(arg, offset.clone());
                scope.define(result, v)?;
            }
            BodyOpSource::Arith {
                result,
                kind,
                lhs,
                rhs,
            } => {
                let (l, r) = (scope.get(lhs)?, scope.get(rhs)?);
                let v = apply.arith(*kind, l, r);
                scope.define(result, v)?;
            }
            BodyOpSource::Return { operands, unroll } => {
                if i + 1 != body.len() {
                    return Err(malformed(
                        scope.func,
                        "stencil.return must be the last operation of an apply body",
                    ));
                }
                let values = operands
                    .iter()
                    .map(|name| scope.get(name))
                    .collect::<Result<Vec<_>, _>>()?;
                if let Some(unroll) = unroll {
                    unify_rank(scope.func, rank, unroll.len(), || {
                        format!("unroll {}", format_index(unroll))
                    })?;
                }
                apply.ret(&values, unroll.clone());
            }
        }
    }
    Ok(())
}
