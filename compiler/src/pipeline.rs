// pipeline.rs — Compilation state and pass orchestration
//
// Holds the program and all pass artifacts and runs the minimal set of passes
// for a given terminal PassId.
//
// Preconditions: the program was built (or loaded) without errors.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics; a failing ShapeCert.
// Side effects: calls on_pass_complete callback after each pass for immediate display.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::diag::{codes, Diagnostic, Location};
use crate::extent::AccessExtents;
use crate::ir::Program;
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::shape_infer::ShapeSummary;
use crate::verify::ShapeCert;

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for `--emit build-info`.
///
/// `source_hash`: SHA-256 of the raw JSON source text.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub compiler_version: &'static str,
}

#[derive(Serialize)]
struct ProvenanceJson<'a> {
    source_hash: String,
    compiler_version: &'a str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.source_hash {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }

    pub fn to_json(&self) -> String {
        let json = ProvenanceJson {
            source_hash: self.source_hash_hex(),
            compiler_version: self.compiler_version,
        };
        let mut out = serde_json::to_string_pretty(&json).unwrap_or_default();
        out.push('\n');
        out
    }
}

pub fn compute_provenance(source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let mut source_hash = [0u8; 32];
    source_hash.copy_from_slice(&hasher.finalize());

    Provenance {
        source_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Holds the program, all pass artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub program: Program,
    pub extents: Option<AccessExtents>,
    pub shapes: Option<ShapeSummary>,
    pub cert: Option<ShapeCert>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
}

impl CompilationState {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            extents: None,
            shapes: None,
            cert: None,
            diagnostics: Vec::new(),
            has_error: false,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    pub failing_pass: PassId,
}

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = diags.iter().any(Diagnostic::is_error);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "stencilc: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let diags = match pass_id {
            PassId::ExtentAnalysis => {
                match AccessExtents::analyze(&state.program) {
                    Ok(extents) => {
                        state.extents = Some(extents);
                        Vec::new()
                    }
                    Err(diag) => vec![diag],
                }
            }
            PassId::ShapeInference => {
                let extents = state.extents.take().unwrap_or_default();
                let result = crate::shape_infer::infer_shapes(&mut state.program, &extents);
                state.extents = Some(extents);
                state.shapes = Some(result.summary);
                result.diagnostics
            }
            PassId::VerifyShapes => {
                let cert = crate::verify::verify_shapes(&state.program);
                let diags = cert_diagnostics(&state.program, &cert);
                state.cert = Some(cert);
                diags
            }
        };
        finish_pass(
            state,
            pass_id,
            diags,
            t.elapsed(),
            verbose,
            &mut on_pass_complete,
        )?;
    }
    Ok(())
}

/// E0600 for a certificate with failed obligations, one cause per obligation.
fn cert_diagnostics(program: &Program, cert: &ShapeCert) -> Vec<Diagnostic> {
    if cert.all_pass() {
        return Vec::new();
    }
    let failed: Vec<&str> = cert
        .obligations()
        .into_iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| name)
        .collect();
    let location = program
        .functions
        .iter()
        .find(|f| f.stencil_program)
        .map_or_else(|| Location::func("program"), |f| Location::func(&f.name));
    let mut diag = Diagnostic::error(
        codes::E0600,
        location,
        format!("shape verification failed: {}", failed.join(", ")),
    );
    for name in failed {
        diag = diag.with_cause(format!("obligation {} does not hold", name), None);
    }
    vec![diag]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FunctionBuilder;
    use crate::ir::{ArithKind, Bounds, ElementType, Type};

    fn copy_program(ub: i64) -> Program {
        let field = Type::Field {
            element: ElementType::F64,
            rank: 1,
        };
        let mut program = Program::new();
        let mut f = FunctionBuilder::new(&mut program, "copy", vec![field.clone(), field]);
        let (input, output) = (f.arg(0), f.arg(1));
        let t = f.load(input);
        let mut apply = f.apply(&[t]);
        let arg = apply.arg(0);
        let x = apply.access(arg, vec![-1]);
        apply.ret(&[x], None);
        let out = apply.finish().unwrap()[0];
        f.store(out, output, Bounds::new(vec![0], vec![ub]));
        program
    }

    #[test]
    fn full_pipeline_populates_all_artifacts() {
        let mut state = CompilationState::new(copy_program(8));
        let mut seen = Vec::new();
        let result = run_pipeline(&mut state, PassId::VerifyShapes, false, |id, _| {
            seen.push(id)
        });
        assert!(result.is_ok());
        assert_eq!(seen, required_passes(PassId::VerifyShapes));
        assert_eq!(state.extents.as_ref().map(AccessExtents::len), Some(1));
        assert_eq!(state.shapes.as_ref().map(|s| s.inferred.len()), Some(2));
        assert!(state.cert.as_ref().is_some_and(|c| c.all_pass()));
        assert!(!state.has_error);
    }

    #[test]
    fn extent_only_run_leaves_program_untouched() {
        let mut state = CompilationState::new(copy_program(8));
        run_pipeline(&mut state, PassId::ExtentAnalysis, false, |_, _| {}).unwrap();
        assert!(state.extents.is_some());
        assert!(state.shapes.is_none());
        assert!(state.program.ops().all(|op| !op.is_shape_inferable() || op.bounds().is_none()));
    }

    #[test]
    fn inference_error_stops_before_verification() {
        let mut state = CompilationState::new(copy_program(0));
        let err = run_pipeline(&mut state, PassId::VerifyShapes, false, |_, _| {}).unwrap_err();
        assert_eq!(err.failing_pass, PassId::ShapeInference);
        assert!(state.has_error);
        assert!(state.cert.is_none());
        assert_eq!(state.diagnostics[0].code, Some(codes::E0102));
    }

    #[test]
    fn extent_error_stops_before_inference() {
        let field = Type::Field {
            element: ElementType::F64,
            rank: 1,
        };
        let mut program = Program::new();
        let mut f = FunctionBuilder::new(&mut program, "ragged", vec![field.clone(), field]);
        let (input, output) = (f.arg(0), f.arg(1));
        let t = f.load(input);
        let mut apply = f.apply(&[t]);
        let arg = apply.arg(0);
        let x = apply.access(arg, vec![-1]);
        let y = apply.access(arg, vec![1, 0]);
        let s = apply.arith(ArithKind::Add, x, y);
        apply.ret(&[s], None);
        let out = apply.finish().unwrap()[0];
        f.store(out, output, Bounds::new(vec![0], vec![8]));

        let mut state = CompilationState::new(program);
        let err = run_pipeline(&mut state, PassId::VerifyShapes, false, |_, _| {}).unwrap_err();
        assert_eq!(err.failing_pass, PassId::ExtentAnalysis);
        assert_eq!(state.diagnostics[0].code, Some(codes::E0100));
        assert!(state.extents.is_none());
        assert!(state.shapes.is_none());
    }

    #[test]
    fn failed_cert_lists_obligations() {
        let program = copy_program(8);
        let cert = crate::verify::verify_shapes(&program);
        let diags = cert_diagnostics(&program, &cert);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Some(codes::E0600));
        assert!(diags[0].message.contains("V1_bounds_finalized"));
        assert_eq!(diags[0].cause_chain.len(), 3);
        assert_eq!(diags[0].location, Location::func("copy"));
    }

    #[test]
    fn provenance_hash_is_stable_hex() {
        let a = compute_provenance("{}");
        let b = compute_provenance("{}");
        assert_eq!(a.source_hash, b.source_hash);
        assert_eq!(a.source_hash_hex().len(), 64);
        assert_ne!(a.source_hash, compute_provenance("{ }").source_hash);
        let json: serde_json::Value = serde_json::from_str(&a.to_json()).unwrap();
        assert_eq!(json["compiler_version"], env!("CARGO_PKG_VERSION"));
    }
}
