// Integration tests for the `stencilc` binary.
//
// These tests verify:
// - Minimal pass evaluation for each --emit target
// - Exit codes: 0 success, 1 compile error, 2 I/O or decode error
// - Output to stdout vs. `-o`

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn stencilc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_stencilc"))
}

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn demo(name: &str) -> PathBuf {
    project_root().join("demos").join(name)
}

fn run(args: &[&str], source: &Path) -> Output {
    Command::new(stencilc_binary())
        .args(args)
        .arg(source)
        .output()
        .expect("failed to run stencilc")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn default_emit_prints_inferred_ir() {
    let output = run(&[], &demo("laplace.json"));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let ir = stdout(&output);
    assert!(ir.contains("stencil.load %0 ([-1, 0] : [11, 10]) : !stencil.temp<12x10xf64>"));
    assert!(ir.contains("!stencil.temp<10x10xf64>"));
}

#[test]
fn emit_shapes_is_json() {
    let output = run(&["--emit", "shapes"], &demo("hdiff.json"));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let ops = json["functions"][0]["ops"].as_array().unwrap();
    // two loads, three applies
    assert_eq!(ops.len(), 5);
    assert_eq!(ops[0]["name"], "stencil.load");
    assert_eq!(ops[0]["lb"], serde_json::json!([-2, -1, 0]));
    assert_eq!(ops[0]["shape"], serde_json::json!([68, 66, 60]));
    assert_eq!(ops[1]["shape"], serde_json::json!([64, 64, 60]));
}

#[test]
fn emit_extents_reports_unroll_adjusted_extent() {
    let output = run(&["--emit", "extents"], &demo("unrolled.json"));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let operand = &json["applies"][0]["operands"][0];
    assert_eq!(operand["negative"], serde_json::json!([1, 0]));
    assert_eq!(operand["positive"], serde_json::json!([1, 0]));
}

#[test]
fn emit_extents_skips_shape_inference() {
    // The empty store domain only fails during shape inference.
    let output = run(&["--emit", "extents", "--verbose"], &demo("degenerate.json"));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let err = stderr(&output);
    assert!(err.contains("stencilc: extent_analysis complete"));
    assert!(!err.contains("shape_inference"));
}

#[test]
fn shape_error_exits_with_1() {
    let output = run(&[], &demo("degenerate.json"));
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("error[E0102]"), "stderr: {}", err);
    assert!(err.contains("@empty_domain, op #0 (stencil.load)"), "stderr: {}", err);
    assert!(stdout(&output).is_empty());
}

#[test]
fn verbose_reports_each_pass() {
    let output = run(&["--verbose"], &demo("laplace.json"));
    assert!(output.status.success());
    let err = stderr(&output);
    for pass in ["extent_analysis", "shape_inference", "verify_shapes"] {
        assert!(
            err.contains(&format!("stencilc: {} complete", pass)),
            "missing {} in: {}",
            pass,
            err
        );
    }
}

#[test]
fn build_info_hashes_source() {
    let output = run(&["--emit", "build-info"], &demo("laplace.json"));
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["source_hash"].as_str().map(str::len), Some(64));
    assert_eq!(json["compiler_version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn output_flag_writes_file() {
    let path = std::env::temp_dir().join(format!("stencilc_cli_{}.mlir", std::process::id()));
    let output = run(&["-o", path.to_str().unwrap()], &demo("laplace.json"));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).is_empty());
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.starts_with("func @laplace("));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn missing_file_exits_with_2() {
    let output = run(&[], &demo("does_not_exist.json"));
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn invalid_json_exits_with_2() {
    let path = std::env::temp_dir().join(format!("stencilc_bad_{}.json", std::process::id()));
    std::fs::write(&path, "{ \"functions\": [ {").unwrap();
    let output = run(&[], &path);
    assert_eq!(output.status.code(), Some(2));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn load_error_exits_with_1() {
    let path = std::env::temp_dir().join(format!("stencilc_undef_{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{"functions": [{"name": "f", "args": [], "ops": [
            {"op": "load", "result": "t", "field": "missing"}
        ]}]}"#,
    )
    .unwrap();
    let output = run(&[], &path);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("error[E0001]"));
    let _ = std::fs::remove_file(&path);
}
