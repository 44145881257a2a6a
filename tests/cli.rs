// End-to-end tests driving the `emberc` binary directly, since `print`
// writes to real stdout and the library API has no hook to intercept it.

use std::io::Write;
use std::process::{Command, Stdio};

fn run_source(source: &str) -> std::process::Output {
    let mut tmp = tempfile();
    tmp.write_all(source.as_bytes()).unwrap();
    let path = tmp.into_temp_path();

    Command::new(env!("CARGO_BIN_EXE_emberc"))
        .arg(&path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("failed to run emberc")
}

// A bare-bones stand-in for `tempfile::NamedTempFile` - writing to a
// process-unique path under the system temp dir is enough here and avoids
// pulling in a dependency the rest of the crate has no other use for.
struct TempFile(std::path::PathBuf, std::fs::File);

impl TempFile {
    fn into_temp_path(self) -> std::path::PathBuf {
        let path = self.0.clone();
        std::mem::forget(self);
        path
    }
}

impl Write for TempFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.1.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.1.flush()
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn tempfile() -> TempFile {
    let pid = std::process::id();
    let counter = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!("ember_test_{pid}_{counter}.ember"));
    let file = std::fs::File::create(&path).expect("failed to create temp script");
    TempFile(path, file)
}

static COUNTER: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

#[test]
fn prints_arithmetic_results() {
    let out = run_source("print(1 + 2 * 3);");
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "7\n");
}

#[test]
fn prints_one_line_per_statement_in_order() {
    let out = run_source(
        "let greeting = \"hello\"; \
         print(greeting); \
         print(1 == 1); \
         print(not false);",
    );
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "hello\ntrue\ntrue\n");
}

#[test]
fn recursive_fibonacci_via_print() {
    let out = run_source(
        "fn fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); } \
         print(fib(15));",
    );
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "610\n");
}

#[test]
fn add_concatenates_strings_and_sums_numbers() {
    let out = run_source("print(\"foo\" + \"bar\"); print(1 + 2);");
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "foobar\n3\n");
}

#[test]
fn while_loop_accumulates() {
    let out = run_source(
        "let i = 0; let total = 0; \
         while (i < 5) { total = total + i; i = i + 1; } \
         print(total);",
    );
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "10\n");
}

#[test]
fn compile_error_exits_65_and_reports_on_stderr() {
    let out = run_source("let x = ;");
    assert_eq!(out.status.code(), Some(65));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Error"));
}

#[test]
fn runtime_error_exits_70_with_a_stack_trace() {
    let out = run_source("fn boom() { return 1 + true; } boom();");
    assert_eq!(out.status.code(), Some(70));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Operands must be two numbers or two strings"));
    assert!(stderr.contains("[line 1] in boom()"));
}

#[test]
fn missing_script_file_exits_74() {
    let out = Command::new(env!("CARGO_BIN_EXE_emberc"))
        .arg("/nonexistent/path/does-not-exist.ember")
        .output()
        .expect("failed to run emberc");
    assert_eq!(out.status.code(), Some(74));
}

#[test]
fn closures_returned_from_a_factory_share_state() {
    let out = run_source(
        "fn make() { let x = 0; fn inc() { x = x + 1; return x; } return inc; } \
         let c = make(); print(c()); print(c()); print(c());",
    );
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "1\n2\n3\n");
}

#[test]
fn logical_operators_short_circuit_correctly() {
    let out = run_source("if (not false and true or false) { print(\"ok\"); } else { print(\"no\"); }");
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "ok\n");
}

#[test]
fn bare_return_yields_meta_and_meta_equals_meta() {
    let out = run_source("fn f() { return; } print(f() == f());");
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "true\n");
}

#[test]
fn native_clock_and_type_are_available() {
    let out = run_source("print(type(1)); print(type(\"s\")); print(type(true));");
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "number\nstring\nbool\n");
}
