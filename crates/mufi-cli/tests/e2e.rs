//! End-to-end tests for the mufi CLI.
//!
//! The engine is replaced by small shell scripts; every test runs with its
//! own HOME and config directory so nothing installed on the machine leaks in.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Scratch home directory with an optional stub engine executable.
struct TestEnv {
    temp_dir: TempDir,
    engine: Option<PathBuf>,
}

impl TestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir_all(temp_dir.path().join("config")).expect("Failed to create config dir");
        Self {
            temp_dir,
            engine: None,
        }
    }

    /// Install a stub engine whose shell body is `body`.
    fn with_engine(mut self, body: &str) -> Self {
        let path = self.temp_dir.path().join("mufiz-stub");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write stub");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod stub");
        self.engine = Some(path);
        self
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, contents).expect("Failed to write file");
        path
    }

    fn mufi(&self) -> Command {
        let mut cmd = Command::cargo_bin("mufi").expect("Failed to find mufi binary");
        cmd.current_dir(self.path())
            .env("HOME", self.path())
            .env("XDG_CONFIG_HOME", self.path().join("config"))
            .env_remove("MUFI_EXECUTABLE")
            .env_remove("MUFI_LIBRARY")
            .env_remove("RUST_LOG");
        if let Some(engine) = &self.engine {
            cmd.env("MUFI_EXECUTABLE", engine);
        }
        cmd
    }
}

/// Runs `--run <file>` by printing the program text.
const CAT_ENGINE: &str = r#"[ "$1" = "--run" ] || exit 64
cat "$2""#;

// =============================================================================
// mufi which
// =============================================================================

#[test]
fn test_which_without_engine() {
    let env = TestEnv::new();

    env.mufi()
        .env("PATH", "")
        .arg("which")
        .assert()
        .failure()
        .stdout(
            predicate::str::contains("executable: ")
                .and(predicate::str::contains("not found"))
                .and(predicate::str::contains("(mufiz)")),
        )
        .stderr(
            predicate::str::contains("engine executable not found")
                .and(predicate::str::contains("hint"))
                .and(predicate::str::contains("MUFI_EXECUTABLE")),
        );
}

#[test]
fn test_which_uses_environment_override() {
    let env = TestEnv::new().with_engine(CAT_ENGINE);
    let engine = env.engine.clone().unwrap();

    env.mufi()
        .arg("which")
        .assert()
        .success()
        .stdout(predicate::str::contains(engine.to_str().unwrap()));
}

#[test]
fn test_executable_flag_beats_environment() {
    let env = TestEnv::new().with_engine(CAT_ENGINE);
    let other = env.path().join("other-engine");
    fs::write(&other, "#!/bin/sh\necho other\n").unwrap();
    fs::set_permissions(&other, fs::Permissions::from_mode(0o755)).unwrap();

    env.mufi()
        .args(["--executable", other.to_str().unwrap(), "which"])
        .assert()
        .success()
        .stdout(predicate::str::contains("other-engine"));
}

// =============================================================================
// mufi run / eval (process mode)
// =============================================================================

#[test]
fn test_eval_in_process_mode() {
    let env = TestEnv::new().with_engine(CAT_ENGINE);

    env.mufi()
        .args(["eval", "--mode", "process", "print(\"hi\");"])
        .assert()
        .success()
        .stdout("print(\"hi\");")
        .stderr(predicate::str::is_match(r"finished in \d+ ms").unwrap());
}

#[test]
fn test_run_file_in_process_mode() {
    let env = TestEnv::new().with_engine(CAT_ENGINE);
    let program = env.write("main.mufi", "var x = 40 + 2;\n");

    env.mufi()
        .args(["run", "--mode", "process", program.to_str().unwrap()])
        .assert()
        .success()
        .stdout("var x = 40 + 2;\n");
}

#[test]
fn test_run_propagates_exit_code() {
    let env = TestEnv::new().with_engine("echo partial; echo boom >&2; exit 3");
    let program = env.write("fail.mufi", "fail();\n");

    env.mufi()
        .args(["run", "--mode", "process", program.to_str().unwrap()])
        .assert()
        .code(3)
        .stdout("partial\n")
        .stderr(
            predicate::str::contains("boom")
                .and(predicate::str::is_match(r"exited with code 3 in \d+ ms").unwrap()),
        );
}

#[test]
fn test_run_json_report() {
    let env = TestEnv::new().with_engine(CAT_ENGINE);

    let output = env
        .mufi()
        .args(["eval", "--mode", "process", "--json", "print(1);"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(report["mode"], "process");
    assert_eq!(report["exit_code"], 0);
    assert_eq!(report["output"], "print(1);");
    assert!(report["elapsed_ms"].is_u64());
}

#[test]
fn test_run_timeout() {
    let env = TestEnv::new().with_engine("sleep 5");

    env.mufi()
        .args(["eval", "--mode", "process", "--timeout", "100", "loop();"])
        .timeout(std::time::Duration::from_secs(4))
        .assert()
        .failure()
        .stderr(predicate::str::contains("timed out"));
}

#[test]
fn test_run_nonexistent_program() {
    let env = TestEnv::new().with_engine(CAT_ENGINE);

    env.mufi()
        .args(["run", "--mode", "process", "/nonexistent/program.mufi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Program not found"));
}

// =============================================================================
// Embedded mode and configuration
// =============================================================================

#[test]
fn test_embedded_without_library() {
    let env = TestEnv::new();

    env.mufi()
        .args(["eval", "print(1);"])
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("engine library not found")
                .and(predicate::str::contains("MUFI_LIBRARY")),
        );
}

#[test]
fn test_embedded_with_invalid_library() {
    let env = TestEnv::new();
    let library = env.write("libbroken.so", "not a shared object");

    env.mufi()
        .args(["--library", library.to_str().unwrap(), "eval", "print(1);"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load engine library"));
}

#[test]
fn test_invalid_config_file() {
    let env = TestEnv::new().with_engine(CAT_ENGINE);
    let config = env.write("bad.json", r#"{"timeout_ms": "soon"}"#);

    env.mufi()
        .args(["--config", config.to_str().unwrap(), "which"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn test_config_file_sets_default_timeout() {
    let env = TestEnv::new().with_engine("sleep 5");
    fs::create_dir_all(env.path().join("config").join("mufi")).unwrap();
    fs::write(
        env.path().join("config").join("mufi").join("config.json"),
        r#"{"timeout_ms": 100}"#,
    )
    .unwrap();

    env.mufi()
        .args(["eval", "--mode", "process", "loop();"])
        .timeout(std::time::Duration::from_secs(4))
        .assert()
        .failure()
        .stderr(predicate::str::contains("timed out"));
}

// =============================================================================
// mufi repl
// =============================================================================

#[test]
fn test_repl_round_trip() {
    let env = TestEnv::new().with_engine(
        r#"[ "$1" = "--repl" ] || exit 64
while IFS= read -r line; do echo "=> $line"; done"#,
    );

    env.mufi()
        .arg("repl")
        .write_stdin("print(1);\n")
        .timeout(std::time::Duration::from_secs(10))
        .assert()
        .success()
        .stdout(predicate::str::contains("=> print(1);"));
}
