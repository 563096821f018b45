mod common;

use std::fs;
use std::time::{Duration, Instant};

use mufi_bridge::{Error, ProcessRunner};
use tempfile::TempDir;

/// Engine stand-in: `--run <file>` echoes a marker, then the file's contents.
const ECHO_ENGINE: &str = r#"[ "$1" = "--run" ] || exit 64
printf 'ran %s\n' "$(basename "$2")" >&2
cat "$2""#;

#[tokio::test]
async fn test_run_returns_stdout_then_stderr() {
    let temp = TempDir::new().unwrap();
    let exe = common::stub(temp.path(), "engine", ECHO_ENGINE);
    let runner = ProcessRunner::new(common::locator(&temp, &exe));

    let output = runner.run("print(\"hi\");\n", None).await.unwrap();
    let (stdout, stderr) = output.split_once("ran ").unwrap();
    assert_eq!(stdout, "print(\"hi\");\n");
    assert!(stderr.starts_with("mufi-run-"));
    assert!(stderr.trim_end().ends_with(".mufi"));
}

#[tokio::test]
async fn test_run_stdout_only() {
    let temp = TempDir::new().unwrap();
    let exe = common::stub(temp.path(), "engine", r#"echo "hello""#);
    let runner = ProcessRunner::new(common::locator(&temp, &exe));

    assert_eq!(runner.run("print(1);", None).await.unwrap(), "hello\n");
}

#[tokio::test]
async fn test_temporary_program_is_removed() {
    let temp = TempDir::new().unwrap();
    let record = temp.path().join("seen");
    let exe = common::stub(
        temp.path(),
        "engine",
        &format!(r#"printf '%s' "$2" > "{}""#, record.display()),
    );
    let runner = ProcessRunner::new(common::locator(&temp, &exe));

    runner.run("print(1);", None).await.unwrap();
    let program = fs::read_to_string(&record).unwrap();
    assert!(!program.is_empty());
    assert!(!std::path::Path::new(&program).exists());

    // Removed on failure too.
    let exe = common::stub(
        temp.path(),
        "failing",
        &format!(r#"printf '%s' "$2" > "{}"; exit 1"#, record.display()),
    );
    let runner = ProcessRunner::new(common::locator(&temp, &exe));
    assert!(runner.run("print(1);", None).await.is_err());
    let program = fs::read_to_string(&record).unwrap();
    assert!(!std::path::Path::new(&program).exists());
}

#[tokio::test]
async fn test_non_zero_exit_reports_both_streams() {
    let temp = TempDir::new().unwrap();
    let exe = common::stub(temp.path(), "engine", "echo partial; echo boom >&2; exit 2");
    let runner = ProcessRunner::new(common::locator(&temp, &exe));

    let err = runner.run("fail();", None).await.unwrap_err();
    match err {
        Error::ProcessFailed {
            exit_code,
            stdout,
            stderr,
        } => {
            assert_eq!(exit_code, 2);
            assert_eq!(stdout, "partial\n");
            assert_eq!(stderr, "boom\n");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_signal_exit_code() {
    let temp = TempDir::new().unwrap();
    let exe = common::stub(temp.path(), "engine", "kill -9 $$");
    let runner = ProcessRunner::new(common::locator(&temp, &exe));

    let err = runner.run("x", None).await.unwrap_err();
    assert!(matches!(err, Error::ProcessFailed { exit_code: 137, .. }));
}

#[tokio::test]
async fn test_timeout_kills_the_process() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("finished");
    let exe = common::stub(
        temp.path(),
        "engine",
        &format!(r#"sleep 2; touch "{}""#, marker.display()),
    );
    let runner = ProcessRunner::new(common::locator(&temp, &exe));

    let start = Instant::now();
    let err = runner
        .run("loop();", Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TimedOut(limit) if limit == Duration::from_millis(100)));
    assert!(start.elapsed() < Duration::from_secs(2));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_run_file() {
    let temp = TempDir::new().unwrap();
    let exe = common::stub(temp.path(), "engine", r#"[ "$1" = "--run" ] && cat "$2""#);
    let program = temp.path().join("main.mufi");
    fs::write(&program, "var x = 1;\n").unwrap();
    let runner = ProcessRunner::new(common::locator(&temp, &exe));

    assert_eq!(runner.run_file(&program, None).await.unwrap(), "var x = 1;\n");
    assert!(program.exists());
}

#[tokio::test]
async fn test_missing_executable() {
    let temp = TempDir::new().unwrap();
    let runner = ProcessRunner::new(common::isolated(&temp));

    assert_eq!(runner.find_executable(), None);
    assert!(matches!(
        runner.run("print(1);", None).await,
        Err(Error::ExecutableNotFound)
    ));
}
