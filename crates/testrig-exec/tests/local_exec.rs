//! Integration tests for the local executor against the real shell

use std::sync::Arc;
use std::time::{Duration, Instant};

use testrig_core::RunContext;
use testrig_exec::{
    Executor, ExecError, LocalExecutor, TransferDirection, TransferOptions,
};

fn executor() -> LocalExecutor {
    LocalExecutor::new(Arc::new(RunContext::with_defaults()))
}

#[tokio::test]
async fn run_echo_produces_expected_output() {
    let output = executor()
        .run("echo hello", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(output.stdout, "hello\n");
    assert_eq!(output.stderr, "");
    assert_eq!(output.exit_code, 0);
}

#[tokio::test]
async fn run_returns_nonzero_exit_without_raising() {
    let output = executor()
        .run("exit 3", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(output.exit_code, 3);
}

#[tokio::test]
async fn run_expect_success_passes_through_on_zero_exit() {
    let output = executor()
        .run_expect_success("echo ok", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(output.exit_code, 0);
    assert_eq!(output.stdout, "ok\n");
}

#[tokio::test]
async fn run_expect_success_carries_the_output() {
    let result = executor()
        .run_expect_success("echo doomed; exit 3", Duration::from_secs(5))
        .await;

    match result {
        Err(ExecError::CommandFailed { command, output }) => {
            assert_eq!(command, "echo doomed; exit 3");
            assert_eq!(output.exit_code, 3);
            assert_eq!(output.stdout, "doomed\n");
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn timeout_kills_the_subprocess_and_leaves_executor_usable() {
    let exec = executor();

    let result = exec.run("sleep 10", Duration::from_millis(100)).await;
    assert!(matches!(result, Err(ExecError::Timeout { .. })));

    // The executor must stay usable after a timed-out command.
    let output = exec.run("echo alive", Duration::from_secs(5)).await.unwrap();
    assert_eq!(output.stdout, "alive\n");
}

#[tokio::test]
async fn timeout_expires_close_to_the_requested_duration() {
    let start = Instant::now();
    let result = executor().run("sleep 10", Duration::from_millis(200)).await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(ExecError::Timeout { .. })));
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn copy_round_trip_preserves_content() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src.txt");
    let dst = dir.path().join("nested/dst.txt");
    tokio::fs::write(&src, b"payload").await.unwrap();

    let exec = executor();
    exec.copy_to(
        src.to_str().unwrap(),
        dst.to_str().unwrap(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let back = dir.path().join("back.txt");
    exec.copy_from(
        dst.to_str().unwrap(),
        back.to_str().unwrap(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(tokio::fs::read(&back).await.unwrap(), b"payload");
}

#[tokio::test]
async fn copy_missing_source_is_a_transfer_failure() {
    let dir = tempfile::tempdir().unwrap();
    let result = executor()
        .copy_to(
            dir.path().join("missing").to_str().unwrap(),
            dir.path().join("dst").to_str().unwrap(),
            Duration::from_secs(5),
        )
        .await;

    assert!(matches!(result, Err(ExecError::TransferFailed { .. })));
}

#[tokio::test]
async fn executor_works_through_the_trait_object() {
    let exec: Arc<dyn Executor> = Arc::new(executor());

    assert!(!exec.is_remote());
    assert!(exec.is_active().await);
    let output = exec.run("echo dyn", Duration::from_secs(5)).await.unwrap();
    assert_eq!(output.stdout, "dyn\n");
}

#[tokio::test]
#[ignore = "requires rsync"]
async fn sync_is_idempotent() {
    let src_dir = tempfile::tempdir().unwrap();
    let dst_dir = tempfile::tempdir().unwrap();
    tokio::fs::write(src_dir.path().join("a.txt"), b"alpha")
        .await
        .unwrap();
    tokio::fs::write(src_dir.path().join("b.txt"), b"beta")
        .await
        .unwrap();

    let exec = executor();
    let src = format!("{}/", src_dir.path().display());
    let dst = format!("{}/", dst_dir.path().display());
    let options = TransferOptions::new().with_delete();

    for _ in 0..2 {
        exec.sync(
            &src,
            &dst,
            TransferDirection::ToDut,
            &options,
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dst_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }
}
