//! Restart-until-clean decorator against real `/bin/sh` children

#![cfg(unix)]

mod common;

use common::{flaky, runs, sh};
use std::sync::Arc;
use std::time::Duration;
use subproc_common::{ExitCause, ProcessError};
use subproc_process::{DescriptorSpec, ProcessControl, ProcessHandle};
use subproc_supervisor::{RestartPolicy, RestartUntilClean};

#[tokio::test]
async fn test_wait_retries_until_clean_exit() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("counter");

    let process = RestartUntilClean::new(flaky(&counter, 2)).with_policy(RestartPolicy::immediate());
    process.start(None).await.unwrap();
    process.wait().await.unwrap();

    assert_eq!(process.restarts(), 2);
    assert_eq!(runs(&counter), 3);
    assert_eq!(process.stdout().unwrap().to_string_lossy(), "run 1\nrun 2\nrun 3\n");
}

#[tokio::test]
async fn test_signal_death_is_unclean() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("counter");

    let script = "n=$(cat \"$COUNTER\" 2>/dev/null || echo 0); n=$((n+1)); echo $n > \"$COUNTER\"; [ $n -ge 2 ] || kill -9 $$";
    let handle = ProcessHandle::new(
        sh(script).env_entry(format!("COUNTER={}", counter.display())),
        DescriptorSpec::new(),
    )
    .unwrap();

    let process = RestartUntilClean::new(handle).with_policy(RestartPolicy::immediate());
    process.start(None).await.unwrap();
    process.wait().await.unwrap();

    assert_eq!(process.restarts(), 1);
    assert_eq!(runs(&counter), 2);
}

#[tokio::test]
async fn test_restart_limit_exceeded() {
    let handle = ProcessHandle::new(sh("exit 2"), DescriptorSpec::new()).unwrap();
    let process = RestartUntilClean::new(handle).with_policy(RestartPolicy::immediate().with_max_restarts(3));

    process.start(None).await.unwrap();
    let err = process.wait().await.unwrap_err();

    assert!(matches!(err, ProcessError::RestartLimitExceeded { max_restarts: 3, .. }));
    assert_eq!(err.exit_cause(), Some(ExitCause::Code(2)));
    assert_eq!(process.restarts(), 3);
    assert_eq!(process.inner().launches(), 4);
}

#[tokio::test]
async fn test_stop_breaks_retry_loop() {
    let handle = ProcessHandle::new(sh("sleep 30"), DescriptorSpec::new()).unwrap();
    let process = Arc::new(RestartUntilClean::new(handle).with_policy(RestartPolicy::immediate()));
    process.start(None).await.unwrap();

    let waiter = {
        let process = Arc::clone(&process);
        tokio::spawn(async move { process.wait().await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    process.stop().await;

    let err = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("wait should return after stop")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.exit_cause(), Some(ExitCause::Signal(9)));
    assert_eq!(process.restarts(), 0);
    assert_eq!(process.inner().launches(), 1);
}

#[tokio::test]
async fn test_stop_interrupts_backoff() {
    let handle = ProcessHandle::new(sh("exit 1"), DescriptorSpec::new()).unwrap();
    let policy = RestartPolicy::immediate().with_initial_delay(Duration::from_secs(30));
    let process = Arc::new(RestartUntilClean::new(handle).with_policy(policy));
    process.start(None).await.unwrap();

    let waiter = {
        let process = Arc::clone(&process);
        tokio::spawn(async move { process.wait().await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    process.stop().await;

    let err = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("backoff should be interrupted by stop")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.exit_cause(), Some(ExitCause::Code(1)));
    assert_eq!(process.restarts(), 0);
}

#[tokio::test]
async fn test_wait_before_start_is_not_retried() {
    let handle = ProcessHandle::new(sh("exit 0"), DescriptorSpec::new()).unwrap();
    let process = RestartUntilClean::new(handle).with_policy(RestartPolicy::immediate());

    let err = process.wait().await.unwrap_err();
    assert!(matches!(err, ProcessError::InvalidState { .. }));
    assert_eq!(process.restarts(), 0);
}
