//! Shared helpers for supervision tests

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;
use subproc_process::{CaptureBuffer, DescriptorSpec, LaunchSpec, ProcessHandle};

pub fn sh(script: &str) -> LaunchSpec {
    LaunchSpec::new("/bin/sh").arg("-c").arg(script)
}

/// A process that fails `failures` times, then exits cleanly.
///
/// Runs are counted in `counter`; every run prints "run N".
pub fn flaky(counter: &Path, failures: u32) -> ProcessHandle {
    let script = format!(
        "n=$(cat \"$COUNTER\" 2>/dev/null || echo 0); n=$((n+1)); echo $n > \"$COUNTER\"; echo \"run $n\"; [ $n -gt {} ]",
        failures
    );
    ProcessHandle::new(
        sh(&script).env_entry(format!("COUNTER={}", counter.display())),
        DescriptorSpec::captured(),
    )
    .unwrap()
}

pub fn runs(counter: &Path) -> u32 {
    std::fs::read_to_string(counter)
        .map(|s| s.trim().parse().unwrap_or(0))
        .unwrap_or(0)
}

pub async fn wait_for_output(buffer: &CaptureBuffer, needle: &str) -> bool {
    for _ in 0..200 {
        if buffer.to_string_lossy().contains(needle) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}
