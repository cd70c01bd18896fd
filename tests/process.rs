// tests/process.rs

//! Child processes and cancellation across threads

use jhbuild_bootstrap::Outcome;
use jhbuild_bootstrap::process::{CancellationState, OutputCapture, ProcessRunner, ShellCommand};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_cancel_from_another_thread_releases_wait() {
    let cancellation = CancellationState::new();
    let runner = ProcessRunner::new("sh", Arc::clone(&cancellation));
    let handle = match runner
        .run(&ShellCommand::new(["sleep", "30"]), OutputCapture::all())
        .unwrap()
    {
        Outcome::Completed(handle) => handle,
        Outcome::Cancelled => panic!("nothing was cancelled yet"),
    };

    let canceller = {
        let cancellation = Arc::clone(&cancellation);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            cancellation.cancel();
        })
    };

    let started = Instant::now();
    let status = handle.wait().unwrap();
    canceller.join().unwrap();

    assert!(!status.success());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(cancellation.is_cancelled());
}

#[test]
fn test_no_spawn_after_cancel() {
    let cancellation = CancellationState::new();
    let runner = ProcessRunner::new("sh", Arc::clone(&cancellation));
    cancellation.cancel();

    let outcome = runner
        .run_to_completion(&ShellCommand::new(["true"]), OutputCapture::none())
        .unwrap();
    assert!(outcome.is_cancelled());
}

#[test]
fn test_grandchildren_do_not_hold_output_open() {
    let cancellation = CancellationState::new();
    let runner = ProcessRunner::new("sh", Arc::clone(&cancellation));
    // the backgrounded sleep inherits the pipes
    let command = ShellCommand::new(["echo", "started;", "sleep", "30", "&", "sleep", "30"]);
    let mut handle = match runner.run(&command, OutputCapture::all()).unwrap() {
        Outcome::Completed(handle) => handle,
        Outcome::Cancelled => panic!("nothing was cancelled yet"),
    };

    let canceller = {
        let cancellation = Arc::clone(&cancellation);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            cancellation.cancel();
        })
    };

    let started = Instant::now();
    handle.wait().unwrap();
    let output = handle.take_output();
    canceller.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(output.stdout.as_deref(), Some("started\n"));
}
