use managed_process::{ErrorKind, ManagedProcess, ProcessError, ProcessSpec, ProcessState};
use std::time::Duration;
use tokio::time::{sleep, timeout};

// Shortcut for a process that prints two lines and exits on its own
fn self_terminating(message: &str) -> ManagedProcess {
    ManagedProcess::new(
        ProcessSpec::new("echo")
            .arg("Lorem ipsum dolor sit amet, consectetur adipisci elit, sed eiusmod tempor incidunt ut \nlabore et dolore magna aliqua.")
            .wait_for(message),
    )
}

fn sleeper(secs: &str) -> ManagedProcess {
    ManagedProcess::new(
        ProcessSpec::new("sleep")
            .arg(secs)
            .stop_timeout(Duration::from_millis(500)),
    )
}

#[tokio::test]
async fn everything_but_start_requires_start() {
    let p = ManagedProcess::new(ProcessSpec::new("someExec").wait_for("Never say never..."));
    assert!(!p.is_alive());
    assert_eq!(p.state(), ProcessState::NotStarted);
    assert_eq!(p.console(), "");

    let usage = |result: Result<_, ProcessError>| {
        let err = result.err().expect("must fail before start");
        assert!(matches!(err, ProcessError::NotStarted { .. }), "{err}");
        assert_eq!(err.kind(), ErrorKind::Usage);
    };
    usage(p.destroy().await.map(|_| ()));
    usage(p.exit_value().map(|_| ()));
    usage(p.wait_for_exit().await.map(|_| ()));
    usage(p.wait_for_exit_max_ms(1234).await.map(|_| ()));
    usage(p.wait_for_console_message().await);
    usage(p.wait_for_console_message_max_ms(1234).await);
    usage(p.wait_for_exit_max_ms_or_destroy(1234).await.map(|_| ()));
}

#[tokio::test]
async fn missing_executable_is_a_spawn_error() {
    let p = ManagedProcess::new(ProcessSpec::new("someExec"));
    let err = p.start().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Spawn);
    assert_eq!(p.state(), ProcessState::NotStarted);
    assert!(!p.is_alive());
}

#[tokio::test]
async fn missing_workingdir_is_a_spawn_error() {
    let p = ManagedProcess::new(ProcessSpec::new("true").workingdir("/nonexistent/dir"));
    assert_eq!(p.start().unwrap_err().kind(), ErrorKind::Spawn);
}

#[tokio::test]
async fn echo_two_lines() {
    let p = ManagedProcess::new(ProcessSpec::new("echo").arg("hello\nworld").wait_for("hello"));
    p.start().unwrap();
    timeout(Duration::from_secs(5), p.wait_for_console_message())
        .await
        .expect("message wait hung")
        .unwrap();
    assert_eq!(p.wait_for_exit().await.unwrap(), 0);
    assert_eq!(p.console(), "hello\nworld");
    assert_eq!(p.exit_value().unwrap(), 0);
    assert!(!p.is_alive());
}

#[tokio::test]
async fn seen_message_after_termination_returns() {
    let p = self_terminating("incidunt");
    p.start().unwrap();
    // no wait_*() here, just give it a moment to finish by itself
    sleep(Duration::from_millis(1000)).await;
    timeout(Duration::from_secs(1), p.wait_for_console_message())
        .await
        .expect("must not block once terminated")
        .unwrap();
}

#[tokio::test]
async fn wrong_message_after_termination_fails() {
    let p = self_terminating("some console message which will never appear");
    p.start().unwrap();
    sleep(Duration::from_millis(1000)).await;
    let err = timeout(Duration::from_secs(1), p.wait_for_console_message())
        .await
        .expect("must not hang")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PatternNeverSeen);
    assert!(err.to_string().contains("labore et dolore"));
}

#[tokio::test]
async fn silent_exit_without_pattern_fails_promptly() {
    let p = ManagedProcess::new(ProcessSpec::new("true").wait_for("ready"));
    p.start().unwrap();
    let err = timeout(Duration::from_secs(5), p.wait_for_console_message())
        .await
        .expect("must not hang")
        .unwrap_err();
    assert!(matches!(err, ProcessError::PatternNeverSeen { .. }));
}

#[tokio::test]
async fn self_terminating_exec() {
    let p = self_terminating("incidunt");
    assert!(!p.is_alive());
    p.set_console_buffer_max_lines(25);
    p.start().unwrap();

    p.wait_for_console_message().await.unwrap();
    p.wait_for_exit().await.unwrap();
    p.exit_value().unwrap();
    assert!(!p.is_alive());

    // destroy() on a process which already terminated is a usage error
    let err = p.destroy().await.unwrap_err();
    assert!(matches!(err, ProcessError::AlreadyTerminated { .. }));
    assert_eq!(p.state(), ProcessState::Terminated);

    let console = p.console();
    assert!(console.len() > 10);
    assert!(console.contains('\n'));
    assert_eq!(p.console_buffer_max_lines(), 25);
}

#[tokio::test]
async fn double_start_is_rejected() {
    let p = sleeper("5");
    p.start().unwrap();
    let err = p.start().unwrap_err();
    assert!(matches!(err, ProcessError::AlreadyStarted { .. }));
    p.destroy().await.unwrap();
}

#[tokio::test]
async fn exit_value_before_exit_is_not_terminated() {
    let p = sleeper("5");
    p.start().unwrap();
    assert!(matches!(p.exit_value(), Err(ProcessError::NotTerminated { .. })));
    p.destroy().await.unwrap();
}

#[tokio::test]
async fn bounded_wait_times_out_without_killing() {
    let p = sleeper("5");
    p.start().unwrap();
    assert!(p.is_alive());
    assert_eq!(p.wait_for_exit_max_ms(200).await.unwrap(), None);
    assert!(p.is_alive());
    assert_eq!(p.state(), ProcessState::Running);
    p.destroy().await.unwrap();
    assert!(!p.is_alive());
}

#[tokio::test]
async fn wait_or_destroy_kills_a_stuck_process() {
    let p = sleeper("5");
    p.start().unwrap();
    assert!(p.is_alive());
    let code = p.wait_for_exit_max_ms_or_destroy(200).await.unwrap();
    assert!(!p.is_alive());
    assert_eq!(code, 143);
    assert_eq!(p.exit_value().unwrap(), 143);
}

#[tokio::test]
async fn wait_or_destroy_keeps_natural_exit() {
    let p = ManagedProcess::new(ProcessSpec::new("sh").args(["-c", "exit 3"]));
    p.start().unwrap();
    assert_eq!(p.wait_for_exit_max_ms_or_destroy(5_000).await.unwrap(), 3);
    assert!(!p.is_alive());
}

#[tokio::test]
async fn ignored_stop_signal_escalates_to_sigkill() {
    let p = ManagedProcess::new(
        ProcessSpec::new("sh")
            .args(["-c", "trap '' TERM; echo trapped; sleep 5"])
            .wait_for("trapped")
            .stop_timeout(Duration::from_millis(300))
            .drain_timeout(Duration::from_millis(300)),
    );
    p.start().unwrap();
    p.wait_for_console_message().await.unwrap();
    assert_eq!(p.destroy().await.unwrap(), 137);
    assert!(!p.is_alive());
}

#[tokio::test]
async fn console_keeps_last_lines_in_order() {
    let p = ManagedProcess::new(
        ProcessSpec::new("sh")
            .args(["-c", "i=1; while [ $i -le 50 ]; do echo line$i; i=$((i+1)); done"])
            .console_lines(10),
    );
    p.start().unwrap();
    p.wait_for_exit().await.unwrap();
    let expected: Vec<String> = (41..=50).map(|i| format!("line{i}")).collect();
    assert_eq!(p.console(), expected.join("\n"));
    assert_eq!(p.console_lines_seen(), 50);
}

#[tokio::test]
async fn stderr_env_and_workingdir() {
    let p = ManagedProcess::new(
        ProcessSpec::new("sh")
            .args(["-c", "echo \"$GREETING\"; pwd; echo oops >&2"])
            .env("GREETING", "hi there")
            .workingdir("/"),
    );
    p.start().unwrap();
    p.wait_for_exit().await.unwrap();
    let lines: Vec<String> = p.console().lines().map(str::to_string).collect();
    assert!(lines.contains(&"hi there".to_string()), "{lines:?}");
    assert!(lines.contains(&"/".to_string()), "{lines:?}");
    assert!(lines.contains(&"oops".to_string()), "{lines:?}");
}

#[tokio::test]
async fn bounded_message_wait_times_out() {
    let p = ManagedProcess::new(ProcessSpec::new("sleep").arg("5").wait_for("never"));
    p.start().unwrap();
    let err = p.wait_for_console_message_max_ms(200).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    // the wait gave up, the process did not
    assert!(p.is_alive());
    p.destroy().await.unwrap();
}

#[tokio::test]
async fn concurrent_waiters_all_see_the_exit() {
    let p = std::sync::Arc::new(ManagedProcess::new(
        ProcessSpec::new("sh").args(["-c", "sleep 0.2; echo done"]).wait_for("done"),
    ));
    p.start().unwrap();
    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let p = p.clone();
            tokio::spawn(async move {
                p.wait_for_console_message().await?;
                p.wait_for_exit().await
            })
        })
        .collect();
    for waiter in waiters {
        assert_eq!(waiter.await.unwrap().unwrap(), 0);
    }
}

#[tokio::test]
async fn dropping_a_running_process_kills_it() {
    let p = sleeper("30");
    p.start().unwrap();
    let pid = p.pid().unwrap();
    drop(p);
    let mut gone = false;
    for _ in 0..50 {
        sleep(Duration::from_millis(100)).await;
        if !managed_process::signals::probe_alive(pid) {
            gone = true;
            break;
        }
    }
    assert!(gone, "pid {pid} survived its ManagedProcess");
}
