use crate::collector::{AwaitError, OutputCollector};
use crate::error::ProcessError;
use crate::signals::{exit_code, parse_signal, probe_alive, signal_group};
use crate::spec::ProcessSpec;
use chrono::{DateTime, Local};
use futures::stream::{self, Stream, StreamExt};
use nix::sys::signal::Signal;
use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

// How long to wait for the OS to confirm a SIGKILL.
const KILL_CONFIRM: Duration = Duration::from_secs(5);

/// Lifecycle of a [`ManagedProcess`]. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Terminated,
}

#[derive(Debug, Clone)]
struct Termination {
    outcome: Result<i32, String>,
    at: DateTime<Local>,
}

#[derive(Debug)]
struct Running {
    pid: u32,
    started_at: DateTime<Local>,
    // written only by the exit watcher
    exit: watch::Receiver<Option<Termination>>,
}

/// One supervised child process.
///
/// Owns the OS process from [`start`](Self::start) until it is reaped, plus the
/// [`OutputCollector`] holding the tail of its console. All methods take `&self`, so an
/// instance can be shared behind an `Arc` and waited on from several tasks at once.
/// [`start`](Self::start) must run inside a tokio runtime.
#[derive(Debug)]
pub struct ManagedProcess {
    spec: ProcessSpec,
    name: String,
    collector: Arc<OutputCollector>,
    launch: Mutex<()>,
    running: OnceLock<Running>,
}

impl ManagedProcess {
    pub fn new(spec: ProcessSpec) -> Self {
        let collector = OutputCollector::new(spec.consolelines);
        if let Some(pattern) = &spec.waitfor {
            collector.track(pattern);
        }
        Self {
            name: spec.display_name(),
            spec,
            collector: Arc::new(collector),
            launch: Mutex::new(()),
            running: OnceLock::new(),
        }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.running.get().map(|running| running.pid)
    }

    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.running.get().map(|running| running.started_at)
    }

    pub fn ended_at(&self) -> Option<DateTime<Local>> {
        self.termination().map(|done| done.at)
    }

    pub fn state(&self) -> ProcessState {
        match self.running.get() {
            None => ProcessState::NotStarted,
            Some(running) if running.exit.borrow().is_none() => ProcessState::Running,
            Some(_) => ProcessState::Terminated,
        }
    }

    fn running(&self) -> Result<&Running, ProcessError> {
        self.running.get().ok_or_else(|| ProcessError::NotStarted {
            name: self.name.clone(),
        })
    }

    fn termination(&self) -> Option<Termination> {
        self.running
            .get()
            .and_then(|running| running.exit.borrow().clone())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.spec.cmd);
        cmd.args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(dir) = &self.spec.workingdir {
            cmd.current_dir(dir);
        }
        if let Some(env) = &self.spec.env {
            cmd.envs(env);
        }
        cmd
    }

    /*
        @@@
        @start();
        . Spawns the executable in its own process group, stdin on /dev/null, stdout/stderr piped.
        . Starts the capture task feeding the collector and the exit watcher that owns the child.
        . Fails with AlreadyStarted on a second call, with Spawn if the OS refuses the executable.
    */
    pub fn start(&self) -> Result<(), ProcessError> {
        let _launch = self.launch.lock().unwrap_or_else(PoisonError::into_inner);
        if self.running.get().is_some() {
            return Err(ProcessError::AlreadyStarted {
                name: self.name.clone(),
            });
        }

        let spawn_failed = |source: io::Error| {
            error!(process = %self.name, cmd = ?self.spec.cmd, error = %source, "failed to spawn");
            ProcessError::Spawn {
                name: self.name.clone(),
                source,
            }
        };
        let mut child = self.command().spawn().map_err(spawn_failed)?;
        let (Some(pid), Some(stdout), Some(stderr)) =
            (child.id(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Err(spawn_failed(io::Error::other("child stdio was not captured")));
        };

        let capture = tokio::spawn(capture_output(
            self.name.clone(),
            stdout,
            stderr,
            self.collector.clone(),
        ));
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(watch_exit(
            self.name.clone(),
            child,
            capture,
            self.collector.clone(),
            self.spec.drain_time(),
            exit_tx,
        ));

        let _ = self.running.set(Running {
            pid,
            started_at: Local::now(),
            exit: exit_rx,
        });
        info!(process = %self.name, pid, cmd = ?self.spec.cmd, args = ?self.spec.args, "spawned");
        Ok(())
    }

    /// True while running and the OS still knows the pid.
    pub fn is_alive(&self) -> bool {
        match self.running.get() {
            Some(running) => running.exit.borrow().is_none() && probe_alive(running.pid),
            None => false,
        }
    }

    /// Exit code once terminated.
    ///
    /// A console capture failure is sticky: every later call reports it as
    /// [`ProcessError::Background`], which still carries the real code in `exit_code`.
    pub fn exit_value(&self) -> Result<i32, ProcessError> {
        self.running()?;
        match self.termination() {
            Some(done) => self.settled(&done),
            None => Err(ProcessError::NotTerminated {
                name: self.name.clone(),
            }),
        }
    }

    /// Console tail, oldest line first, joined with `\n`.
    pub fn console(&self) -> String {
        self.collector.snapshot()
    }

    pub fn console_lines_seen(&self) -> u64 {
        self.collector.total_lines()
    }

    pub fn console_buffer_max_lines(&self) -> usize {
        self.collector.capacity()
    }

    pub fn set_console_buffer_max_lines(&self, lines: usize) {
        self.collector.set_capacity(lines);
    }

    /// Waits, without deadline, for the configured `waitfor` line.
    ///
    /// Returns at once if no message is configured or it was already printed, and fails
    /// with [`ProcessError::PatternNeverSeen`] once the process ends without printing it.
    pub async fn wait_for_console_message(&self) -> Result<(), ProcessError> {
        self.await_console(None).await
    }

    pub async fn wait_for_console_message_max_ms(&self, max_ms: u64) -> Result<(), ProcessError> {
        self.await_console(Some(Duration::from_millis(max_ms))).await
    }

    async fn await_console(&self, limit: Option<Duration>) -> Result<(), ProcessError> {
        self.running()?;
        let pattern = self.spec.waitfor.as_deref();
        let deadline = limit.map(|limit| Instant::now() + limit);
        match self.collector.await_message(pattern, deadline).await {
            Ok(()) => {
                if let Some(message) = pattern {
                    info!(process = %self.name, pattern = message, "console message seen");
                }
                Ok(())
            }
            Err(AwaitError::NeverSeen { pattern }) => Err(ProcessError::PatternNeverSeen {
                name: self.name.clone(),
                pattern,
                console: self.console(),
            }),
            Err(AwaitError::TimedOut { pattern }) => Err(ProcessError::Timeout {
                name: self.name.clone(),
                what: format!("console message `{pattern}`"),
                waited: limit.unwrap_or_default(),
            }),
        }
    }

    pub async fn wait_for_exit(&self) -> Result<i32, ProcessError> {
        let running = self.running()?;
        let done = self.terminated(running).await?;
        self.settled(&done)
    }

    /// `Some(exit code)` if the process ended within `max_ms`, `None` if it is still running.
    pub async fn wait_for_exit_max_ms(&self, max_ms: u64) -> Result<Option<i32>, ProcessError> {
        let running = self.running()?;
        match timeout(Duration::from_millis(max_ms), self.terminated(running)).await {
            Ok(done) => self.settled(&done?).map(Some),
            Err(_) => {
                debug!(process = %self.name, max_ms, "still running after wait");
                Ok(None)
            }
        }
    }

    pub async fn wait_for_exit_max_ms_or_destroy(&self, max_ms: u64) -> Result<i32, ProcessError> {
        if let Some(code) = self.wait_for_exit_max_ms(max_ms).await? {
            return Ok(code);
        }
        warn!(process = %self.name, max_ms, "did not exit in time, destroying");
        match self.destroy().await {
            // exited on its own between the timeout and the signal
            Err(ProcessError::AlreadyTerminated { .. }) => self.exit_value(),
            other => other,
        }
    }

    /*
        @@@
        @destroy();
        . Valid only while running: NotStarted / AlreadyTerminated otherwise.
        . Sends the configured stop signal to the process group and waits stoptime + drain for the exit watcher.
        . Escalates to SIGKILL, waits again, and reports DestroyFailed if death is still unconfirmed.
    */
    pub async fn destroy(&self) -> Result<i32, ProcessError> {
        let running = self.running()?;
        if running.exit.borrow().is_some() {
            return Err(ProcessError::AlreadyTerminated {
                name: self.name.clone(),
            });
        }

        let signal = parse_signal(&self.spec.stopsignal).unwrap_or(Signal::SIGTERM);
        let grace = self.spec.stop_time() + self.spec.drain_time();
        info!(process = %self.name, pid = running.pid, signal = ?signal, "sending stop signal");
        if let Err(err) = signal_group(running.pid, signal) {
            error!(process = %self.name, error = %err, "failed to send {}", signal);
        }
        if let Ok(done) = timeout(grace, self.terminated(running)).await {
            return self.settled(&done?);
        }

        let mut waited = grace;
        if signal != Signal::SIGKILL {
            warn!(process = %self.name, pid = running.pid, ?grace, "still alive, sending SIGKILL");
            if let Err(err) = signal_group(running.pid, Signal::SIGKILL) {
                error!(process = %self.name, error = %err, "failed to SIGKILL");
            }
            waited = KILL_CONFIRM + self.spec.drain_time();
            if let Ok(done) = timeout(waited, self.terminated(running)).await {
                return self.settled(&done?);
            }
        }

        error!(process = %self.name, pid = running.pid, "OS never confirmed termination");
        Err(ProcessError::DestroyFailed {
            name: self.name.clone(),
            pid: running.pid,
            waited,
        })
    }

    async fn terminated(&self, running: &Running) -> Result<Termination, ProcessError> {
        let mut exit = running.exit.clone();
        let seen = exit
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|done| (*done).clone());
        seen.ok_or_else(|| ProcessError::Background {
            name: self.name.clone(),
            task: "exit watch",
            reason: "watcher stopped without reporting an exit".to_string(),
            exit_code: None,
        })
    }

    fn settled(&self, done: &Termination) -> Result<i32, ProcessError> {
        let background = |task, reason, exit_code| ProcessError::Background {
            name: self.name.clone(),
            task,
            reason,
            exit_code,
        };
        match &done.outcome {
            Ok(code) => match self.collector.fault() {
                None => Ok(*code),
                Some(reason) => Err(background("capture", reason, Some(*code))),
            },
            Err(reason) => Err(background("exit watch", reason.clone(), None)),
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        let Some(running) = self.running.get() else {
            return;
        };
        if running.exit.borrow().is_none() {
            warn!(process = %self.name, pid = running.pid, "dropped while running, killing");
            if let Err(err) = signal_group(running.pid, Signal::SIGKILL) {
                error!(process = %self.name, error = %err, "failed to SIGKILL");
            }
        }
    }
}

fn console_lines<R>(reader: R) -> impl Stream<Item = io::Result<String>>
where
    R: AsyncRead + Unpin,
{
    stream::unfold(Some(BufReader::new(reader)), |state| async move {
        let Some(mut reader) = state else {
            return None;
        };
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                Some((Ok(String::from_utf8_lossy(&buf).into_owned()), Some(reader)))
            }
            Err(err) => Some((Err(err), None)),
        }
    })
}

async fn capture_output(
    name: String,
    stdout: ChildStdout,
    stderr: ChildStderr,
    collector: Arc<OutputCollector>,
) {
    let merged = stream::select(console_lines(stdout), console_lines(stderr));
    tokio::pin!(merged);
    while let Some(line) = merged.next().await {
        match line {
            Ok(line) => {
                debug!(target: "managed_process::console", process = %name, "{line}");
                collector.append(line);
            }
            Err(err) => {
                warn!(process = %name, error = %err, "console read failed");
                collector.record_fault(format!("reading console: {err}"));
            }
        }
    }
    debug!(process = %name, lines = collector.total_lines(), "console closed");
}

/*
    @@@
    @watch_exit();
    . Owns the child and reaps it, mapping signal deaths to 128 + signal.
    . Lets the capture task drain the pipes (bounded by drain_ms) so the console is complete.
    . Closes the collector, then publishes the termination: the only write to the lifecycle state.
*/
async fn watch_exit(
    name: String,
    mut child: Child,
    mut capture: JoinHandle<()>,
    collector: Arc<OutputCollector>,
    drain: Duration,
    exit: watch::Sender<Option<Termination>>,
) {
    let outcome = match child.wait().await {
        Ok(status) => Ok(exit_code(status)),
        Err(err) => {
            error!(process = %name, error = %err, "waiting for exit failed");
            Err(format!("waiting for exit: {err}"))
        }
    };

    match timeout(drain, &mut capture).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(process = %name, error = %err, "capture task died");
            collector.record_fault(format!("capture task: {err}"));
        }
        Err(_) => {
            warn!(process = %name, ?drain, "console still open after exit, abandoning capture");
            capture.abort();
        }
    }
    collector.close();

    match &outcome {
        Ok(code) => info!(process = %name, exit_code = code, "exited"),
        Err(reason) => warn!(process = %name, reason = %reason, "exit unknown"),
    }
    exit.send_replace(Some(Termination {
        outcome,
        at: Local::now(),
    }));
}
