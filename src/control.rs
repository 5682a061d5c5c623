use crate::parse::Config;
use crate::runtime::{ManagedProcess, ProcessState};
use crate::shell::ShellCommand;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{info, warn};

// Named processes built from the config file; fixed for the life of the shell.
pub type ProcessTable = Arc<BTreeMap<String, Arc<ManagedProcess>>>;

pub fn build_table(cfg: &Config) -> ProcessTable {
    let table = cfg
        .processes
        .iter()
        .map(|(name, program)| (name.clone(), Arc::new(ManagedProcess::new(program.spec.clone()))))
        .collect();
    Arc::new(table)
}

pub fn autostart(cfg: &Config, table: &ProcessTable) {
    for (name, program) in &cfg.processes {
        if !program.autostart {
            continue;
        }
        if let Some(process) = table.get(name) {
            match process.start() {
                Ok(()) => info!(program = %name, "autostarted"),
                Err(err) => warn!(program = %name, error = %err, "autostart failed"),
            }
        }
    }
}



/*
    @@@
    @dispatch();
    . Runs one parsed shell command against the table and returns the text to print.
    . Lifecycle errors (usage, timeouts, missing patterns) are reported as text, never panics.
*/
pub async fn dispatch(cmd: ShellCommand, table: &ProcessTable) -> String {
    let name = match &cmd {
        ShellCommand::Status => return status_report(table),
        ShellCommand::Help => return crate::shell::HELP.to_string(),
        ShellCommand::Exit => return String::new(),
        ShellCommand::Start(name)
        | ShellCommand::Await(name, _)
        | ShellCommand::Wait(name, _)
        | ShellCommand::Stop(name, _)
        | ShellCommand::Kill(name)
        | ShellCommand::Console(name) => name.clone(),
    };
    let Some(process) = table.get(&name) else {
        return format!("No such program: `{name}`");
    };

    match cmd {
        ShellCommand::Start(_) => match process.start() {
            Ok(()) => format!("Started `{name}` (pid {})", process.pid().unwrap_or_default()),
            Err(err) => format!("Error: {err}"),
        },
        ShellCommand::Await(_, max_ms) => {
            let seen = match max_ms {
                Some(ms) => process.wait_for_console_message_max_ms(ms).await,
                None => process.wait_for_console_message().await,
            };
            match seen {
                Ok(()) => format!("`{name}` is ready"),
                Err(err) => format!("Error: {err}"),
            }
        }
        ShellCommand::Wait(_, max_ms) => match max_ms {
            Some(ms) => match process.wait_for_exit_max_ms(ms).await {
                Ok(Some(code)) => format!("`{name}` exited with {code}"),
                Ok(None) => format!("`{name}` still running after {ms} ms"),
                Err(err) => format!("Error: {err}"),
            },
            None => match process.wait_for_exit().await {
                Ok(code) => format!("`{name}` exited with {code}"),
                Err(err) => format!("Error: {err}"),
            },
        },
        ShellCommand::Stop(_, max_ms) => {
            match process.wait_for_exit_max_ms_or_destroy(max_ms.unwrap_or(0)).await {
                Ok(code) => format!("`{name}` stopped with {code}"),
                Err(err) => format!("Error: {err}"),
            }
        }
        ShellCommand::Kill(_) => match process.destroy().await {
            Ok(code) => format!("`{name}` destroyed ({code})"),
            Err(err) => format!("Error: {err}"),
        },
        ShellCommand::Console(_) => process.console(),
        ShellCommand::Status | ShellCommand::Help | ShellCommand::Exit => String::new(),
    }
}

pub fn status_report(table: &ProcessTable) -> String {
    let mut out = String::new();
    for (name, process) in table.iter() {
        let detail = match process.state() {
            ProcessState::NotStarted => "not started".to_string(),
            ProcessState::Running => format!(
                "running  pid {}  since {}",
                process.pid().unwrap_or_default(),
                process
                    .started_at()
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default()
            ),
            ProcessState::Terminated => format!(
                "exited {}  at {}",
                process
                    .exit_value()
                    .map(|code| code.to_string())
                    .unwrap_or_else(|err| err.to_string()),
                process
                    .ended_at()
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default()
            ),
        };
        let _ = writeln!(
            out,
            "{name:<16} {detail}  ({} console lines)",
            process.console_lines_seen()
        );
    }
    out
}

/// Destroys every process still running. Used on shell exit and on termination signals.
pub async fn shutdown_all(table: &ProcessTable) {
    for (name, process) in table.iter() {
        if process.state() != ProcessState::Running {
            continue;
        }
        match process.destroy().await {
            Ok(code) => info!(program = %name, exit_code = code, "stopped on shutdown"),
            Err(err) => warn!(program = %name, error = %err, "shutdown destroy failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ProcessTable {
        let yaml = r#"
processes:
  greeter:
    cmd: sh
    args: ["-c", "echo hello; echo ready"]
    waitfor: ready
  sleeper:
    cmd: sleep
    args: ["5"]
    stoptime_ms: 500
"#;
        build_table(&Config::from_yaml(yaml).unwrap())
    }

    #[tokio::test]
    async fn unknown_program_is_reported() {
        let out = dispatch(ShellCommand::Start("nope".into()), &table()).await;
        assert_eq!(out, "No such program: `nope`");
    }

    #[tokio::test]
    async fn start_await_wait_console() {
        let table = table();
        let out = dispatch(ShellCommand::Start("greeter".into()), &table).await;
        assert!(out.starts_with("Started `greeter`"), "{out}");
        let out = dispatch(ShellCommand::Await("greeter".into(), None), &table).await;
        assert_eq!(out, "`greeter` is ready");
        let out = dispatch(ShellCommand::Wait("greeter".into(), None), &table).await;
        assert_eq!(out, "`greeter` exited with 0");
        let out = dispatch(ShellCommand::Console("greeter".into()), &table).await;
        assert_eq!(out, "hello\nready");
        let status = status_report(&table);
        assert!(status.contains("greeter          exited 0"), "{status}");
        assert!(status.contains("sleeper          not started"), "{status}");
    }

    #[tokio::test]
    async fn usage_errors_become_text() {
        let table = table();
        let out = dispatch(ShellCommand::Kill("sleeper".into()), &table).await;
        assert!(out.starts_with("Error:") && out.contains("not been started"), "{out}");
    }

    #[tokio::test]
    async fn stop_and_shutdown() {
        let table = table();
        dispatch(ShellCommand::Start("sleeper".into()), &table).await;
        let out = dispatch(ShellCommand::Wait("sleeper".into(), Some(50)), &table).await;
        assert_eq!(out, "`sleeper` still running after 50 ms");
        let out = dispatch(ShellCommand::Stop("sleeper".into(), Some(50)), &table).await;
        assert_eq!(out, "`sleeper` stopped with 143");

        dispatch(ShellCommand::Start("greeter".into()), &table).await;
        shutdown_all(&table).await;
        assert!(table.values().all(|p| !p.is_alive()));
    }
}
