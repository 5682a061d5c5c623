use anyhow::Context;
use futures::StreamExt;
use managed_process::control::{autostart, build_table, shutdown_all};
use managed_process::logger::{logs_tracing, release_guard};
use managed_process::parse::parser;
use managed_process::shell::run_shell;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::env;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut verbose = false;
    let mut config_path = "config/processes.yml".to_string();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-v" | "--verbose" => verbose = true,
            _ => config_path = arg,
        }
    }

    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let guard = logs_tracing("logs", level).context("installing the log subscriber")?;
    // shared so the signal path can flush it before exiting
    let guard = Arc::new(Mutex::new(Some(guard)));

    let cfg = parser(&config_path).with_context(|| format!("loading {config_path}"))?;
    let table = build_table(&cfg);
    for (name, program) in &cfg.processes {
        println!("Process `{}`: {:?} {:?}", name, program.spec.cmd, program.spec.args);
    }
    autostart(&cfg, &table);

    let mut signals = Signals::new([SIGTERM, SIGINT, SIGHUP]).context("installing signal handlers")?;
    let handle = signals.handle();
    let on_signal = table.clone();
    let signal_guard = guard.clone();
    let signal_task = tokio::spawn(async move {
        if let Some(signal) = signals.next().await {
            warn!(signal, "termination signal received, destroying processes");
            shutdown_all(&on_signal).await;
            release_guard(&signal_guard);
            std::process::exit(128 + signal);
        }
    });

    run_shell(table.clone()).await.context("interactive shell")?;

    info!("shell closed, destroying processes");
    shutdown_all(&table).await;
    handle.close();
    signal_task.abort();
    release_guard(&guard);
    Ok(())
}
