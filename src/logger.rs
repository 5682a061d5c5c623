use std::sync::{Mutex, PoisonError};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::SubscriberBuilder;



/*
    @@@
    @logs_tracing();
    . Creates a daily-rotating log file (<dir>/managed-process.log) wrapped in a non-blocking writer.
    . Configures a tracing subscriber at `level` (timestamps, levels, targets) writing to it; DEBUG also shows child console lines.
    . Returns the guard that keeps the writer flushing; drop it only at exit.
*/
pub fn logs_tracing(dir: &str, level: tracing::Level) -> Result<WorkerGuard, tracing::subscriber::SetGlobalDefaultError> {
    let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "managed-process.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = SubscriberBuilder::default()
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_writer(non_blocking)
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(guard)
}



/*
    @@@
    @release_guard();
    . Takes the shared guard out and drops it, flushing whatever the non-blocking writer still buffers.
    . Needed before std::process::exit, which skips destructors. Returns false if it was already released.
*/
pub fn release_guard(guard: &Mutex<Option<WorkerGuard>>) -> bool {
    let taken = guard.lock().unwrap_or_else(PoisonError::into_inner).take();
    taken.is_some()
}
