use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Maps a configured stop signal name to a [`Signal`], with or without the `SIG` prefix.
pub fn parse_signal(name: &str) -> Option<Signal> {
    let upper = name.trim().to_uppercase();
    let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
    match bare {
        "TERM" => Some(Signal::SIGTERM),
        "INT"  => Some(Signal::SIGINT),
        "QUIT" => Some(Signal::SIGQUIT),
        "HUP"  => Some(Signal::SIGHUP),
        "KILL" => Some(Signal::SIGKILL),
        "USR1" => Some(Signal::SIGUSR1),
        "USR2" => Some(Signal::SIGUSR2),
        _      => None,
    }
}

/// Signals the whole process group led by `pid`.
///
/// Children always lead their own group, so a missing group means the child and
/// everything it forked are gone; that counts as delivered. The bare pid is never
/// signalled, it may already belong to an unrelated process.
pub fn signal_group(pid: u32, signal: Signal) -> nix::Result<()> {
    let Ok(raw) = i32::try_from(pid) else {
        return Err(Errno::EINVAL);
    };
    match killpg(Pid::from_raw(raw), signal) {
        Err(Errno::ESRCH) => Ok(()),
        other => other,
    }
}

/// Asks the OS whether `pid` still exists. Zombies count as alive until reaped.
pub fn probe_alive(pid: u32) -> bool {
    match i32::try_from(pid) {
        Ok(raw) => !matches!(kill(Pid::from_raw(raw), None), Err(Errno::ESRCH)),
        Err(_) => false,
    }
}

/// Exit code of a finished child, `128 + signal` for signal deaths.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}
