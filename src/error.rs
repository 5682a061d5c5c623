use std::io;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a [`ProcessError`], for callers that branch on cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A lifecycle precondition was violated by the caller.
    Usage,
    /// The OS refused to create the process.
    Spawn,
    /// A bounded wait elapsed.
    Timeout,
    /// The process terminated without printing the awaited line.
    PatternNeverSeen,
    /// The process could not be confirmed dead after being signalled.
    DestroyFailure,
    /// A background capture or exit-watch task failed.
    Background,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{name} has not been started yet")]
    NotStarted { name: String },

    #[error("{name} was already started")]
    AlreadyStarted { name: String },

    #[error("{name} has not terminated yet")]
    NotTerminated { name: String },

    #[error("{name} has already terminated")]
    AlreadyTerminated { name: String },

    #[error("failed to launch {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {waited:?} waiting for {what} from {name}")]
    Timeout {
        name: String,
        what: String,
        waited: Duration,
    },

    #[error("{name} terminated without printing `{pattern}`; last console output:\n{console}")]
    PatternNeverSeen {
        name: String,
        pattern: String,
        console: String,
    },

    #[error("{name} (pid {pid}) still not confirmed dead {waited:?} after SIGKILL")]
    DestroyFailed {
        name: String,
        pid: u32,
        waited: Duration,
    },

    /// `exit_code` is kept when the child's exit was observed but its console was not
    /// fully captured.
    #[error("{task} task of {name} failed: {reason}")]
    Background {
        name: String,
        task: &'static str,
        reason: String,
        exit_code: Option<i32>,
    },
}

impl ProcessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessError::NotStarted { .. }
            | ProcessError::AlreadyStarted { .. }
            | ProcessError::NotTerminated { .. }
            | ProcessError::AlreadyTerminated { .. } => ErrorKind::Usage,
            ProcessError::Spawn { .. } => ErrorKind::Spawn,
            ProcessError::Timeout { .. } => ErrorKind::Timeout,
            ProcessError::PatternNeverSeen { .. } => ErrorKind::PatternNeverSeen,
            ProcessError::DestroyFailed { .. } => ErrorKind::DestroyFailure,
            ProcessError::Background { .. } => ErrorKind::Background,
        }
    }

    pub fn is_usage(&self) -> bool {
        self.kind() == ErrorKind::Usage
    }
}

/// Errors raised while loading or validating a process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid process `{name}`: {reason}")]
    Invalid { name: String, reason: String },
}
