use crate::collector::DEFAULT_CAPACITY;
use crate::error::ConfigError;
use crate::signals::parse_signal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_consolelines() -> usize { DEFAULT_CAPACITY }
fn default_stopsignal() -> String { "TERM".to_string() }
fn default_stoptime_ms() -> u64 { 5_000 }
fn default_drain_ms() -> u64 { 2_000 }

/// Everything needed to launch and supervise one executable.
///
/// Built once, either from YAML or with the consuming builder methods, and then handed
/// to [`ManagedProcess::new`](crate::ManagedProcess::new), which owns it from there on.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub cmd: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub workingdir: Option<PathBuf>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    /// Console substring announcing readiness.
    #[serde(default)]
    pub waitfor: Option<String>,
    #[serde(default = "default_consolelines")]
    pub consolelines: usize,
    #[serde(default = "default_stopsignal")]
    pub stopsignal: String,
    #[serde(default = "default_stoptime_ms")]
    pub stoptime_ms: u64,
    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,
}

impl ProcessSpec {
    pub fn new(cmd: impl Into<PathBuf>) -> Self {
        Self {
            cmd: cmd.into(),
            args: Vec::new(),
            workingdir: None,
            env: None,
            waitfor: None,
            consolelines: default_consolelines(),
            stopsignal: default_stopsignal(),
            stoptime_ms: default_stoptime_ms(),
            drain_ms: default_drain_ms(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds a path argument, made absolute against the current directory.
    pub fn file_arg(self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        self.arg(absolute.to_string_lossy())
    }

    pub fn workingdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workingdir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn wait_for(mut self, message: impl Into<String>) -> Self {
        self.waitfor = Some(message.into());
        self
    }

    pub fn console_lines(mut self, lines: usize) -> Self {
        self.consolelines = lines;
        self
    }

    pub fn stop_signal(mut self, signal: impl Into<String>) -> Self {
        self.stopsignal = signal.into();
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stoptime_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn stop_time(&self) -> Duration {
        Duration::from_millis(self.stoptime_ms)
    }

    pub fn drain_time(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }

    /// Short label for logs and errors: the executable's file name.
    pub fn display_name(&self) -> String {
        self.cmd
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.cmd.to_string_lossy().into_owned())
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if self.cmd.as_os_str().is_empty() {
            return Err(invalid("cmd is empty"));
        }
        if self.consolelines == 0 {
            return Err(invalid("consolelines must be at least 1"));
        }
        if parse_signal(&self.stopsignal).is_none() {
            return Err(invalid(&format!("unknown stopsignal `{}`", self.stopsignal)));
        }
        Ok(())
    }
}
