//! Launch, watch and tear down one external process whose readiness shows up as a line
//! on its console.
//!
//! ```no_run
//! use managed_process::{ManagedProcess, ProcessSpec};
//!
//! # async fn run() -> Result<(), managed_process::ProcessError> {
//! let db = ManagedProcess::new(
//!     ProcessSpec::new("/usr/sbin/mysqld")
//!         .arg("--port=3306")
//!         .wait_for("ready for connections"),
//! );
//! db.start()?;
//! db.wait_for_console_message().await?;
//! // ... talk to the database ...
//! db.wait_for_exit_max_ms_or_destroy(5_000).await?;
//! println!("{}", db.console());
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod control;
pub mod error;
pub mod logger;
pub mod parse;
pub mod runtime;
pub mod shell;
pub mod signals;
pub mod spec;

pub use collector::{AwaitError, OutputCollector};
pub use error::{ConfigError, ErrorKind, ProcessError};
pub use runtime::{ManagedProcess, ProcessState};
pub use spec::ProcessSpec;
