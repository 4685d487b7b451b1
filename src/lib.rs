//! Cross-platform process execution.
//!
//! `plumb` resolves executables by logical name, normalizes arguments from
//! lists, command-line strings or key/value maps, spawns processes whose
//! output can be consumed exactly once, chains processes into pipelines and
//! runs inline scripts or script files through registered shells.

pub mod cli;
pub mod constants;
pub mod core;
pub mod error;
pub mod models;
pub mod system;

pub use crate::core::args::{ArgSpec, SplatOptions};
pub use crate::core::env::Platform;
pub use crate::core::registry::Registry;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::models::{ProcessOutcome, StdInput, StdioMode};
pub use crate::system::child::{ChildProcess, LineStream, ProcessState};
pub use crate::system::executor::{Command, quiet_run, quiet_run_sync, run, run_sync};
pub use crate::system::pipe::{PipeChain, PipeTarget};
pub use crate::system::shell::{ShellSession, exec};
