//! # System Interaction Layer
//!
//! Everything that touches real processes and files.
//!
//! ## Modules
//!
//! - **`executor`**: the `Command` builder, spawning, the blocking path and
//!   the one-shot helpers.
//! - **`child`**: the spawned process handle, its one-shot consumption state
//!   machine and the line stream.
//! - **`pipe`**: chaining processes stdout to stdin.
//! - **`shell`**: running inline scripts or script files through a shell,
//!   including temporary script files.
//! - **`shells_config`**: shell descriptors, the built-in shells and
//!   `shells.toml` loading.
//! - **`echo`**: printing command lines with secrets masked.

pub mod child;
pub mod echo;
pub mod executor;
pub mod pipe;
pub mod shell;
pub mod shells_config;
