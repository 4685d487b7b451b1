// src/cli/handlers/mod.rs

// One module per CLI action. Each handler parses its own arguments and returns
// the exit code for the process.

pub mod run;
pub mod shell;
pub mod shells;
pub mod split;
pub mod which;
