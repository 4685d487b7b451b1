// src/core/mod.rs

//! # Core Logic
//!
//! Platform-independent building blocks: the environment capability, the
//! registry holding executables, shells and the resolver cache, executable
//! resolution, argument normalization, line decoding and shebang parsing.

pub mod args;
pub mod env;
pub mod lines;
pub mod paths;
pub mod registry;
pub mod shebang;
pub mod which;
