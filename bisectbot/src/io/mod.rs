//! Side-effecting adapters: config files, processes, git, the toolchain switch.

pub mod config;
pub mod diagnostics;
pub mod exec;
pub mod git;
pub mod process;
pub mod sandbox;
pub mod toolchain;
