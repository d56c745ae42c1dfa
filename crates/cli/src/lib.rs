//! Command implementations and report rendering behind the `regroup` binary.
pub mod commands;
pub mod report;
