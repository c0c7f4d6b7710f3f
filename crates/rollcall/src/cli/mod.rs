//! Subcommand implementations.

pub mod backups;
pub mod run;
pub mod status;
pub mod sync;
