// Library root for the pipeline binary: configuration and the commands the
// CLI dispatches to, exposed so integration tests can drive them directly.

pub mod commands;
pub mod config;
