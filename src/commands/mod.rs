//! CLI command handlers.

mod status;

pub(crate) use status::run_status_command;
