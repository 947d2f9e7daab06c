//! Subcommand implementations

mod codes;
mod data;
mod signing;

pub(crate) use codes::{change_code_command, unblock_code_command};
pub(crate) use data::{
    certificate_command, personal_data_command, retry_counters_command, status_command,
};
pub(crate) use signing::{authenticate_command, sign_command};
