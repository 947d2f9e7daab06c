//! Helpers shared by the subcommands

pub(crate) mod display;
pub(crate) mod reader;
pub(crate) mod secrets;
pub(crate) mod session;
