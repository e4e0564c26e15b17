//! CLI subcommands.

pub(crate) mod audit;
pub(crate) mod config;
pub(crate) mod rules;
pub(crate) mod serve;
