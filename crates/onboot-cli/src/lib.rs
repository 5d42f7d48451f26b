//! Boot-file driven front end for the [`onboot`] supervisor.

pub mod boot;
pub mod command;
pub mod report;
