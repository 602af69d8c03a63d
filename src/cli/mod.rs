//! Command implementations and terminal presentation

pub mod run;
pub mod setup;
pub mod ui;
