pub mod actions;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod store;
pub mod transport;
