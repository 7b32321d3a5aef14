// Re-export modules so they can be used from tests
pub mod cli;
pub mod config;
pub mod error;
pub mod filtering;
pub mod logging;
pub mod logs;
pub mod output;
pub mod ui;
