//! # App Shell Refresh Library
//!
//! Keeps a web app that runs inside a mobile app wrapper fresh without
//! getting in the user's way: a refresh gate that decides when the session
//! may be re-fetched, a pull-to-refresh gesture, and a one-shot session
//! bootstrap. The controllers talk to the page only through the [`page::Page`]
//! trait, so the same code drives an in-memory test page or a live Chrome tab.

pub mod auth;
pub mod browser;
pub mod clock;
pub mod config;
pub mod environment;
pub mod error;
pub mod gate;
pub mod gesture;
pub mod host;
pub mod logger;
pub mod page;
pub mod scheduler;
pub mod session;
pub mod shell;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export commonly used items
pub use config::ShellConfig;
pub use host::Host;
pub use logger::init_logger;
pub use shell::{AppShell, Integrations, PageEvent};
pub use utils::get_user_data_dir;
