use clap::{Parser, ValueEnum};
use log::LevelFilter;
use std::path::PathBuf;

/// A mobile Chrome user agent, so the page takes its in-app code paths.
pub const DEFAULT_AGENT: &str = "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";

#[derive(Parser, Debug)]
#[command(name = "apprefresh")]
#[command(version)]
#[command(about = "Keeps a web app fresh the way its mobile app shell would")]
pub struct Args {
    /// Page to open
    #[arg(short, long)]
    pub url: String,

    /// User agent Chrome reports to the page
    #[arg(short, long, default_value = DEFAULT_AGENT)]
    pub agent: String,

    /// Configuration file (defaults to config.json in the data directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log verbosity
    #[arg(short, long, value_enum, default_value_t = LogLevel::Info)]
    pub level: LogLevel,

    /// Show the browser window
    #[arg(long)]
    pub disable_headless: bool,

    /// Print the page's stored refresh log and exit
    #[arg(long)]
    pub print_logs: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long, value_name = "SECS")]
    pub run_for: Option<u64>,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    pub save_config: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}
