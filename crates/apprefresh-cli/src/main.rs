//! # App Shell Refresh Runner
//!
//! Opens a page in Chrome with a mobile user agent, attaches the refresh
//! controllers to it and keeps feeding them the page's DOM events until
//! interrupted.

mod args;

use apprefresh::browser::{
    create_browser, get_initial_tab, ChromeAuthClient, ChromePage, ChromeRestoreHook,
    ChromeStorage, PageTab,
};
use apprefresh::clock::SystemClock;
use apprefresh::scheduler::ThreadScheduler;
use apprefresh::storage::RefreshLog;
use apprefresh::utils::CancellationToken;
use apprefresh::{init_logger, AppShell, Host, Integrations, PageEvent, ShellConfig};
use args::Args;
use clap::Parser;
use log::{error, info, warn};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(args.level.into());

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => match ShellConfig::default_path() {
            Ok(path) => path,
            Err(e) => {
                error!("Could not locate the config file: {}", e);
                return ExitCode::FAILURE;
            }
        },
    };
    let config = ShellConfig::load_or_default(&config_path);

    if args.save_config {
        return match config.save_to(&config_path) {
            Ok(()) => {
                info!("Configuration written to {:?}", config_path);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to write configuration: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    match run(&args, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, config: ShellConfig) -> anyhow::Result<()> {
    let browser = create_browser(&args.agent, !args.disable_headless)
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    let raw_tab = get_initial_tab(&browser)?;
    raw_tab.set_default_timeout(LOAD_TIMEOUT);

    info!("[*] Opening {}", args.url);
    raw_tab.navigate_to(&args.url)?;
    if let Err(e) = raw_tab.wait_until_navigated() {
        warn!("[!] Navigation did not settle: {}", e);
    }
    let tab = PageTab::new(raw_tab);

    if args.print_logs {
        print_logs(&tab, &config);
        return Ok(());
    }

    let token = CancellationToken::new();
    {
        let token = token.clone();
        ctrlc::set_handler(move || token.cancel())?;
    }
    let deadline = args
        .run_for
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    let mut shell = attach(&tab, &config, &token)?;

    while !token.is_cancelled() && deadline.map_or(true, |d| Instant::now() < d) {
        match tab.bridge_installed() {
            Ok(true) => {}
            Ok(false) => {
                info!("[*] Page reloaded, attaching again");
                shell.shutdown();
                shell = attach(&tab, &config, &token)?;
                continue;
            }
            Err(e) => {
                warn!("[!] Page not reachable: {}", e);
                sleep(Duration::from_secs(1));
                continue;
            }
        }

        match tab.drain_events() {
            Ok(events) => forward(&tab, &shell, events),
            Err(e) => warn!("[!] Failed to read page events: {}", e),
        }

        sleep(POLL_INTERVAL);
    }

    shell.shutdown();
    info!("[*] Stopped");
    Ok(())
}

fn forward(tab: &PageTab, shell: &AppShell, events: Vec<PageEvent>) {
    for event in events {
        let suppress = shell.handle(&event);
        if suppress && matches!(event, PageEvent::TouchMove { .. }) {
            if let Err(e) = tab.set_scroll_suppressed(true) {
                log::debug!("Could not suppress scrolling: {}", e);
            }
        }
    }
}

fn wait_for_load(tab: &PageTab, token: &CancellationToken) -> anyhow::Result<()> {
    let started = Instant::now();
    while !token.is_cancelled() {
        if tab.is_loaded().unwrap_or(false) {
            return Ok(());
        }
        if started.elapsed() > LOAD_TIMEOUT {
            anyhow::bail!("Page did not finish loading within {:?}", LOAD_TIMEOUT);
        }
        sleep(Duration::from_millis(200));
    }
    Ok(())
}

/// Builds a fresh shell for the page currently in `tab`. The page is fully
/// loaded by then, so DOM-ready and load are reported straight away.
fn attach(tab: &PageTab, config: &ShellConfig, token: &CancellationToken) -> anyhow::Result<AppShell> {
    wait_for_load(tab, token)?;
    tab.inject_event_bridge()?;

    let signals = tab.read_signals()?;
    info!("[*] UA: {}", signals.user_agent);
    info!("[*] Protocol: {}", signals.protocol);

    let host = Host::new(
        Arc::new(ChromePage::new(tab.clone())),
        Arc::new(SystemClock),
        Arc::new(ThreadScheduler),
        Arc::new(ChromeStorage::new(tab.clone())),
    );
    let integrations = Integrations {
        auth: Some(Arc::new(ChromeAuthClient::new(
            tab.clone(),
            config.client_globals.clone(),
        ))),
        restore_hook: Some(Arc::new(ChromeRestoreHook::new(tab.clone()))),
    };

    let shell = AppShell::new(config.clone(), &host, &signals, integrations);
    shell.handle(&PageEvent::DomReady);
    shell.handle(&PageEvent::Load);
    Ok(shell)
}

fn print_logs(tab: &PageTab, config: &ShellConfig) {
    let log = RefreshLog::new(
        Arc::new(ChromeStorage::new(tab.clone())),
        Arc::new(SystemClock),
        config.log_key.clone(),
        config.log_capacity,
    );
    let entries = log.entries();
    if entries.is_empty() {
        info!("No refresh log stored for this page");
        return;
    }
    for entry in entries {
        println!("{} [{}] {}", entry.time, entry.kind, entry.message);
    }
}
