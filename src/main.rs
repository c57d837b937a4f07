//! chat-relay: talk to a web chat UI from the terminal

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chat_relay::agent::{ProbeResult, probe_selectors};
use chat_relay::constants::REQUEST_QUEUE_CAPACITY;
use chat_relay::dom::{CdpDom, MemoryDom, PageDom};
use chat_relay::panel::{plain_line, render_line};
use chat_relay::{
    AgentSettings, BrowserManager, ChatMessage, Config, ControlPanel, HistoryStore, PageAgent,
    SiteConfig, SiteConfigStore, event_channel, load_yaml_config, request_channel,
};

#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(about = "Relay messages between the terminal and a web chat page")]
#[command(version)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true, env = "CHAT_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Site configuration store, overrides `storage.sites_path`
    #[arg(long, global = true)]
    sites: Option<PathBuf>,

    /// Chat history file, overrides `storage.history_path`
    #[arg(long, global = true)]
    history: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a chat page and relay messages interactively
    Run {
        /// Page to open
        #[arg(long)]
        url: String,
    },

    /// Manage per-site selector configurations
    Sites {
        #[command(subcommand)]
        action: SitesAction,
    },

    /// Inspect or wipe the chat history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Report which configured selectors resolve on a page
    Probe {
        /// Page to inspect
        #[arg(long)]
        url: String,

        /// Validate the configuration offline instead of launching a browser
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum SitesAction {
    /// List configured hostnames
    List,

    /// Print the configuration used for a hostname
    Show { host: String },

    /// Store a configuration read from a JSON file
    Set {
        host: String,

        #[arg(long)]
        file: PathBuf,
    },

    /// Delete the configuration for a hostname
    Remove { host: String },

    /// Merge the built-in configurations into the store
    InstallDefaults,
}

#[derive(Subcommand)]
enum HistoryAction {
    Show,
    Clear,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = load_yaml_config(cli.config.as_deref())?;
    if let Some(path) = cli.sites {
        config.storage.sites_path = Some(path);
    }
    if let Some(path) = cli.history {
        config.storage.history_path = Some(path);
    }

    match cli.command {
        Commands::Run { url } => run(&config, &url).await,
        Commands::Sites { action } => manage_sites(&config, action),
        Commands::History { action } => manage_history(&config, action),
        Commands::Probe { url, dry_run } => probe(&config, &url, dry_run).await,
    }
}

/// Site store with the defaults merged in on first use
fn open_sites(config: &Config) -> Result<SiteConfigStore> {
    let path = config.storage.sites_path();
    let first_run = !path.exists();
    let mut store = SiteConfigStore::open(&path)?;
    if first_run {
        store.install_defaults()?;
    }
    Ok(store)
}

async fn run(config: &Config, url: &str) -> Result<()> {
    let sites = open_sites(config)?;
    let manager = BrowserManager::new(config.browser.clone());
    let result = relay(config, &sites, &manager, url).await;
    manager.shutdown().await;
    result
}

async fn relay(config: &Config, sites: &SiteConfigStore, manager: &BrowserManager, url: &str) -> Result<()> {
    let page = manager.open_page(url).await?;
    let (dom, mutations) = CdpDom::attach(page).await?;

    let (outbox, mut events) = event_channel();
    let (handle, requests) = request_channel(REQUEST_QUEUE_CAPACITY);
    let agent = PageAgent::start(Arc::new(dom), sites, outbox, AgentSettings::from_config(config))
        .await
        .context("Failed to start page agent")?;
    let agent_task = tokio::spawn(agent.run(requests, mutations));

    let mut panel = ControlPanel::open(HistoryStore::new(config.storage.history_path()), handle)?;
    if !panel.ping().await {
        warn!("Page agent did not answer the liveness check");
    }
    let styled = std::io::stdout().is_terminal();
    print_lines(&panel.take_unseen(), styled);
    eprintln!("Type a message and press Enter. Commands: /clear, /history, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    break;
                };
                match line.trim() {
                    "/quit" => break,
                    "/clear" => panel.clear(),
                    "/history" => print_lines(panel.history(), styled),
                    _ => {
                        panel.submit(&line).await;
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("Page agent stopped");
                    break;
                };
                panel.handle_event(event);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
        print_lines(&panel.take_unseen(), styled);
    }

    drop(panel);
    if let Err(e) = agent_task.await {
        warn!("Page agent task failed: {}", e);
    }
    Ok(())
}

fn print_lines(lines: &[ChatMessage], styled: bool) {
    for line in lines {
        if styled {
            println!("{}", render_line(line));
        } else {
            println!("{}", plain_line(line));
        }
    }
}

fn manage_sites(config: &Config, action: SitesAction) -> Result<()> {
    let mut store = SiteConfigStore::open(config.storage.sites_path())?;
    match action {
        SitesAction::List => {
            if store.is_empty() {
                println!("No site configurations in {}", store.path().display());
            }
            for (host, site) in store.iter() {
                let status = match site.clone().validate() {
                    Ok(_) => "ok".to_string(),
                    Err(e) => e.to_string(),
                };
                println!("{host}\t{status}");
            }
        }
        SitesAction::Show { host } => {
            let Some((key, site)) = store.lookup(&host) else {
                bail!("No site configuration for {host}");
            };
            if key != host {
                info!("{} is served by the configuration for {}", host, key);
            }
            println!("{}", serde_json::to_string_pretty(site)?);
        }
        SitesAction::Set { host, file } => {
            let site = read_site_file(&file)?;
            if let Err(e) = site.clone().validate() {
                warn!("Storing incomplete configuration for {}: {}", host, e);
            }
            store.set(&host, site)?;
            println!("Saved configuration for {host}");
        }
        SitesAction::Remove { host } => match store.remove(&host)? {
            Some(_) => println!("Removed configuration for {host}"),
            None => bail!("No site configuration for {host}"),
        },
        SitesAction::InstallDefaults => {
            let added = store.install_defaults()?;
            println!("Installed {added} default configuration(s), {} total", store.len());
        }
    }
    Ok(())
}

fn read_site_file(path: &Path) -> Result<SiteConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid site configuration in {}", path.display()))
}

fn manage_history(config: &Config, action: HistoryAction) -> Result<()> {
    let store = HistoryStore::new(config.storage.history_path());
    match action {
        HistoryAction::Show => {
            let messages = store.load()?;
            if messages.is_empty() {
                println!("Chat history is empty");
            }
            print_lines(&messages, std::io::stdout().is_terminal());
        }
        HistoryAction::Clear => {
            store.save(&[])?;
            println!("Chat history cleared");
        }
    }
    Ok(())
}

async fn probe(config: &Config, url: &str, dry_run: bool) -> Result<()> {
    let sites = open_sites(config)?;
    let host = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .with_context(|| format!("'{url}' has no hostname"))?;
    let Some((key, site)) = sites.lookup(&host) else {
        bail!("No site configuration for {host}");
    };
    println!("{host}: using configuration '{key}'");
    if let Err(e) = site.clone().validate() {
        println!("  {e}");
    }

    if dry_run {
        let (dom, _mutations) = MemoryDom::new(&host);
        report_probe(&probe_selectors(&dom, site).await, true);
        return Ok(());
    }

    let manager = BrowserManager::new(config.browser.clone());
    let result = async {
        let page = manager.open_page(url).await?;
        let (dom, _mutations) = CdpDom::attach(page).await?;
        let actual = dom.hostname().await?;
        if actual != host {
            warn!("Page redirected to {}", actual);
        }
        report_probe(&probe_selectors(&dom, site).await, false);
        Ok::<_, anyhow::Error>(())
    }
    .await;
    manager.shutdown().await;
    result
}

fn report_probe(results: &[ProbeResult], offline: bool) {
    for result in results {
        let outcome = match &result.matches {
            Ok(_) if offline => "syntax ok".to_string(),
            Ok(0) => "no match".to_string(),
            Ok(n) => format!("{n} match(es)"),
            Err(e) => e.to_string(),
        };
        println!("  {:<28} {:<48} {}", result.field, result.selector, outcome);
    }
}
