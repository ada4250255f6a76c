//! Operator CLI for agentbox session state.
//!
//! Run with: cargo run -p agentbox-admin -- --project . list

use std::path::PathBuf;

use agentbox_core::{RegistryConfig, SessionScope};
use agentbox_session::{Origin, SessionRegistry};
use agentbox_store::{Store, StoreConfig};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "agentbox-admin", about = "Inspect and edit agentbox session state")]
struct Cli {
    /// Root of the agentbox configuration tree.
    #[arg(long, env = "AGENTBOX_CONFIG_HOME", global = true)]
    config_home: Option<PathBuf>,

    /// Key-value store directory. Defaults to `<config home>/state`.
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[arg(long, default_value = "claude", global = true)]
    agent: String,

    #[arg(long, default_value = "default", global = true)]
    workspace: String,

    /// Project directory. Defaults to the current directory.
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Print machine-readable output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List session names.
    List,
    /// List session records held in the store.
    Sessions,
    /// Create a named session and print its key.
    New { name: String },
    /// Show or set a session's resume token.
    Token {
        session_key: String,
        #[arg(long)]
        set: Option<String>,
    },
    /// Show or set the active session.
    Active {
        #[arg(long)]
        set: Option<String>,
    },
    /// Remove every session with this name.
    Remove { name: String },
    /// Resolve a name, id or unique id prefix to a session name.
    Resolve { selector: String },
    /// Reclaim store space.
    Gc,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match cli.config_home.clone() {
        Some(home) => RegistryConfig::new(home),
        None => RegistryConfig::from_default_home()
            .context("no platform config directory; pass --config-home")?,
    };
    let project = match cli.project.clone() {
        Some(project) => project,
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let project = std::path::absolute(&project)
        .with_context(|| format!("failed to resolve {}", project.display()))?;
    let scope = SessionScope::new(cli.agent.clone(), cli.workspace.clone(), project)?;

    let store_dir = cli.store_dir.clone().unwrap_or_else(|| config.store_dir());
    let mut store = Store::open(StoreConfig::disk(&store_dir))
        .with_context(|| format!("failed to open store in {}", store_dir.display()))?;

    if matches!(cli.command, Command::Gc) {
        let report = store.run_gc().context("reclamation failed")?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!(
                "purged {} expired key(s), {} compaction pass(es)",
                report.expired_purged, report.compactions
            );
        }
        return store.close().context("failed to close store");
    }

    let registry = SessionRegistry::new(store, config);

    let outcome = run(&cli, &registry, &scope);
    let close = registry.into_store().close().context("failed to close store");
    outcome.and(close)
}

fn run(cli: &Cli, registry: &SessionRegistry<Store>, scope: &SessionScope) -> Result<()> {
    match &cli.command {
        Command::List => {
            let names = registry.list_names(scope)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else {
                for name in names {
                    println!("{name}");
                }
            }
        }
        Command::Sessions => {
            let records = registry.list_sessions(scope)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in records {
                    let token = if record.has_resume_token { "resumable" } else { "-" };
                    println!(
                        "{}\t{}\t{token}",
                        record.key,
                        record.name.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Command::New { name } => {
            let key = registry.create_session(scope, name)?;
            println!("{key}");
        }
        Command::Token {
            session_key,
            set: Some(token),
        } => registry.save_resume_token(scope, session_key, token)?,
        Command::Token {
            session_key,
            set: None,
        } => match registry.load_resume_token(scope, session_key)? {
            Some(fetched) => {
                report_origin(&fetched.origin);
                println!("{}", fetched.value);
            }
            None => bail!("no resume token for session {session_key}"),
        },
        Command::Active { set: Some(name) } => registry.set_active_session(scope, name)?,
        Command::Active { set: None } => match registry.active_session(scope)? {
            Some(fetched) => {
                report_origin(&fetched.origin);
                println!("{}", fetched.value);
            }
            None => bail!("no active session"),
        },
        Command::Remove { name } => {
            let report = registry.remove_by_name(scope, name)?;
            if !report.removed() {
                bail!("no session named {name}");
            }
            println!(
                "removed {} session(s){}",
                report.total(),
                if report.active_cleared { ", cleared active session" } else { "" }
            );
        }
        Command::Resolve { selector } => match registry.resolve_selector(scope, selector)? {
            Some(name) => println!("{name}"),
            None => bail!("no session matches {selector}"),
        },
        // Handled in `main`, before the registry takes the store.
        Command::Gc => {}
    }
    Ok(())
}

fn report_origin(origin: &Origin) {
    if let Origin::Legacy(migration) = origin {
        tracing::info!(?migration, "Value read from legacy layout");
    }
}
