//! simctl CLI
//!
//! Connects to a simulation server over RCON, brings a session up and runs a
//! single command against it. Results are printed as JSON.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use simctl::{Session, SimctlConfig, Value};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a simctl.toml (optional; SIMCTL_* variables apply either way)
    #[arg(short, long, env = "SIMCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Disable the remote script cache for this session
    #[arg(long)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run literal script text, e.g. `/sc rcon.print(game.tick)`
    Exec {
        script: String,
    },

    /// Call a capability on an agent
    Call {
        capability: String,

        /// Arguments, each parsed as JSON (bare words are taken as strings)
        args: Vec<String>,

        #[arg(short, long, default_value_t = 0)]
        agent: usize,

        /// Allow admin capabilities by their plain name
        #[arg(long)]
        admin: bool,
    },

    /// List capabilities bound on agent 0
    List {
        /// Include admin capabilities
        #[arg(long)]
        admin: bool,
    },

    /// Print the remote fingerprint table
    Fingerprints,

    /// Clear all caches and reinstall every script
    Reload,
}

fn parse_arg(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => Value::from(json),
        Err(_) => Value::from(raw),
    }
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    let json = serde_json::Value::from(value);
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();

    let mut config = SimctlConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if cli.no_cache {
        config.scripts.cache_scripts = false;
    }

    let mut session = Session::connect(config).context("starting session")?;

    match cli.command {
        Commands::Exec { script } => {
            let value = session.execute_raw(&script)?;
            print_json(&value)?;
        }
        Commands::Call {
            capability,
            args,
            agent,
            admin,
        } => {
            let namespace = session.namespace(agent)?;
            namespace.set_admin_visible(admin);
            let args: Vec<Value> = args.iter().map(|a| parse_arg(a)).collect();
            let value = namespace
                .call(&capability, &args)
                .with_context(|| format!("calling `{}` on agent {}", capability, agent))?;
            print_json(&value)?;
        }
        Commands::List { admin } => {
            let namespace = session.namespace(0)?;
            namespace.set_admin_visible(admin);
            for name in namespace.capability_names() {
                println!("{}", name);
            }
        }
        Commands::Fingerprints => {
            let core = session.core();
            let registry = core.registry();
            let mut entries: Vec<_> = registry.remote_table().iter().collect();
            entries.sort();
            let table: serde_json::Map<String, serde_json::Value> = entries
                .into_iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            println!("{}", serde_json::to_string_pretty(&table)?);
        }
        Commands::Reload => {
            session.invalidate_and_reload()?;
            let core = session.core();
            let count = core.registry().len();
            println!("reinstalled {} script fragments", count);
        }
    }

    session.close()?;
    Ok(())
}
