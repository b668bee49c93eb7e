//! Airlock CLI - inspect and validate policy forests
//!
//! Usage:
//!   airlock check <root>             Load every document and compile every guard
//!   airlock show <root> [ID]         Print the root document or sub-document ID
//!   airlock manifest <root>          List the manifest

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use airlock::{Policy, PolicyStore, StoreConfig};

/// Airlock - policy forest tooling
#[derive(Parser, Debug)]
#[command(name = "airlock")]
#[command(about = "Inspect and validate Airlock policy forests")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the forest and compile every guard
    Check(ForestArgs),
    /// Print a policy document as JSON
    Show {
        #[command(flatten)]
        forest: ForestArgs,
        /// Sub-document id; the root document when omitted
        id: Option<String>,
    },
    /// List manifest entries as `id -> file`
    Manifest(ForestArgs),
}

#[derive(Args, Debug)]
struct ForestArgs {
    /// Directory holding the policy forest
    root: PathBuf,
    /// Root document name
    #[arg(long, default_value = "policy")]
    name: String,
}

impl ForestArgs {
    /// Open an existing forest. Never creates one.
    fn open(&self) -> anyhow::Result<PolicyStore> {
        let config = StoreConfig {
            root: self.root.clone(),
            name: self.name.clone(),
            ..StoreConfig::default()
        };
        let root_file = config.root_file();
        if !root_file.is_file() {
            bail!("no policy forest at {}", root_file.display());
        }
        let store = PolicyStore::open(&config)
            .with_context(|| format!("failed to load policy forest at {}", self.root.display()))?;
        Ok(store)
    }
}

fn check(args: &ForestArgs) -> anyhow::Result<String> {
    let store = args.open()?;
    let documents = store.ids().len();
    let policy = Policy::new(store);
    // Realm values are not Send; keep only the message.
    let guards = policy.check_guards().map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(format!("ok: {documents} documents, {guards} guards"))
}

fn show(args: &ForestArgs, id: Option<&str>) -> anyhow::Result<String> {
    let store = args.open()?;
    let text = match id {
        Some(id) => {
            let document = store
                .document(id)
                .with_context(|| format!("no policy document {id}"))?;
            serde_json::to_string_pretty(&document)?
        }
        None => serde_json::to_string_pretty(&store.root())?,
    };
    Ok(text)
}

fn manifest(args: &ForestArgs) -> anyhow::Result<String> {
    let store = args.open()?;
    let lines: Vec<String> = store
        .root()
        .manifest
        .iter()
        .map(|(id, file)| format!("{id} -> {file}"))
        .collect();
    Ok(lines.join("\n"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let output = match &cli.command {
        Command::Check(args) => check(args)?,
        Command::Show { forest, id } => show(forest, id.as_deref())?,
        Command::Manifest(args) => manifest(args)?,
    };
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
