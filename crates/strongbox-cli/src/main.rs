mod cli;
mod commands;
mod config;
mod storage;

use chrono::Utc;
use clap::Parser;
use color_eyre::{eyre::bail, Result};
use strongbox_core::crypto::SecretStore;

use crate::{
    cli::{Command, ConfigCommand, KeyCommand, StoreCommand},
    commands::{Session, VerifyStatus},
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        Command::Store(command) => {
            let session = Session::new(
                storage::engine_from_config(&config)?,
                storage::backup_store_from_config(&config)?,
            );
            run(command, &session, &config).await?
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info; logs go to stderr so
    // `restore -o -` output stays clean.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("strongbox {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

async fn run<S: SecretStore + 'static>(
    command: StoreCommand,
    session: &Session<S>,
    config: &config::Config,
) -> Result<()> {
    match command {
        StoreCommand::Backup { input, name, keep } => {
            let plaintext = commands::read_input(&input)?;
            let name = commands::artifact_name(name.as_deref(), Utc::now());
            let outcome = session
                .backup(plaintext, name, keep.or(config.keep))
                .await?;
            println!("Saved {}", outcome.path.display());
            println!("sha256 {}", outcome.checksum);
            if outcome.pruned > 0 {
                println!("Pruned {} old backup(s)", outcome.pruned);
            }
        }
        StoreCommand::Restore { artifact, output } => {
            let path = session.resolve_artifact(&artifact)?;
            let plaintext = session.restore(path).await?;
            commands::write_output(&output, &plaintext)?;
            if output != "-" {
                println!("Restored {} bytes to {output}", plaintext.len());
            }
        }
        StoreCommand::List { json } => {
            let artifacts = session.list().await?;
            if json {
                println!("{}", commands::render_json(&artifacts)?);
            } else if artifacts.is_empty() {
                println!("No backups yet. Create one with `strongbox backup <file>`.");
            } else {
                print!("{}", commands::render_table(&artifacts));
            }
        }
        StoreCommand::Verify { artifact, deep } => {
            let path = session.resolve_artifact(&artifact)?;
            match session.verify(path, deep).await? {
                VerifyStatus::Intact => println!("{artifact}: ok"),
                VerifyStatus::NoChecksum => println!("{artifact}: no checksum recorded"),
                VerifyStatus::Mismatch => bail!("{artifact}: checksum mismatch"),
            }
        }
        StoreCommand::Prune { keep } => {
            let Some(keep) = keep.or(config.keep) else {
                bail!("no retention limit given; pass --keep or set `keep` in config");
            };
            let pruned = session.prune(keep).await?;
            println!("Pruned {pruned} backup(s), keeping at most {keep}");
        }
        StoreCommand::Size => {
            let total = session.total_size().await?;
            println!("{} ({total} bytes)", commands::human_size(total));
        }
        StoreCommand::Delete { artifact } => {
            let path = session.resolve_artifact(&artifact)?;
            if session.delete(path).await? {
                println!("Deleted {artifact}");
            } else {
                println!("{artifact} not found");
            }
        }
        StoreCommand::Key(KeyCommand::Delete { yes }) => {
            if !yes {
                bail!(
                    "deleting the key makes every existing backup unrecoverable; \
                     re-run with --yes to confirm"
                );
            }
            session.delete_key().await?;
            info!("backup key deleted; a new key is created on the next backup");
            println!("Key deleted");
        }
        StoreCommand::Health => {
            session.health().await?;
            println!("Storage: ok");
        }
    }

    Ok(())
}
