use clap::{Parser, Subcommand};

/// CLI surface definition. Every command composes the encryption engine and the
/// backup directory; neither knows about the other.
#[derive(Parser, Debug)]
#[command(
    name = "strongbox",
    about = "Encrypted local backups with integrity checks and retention",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    #[command(flatten)]
    Store(StoreCommand),
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

/// Commands that act on the backup directory or the key.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    /// Encrypt a file (or stdin with `-`) and store it as a backup artifact.
    Backup {
        /// Input file, or `-` for stdin.
        input: String,
        /// Artifact name; `.backup` is appended when no recognized suffix is given.
        #[arg(long)]
        name: Option<String>,
        /// Prune down to this many artifacts afterwards (defaults to config `keep`).
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Decrypt a backup artifact.
    Restore {
        /// Artifact name inside the backup directory, or a path.
        artifact: String,
        /// Where to write the plaintext, or `-` for stdout.
        #[arg(short, long)]
        output: String,
    },
    /// List backup artifacts, newest first.
    List {
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Check an artifact against its stored checksum.
    Verify {
        artifact: String,
        /// Also decrypt to confirm the authentication tag.
        #[arg(long)]
        deep: bool,
    },
    /// Delete the oldest artifacts beyond the retention limit.
    Prune {
        /// How many artifacts to keep (defaults to config `keep`).
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Print the total size of all backup artifacts.
    Size,
    /// Delete one backup artifact.
    Delete { artifact: String },
    /// Manage the backup encryption key.
    #[command(subcommand)]
    Key(KeyCommand),
    /// Run an encrypt/save/load/decrypt round trip against the configured storage.
    Health,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum KeyCommand {
    /// Delete the encryption key. Existing backups become unrecoverable.
    Delete {
        /// Confirm that existing backups may be lost.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
