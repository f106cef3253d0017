use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "kept", version, about = "Mirror watched folders into an object store, then restore or sweep it")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON); defaults to the platform
    /// config directory
    #[arg(short, long, value_name = "FILE", env = "KEPT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Turn debug logging on
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch configured folders and back up changes until interrupted
    Backup,
    /// Delete objects older than each folder's retention period
    Retention {
        /// Log what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Restore the latest (or every) backup per logical name
    Restore,
    /// Restore every object matching a filter back into a folder tree
    RestoreBasic,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_retention_dry_run() {
        let cli = Cli::try_parse_from(["kept", "retention", "--dry-run", "-c", "/etc/kept.toml"]).unwrap();
        assert!(matches!(cli.command, Command::Retention { dry_run: true }));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/kept.toml")));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_parse_restore_basic() {
        let cli = Cli::try_parse_from(["kept", "-v", "restore-basic"]).unwrap();
        assert!(matches!(cli.command, Command::RestoreBasic));
        assert!(cli.verbose);
    }
}
