use clap::{Parser, Subcommand};

pub mod config;
pub mod logging;
pub mod reset_session;
pub mod run;
pub mod status;
pub mod version;

#[derive(Parser)]
#[command(name = "welcomer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator CLI for the Welcomer group welcome bot", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot service
    Run {
        /// Path to config file (default: <data dir>/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Data directory for config, credentials and ledger
        /// (default: ~/.local/share/welcomer)
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// Show stored session and ledger state
    Status {
        /// Path to config file (default: <data dir>/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Data directory (default: ~/.local/share/welcomer)
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// Delete stored session credentials so the next run pairs again
    ResetSession {
        /// Path to config file (default: <data dir>/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Data directory (default: ~/.local/share/welcomer)
        #[arg(long)]
        data_dir: Option<String>,

        /// Skip confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run { config, data_dir } => run::execute(config, data_dir).await,
        Commands::Status { config, data_dir } => status::execute(config, data_dir),
        Commands::ResetSession {
            config,
            data_dir,
            yes,
        } => reset_session::execute(config, data_dir, yes),
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["welcomer", "run"]);

        match cli.command {
            Commands::Run { config, data_dir } => {
                assert_eq!(config, None);
                assert_eq!(data_dir, None);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_run_with_all_options() {
        let cli = Cli::parse_from([
            "welcomer",
            "run",
            "--config",
            "/etc/welcomer.toml",
            "--data-dir",
            "/srv/welcomer",
        ]);

        match cli.command {
            Commands::Run { config, data_dir } => {
                assert_eq!(config, Some("/etc/welcomer.toml".to_string()));
                assert_eq!(data_dir, Some("/srv/welcomer".to_string()));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_status() {
        let cli = Cli::parse_from(["welcomer", "status", "--data-dir", "/tmp/w"]);
        assert!(matches!(
            cli.command,
            Commands::Status { data_dir: Some(ref d), .. } if d == "/tmp/w"
        ));
    }

    #[test]
    fn test_cli_parse_reset_session() {
        let cli = Cli::parse_from(["welcomer", "reset-session", "-y"]);
        match cli.command {
            Commands::ResetSession { yes, config, .. } => {
                assert!(yes);
                assert!(config.is_none());
            }
            _ => panic!("Expected ResetSession command"),
        }

        let cli = Cli::parse_from(["welcomer", "reset-session"]);
        assert!(matches!(
            cli.command,
            Commands::ResetSession { yes: false, .. }
        ));
    }

    #[test]
    fn test_cli_parse_version() {
        let cli = Cli::parse_from(["welcomer", "version"]);
        assert!(matches!(cli.command, Commands::Version));
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["welcomer", "register"]).is_err());
    }
}
