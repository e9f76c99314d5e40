/// CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

// Build timestamp injected at compile time by build.rs
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser, Debug)]
#[command(name = "astra-monitor")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// ADB device ID (wired USB connection) or SSH address (wireless connection)
    /// (default: first detected ADB device)
    #[arg(short, long, global = true)]
    pub board_address: Option<String>,

    /// Polling interval in milliseconds (default: 500)
    #[arg(short, long, value_name = "MILLISECONDS", global = true)]
    pub interval: Option<u64>,

    /// Statistics sliding window length in seconds (default: 10)
    #[arg(short, long, value_name = "SECONDS", global = true)]
    pub window: Option<u64>,

    /// Port for running the dashboard web server (default: 8050)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Host to bind the dashboard to (default: localhost)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Timeout for each remote command in seconds (default: 5)
    #[arg(short, long, value_name = "SECONDS", global = true)]
    pub timeout: Option<u64>,

    /// Enable CORS for cross-origin requests to the API
    #[arg(long, global = true)]
    pub cors: bool,

    /// Alternate config file (default: ~/.config/astra-monitor/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the live dashboard (default)
    Serve,

    /// List boards attached over ADB
    Devices,

    /// Run a command on the board and print its output
    Exec {
        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Copy a file or directory to the board
    Push {
        src: String,
        dst: String,

        /// Copy directories recursively
        #[arg(short, long)]
        recursive: bool,
    },

    /// Copy a file or directory from the board
    Pull {
        src: String,
        dst: String,

        /// Copy directories recursively (SSH boards only; ADB pulls are always recursive)
        #[arg(short, long)]
        recursive: bool,
    },

    /// Take one usage reading and print it
    Sample,

    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        write: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_flags() {
        let cli = Cli::parse_from([
            "astra-monitor", "-b", "192.168.1.20", "-i", "250", "-w", "30", "--port", "8100",
        ]);
        assert_eq!(cli.board_address.as_deref(), Some("192.168.1.20"));
        assert_eq!(cli.interval, Some(250));
        assert_eq!(cli.window, Some(30));
        assert_eq!(cli.port, Some(8100));
        assert_eq!(cli.command, None);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["astra-monitor", "exec", "-b", "SL16x0", "--", "ls", "-l", "/"]);
        assert_eq!(cli.board_address.as_deref(), Some("SL16x0"));
        assert_eq!(
            cli.command,
            Some(Commands::Exec {
                command: vec!["ls".to_string(), "-l".to_string(), "/".to_string()]
            })
        );
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_version_carries_build_time() {
        use clap::CommandFactory;
        let version = Cli::command().get_version().unwrap_or_default().to_string();
        assert!(version.starts_with(env!("CARGO_PKG_VERSION")));
        assert!(version.contains(" (built: "));
    }
}
