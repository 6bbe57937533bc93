//! Command-line interface definition

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use dockwatch_core::BackendPreference;

/// dockwatch - Inspect and control a local Docker or Colima engine
#[derive(Parser, Debug)]
#[command(name = "dockwatch")]
#[command(about = "Inspect and control a local Docker or Colima engine", long_about = None)]
pub struct Cli {
    /// Use this socket instead of discovering one (not persisted)
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Restrict discovery to one backend: auto, docker or colima (not persisted)
    #[arg(long, global = true, value_parser = parse_backend)]
    pub backend: Option<BackendPreference>,

    /// Directory holding settings.toml
    #[arg(long, global = true, value_name = "DIR", hide = true)]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the active backend and engine information
    Status,
    /// List containers
    Ps {
        /// Include stopped containers
        #[arg(short, long)]
        all: bool,
    },
    /// List images
    Images,
    /// List volumes
    Volumes,
    /// List networks
    Networks,
    /// Show details of one container
    Inspect { id: String },
    /// Print container logs
    Logs(LogsArgs),
    /// Start a container
    Start { id: String },
    /// Stop a container
    Stop { id: String },
    /// Restart a container
    Restart { id: String },
    /// Kill a container
    Kill { id: String },
    /// Remove a container
    Rm {
        id: String,
        #[arg(short, long)]
        force: bool,
    },
    /// Remove an image
    Rmi {
        id: String,
        #[arg(short, long)]
        force: bool,
    },
    /// Remove a volume
    VolumeRm { name: String },
    /// Remove all unused volumes
    VolumePrune,
    /// Remove a network
    NetworkRm { id: String },
    /// Show or change persisted settings
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct LogsArgs {
    pub id: String,

    /// Keep streaming new output, reconnecting when the stream drops
    #[arg(short, long)]
    pub follow: bool,

    /// Number of backlog lines
    #[arg(long, default_value_t = 200)]
    pub tail: u32,

    /// Prefix each line with the engine's timestamp
    #[arg(short, long)]
    pub timestamps: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Print the persisted settings
    Show,
    /// Persist the backend preference
    SetBackend {
        #[arg(value_parser = parse_backend)]
        preference: BackendPreference,
    },
    /// Persist a custom socket path; omit the path to clear it
    SetSocket { path: Option<PathBuf> },
}

fn parse_backend(value: &str) -> Result<BackendPreference, String> {
    value.parse().map_err(|e: dockwatch_core::Error| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["dockwatch", "ps", "--all", "--backend", "colima"]).unwrap();
        assert_eq!(cli.command, Command::Ps { all: true });
        assert_eq!(cli.backend, Some(BackendPreference::ForceColima));
    }

    #[test]
    fn test_parse_logs_defaults() {
        let cli = Cli::try_parse_from(["dockwatch", "logs", "web"]).unwrap();
        match cli.command {
            Command::Logs(args) => {
                assert_eq!(args.id, "web");
                assert!(!args.follow);
                assert_eq!(args.tail, 200);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_set_socket_without_path() {
        let cli = Cli::try_parse_from(["dockwatch", "config", "set-socket"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Config(ConfigCommand::SetSocket { path: None })
        );
    }

    #[test]
    fn test_invalid_backend_is_rejected() {
        assert!(Cli::try_parse_from(["dockwatch", "--backend", "podman", "status"]).is_err());
    }

    #[test]
    fn test_kebab_case_subcommands() {
        let cli = Cli::try_parse_from(["dockwatch", "volume-rm", "pgdata"]).unwrap();
        assert_eq!(
            cli.command,
            Command::VolumeRm {
                name: "pgdata".to_string()
            }
        );
    }
}
