use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mediabox")]
#[command(about = "Media download orchestrator", long_about = None)]
pub struct Cli {
    /// Configuration file, overrides MEDIABOX_CONFIG
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API and the worker pool
    Server(ServerArgs),
    /// Run one retention pass against the configured backend and exit
    Prune,
    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to, defaults to server.bind_addr
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_with_address() {
        let cli = Cli::parse_from(["mediabox", "server", "--address", "127.0.0.1:8080"]);
        match cli.command {
            Commands::Server(args) => {
                assert_eq!(args.address, Some("127.0.0.1:8080".parse().unwrap()));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_config_flag_is_global() {
        let cli = Cli::parse_from(["mediabox", "prune", "--config", "params/prod.toml"]);
        assert!(matches!(cli.command, Commands::Prune));
        assert_eq!(cli.config, Some(PathBuf::from("params/prod.toml")));
    }
}
