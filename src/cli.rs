use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "civic-ingest", version, about = "Civic events and news ingestion")]
pub struct Cli {
    /// Pipeline configuration (TOML or JSON). Falls back to $CIVIC_INGEST_CONFIG,
    /// then config/ingest.toml, config/ingest.json, then built-in defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Source catalog (TOML or JSON). Falls back to $CIVIC_INGEST_SOURCES,
    /// then config/sources.toml, config/sources.json.
    #[arg(long, global = true)]
    pub sources: Option<PathBuf>,

    /// Serve Prometheus metrics on this address, e.g. 127.0.0.1:9100.
    #[arg(long, global = true, env = "METRICS_ADDR")]
    pub metrics_addr: Option<std::net::SocketAddr>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the scheduler loop (default if no subcommand given).
    Run,

    /// Evaluate every source once and trigger the due ones.
    Tick,

    /// Run one source now, regardless of its schedule.
    Trigger {
        /// Source id from the catalog.
        source_id: i64,
    },

    /// Print the scheduling decision for every source.
    Due,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trigger_with_global_flags() {
        let cli = Cli::try_parse_from([
            "civic-ingest",
            "trigger",
            "42",
            "--sources",
            "config/sources.toml",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Trigger { source_id: 42 })));
        assert_eq!(cli.sources, Some(PathBuf::from("config/sources.toml")));
    }

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["civic-ingest"]).unwrap();
        assert!(cli.command.is_none());
    }
}
