//! flowquery - query and maintenance tool for flow databases

mod config;
mod output;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use config::Config;
use flowdb_core::query::{Direction, QueryArgs, ResolveOptions, SortBy};
use flowdb_core::storage::FlowDb;
use flowdb_core::timeparse::parse_time_argument;
use flowdb_core::{GroupBy, InterfaceSelection, Timestamp};
use output::Format;
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowquery")]
#[command(about = "Query and maintain a time-partitioned flow database", long_about = None)]
struct Cli {
    /// Database directory, overrides the configuration file
    #[arg(short = 'd', long, value_name = "PATH", global = true)]
    db_path: Option<PathBuf>,
    /// JSON configuration file
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate flows grouped by columns or a query type
    Query(QueryCommand),
    /// List interfaces with captured data
    List {
        #[arg(short = 'e', long, value_enum, default_value_t = Format::Txt)]
        format: Format,
    },
    /// Database maintenance
    #[command(subcommand)]
    Admin(AdminCommand),
}

#[derive(Subcommand)]
enum AdminCommand {
    /// Remove all partitions before the given time
    Clean {
        /// Epoch, calendar date or relative time such as -30d
        #[arg(allow_hyphen_values = true)]
        date: String,
    },
    /// Remove all interface data and reset the summary
    Wipe,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Bytes,
    Packets,
    Time,
}

#[derive(Args)]
struct QueryCommand {
    /// Columns (sip,dip,dport,proto,iface,time) or a query type such as talk_conv
    #[arg(default_value = "talk_src")]
    columns: String,
    /// Interfaces to query, or ANY
    #[arg(short = 'i', long, default_value = "ANY")]
    ifaces: String,
    /// Filter condition, e.g. "dport = 443 & proto = TCP"
    #[arg(short = 'c', long, default_value = "")]
    condition: String,
    /// Lower bound on block timestamps
    #[arg(short = 'f', long, allow_hyphen_values = true)]
    first: Option<String>,
    /// Upper bound on block timestamps
    #[arg(short = 'l', long, allow_hyphen_values = true)]
    last: Option<String>,
    /// Sort column
    #[arg(short = 's', long, value_enum, default_value_t = SortArg::Bytes)]
    sort: SortArg,
    /// Sort ascending
    #[arg(short = 'a', long, action = ArgAction::SetTrue)]
    ascending: bool,
    /// Count received traffic only
    #[arg(long = "in", action = ArgAction::SetTrue)]
    incoming: bool,
    /// Count sent traffic only
    #[arg(long = "out", action = ArgAction::SetTrue)]
    outgoing: bool,
    /// Count received plus sent traffic (default)
    #[arg(long, action = ArgAction::SetTrue, conflicts_with_all = ["incoming", "outgoing"])]
    sum: bool,
    /// Maximum number of rows; default keeps 95% of the volume
    #[arg(short = 'n', long)]
    limit: Option<usize>,
    /// Share of available memory the query may use (percent)
    #[arg(long, default_value_t = flowdb_core::config::DEFAULT_MAX_MEM_PCT)]
    max_mem_pct: u8,
    /// Resolve the top addresses with reverse DNS
    #[arg(long, action = ArgAction::SetTrue)]
    resolve: bool,
    /// Rows to resolve
    #[arg(long, default_value_t = flowdb_core::config::DEFAULT_RESOLVE_ROWS)]
    resolve_rows: usize,
    /// Seconds per reverse lookup
    #[arg(long, default_value_t = flowdb_core::config::DEFAULT_RESOLVE_TIMEOUT.as_secs())]
    resolve_timeout: u64,
    /// Output format
    #[arg(short = 'e', long, value_enum, default_value_t = Format::Txt)]
    format: Format,
}

impl QueryCommand {
    fn direction(&self) -> Direction {
        if self.sum {
            return Direction::Both;
        }
        match (self.incoming, self.outgoing) {
            (true, false) => Direction::In,
            (false, true) => Direction::Out,
            _ => Direction::Both,
        }
    }

    fn to_args(&self) -> Result<QueryArgs> {
        let ifaces = InterfaceSelection::parse(&self.ifaces)?;
        let group_by = GroupBy::parse(&self.columns)?;
        let first = parse_bound(self.first.as_deref(), 0)?;
        let last = parse_bound(self.last.as_deref(), Timestamp::MAX)?;
        let sort_by = match self.sort {
            SortArg::Bytes => SortBy::Bytes,
            SortArg::Packets => SortBy::Packets,
            SortArg::Time => SortBy::Time,
        };

        let mut args = QueryArgs::new(ifaces, group_by)
            .with_range(first, last)
            .with_condition(self.condition.clone())
            .with_sort(sort_by, self.direction(), self.ascending)
            .with_max_mem_pct(self.max_mem_pct);
        if let Some(limit) = self.limit {
            args = args.with_limit(limit);
        }
        if self.resolve {
            args = args.with_resolve(ResolveOptions {
                rows: self.resolve_rows,
                timeout: Duration::from_secs(self.resolve_timeout),
            });
        }
        Ok(args)
    }
}

fn parse_bound(arg: Option<&str>, default: Timestamp) -> Result<Timestamp> {
    match arg {
        Some(arg) => parse_time_argument(arg).with_context(|| format!("Invalid time argument {:?}", arg)),
        None => Ok(default),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("flowquery error: {err:?}");
        exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.logging.level);

    let db = FlowDb::open(config.storage())
        .with_context(|| format!("Cannot open database {}", config.db_path.display()))?;
    let mut stdout = std::io::stdout();

    match &cli.command {
        Commands::Query(cmd) => {
            let args = cmd.to_args()?;
            let result = db.query(&args).await.context("Query failed")?;
            output::write_result(&mut stdout, &result, cmd.format)?;
        }
        Commands::List { format } => {
            let ifaces = db.list_interfaces().context("Cannot list interfaces")?;
            output::write_interfaces(&mut stdout, &ifaces, *format)?;
        }
        Commands::Admin(AdminCommand::Clean { date }) => {
            let cutoff = parse_time_argument(date)
                .with_context(|| format!("Invalid clean date {:?}", date))?;
            let report = db.clean(cutoff).context("Clean failed")?;
            for iface in report.gone() {
                warn!("Interface {} holds no data anymore", iface);
            }
            info!(
                "Removed {} partitions from {}",
                report.partitions_removed(),
                config.db_path.display()
            );
        }
        Commands::Admin(AdminCommand::Wipe) => {
            let removed = db.wipe().context("Wipe failed")?;
            info!("Wiped {} directories from {}", removed, config.db_path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn query(argv: &[&str]) -> QueryCommand {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Query(cmd) => cmd,
            _ => panic!("expected a query command"),
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_query_arguments() {
        let cmd = query(&[
            "flowquery", "query", "talk_conv", "-i", "eth0,eth1", "-c", "dport = 443",
            "-f", "1136214240", "-n", "5", "--out",
        ]);
        let args = cmd.to_args().unwrap();
        assert_eq!(args.ifaces, InterfaceSelection::Named(vec!["eth0".into(), "eth1".into()]));
        assert_eq!(args.range.start, 1136214240);
        assert_eq!(args.range.end, Timestamp::MAX);
        assert_eq!(args.limit, Some(5));
        assert_eq!(args.direction, Direction::Out);
        assert_eq!(args.condition, "dport = 443");
        assert!(args.resolve.is_none());
    }

    #[test]
    fn test_query_defaults() {
        let args = query(&["flowquery", "query"]).to_args().unwrap();
        assert_eq!(args.ifaces, InterfaceSelection::Any);
        assert_eq!(args.group_by, GroupBy::parse("sip").unwrap());
        assert_eq!(args.direction, Direction::Both);
        assert_eq!(args.sort_by, SortBy::Bytes);
    }

    #[test]
    fn test_relative_first_and_bad_columns() {
        let cmd = query(&["flowquery", "query", "sip", "-f", "-2d:4h"]);
        assert!(cmd.to_args().unwrap().range.start > 0);
        assert!(query(&["flowquery", "query", "bogus"]).to_args().is_err());
    }

    #[test]
    fn test_admin_clean_accepts_relative_date() {
        let cli = Cli::try_parse_from(["flowquery", "-d", "/tmp/db", "admin", "clean", "-30d"]).unwrap();
        match cli.command {
            Commands::Admin(AdminCommand::Clean { date }) => assert_eq!(date, "-30d"),
            _ => panic!("expected admin clean"),
        }
        assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/db")));
    }
}
