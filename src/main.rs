//! sqlfan CLI: partitioned batch-query fan-out.

use clap::Parser;
use sqlfan::logging::{self, LogFormat};

#[derive(Parser, Debug)]
#[command(
    name = "sqlfan",
    version,
    about = "Partitioned batch-query fan-out with precondition checks and an audit ledger"
)]
struct Cli {
    /// Log filter (e.g. info, debug, sqlfan::core=trace)
    #[arg(long, global = true, env = "SQLFAN_LOG", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: sqlfan::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init(&cli.log_level, cli.log_format) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = sqlfan::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
