pub mod bts;
pub mod commands;
pub mod config;
pub mod dir_lock;
pub mod report;
pub mod stamp;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "freshbugs",
    version,
    about = "Report freshly modified bugs from the Debian BTS",
    long_about = "Freshbugs queries the Debian Bug Tracking System for the given bug numbers, \
maintainers, submitters, owners, or correspondents and prints only the bugs modified since \
the last run. Seen modification times are kept in a per-user stamp cache."
)]
struct Cli {
    /// Bug number, maintainer, submitter, owner, or correspondent address
    #[arg(required = true, value_name = "REQUEST")]
    requests: Vec<String>,

    /// Print the report without updating the stamp cache
    #[arg(long)]
    dry_run: bool,

    /// Drop stamp entries for bugs outside this query
    #[arg(long)]
    clean: bool,

    /// Print every fetched bug, even ones already seen
    #[arg(short, long)]
    all: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = commands::check::run(&cli.requests, cli.dry_run, cli.clean, cli.all) {
        eprintln!("freshbugs: {e:#}");
        std::process::exit(1);
    }
}
