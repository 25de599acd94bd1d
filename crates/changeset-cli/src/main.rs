use changeset_cli::cmd::{self, config::ConfigSubcommand};
use changeset_cli::store_path;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "changeset",
    about = "Inspect and administer the changeset ledger and its process lock",
    version,
    propagate_version = true
)]
struct Cli {
    /// Runner config file (YAML)
    #[arg(long, global = true, env = "CHANGESET_CONFIG")]
    config: Option<PathBuf>,

    /// Ledger database (default: .changeset/ledger.redb, searched upward from cwd)
    #[arg(long, global = true, env = "CHANGESET_DB")]
    db: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the lock holder and ledger size
    Status,

    /// List applied change sets
    Ledger,

    /// Clear the process lock left behind by a dead runner
    Unlock,

    /// Validate or print the runner config
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .init();

    let config = cli.config.as_deref();
    let db = store_path::resolve_db(cli.db.as_deref());

    let result = match cli.command {
        Commands::Status => cmd::status::run(&db, config, cli.json),
        Commands::Ledger => cmd::ledger::run(&db, config, cli.json),
        Commands::Unlock => cmd::unlock::run(&db, config, cli.json),
        Commands::Config { subcommand } => cmd::config::run(config, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
