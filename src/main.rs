mod cleanup;
mod cli;
mod db;
mod documents;
mod error;
mod fmt;
mod manual;
mod matcher;
mod models;
mod periods;
mod reconciler;
mod scorer;
mod settings;
mod similarity;
mod store;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

/// Log to stderr. `LEDGERLINK_LOG` wins over the configured level.
fn init_logging() {
    let level = settings::load_settings().log_level;
    let filter = EnvFilter::try_from_env("LEDGERLINK_LOG")
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Ingest { bundle } => cli::ingest::run(&bundle),
        Commands::Reconcile { json } => cli::reconcile::run(json),
        Commands::Match {
            transaction_id,
            receipt_id,
            force,
        } => cli::reconcile::match_manual(transaction_id, receipt_id, force),
        Commands::Unmatch { transaction_id } => cli::reconcile::unmatch(transaction_id),
        Commands::ClearWorkspace {
            month,
            year,
            only_unlinked,
        } => cli::workspace::clear(month, year, only_unlinked),
        Commands::DeleteDocument { id } => cli::workspace::delete(id),
        Commands::Finalize { month, year } => cli::workspace::finalize(month, year),
        Commands::Reset {
            month,
            year,
            include_manual,
        } => cli::workspace::reset(month, year, include_manual),
        Commands::Transactions { unlinked, doc_type } => {
            cli::list::transactions(unlinked, doc_type.as_deref())
        }
        Commands::Documents { doc_type } => cli::list::documents(doc_type.as_deref()),
        Commands::Status => cli::status::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
