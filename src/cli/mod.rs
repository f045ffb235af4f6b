pub mod ingest;
pub mod init;
pub mod list;
pub mod reconcile;
pub mod status;
pub mod workspace;

use clap::{Parser, Subcommand};
use rusqlite::Connection;

use crate::db::{get_connection, init_db};
use crate::error::{LinkError, Result};
use crate::models::DocType;
use crate::settings::{load_settings, Settings};

/// Load settings and open the configured database. Fails if `init` was never run.
pub(crate) fn open_store() -> Result<(Settings, Connection)> {
    let settings = load_settings();
    settings.matching.validate()?;
    let db_path = settings.db_path();
    if !db_path.exists() {
        return Err(LinkError::NotFound(format!(
            "database {} (run `ledgerlink init` first)",
            db_path.display()
        )));
    }
    let conn = get_connection(&db_path)?;
    init_db(&conn)?;
    Ok((settings, conn))
}

pub(crate) fn parse_doc_type(doc_type: Option<&str>) -> Result<Option<DocType>> {
    doc_type.map(str::parse).transpose()
}

#[derive(Parser)]
#[command(name = "ledgerlink", about = "Match bank statement lines to the receipts that back them.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the database.
    Init {
        /// Path for ledgerlink data (default: ~/Documents/ledgerlink)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Store a classified document and its extracted transactions from a JSON bundle.
    Ingest {
        /// Path to the bundle file
        bundle: String,
    },
    /// Link unlinked bank lines to receipts automatically.
    Reconcile {
        /// Print the run result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Link a transaction to a receipt by hand.
    Match {
        transaction_id: i64,
        /// Receipt document id (a receipt's transaction id is accepted too)
        receipt_id: i64,
        /// Link even when the amounts disagree
        #[arg(long)]
        force: bool,
    },
    /// Remove a transaction's receipt link.
    Unmatch { transaction_id: i64 },
    /// Delete a period's non-finalized transactions and the documents left empty.
    ClearWorkspace {
        #[arg(long)]
        month: u32,
        #[arg(long)]
        year: i32,
        /// Keep linked transactions and the receipts they hold
        #[arg(long = "only-unlinked")]
        only_unlinked: bool,
    },
    /// Delete one document with its transactions, unlinking anything that used it as a receipt.
    DeleteDocument { id: i64 },
    /// Finalize every linked transaction of a period.
    Finalize {
        #[arg(long)]
        month: u32,
        #[arg(long)]
        year: i32,
    },
    /// Clear a period's links and analyses so it can be reconciled again.
    Reset {
        #[arg(long)]
        month: u32,
        #[arg(long)]
        year: i32,
        /// Also clear manual links
        #[arg(long = "include-manual")]
        include_manual: bool,
    },
    /// List transactions.
    Transactions {
        /// Only transactions without a receipt link
        #[arg(long)]
        unlinked: bool,
        /// RECEIPT, BANK_STATEMENT or UNKNOWN
        #[arg(long = "doc-type")]
        doc_type: Option<String>,
    },
    /// List documents.
    Documents {
        /// RECEIPT, BANK_STATEMENT or UNKNOWN
        #[arg(long = "doc-type")]
        doc_type: Option<String>,
    },
    /// Show current database and summary statistics.
    Status,
}
