use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::error::Result;

pub const DB_FILE: &str = "ledgerlink.db";

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS financial_documents (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    original_filename TEXT,
    doc_type TEXT NOT NULL DEFAULT 'UNKNOWN',
    file_hash TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'PENDING',
    competence_month INTEGER,
    competence_year INTEGER,
    raw_text TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    document_id INTEGER NOT NULL,
    merchant_name TEXT NOT NULL,
    date TEXT NOT NULL,
    amount REAL NOT NULL,
    category TEXT,
    competence_month INTEGER,
    competence_year INTEGER,
    is_finalized INTEGER NOT NULL DEFAULT 0,
    receipt_id INTEGER,
    match_score REAL,
    match_type TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (document_id) REFERENCES financial_documents(id),
    FOREIGN KEY (receipt_id) REFERENCES financial_documents(id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_receipt ON transactions(receipt_id);
CREATE INDEX IF NOT EXISTS idx_transactions_document ON transactions(document_id);

CREATE TABLE IF NOT EXISTS tax_analyses (
    id INTEGER PRIMARY KEY,
    transaction_id INTEGER NOT NULL UNIQUE,
    classification TEXT,
    category TEXT,
    justification TEXT,
    is_manual_override INTEGER DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (transaction_id) REFERENCES transactions(id)
);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// SQL predicate: transaction `t` belongs to competence period (?1 = month, ?2 = year).
pub const TXN_IN_PERIOD: &str = "COALESCE(t.competence_month, CAST(strftime('%m', t.date) AS INTEGER)) = ?1 \
     AND COALESCE(t.competence_year, CAST(strftime('%Y', t.date) AS INTEGER)) = ?2";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Open a write transaction that takes the database write lock up front.
///
/// Every mutating operation runs inside one of these so a concurrent run
/// cannot interleave between reading the candidate set and writing links.
pub fn begin_write(conn: &Connection) -> Result<Transaction<'_>> {
    Ok(Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?)
}

pub fn get_metadata(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| row.get(0))
        .optional()
        .ok()
        .flatten()
}

pub fn set_metadata(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![key, value],
    )?;
    Ok(())
}
