use crate::db::{get_connection, get_metadata};
use crate::error::Result;
use crate::fmt::format_bytes;
use crate::settings::load_settings;

pub fn run() -> Result<()> {
    let settings = load_settings();
    let db_path = settings.db_path();

    println!("Data dir:   {}", settings.data_dir);
    println!("Database:   {}", db_path.display());

    if db_path.exists() {
        let size = std::fs::metadata(&db_path)?.len();
        println!("DB size:    {}", format_bytes(size));

        let conn = get_connection(&db_path)?;
        let count = |sql: &str| -> rusqlite::Result<i64> { conn.query_row(sql, [], |r| r.get(0)) };

        let receipts = count("SELECT count(*) FROM financial_documents WHERE doc_type = 'RECEIPT'")?;
        let statements = count("SELECT count(*) FROM financial_documents WHERE doc_type = 'BANK_STATEMENT'")?;
        let transactions = count("SELECT count(*) FROM transactions")?;
        let unlinked = count(
            "SELECT count(*) FROM transactions t JOIN financial_documents d ON t.document_id = d.id \
             WHERE d.doc_type = 'BANK_STATEMENT' AND t.receipt_id IS NULL",
        )?;
        let linked = count("SELECT count(*) FROM transactions WHERE receipt_id IS NOT NULL")?;
        let finalized = count("SELECT count(*) FROM transactions WHERE is_finalized = 1")?;
        let last_run = get_metadata(&conn, "last_reconcile_at");

        println!();
        println!("Receipts:         {receipts}");
        println!("Bank statements:  {statements}");
        println!("Transactions:     {transactions}");
        println!("Linked:           {linked}");
        println!("Unlinked (bank):  {unlinked}");
        println!("Finalized:        {finalized}");
        println!("Last reconcile:   {}", last_run.as_deref().unwrap_or("(never)"));
    } else {
        println!();
        println!("Database not found. Run `ledgerlink init` to set up.");
    }

    Ok(())
}
