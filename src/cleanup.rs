use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;

use crate::db::{begin_write, TXN_IN_PERIOD};
use crate::documents::remove_backing_file;
use crate::error::{LinkError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClearResult {
    pub deleted_transactions: usize,
    pub deleted_documents: usize,
}

pub(crate) fn check_month(month: u32) -> Result<()> {
    if (1..=12).contains(&month) {
        Ok(())
    } else {
        Err(LinkError::InvalidArgument(format!("month must be 1-12, got {month}")))
    }
}

/// SQL predicate: document `d` belongs to period (?1, ?2), by its own competence or through its transactions.
fn doc_in_period() -> String {
    format!(
        "((d.competence_month IS NOT NULL AND d.competence_year IS NOT NULL \
           AND d.competence_month = ?1 AND d.competence_year = ?2) \
         OR ((d.competence_month IS NULL OR d.competence_year IS NULL) \
           AND EXISTS (SELECT 1 FROM transactions t WHERE t.document_id = d.id AND {TXN_IN_PERIOD})))"
    )
}

/// Wipe a period's working data so it can be re-ingested.
///
/// Finalized transactions are never touched, and neither is any document that
/// owns one or serves as the receipt of one, nor that receipt's own lines.
/// With `only_unlinked`, linked transactions and receipts currently held by a
/// link stay as well, again with their own lines.
pub fn clear_workspace(
    conn: &Connection,
    uploads_dir: &Path,
    month: u32,
    year: i32,
    only_unlinked: bool,
) -> Result<ClearResult> {
    check_month(month)?;
    let tx = begin_write(conn)?;

    // A protected receipt keeps its own extracted lines too.
    let mut txn_filter = format!(
        "{TXN_IN_PERIOD} AND t.is_finalized = 0 \
         AND NOT EXISTS (SELECT 1 FROM transactions f WHERE f.receipt_id = t.document_id AND f.is_finalized = 1)"
    );
    if only_unlinked {
        txn_filter.push_str(
            " AND t.receipt_id IS NULL \
             AND NOT EXISTS (SELECT 1 FROM transactions l WHERE l.receipt_id = t.document_id)",
        );
    }

    // Documents are chosen before any transaction goes, while period membership is still visible.
    let mut doc_sql = format!(
        "SELECT d.id, d.filename FROM financial_documents d WHERE {} \
         AND NOT EXISTS (SELECT 1 FROM transactions f WHERE f.is_finalized = 1 \
                         AND (f.document_id = d.id OR f.receipt_id = d.id))",
        doc_in_period()
    );
    if only_unlinked {
        doc_sql.push_str(" AND NOT EXISTS (SELECT 1 FROM transactions l WHERE l.receipt_id = d.id)");
    }
    let candidates: Vec<(i64, String)> = {
        let mut stmt = tx.prepare(&doc_sql)?;
        let rows = stmt
            .query_map(rusqlite::params![month, year], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    let deleted_analyses = tx.execute(
        &format!(
            "DELETE FROM tax_analyses WHERE transaction_id IN \
             (SELECT t.id FROM transactions t WHERE {txn_filter})"
        ),
        rusqlite::params![month, year],
    )?;
    let deleted_transactions = tx.execute(
        &format!("DELETE FROM transactions WHERE id IN (SELECT t.id FROM transactions t WHERE {txn_filter})"),
        rusqlite::params![month, year],
    )?;

    let mut removed_files = Vec::new();
    for (doc_id, filename) in candidates {
        let remaining: i64 = tx.query_row(
            "SELECT count(*) FROM transactions WHERE document_id = ?1",
            [doc_id],
            |row| row.get(0),
        )?;
        if remaining > 0 {
            continue;
        }
        tx.execute(
            "UPDATE transactions SET receipt_id = NULL, match_score = NULL, match_type = NULL \
             WHERE receipt_id = ?1",
            [doc_id],
        )?;
        tx.execute("DELETE FROM financial_documents WHERE id = ?1", [doc_id])?;
        removed_files.push(filename);
    }
    tx.commit()?;

    for filename in &removed_files {
        remove_backing_file(uploads_dir, filename);
    }

    tracing::info!(
        month,
        year,
        only_unlinked,
        deleted_transactions,
        deleted_documents = removed_files.len(),
        deleted_analyses,
        "workspace cleared"
    );
    Ok(ClearResult {
        deleted_transactions,
        deleted_documents: removed_files.len(),
    })
}
