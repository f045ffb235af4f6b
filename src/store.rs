use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Params, Row};

use crate::error::{LinkError, Result};
use crate::models::{
    DocType, FinancialDocument, Link, MatchType, NewDocument, NewTransaction, Transaction,
};

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

pub const TXN_COLUMNS: &str = "t.id, t.document_id, t.merchant_name, t.date, t.amount, t.category, \
     t.competence_month, t.competence_year, t.is_finalized, t.receipt_id, t.match_score, t.match_type";

const DOC_COLUMNS: &str = "d.id, d.filename, d.original_filename, d.doc_type, d.file_hash, d.status, \
     d.competence_month, d.competence_year, d.raw_text";

fn malformed(idx: usize, detail: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(LinkError::MalformedRecord(detail)))
}

/// True when the error comes from decoding a stored value rather than from the database itself.
pub fn is_malformed(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
    )
}

pub fn transaction_from_row(row: &Row) -> rusqlite::Result<Transaction> {
    let id: i64 = row.get(0)?;
    let raw_date: String = row.get(3)?;
    let date = NaiveDate::parse_from_str(raw_date.trim(), "%Y-%m-%d")
        .map_err(|_| malformed(3, format!("transaction {id} has unreadable date {raw_date:?}")))?;
    let amount: f64 = row.get(4)?;
    if !amount.is_finite() {
        return Err(malformed(4, format!("transaction {id} has non-finite amount")));
    }

    let receipt_id: Option<i64> = row.get(9)?;
    let match_score: Option<f64> = row.get(10)?;
    let match_type: Option<String> = row.get(11)?;
    let link = match receipt_id {
        Some(receipt_id) => {
            // An untagged link was written outside the engine; treat it as human-authored.
            let match_type = match match_type.as_deref() {
                Some(tag) => tag.parse::<MatchType>().map_err(|e| malformed(11, e.to_string()))?,
                None => MatchType::Manual,
            };
            Some(Link {
                receipt_id,
                match_score: match_score.unwrap_or(1.0),
                match_type,
            })
        }
        None => None,
    };

    Ok(Transaction {
        id,
        document_id: row.get(1)?,
        merchant_name: row.get(2)?,
        date,
        amount,
        category: row.get(5)?,
        competence_month: row.get(6)?,
        competence_year: row.get(7)?,
        is_finalized: row.get::<_, i64>(8)? != 0,
        link,
    })
}

pub fn document_from_row(row: &Row) -> rusqlite::Result<FinancialDocument> {
    let doc_type: String = row.get(3)?;
    let status: String = row.get(5)?;
    Ok(FinancialDocument {
        id: row.get(0)?,
        filename: row.get(1)?,
        original_filename: row.get(2)?,
        doc_type: doc_type.parse().map_err(|e: LinkError| malformed(3, e.to_string()))?,
        file_hash: row.get(4)?,
        status: status.parse().map_err(|e: LinkError| malformed(5, e.to_string()))?,
        competence_month: row.get(6)?,
        competence_year: row.get(7)?,
        raw_text: row.get(8)?,
    })
}

/// Run a transaction query, keeping decodable rows and logging the rest.
///
/// Returns the rows plus the number skipped as malformed. Database errors still propagate.
pub fn collect_transactions<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<(Vec<Transaction>, usize)> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for result in stmt.query_map(params, transaction_from_row)? {
        match result {
            Ok(txn) => rows.push(txn),
            Err(e) if is_malformed(&e) => {
                tracing::warn!(error = %e, "skipping malformed transaction row");
                skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok((rows, skipped))
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Single-row lookups report an undecodable row as `MalformedRecord`, not as a store failure.
fn single_row<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result.optional() {
        Ok(row) => Ok(row),
        Err(e) if is_malformed(&e) => Err(LinkError::MalformedRecord(e.to_string())),
        Err(e) => Err(e.into()),
    }
}

pub fn get_transaction(conn: &Connection, id: i64) -> Result<Option<Transaction>> {
    let sql = format!("SELECT {TXN_COLUMNS} FROM transactions t WHERE t.id = ?1");
    single_row(conn.query_row(&sql, [id], transaction_from_row))
}

pub fn get_document(conn: &Connection, id: i64) -> Result<Option<FinancialDocument>> {
    let sql = format!("SELECT {DOC_COLUMNS} FROM financial_documents d WHERE d.id = ?1");
    single_row(conn.query_row(&sql, [id], document_from_row))
}

pub fn transactions_of_document(conn: &Connection, document_id: i64) -> Result<Vec<Transaction>> {
    let sql = format!("SELECT {TXN_COLUMNS} FROM transactions t WHERE t.document_id = ?1 ORDER BY t.id");
    let (rows, _) = collect_transactions(conn, &sql, [document_id])?;
    Ok(rows)
}

/// Bank-statement lines that do not hold a receipt yet, oldest first.
pub fn unlinked_bank_transactions(conn: &Connection) -> Result<(Vec<Transaction>, usize)> {
    let sql = format!(
        "SELECT {TXN_COLUMNS} FROM transactions t \
         JOIN financial_documents d ON t.document_id = d.id \
         WHERE d.doc_type = 'BANK_STATEMENT' AND t.receipt_id IS NULL \
         ORDER BY t.date, t.id"
    );
    collect_transactions(conn, &sql, [])
}

/// Every transaction extracted from a receipt, whether or not the receipt is already claimed.
pub fn receipt_transactions(conn: &Connection) -> Result<(Vec<Transaction>, usize)> {
    let sql = format!(
        "SELECT {TXN_COLUMNS} FROM transactions t \
         JOIN financial_documents d ON t.document_id = d.id \
         WHERE d.doc_type = 'RECEIPT' \
         ORDER BY t.date, t.id"
    );
    collect_transactions(conn, &sql, [])
}

/// `(receipt_id, match_type)` of every live link.
pub fn live_links(conn: &Connection) -> Result<Vec<(i64, Option<String>)>> {
    let mut stmt = conn.prepare(
        "SELECT receipt_id, match_type FROM transactions WHERE receipt_id IS NOT NULL",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_transactions(
    conn: &Connection,
    unlinked_only: bool,
    doc_type: Option<DocType>,
) -> Result<Vec<Transaction>> {
    let mut sql = format!(
        "SELECT {TXN_COLUMNS} FROM transactions t \
         JOIN financial_documents d ON t.document_id = d.id \
         WHERE (?1 IS NULL OR d.doc_type = ?1)"
    );
    if unlinked_only {
        sql.push_str(" AND t.receipt_id IS NULL");
    }
    sql.push_str(" ORDER BY t.date DESC, t.id DESC");
    let (rows, _) = collect_transactions(conn, &sql, [doc_type.map(|d| d.as_str())])?;
    Ok(rows)
}

pub fn list_documents(conn: &Connection, doc_type: Option<DocType>) -> Result<Vec<FinancialDocument>> {
    let sql = format!(
        "SELECT {DOC_COLUMNS} FROM financial_documents d \
         WHERE (?1 IS NULL OR d.doc_type = ?1) ORDER BY d.id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([doc_type.map(|d| d.as_str())], document_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

pub fn insert_document(conn: &Connection, doc: &NewDocument, file_hash: &str) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM financial_documents WHERE file_hash = ?1",
            [file_hash],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Err(LinkError::Duplicate(format!("document already exists with id {id}")));
    }

    conn.execute(
        "INSERT INTO financial_documents \
         (filename, original_filename, doc_type, file_hash, status, competence_month, competence_year, raw_text) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            doc.filename,
            doc.original_filename,
            doc.doc_type.as_str(),
            file_hash,
            doc.status.as_str(),
            doc.competence_month,
            doc.competence_year,
            doc.raw_text,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_transaction(conn: &Connection, document_id: i64, txn: &NewTransaction) -> Result<i64> {
    if !txn.amount.is_finite() {
        return Err(LinkError::MalformedRecord(format!(
            "transaction for {:?} has a non-finite amount",
            txn.merchant_name
        )));
    }
    conn.execute(
        "INSERT INTO transactions \
         (document_id, merchant_name, date, amount, category, competence_month, competence_year) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            document_id,
            txn.merchant_name,
            txn.date.format("%Y-%m-%d").to_string(),
            txn.amount,
            txn.category,
            txn.competence_month,
            txn.competence_year,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn set_link(conn: &Connection, transaction_id: i64, link: &Link) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE transactions SET receipt_id = ?1, match_score = ?2, match_type = ?3 WHERE id = ?4",
        rusqlite::params![
            link.receipt_id,
            link.match_score,
            link.match_type.to_string(),
            transaction_id
        ],
    )?)
}

pub fn clear_link(conn: &Connection, transaction_id: i64) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE transactions SET receipt_id = NULL, match_score = NULL, match_type = NULL \
         WHERE id = ?1 AND receipt_id IS NOT NULL",
        [transaction_id],
    )?)
}

/// Clear the link triple of every transaction pointing at `receipt_id`, except `keep`.
pub fn clear_links_to_receipt(conn: &Connection, receipt_id: i64, keep: Option<i64>) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE transactions SET receipt_id = NULL, match_score = NULL, match_type = NULL \
         WHERE receipt_id = ?1 AND (?2 IS NULL OR id != ?2)",
        rusqlite::params![receipt_id, keep],
    )?)
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn test_insert_document_rejects_duplicate_hash() {
        let (_dir, conn) = test_db();
        add_document(&conn, DocType::Receipt, "h1");
        let doc = get_document(&conn, 1).unwrap().unwrap();
        let again = NewDocument {
            filename: "other.pdf".into(),
            original_filename: None,
            doc_type: DocType::Receipt,
            status: doc.status,
            competence_month: None,
            competence_year: None,
            raw_text: None,
            source: None,
            file_hash: None,
        };
        let err = insert_document(&conn, &again, "h1").unwrap_err();
        assert!(matches!(err, LinkError::Duplicate(_)));
    }

    #[test]
    fn test_new_transactions_start_unlinked() {
        let (_dir, conn) = test_db();
        let (_, txn) = add_receipt(&conn, "h1", "SURYA DENTAL", "2025-10-15", 845.73);
        let loaded = get_transaction(&conn, txn).unwrap().unwrap();
        assert!(loaded.link.is_none());
        assert!(!loaded.is_finalized);
        assert_eq!(loaded.amount, 845.73);
    }

    #[test]
    fn test_link_roundtrip_keeps_installment_count() {
        let (_dir, conn) = test_db();
        let (receipt, _) = add_receipt(&conn, "h1", "SURYA", "2025-10-15", 845.73);
        let bank = add_document(&conn, DocType::BankStatement, "h2");
        let txn = add_txn(&conn, bank, "SURYA", "2025-11-10", -281.91);
        let link = Link { receipt_id: receipt, match_score: 0.75, match_type: MatchType::Installment(3) };
        assert_eq!(set_link(&conn, txn, &link).unwrap(), 1);
        assert_eq!(link_of(&conn, txn), Some(link));
    }

    #[test]
    fn test_clear_links_to_receipt_keeps_selected_holder() {
        let (_dir, conn) = test_db();
        let (receipt, _) = add_receipt(&conn, "h1", "A", "2025-01-01", 30.0);
        let bank = add_document(&conn, DocType::BankStatement, "h2");
        let a = add_txn(&conn, bank, "A", "2025-01-02", -10.0);
        let b = add_txn(&conn, bank, "A", "2025-02-02", -10.0);
        let link = Link { receipt_id: receipt, match_score: 0.8, match_type: MatchType::Installment(3) };
        set_link(&conn, a, &link).unwrap();
        set_link(&conn, b, &link).unwrap();
        assert_eq!(clear_links_to_receipt(&conn, receipt, Some(b)).unwrap(), 1);
        assert!(link_of(&conn, a).is_none());
        assert!(link_of(&conn, b).is_some());
    }

    #[test]
    fn test_malformed_rows_are_skipped_not_fatal() {
        let (_dir, conn) = test_db();
        let bank = add_document(&conn, DocType::BankStatement, "h1");
        add_txn(&conn, bank, "GOOD", "2025-01-01", -10.0);
        conn.execute(
            "INSERT INTO transactions (document_id, merchant_name, date, amount) VALUES (?1, 'BAD DATE', '31/01/2025', -5.0)",
            [bank],
        ).unwrap();
        conn.execute(
            "INSERT INTO transactions (document_id, merchant_name, date, amount) VALUES (?1, 'BAD AMOUNT', '2025-01-02', 'n/a')",
            [bank],
        ).unwrap();
        let (rows, skipped) = unlinked_bank_transactions(&conn).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].merchant_name, "GOOD");
        assert_eq!(skipped, 2);
    }

    #[test]
    fn test_single_row_getters_report_malformed_records() {
        let (_dir, conn) = test_db();
        let bank = add_document(&conn, DocType::BankStatement, "h1");
        conn.execute(
            "INSERT INTO transactions (document_id, merchant_name, date, amount) VALUES (?1, 'BAD DATE', 'yesterday', -5.0)",
            [bank],
        ).unwrap();
        let bad_txn = conn.last_insert_rowid();
        let err = get_transaction(&conn, bad_txn).unwrap_err();
        assert!(matches!(err, LinkError::MalformedRecord(_)), "{err:?}");

        conn.execute("UPDATE financial_documents SET doc_type = 'INVOICE_SCAN' WHERE id = ?1", [bank]).unwrap();
        let err = get_document(&conn, bank).unwrap_err();
        assert!(matches!(err, LinkError::MalformedRecord(_)), "{err:?}");

        assert!(get_transaction(&conn, 999).unwrap().is_none());
    }

    #[test]
    fn test_list_transactions_filters() {
        let (_dir, conn) = test_db();
        let (receipt, _) = add_receipt(&conn, "h1", "A", "2025-01-01", 10.0);
        let bank = add_document(&conn, DocType::BankStatement, "h2");
        let linked = add_txn(&conn, bank, "A", "2025-01-01", -10.0);
        add_txn(&conn, bank, "B", "2025-01-03", -20.0);
        set_link(&conn, linked, &Link { receipt_id: receipt, match_score: 1.0, match_type: MatchType::Manual }).unwrap();

        assert_eq!(list_transactions(&conn, false, None).unwrap().len(), 3);
        assert_eq!(list_transactions(&conn, false, Some(DocType::BankStatement)).unwrap().len(), 2);
        let unlinked = list_transactions(&conn, true, Some(DocType::BankStatement)).unwrap();
        assert_eq!(unlinked.len(), 1);
        assert_eq!(unlinked[0].merchant_name, "B");
        assert_eq!(list_documents(&conn, Some(DocType::Receipt)).unwrap().len(), 1);
    }
}
