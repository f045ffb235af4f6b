use rusqlite::Connection;
use serde::Serialize;

use crate::db::begin_write;
use crate::error::{LinkError, Result};
use crate::fmt::amount;
use crate::models::{DocType, FinancialDocument, Link, MatchType, Transaction};
use crate::settings::MatchConfig;
use crate::store;

#[derive(Debug, Clone, Serialize)]
pub struct ManualMatchResult {
    pub transaction_id: i64,
    pub receipt_doc_id: i64,
    /// Transactions that held this receipt before and were unlinked.
    pub unlinked: Vec<i64>,
    pub forced: bool,
}

/// Find the receipt document a caller meant.
///
/// Callers sometimes pass the id of the receipt's transaction instead of the
/// document, so a miss on documents falls back to the transaction's owner.
pub fn resolve_receipt(conn: &Connection, receipt_ref: i64) -> Result<FinancialDocument> {
    let via_transaction = |conn: &Connection| -> Result<Option<FinancialDocument>> {
        let Some(txn) = store::get_transaction(conn, receipt_ref)? else {
            return Ok(None);
        };
        store::get_document(conn, txn.document_id)
    };

    if let Some(doc) = store::get_document(conn, receipt_ref)? {
        if doc.doc_type == DocType::Receipt {
            return Ok(doc);
        }
        return match via_transaction(conn)? {
            Some(owner) if owner.doc_type == DocType::Receipt => Ok(owner),
            _ => Err(LinkError::InvalidState(format!(
                "document {} is {}, not a receipt",
                doc.id, doc.doc_type
            ))),
        };
    }

    match via_transaction(conn)? {
        Some(owner) if owner.doc_type == DocType::Receipt => Ok(owner),
        Some(owner) => Err(LinkError::InvalidArgument(format!(
            "transaction {receipt_ref} belongs to {} document {}, not a receipt",
            owner.doc_type, owner.id
        ))),
        None => Err(LinkError::NotFound(format!("receipt {receipt_ref}"))),
    }
}

fn check_discrepancy(
    conn: &Connection,
    cfg: &MatchConfig,
    txn: &Transaction,
    receipt: &FinancialDocument,
) -> Result<()> {
    let Some(receipt_txn) = store::transactions_of_document(conn, receipt.id)?.into_iter().next() else {
        // Nothing extracted from the receipt to compare against.
        return Ok(());
    };

    let diff = (txn.amount.abs() - receipt_txn.amount.abs()).abs();
    if diff > cfg.manual_amount_tolerance {
        return Err(LinkError::Discrepancy(format!(
            "transaction amount {} does not match receipt amount {} (difference {}); use force to link anyway",
            amount(txn.amount.abs()),
            amount(receipt_txn.amount.abs()),
            amount(diff)
        )));
    }

    if cfg.manual_date_check {
        let days = (txn.date - receipt_txn.date).num_days();
        if days.abs() > cfg.manual_date_window_days {
            return Err(LinkError::Discrepancy(format!(
                "transaction date {} is {} days away from receipt date {}; use force to link anyway",
                txn.date,
                days.abs(),
                receipt_txn.date
            )));
        }
    }
    Ok(())
}

/// Link `transaction_id` to a receipt on a human's say-so.
///
/// Any other transaction holding the receipt loses its link. Without `force`,
/// an amount mismatch is refused with a `Discrepancy` the caller can override.
pub fn manual_match(
    conn: &Connection,
    cfg: &MatchConfig,
    transaction_id: i64,
    receipt_ref: i64,
    force: bool,
) -> Result<ManualMatchResult> {
    let tx = begin_write(conn)?;

    let txn = store::get_transaction(&tx, transaction_id)?
        .ok_or_else(|| LinkError::NotFound(format!("transaction {transaction_id}")))?;
    let receipt = resolve_receipt(&tx, receipt_ref)?;
    if txn.document_id == receipt.id {
        return Err(LinkError::InvalidArgument(format!(
            "transaction {transaction_id} was extracted from receipt {} itself",
            receipt.id
        )));
    }

    if !force {
        check_discrepancy(&tx, cfg, &txn, &receipt)?;
    }

    let unlinked: Vec<i64> = {
        let mut stmt = tx.prepare("SELECT id FROM transactions WHERE receipt_id = ?1 AND id != ?2 ORDER BY id")?;
        let ids = stmt
            .query_map(rusqlite::params![receipt.id, txn.id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ids
    };
    store::clear_links_to_receipt(&tx, receipt.id, Some(txn.id))?;
    store::set_link(
        &tx,
        txn.id,
        &Link {
            receipt_id: receipt.id,
            match_score: 1.0,
            match_type: MatchType::Manual,
        },
    )?;
    tx.commit()?;

    if !unlinked.is_empty() {
        tracing::info!(receipt = receipt.id, previous = ?unlinked, "receipt reassigned");
    }
    tracing::info!(transaction = txn.id, receipt = receipt.id, force, "manual match");

    Ok(ManualMatchResult {
        transaction_id: txn.id,
        receipt_doc_id: receipt.id,
        unlinked,
        forced: force,
    })
}

/// Drop a transaction's link. Unlinking an unlinked transaction is not an error.
pub fn unmatch(conn: &Connection, transaction_id: i64) -> Result<bool> {
    let tx = begin_write(conn)?;
    if store::get_transaction(&tx, transaction_id)?.is_none() {
        return Err(LinkError::NotFound(format!("transaction {transaction_id}")));
    }
    let cleared = store::clear_link(&tx, transaction_id)? > 0;
    tx.commit()?;
    Ok(cleared)
}
