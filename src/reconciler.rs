use rusqlite::Connection;
use serde::Serialize;

use crate::db::{begin_write, set_metadata};
use crate::error::Result;
use crate::manual::{self, ManualMatchResult};
use crate::matcher::{plan_matches, PlannedLink, ReceiptClaims};
use crate::models::MatchType;
use crate::settings::MatchConfig;
use crate::store;

#[derive(Debug, Clone, Serialize)]
pub struct MatchDetail {
    pub bank_txn_id: i64,
    pub receipt_doc_id: i64,
    pub score: f64,
    pub match_type: MatchType,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileRun {
    pub matches_found: usize,
    pub reconciled_transactions: usize,
    /// Share of receipt transactions absorbed by this run, not a precision measure.
    pub accuracy: f64,
    pub details: Vec<MatchDetail>,
    /// Rows or pairs left out because they could not be decoded or scored.
    pub skipped_records: usize,
}

/// The reconciliation service. Holds its tuning explicitly; all state lives in the database.
pub struct ReconciliationEngine {
    config: MatchConfig,
}

impl ReconciliationEngine {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    /// One auto-reconciliation pass over every unlinked bank line.
    ///
    /// Runs as a single write transaction: either every accepted link is stored or none is.
    pub fn run_auto_reconciliation(&self, conn: &Connection) -> Result<ReconcileRun> {
        let tx = begin_write(conn)?;

        let (bank, bank_skipped) = store::unlinked_bank_transactions(&tx)?;
        let (receipts, receipt_skipped) = store::receipt_transactions(&tx)?;
        let claims = ReceiptClaims::from_links(&store::live_links(&tx)?);

        let plan = plan_matches(&bank, &receipts, claims, &self.config);

        let mut details = Vec::with_capacity(plan.links.len());
        for link in &plan.links {
            if commit_link(&tx, link)? {
                tracing::debug!(
                    bank_txn = link.bank_txn_id,
                    receipt = link.receipt_doc_id,
                    receipt_txn = link.receipt_txn_id,
                    score = link.score,
                    match_type = %link.match_type,
                    "linked"
                );
                details.push(MatchDetail {
                    bank_txn_id: link.bank_txn_id,
                    receipt_doc_id: link.receipt_doc_id,
                    score: link.score,
                    match_type: link.match_type,
                });
            } else {
                tracing::warn!(
                    bank_txn = link.bank_txn_id,
                    receipt = link.receipt_doc_id,
                    "link already claimed elsewhere, leaving it"
                );
            }
        }

        set_metadata(
            &tx,
            "last_reconcile_at",
            &chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        )?;
        tx.commit()?;

        let matches_found = details.len();
        let accuracy = matches_found as f64 / receipts.len().max(1) as f64;
        tracing::info!(
            bank = bank.len(),
            receipts = receipts.len(),
            matches_found,
            "auto-reconciliation finished"
        );

        Ok(ReconcileRun {
            matches_found,
            reconciled_transactions: matches_found,
            accuracy,
            details,
            skipped_records: bank_skipped + receipt_skipped + plan.skipped_pairs,
        })
    }

    pub fn manual_match(
        &self,
        conn: &Connection,
        transaction_id: i64,
        receipt_ref: i64,
        force: bool,
    ) -> Result<ManualMatchResult> {
        manual::manual_match(conn, &self.config, transaction_id, receipt_ref, force)
    }
}

/// Write one planned link, conditioned on nobody having claimed either side meanwhile.
fn commit_link(conn: &Connection, link: &PlannedLink) -> Result<bool> {
    let receipt_free = if link.match_type.is_installment() {
        "NOT EXISTS (SELECT 1 FROM transactions o WHERE o.receipt_id = ?1 \
         AND (o.match_type IS NULL OR o.match_type NOT LIKE 'INSTALLMENT(%'))"
    } else {
        "NOT EXISTS (SELECT 1 FROM transactions o WHERE o.receipt_id = ?1)"
    };
    let sql = format!(
        "UPDATE transactions SET receipt_id = ?1, match_score = ?2, match_type = ?3 \
         WHERE id = ?4 AND receipt_id IS NULL AND {receipt_free}"
    );
    let changed = conn.execute(
        &sql,
        rusqlite::params![
            link.receipt_doc_id,
            link.score,
            link.match_type.to_string(),
            link.bank_txn_id
        ],
    )?;
    Ok(changed > 0)
}
