use rusqlite::Connection;
use serde::Serialize;

use crate::cleanup::check_month;
use crate::db::{begin_write, TXN_IN_PERIOD};
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResetResult {
    pub cleared_links: usize,
    pub deleted_analyses: usize,
}

/// Lock every linked transaction of a period. Returns how many were newly finalized.
pub fn finalize_period(conn: &Connection, month: u32, year: i32) -> Result<usize> {
    check_month(month)?;
    let tx = begin_write(conn)?;
    let finalized = tx.execute(
        &format!(
            "UPDATE transactions SET is_finalized = 1 WHERE id IN \
             (SELECT t.id FROM transactions t WHERE {TXN_IN_PERIOD} \
              AND t.receipt_id IS NOT NULL AND t.is_finalized = 0)"
        ),
        rusqlite::params![month, year],
    )?;
    tx.commit()?;
    tracing::info!(month, year, finalized, "period finalized");
    Ok(finalized)
}

/// Undo reconciliation for a period so it can be run again.
///
/// Drops the analyses of the period's open transactions and clears their links.
/// Manual links stay unless `include_manual`.
pub fn reset_links(conn: &Connection, month: u32, year: i32, include_manual: bool) -> Result<ResetResult> {
    check_month(month)?;
    let open = format!("{TXN_IN_PERIOD} AND t.is_finalized = 0");
    let tx = begin_write(conn)?;

    let deleted_analyses = tx.execute(
        &format!("DELETE FROM tax_analyses WHERE transaction_id IN (SELECT t.id FROM transactions t WHERE {open})"),
        rusqlite::params![month, year],
    )?;

    let mut linked = format!("{open} AND t.receipt_id IS NOT NULL");
    if !include_manual {
        // Untagged links read as MANUAL, so they stay too.
        linked.push_str(" AND t.match_type IS NOT NULL AND t.match_type != 'MANUAL'");
    }
    let cleared_links = tx.execute(
        &format!(
            "UPDATE transactions SET receipt_id = NULL, match_score = NULL, match_type = NULL \
             WHERE id IN (SELECT t.id FROM transactions t WHERE {linked})"
        ),
        rusqlite::params![month, year],
    )?;
    tx.commit()?;

    tracing::info!(month, year, include_manual, cleared_links, deleted_analyses, "period reset");
    Ok(ResetResult {
        cleared_links,
        deleted_analyses,
    })
}
