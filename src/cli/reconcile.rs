use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::fmt::score;
use crate::manual;
use crate::models::MatchType;
use crate::reconciler::ReconciliationEngine;

use super::open_store;

pub(crate) fn match_type_label(match_type: MatchType) -> String {
    let label = match_type.to_string();
    match match_type {
        MatchType::Auto => label.green().to_string(),
        MatchType::AutoFuzzy => label.yellow().to_string(),
        MatchType::Installment(_) => label.cyan().to_string(),
        MatchType::Manual => label.bold().to_string(),
    }
}

pub fn run(json: bool) -> Result<()> {
    let (settings, conn) = open_store()?;
    let engine = ReconciliationEngine::new(settings.matching);
    let result = engine.run_auto_reconciliation(&conn)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.details.is_empty() {
        println!("No new matches.");
    } else {
        let mut table = Table::new();
        table.set_header(vec!["Bank Txn", "Receipt", "Score", "Type"]);
        for d in &result.details {
            table.add_row(vec![
                Cell::new(d.bank_txn_id),
                Cell::new(d.receipt_doc_id),
                Cell::new(score(d.score)),
                Cell::new(match_type_label(d.match_type)),
            ]);
        }
        println!("Matches\n{table}");
    }
    println!(
        "{} matched, receipt coverage {}",
        result.matches_found,
        score(result.accuracy)
    );
    if result.skipped_records > 0 {
        println!(
            "{}",
            format!("{} malformed record(s) skipped", result.skipped_records).yellow()
        );
    }
    Ok(())
}

pub fn match_manual(transaction_id: i64, receipt_id: i64, force: bool) -> Result<()> {
    let (settings, conn) = open_store()?;
    let engine = ReconciliationEngine::new(settings.matching);
    let result = engine.manual_match(&conn, transaction_id, receipt_id, force)?;

    println!(
        "Linked transaction {} to receipt {}{}",
        result.transaction_id,
        result.receipt_doc_id,
        if result.forced { " (forced)".yellow().to_string() } else { String::new() }
    );
    if !result.unlinked.is_empty() {
        let ids: Vec<String> = result.unlinked.iter().map(|id| id.to_string()).collect();
        println!("Unlinked previous holder(s): {}", ids.join(", "));
    }
    Ok(())
}

pub fn unmatch(transaction_id: i64) -> Result<()> {
    let (_, conn) = open_store()?;
    if manual::unmatch(&conn, transaction_id)? {
        println!("Unlinked transaction {transaction_id}");
    } else {
        println!("Transaction {transaction_id} was not linked");
    }
    Ok(())
}
