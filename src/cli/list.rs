use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::fmt::{amount, score};
use crate::store;

use super::reconcile::match_type_label;
use super::{open_store, parse_doc_type};

pub fn transactions(unlinked: bool, doc_type: Option<&str>) -> Result<()> {
    let doc_type = parse_doc_type(doc_type)?;
    let (_, conn) = open_store()?;
    let rows = store::list_transactions(&conn, unlinked, doc_type)?;

    let mut table = Table::new();
    table.set_header(vec![
        "ID", "Doc", "Date", "Merchant", "Amount", "Period", "Receipt", "Score", "Type", "Final",
    ]);
    for t in &rows {
        let (month, year) = t.period();
        let value = if t.amount < 0.0 {
            amount(t.amount).red().to_string()
        } else {
            amount(t.amount).green().to_string()
        };
        let (receipt, match_score, match_type) = match &t.link {
            Some(link) => (
                link.receipt_id.to_string(),
                score(link.match_score),
                match_type_label(link.match_type),
            ),
            None => (String::new(), String::new(), String::new()),
        };
        table.add_row(vec![
            Cell::new(t.id),
            Cell::new(t.document_id),
            Cell::new(t.date),
            Cell::new(&t.merchant_name),
            Cell::new(value),
            Cell::new(format!("{year}-{month:02}")),
            Cell::new(receipt),
            Cell::new(match_score),
            Cell::new(match_type),
            Cell::new(if t.is_finalized { "yes" } else { "" }),
        ]);
    }
    println!("Transactions\n{table}");
    Ok(())
}

pub fn documents(doc_type: Option<&str>) -> Result<()> {
    let doc_type = parse_doc_type(doc_type)?;
    let (_, conn) = open_store()?;
    let rows = store::list_documents(&conn, doc_type)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Type", "Filename", "Original", "Status", "Period", "Hash"]);
    for d in rows {
        let period = match (d.competence_month, d.competence_year) {
            (Some(m), Some(y)) => format!("{y}-{m:02}"),
            _ => String::new(),
        };
        table.add_row(vec![
            Cell::new(d.id),
            Cell::new(d.doc_type),
            Cell::new(&d.filename),
            Cell::new(d.original_filename.unwrap_or_default()),
            Cell::new(d.status.as_str()),
            Cell::new(period),
            Cell::new(d.file_hash.chars().take(12).collect::<String>()),
        ]);
    }
    println!("Documents\n{table}");
    Ok(())
}
