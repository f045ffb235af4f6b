use colored::Colorize;

use crate::cleanup::clear_workspace;
use crate::documents::delete_document;
use crate::error::Result;
use crate::periods::{finalize_period, reset_links};

use super::open_store;

pub fn clear(month: u32, year: i32, only_unlinked: bool) -> Result<()> {
    let (settings, conn) = open_store()?;
    let result = clear_workspace(&conn, &settings.uploads_dir(), month, year, only_unlinked)?;
    println!(
        "Cleared {year}-{month:02}: {} transaction(s), {} document(s) deleted",
        result.deleted_transactions, result.deleted_documents
    );
    Ok(())
}

pub fn delete(id: i64) -> Result<()> {
    let (settings, conn) = open_store()?;
    let result = delete_document(&conn, &settings.uploads_dir(), id)?;
    println!(
        "Deleted document {} and {} transaction(s)",
        result.document_id, result.deleted_transactions
    );
    if result.unlinked_transactions > 0 {
        println!(
            "{}",
            format!("{} transaction(s) lost their receipt link", result.unlinked_transactions).yellow()
        );
    }
    Ok(())
}

pub fn finalize(month: u32, year: i32) -> Result<()> {
    let (_, conn) = open_store()?;
    let count = finalize_period(&conn, month, year)?;
    println!("Finalized {count} transaction(s) for {year}-{month:02}");
    Ok(())
}

pub fn reset(month: u32, year: i32, include_manual: bool) -> Result<()> {
    let (_, conn) = open_store()?;
    let result = reset_links(&conn, month, year, include_manual)?;
    println!(
        "Reset {year}-{month:02}: {} link(s) cleared, {} analysis record(s) deleted",
        result.cleared_links, result.deleted_analyses
    );
    Ok(())
}
