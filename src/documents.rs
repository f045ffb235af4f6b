use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::begin_write;
use crate::error::{LinkError, Result};
use crate::models::{NewDocument, NewTransaction};
use crate::store;

/// One ingestion hand-off: a classified document plus whatever was extracted from it.
#[derive(Debug, Clone, Deserialize)]
pub struct Bundle {
    pub document: NewDocument,
    #[serde(default)]
    pub transactions: Vec<NewTransaction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ingested {
    pub document_id: i64,
    pub transaction_ids: Vec<i64>,
    pub file_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedDocument {
    pub document_id: i64,
    pub deleted_transactions: usize,
    /// Transactions elsewhere that pointed at this document and lost their link.
    pub unlinked_transactions: usize,
}

/// Read a bundle file. A relative `source` is taken relative to the bundle itself.
pub fn load_bundle(path: &Path) -> Result<Bundle> {
    let content = std::fs::read_to_string(path)?;
    let mut bundle: Bundle = serde_json::from_str(&content)?;
    if let Some(source) = bundle.document.source.as_deref() {
        let source = Path::new(source);
        if source.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            bundle.document.source = Some(base.join(source).to_string_lossy().to_string());
        }
    }
    Ok(bundle)
}

pub fn compute_checksum(file_path: &Path) -> Result<String> {
    let data = std::fs::read(file_path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

fn document_hash(doc: &NewDocument) -> Result<String> {
    if let Some(hash) = doc.file_hash.as_deref().filter(|h| !h.trim().is_empty()) {
        return Ok(hash.trim().to_lowercase());
    }
    if let Some(source) = doc.source.as_deref() {
        return compute_checksum(Path::new(source));
    }
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(doc)?);
    Ok(hex::encode(hasher.finalize()))
}

fn check_period(month: Option<u32>, year: Option<i32>) -> Result<()> {
    match (month, year) {
        (Some(m), _) if !(1..=12).contains(&m) => Err(LinkError::InvalidArgument(format!(
            "competence month must be 1-12, got {m}"
        ))),
        (Some(_), None) | (None, Some(_)) => Err(LinkError::InvalidArgument(
            "competence month and year must be given together".into(),
        )),
        _ => Ok(()),
    }
}

/// Stored name of a source file: its hash plus the original extension.
fn stored_name(hash: &str, source: &Path) -> String {
    match source.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{hash}.{}", ext.to_lowercase()),
        None => hash.to_string(),
    }
}

/// Path of a document's backing file inside `uploads_dir`. Directory parts of the name are ignored.
pub fn backing_file(uploads_dir: &Path, filename: &str) -> Option<PathBuf> {
    Path::new(filename).file_name().map(|name| uploads_dir.join(name))
}

/// Remove a backing file, tolerating one that is already gone.
pub fn remove_backing_file(uploads_dir: &Path, filename: &str) {
    let Some(path) = backing_file(uploads_dir, filename) else {
        return;
    };
    match std::fs::remove_file(&path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed backing file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove backing file"),
    }
}

/// Store a document and its transactions as one unit. Link fields always start empty.
pub fn ingest(conn: &Connection, uploads_dir: &Path, bundle: Bundle) -> Result<Ingested> {
    let Bundle { mut document, transactions } = bundle;
    check_period(document.competence_month, document.competence_year)?;
    for txn in &transactions {
        check_period(txn.competence_month, txn.competence_year)?;
    }

    let file_hash = document_hash(&document)?;
    let mut copied = None;
    if let Some(source) = document.source.clone() {
        let source = PathBuf::from(source);
        if document.original_filename.is_none() {
            document.original_filename = Some(document.filename.clone());
        }
        document.filename = stored_name(&file_hash, &source);
        copied = Some(source);
    }

    let tx = begin_write(conn)?;
    let document_id = store::insert_document(&tx, &document, &file_hash)?;
    let transaction_ids = transactions
        .iter()
        .map(|txn| store::insert_transaction(&tx, document_id, txn))
        .collect::<Result<Vec<_>>>()?;

    if let Some(source) = &copied {
        std::fs::create_dir_all(uploads_dir)?;
        std::fs::copy(source, uploads_dir.join(&document.filename))?;
    }
    if let Err(e) = tx.commit() {
        if copied.is_some() {
            remove_backing_file(uploads_dir, &document.filename);
        }
        return Err(e.into());
    }

    tracing::info!(
        document = document_id,
        doc_type = %document.doc_type,
        transactions = transaction_ids.len(),
        "document ingested"
    );
    Ok(Ingested {
        document_id,
        transaction_ids,
        file_hash,
    })
}

/// Delete a document with everything it owns.
///
/// Transactions that used it as their receipt are unlinked first. Documents
/// backing a finalized transaction, as owner or as receipt, are refused.
pub fn delete_document(conn: &Connection, uploads_dir: &Path, document_id: i64) -> Result<DeletedDocument> {
    let tx = begin_write(conn)?;
    let doc = store::get_document(&tx, document_id)?
        .ok_or_else(|| LinkError::NotFound(format!("document {document_id}")))?;

    let finalized: i64 = tx.query_row(
        "SELECT count(*) FROM transactions \
         WHERE is_finalized = 1 AND (document_id = ?1 OR receipt_id = ?1)",
        [document_id],
        |row| row.get(0),
    )?;
    if finalized > 0 {
        return Err(LinkError::InvalidState(format!(
            "document {document_id} backs {finalized} finalized transaction(s)"
        )));
    }

    let unlinked_transactions = store::clear_links_to_receipt(&tx, document_id, None)?;
    tx.execute(
        "DELETE FROM tax_analyses WHERE transaction_id IN \
         (SELECT id FROM transactions WHERE document_id = ?1)",
        [document_id],
    )?;
    let deleted_transactions = tx.execute("DELETE FROM transactions WHERE document_id = ?1", [document_id])?;
    tx.execute("DELETE FROM financial_documents WHERE id = ?1", [document_id])?;
    tx.commit()?;

    remove_backing_file(uploads_dir, &doc.filename);
    tracing::info!(
        document = document_id,
        deleted_transactions,
        unlinked_transactions,
        "document deleted"
    );
    Ok(DeletedDocument {
        document_id,
        deleted_transactions,
        unlinked_transactions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocType, MatchType};
    use crate::reconciler::ReconciliationEngine;
    use crate::settings::MatchConfig;
    use crate::store::testutil::*;

    fn bundle(json: &str) -> Bundle {
        serde_json::from_str(json).unwrap()
    }

    const RECEIPT: &str = r#"{
        "document": {"filename": "nf-0042.pdf", "doc_type": "RECEIPT"},
        "transactions": [{"merchant_name": "SURYA DENTAL", "date": "2025-10-15", "amount": 845.73}]
    }"#;

    #[test]
    fn test_ingest_stores_document_and_transactions() {
        let (dir, conn) = test_db();
        let result = ingest(&conn, &dir.path().join("uploads"), bundle(RECEIPT)).unwrap();
        assert_eq!(result.transaction_ids.len(), 1);
        assert_eq!(result.file_hash.len(), 64);

        let doc = store::get_document(&conn, result.document_id).unwrap().unwrap();
        assert_eq!(doc.doc_type, DocType::Receipt);
        assert_eq!(doc.filename, "nf-0042.pdf");
        let txn = store::get_transaction(&conn, result.transaction_ids[0]).unwrap().unwrap();
        assert_eq!(txn.amount, 845.73);
        assert!(txn.link.is_none());
        assert!(!txn.is_finalized);
    }

    #[test]
    fn test_ingest_rejects_duplicates() {
        let (dir, conn) = test_db();
        let uploads = dir.path().join("uploads");
        ingest(&conn, &uploads, bundle(RECEIPT)).unwrap();
        let err = ingest(&conn, &uploads, bundle(RECEIPT)).unwrap_err();
        assert!(matches!(err, LinkError::Duplicate(_)), "{err:?}");
        let count: i64 = conn.query_row("SELECT count(*) FROM transactions", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_ingest_copies_source_under_its_hash() {
        let (dir, conn) = test_db();
        let uploads = dir.path().join("uploads");
        std::fs::write(dir.path().join("scan.PDF"), b"%PDF-1.4 fake").unwrap();
        std::fs::write(
            dir.path().join("bundle.json"),
            r#"{"document": {"filename": "scan.PDF", "doc_type": "RECEIPT", "source": "scan.PDF"}}"#,
        )
        .unwrap();

        let loaded = load_bundle(&dir.path().join("bundle.json")).unwrap();
        let result = ingest(&conn, &uploads, loaded).unwrap();
        let expected = compute_checksum(&dir.path().join("scan.PDF")).unwrap();
        assert_eq!(result.file_hash, expected);

        let doc = store::get_document(&conn, result.document_id).unwrap().unwrap();
        assert_eq!(doc.filename, format!("{expected}.pdf"));
        assert_eq!(doc.original_filename.as_deref(), Some("scan.PDF"));
        assert!(uploads.join(&doc.filename).exists());
    }

    #[test]
    fn test_ingest_is_all_or_nothing() {
        let (dir, conn) = test_db();
        let mut b = bundle(RECEIPT);
        b.transactions.push(NewTransaction {
            merchant_name: "BROKEN".into(),
            date: chrono::NaiveDate::from_ymd_opt(2025, 10, 16).unwrap(),
            amount: f64::NAN,
            category: None,
            competence_month: None,
            competence_year: None,
        });
        let err = ingest(&conn, &dir.path().join("uploads"), b).unwrap_err();
        assert!(matches!(err, LinkError::MalformedRecord(_)));
        let docs: i64 = conn.query_row("SELECT count(*) FROM financial_documents", [], |r| r.get(0)).unwrap();
        assert_eq!(docs, 0);
    }

    #[test]
    fn test_ingest_validates_competence() {
        let (dir, conn) = test_db();
        let b = bundle(
            r#"{"document": {"filename": "x.pdf", "doc_type": "RECEIPT", "competence_month": 13, "competence_year": 2025}}"#,
        );
        assert!(matches!(
            ingest(&conn, &dir.path().join("uploads"), b),
            Err(LinkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_delete_document_unlinks_holders() {
        let (dir, conn) = test_db();
        let (receipt, _) = add_receipt(&conn, "r1", "PADARIA", "2025-03-10", 42.0);
        let bank = add_document(&conn, DocType::BankStatement, "b1");
        let line = add_txn(&conn, bank, "PADARIA", "2025-03-10", -42.0);
        ReconciliationEngine::new(MatchConfig::default()).run_auto_reconciliation(&conn).unwrap();
        assert_eq!(link_of(&conn, line).unwrap().match_type, MatchType::Auto);

        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::write(uploads.join("r1.pdf"), b"x").unwrap();

        let deleted = delete_document(&conn, &uploads, receipt).unwrap();
        assert_eq!(deleted.deleted_transactions, 1);
        assert_eq!(deleted.unlinked_transactions, 1);
        assert!(link_of(&conn, line).is_none());
        assert!(store::get_document(&conn, receipt).unwrap().is_none());
        assert!(!uploads.join("r1.pdf").exists());
    }

    #[test]
    fn test_delete_document_refuses_finalized_evidence() {
        let (dir, conn) = test_db();
        let (receipt, _) = add_receipt(&conn, "r1", "PADARIA", "2025-03-10", 42.0);
        let bank = add_document(&conn, DocType::BankStatement, "b1");
        let line = add_txn(&conn, bank, "PADARIA", "2025-03-10", -42.0);
        ReconciliationEngine::new(MatchConfig::default()).run_auto_reconciliation(&conn).unwrap();
        conn.execute("UPDATE transactions SET is_finalized = 1 WHERE id = ?1", [line]).unwrap();

        let uploads = dir.path().join("uploads");
        assert!(matches!(delete_document(&conn, &uploads, receipt), Err(LinkError::InvalidState(_))));
        assert!(matches!(delete_document(&conn, &uploads, bank), Err(LinkError::InvalidState(_))));
        assert_eq!(link_of(&conn, line).unwrap().receipt_id, receipt);
        assert!(matches!(delete_document(&conn, &uploads, 999), Err(LinkError::NotFound(_))));
    }

    #[test]
    fn test_backing_file_ignores_directories() {
        let uploads = Path::new("/data/uploads");
        assert_eq!(
            backing_file(uploads, "../../etc/passwd"),
            Some(PathBuf::from("/data/uploads/passwd"))
        );
    }
}
