use std::path::Path;

use crate::documents::{ingest, load_bundle};
use crate::error::Result;

use super::open_store;

pub fn run(bundle: &str) -> Result<()> {
    let (settings, conn) = open_store()?;
    let bundle = load_bundle(Path::new(bundle))?;
    let doc_type = bundle.document.doc_type;
    let result = ingest(&conn, &settings.uploads_dir(), bundle)?;

    println!(
        "Ingested {} document {} with {} transaction(s)",
        doc_type,
        result.document_id,
        result.transaction_ids.len()
    );
    Ok(())
}
