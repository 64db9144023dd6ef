//! Ledger table management.

use anyhow::{Context, Result};
use terra_core::ledger::create_ledger_tables;
use terra_core::manifest::SensorFileManifest;

use super::Workspace;

/// Creates the ledger and manifest tables if they do not exist.
pub fn init(ws: &Workspace) -> Result<()> {
    let tables = &ws.config.tables;
    let (ledger, manifest) = create_ledger_tables(&ws.db, &tables.ledger, &tables.manifest)
        .context("failed to create ledger tables")?;
    println!("{ledger}");
    println!("{manifest}");
    Ok(())
}

/// Lists every table with its columns.
pub fn list(ws: &Workspace) -> Result<()> {
    for table_id in ws.db.list_tables().context("failed to list tables")? {
        let table = ws
            .db
            .table(&table_id)
            .with_context(|| format!("failed to open table {table_id}"))?;
        println!("{table}");
    }
    Ok(())
}

/// Prefixes manifest paths that lack their session folder.
pub fn fix_prefix(ws: &Workspace) -> Result<()> {
    let updated = SensorFileManifest::normalize_session_prefixes(&ws.manifest()?)
        .context("failed to normalize session prefixes")?;
    println!("updated {updated} manifest entries");
    Ok(())
}
