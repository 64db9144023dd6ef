//! Command implementations.

pub mod dataflow;
pub mod tables;

use anyhow::{Context, Result};
use terra_core::config::TerraConfig;
use terra_core::dataflow::Diagnostic;
use terra_core::ledger::FileLedger;
use terra_core::store::{Database, Table};

/// Configuration plus the opened ledger database.
#[derive(Debug)]
pub struct Workspace {
    pub config: TerraConfig,
    pub db: Database,
}

impl Workspace {
    pub fn open(config: TerraConfig) -> Result<Self> {
        let db = Database::open(&config.database.path).with_context(|| {
            format!("failed to open database {}", config.database.path.display())
        })?;
        Ok(Self { config, db })
    }

    pub fn ledger(&self) -> Result<FileLedger> {
        let id = &self.config.tables.ledger;
        FileLedger::open(&self.db, id)
            .with_context(|| format!("ledger table {id} is not usable (run `terra init`)"))
    }

    pub fn manifest(&self) -> Result<Table> {
        let id = &self.config.tables.manifest;
        self.db
            .table(id)
            .with_context(|| format!("manifest table {id} is not usable (run `terra init`)"))
    }
}

/// Prints the diagnostics of a run after its summary line.
fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        println!("  ! {diagnostic}");
    }
}
