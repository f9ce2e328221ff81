use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::custodian::SourceSystem;

/// Custodian holdings and contract-note ETL.
#[derive(Parser, Debug)]
#[command(name = "custody-etl", version)]
#[command(about = "Stage custodian files and load them into the reporting warehouse", long_about = None)]
pub struct Cli {
    /// TOML config file (default: ./custody-etl.toml when present).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the staging and warehouse schemas.
    InitDb,
    /// Stage and load a file, or every supported file in a directory.
    Ingest {
        /// File or directory (default: the configured inbox).
        path: Option<PathBuf>,

        /// Record date (YYYY-MM-DD), overriding any date in the file name.
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Stage the sheet without touching the warehouse.
        #[arg(long)]
        stage_only: bool,

        /// Move files to the processed/failed directories afterwards.
        #[arg(long)]
        archive: bool,
    },
    /// Load staged collections into the warehouse.
    Process {
        /// `custody.2024-06-30.hdfc`, `custody`, `custody.2024-06-30` or `custody_06_30`.
        #[arg(long)]
        collection: Option<String>,
    },
    /// Row counts of the staging store and the warehouse.
    Stats,
    /// Remove staged collections and/or warehouse rows.
    Clear {
        #[arg(long)]
        staging: bool,

        #[arg(long)]
        warehouse: bool,

        /// Limit the warehouse clear to one source system.
        #[arg(long, requires = "warehouse")]
        source: Option<SourceSystem>,

        /// Limit the warehouse clear to one record date.
        #[arg(long, requires = "warehouse")]
        date: Option<NaiveDate>,
    },
    /// Run the HTTP API.
    Serve,
}
