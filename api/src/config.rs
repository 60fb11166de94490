use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum StorageMode {
    Memory,
    Postgres,
    Auto,
}

#[derive(Debug, Parser)]
#[command(name = "ledger-api", about = "Ledger and reward rule engine HTTP service")]
pub struct Cli {
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: String,

    #[arg(long, value_enum, default_value = "auto", env = "LEDGER_STORAGE")]
    pub ledger_storage: StorageMode,

    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, default_value_t = 5)]
    pub pg_max_connections: u32,
}

impl Cli {
    /// `Auto` resolves to Postgres when a database URL is configured,
    /// otherwise falls back to the in-memory backend.
    pub fn resolved_storage(&self) -> StorageMode {
        match self.ledger_storage {
            StorageMode::Auto if self.database_url.is_some() => StorageMode::Postgres,
            StorageMode::Auto => StorageMode::Memory,
            other => other,
        }
    }
}
