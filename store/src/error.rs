use lattice_types::DecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lmdb error: {0}")]
    Lmdb(#[from] heed::Error),

    #[error("store initialization failed: {0}")]
    Init(String),

    #[error("database schema version {found} is newer than the latest known version {latest}")]
    VersionTooNew { found: u64, latest: u64 },

    #[error("corrupt record in table {table}")]
    Corruption { table: &'static str },
}

impl StoreError {
    pub(crate) fn corrupt(table: &'static str) -> Self {
        StoreError::Corruption { table }
    }
}

impl From<DecodeError> for StoreError {
    fn from(_: DecodeError) -> Self {
        StoreError::Corruption { table: "unknown" }
    }
}
