use lattice_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("block not present in ledger")]
    BlockNotFound,

    #[error("cannot roll back a confirmed block")]
    RollbackConfirmed,
}
