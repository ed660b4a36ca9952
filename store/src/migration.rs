//! Schema migrations.
//!
//! Versions move forward only, one step at a time, inside the opening write
//! transaction, so a crash mid-migration leaves the old version intact.

use crate::{Store, StoreError, WriteTransaction};
use tracing::info;

/// The schema version this build reads and writes.
pub const CURRENT_SCHEMA_VERSION: u64 = 1;

/// Bring the store's schema up to [`CURRENT_SCHEMA_VERSION`].
///
/// Fails with [`StoreError::VersionTooNew`] when the database was written by
/// a newer build.
pub fn migrate(store: &Store, txn: &mut WriteTransaction) -> Result<(), StoreError> {
    let mut version = match store.meta.version(txn)? {
        Some(version) => version,
        None => {
            // Fresh database: stamp and return.
            store.meta.set_version(txn, CURRENT_SCHEMA_VERSION)?;
            return Ok(());
        }
    };

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::VersionTooNew {
            found: version,
            latest: CURRENT_SCHEMA_VERSION,
        });
    }

    while version < CURRENT_SCHEMA_VERSION {
        match version {
            0 => upgrade_v0_to_v1(store, txn)?,
            _ => unreachable!("no migration registered from version {version}"),
        }
        version += 1;
        store.meta.set_version(txn, version)?;
        info!(version, "migrated store schema");
    }
    Ok(())
}

/// v0 databases predate the version stamp; the table layout is already
/// current, so this only establishes the ladder's base.
fn upgrade_v0_to_v1(_store: &Store, _txn: &mut WriteTransaction) -> Result<(), StoreError> {
    Ok(())
}
