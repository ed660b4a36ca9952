//! The `peers` table: known peer endpoints persisted across restarts.

use crate::{StoreError, Transaction, WriteTransaction};
use heed::types::Bytes;
use heed::Database;
use std::net::{Ipv6Addr, SocketAddrV6};

#[derive(Clone, Copy)]
pub struct PeerTable {
    db: Database<Bytes, Bytes>,
}

fn endpoint_key(endpoint: &SocketAddrV6) -> [u8; 18] {
    let mut out = [0u8; 18];
    out[..16].copy_from_slice(&endpoint.ip().octets());
    out[16..].copy_from_slice(&endpoint.port().to_be_bytes());
    out
}

fn endpoint_from_key(key: &[u8]) -> Result<SocketAddrV6, StoreError> {
    if key.len() != 18 {
        return Err(StoreError::corrupt("peers"));
    }
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&key[..16]);
    let port = u16::from_be_bytes([key[16], key[17]]);
    Ok(SocketAddrV6::new(Ipv6Addr::from(octets), port, 0, 0))
}

impl PeerTable {
    pub(crate) fn new(db: Database<Bytes, Bytes>) -> Self {
        Self { db }
    }

    pub fn put(
        &self,
        txn: &mut WriteTransaction,
        endpoint: &SocketAddrV6,
    ) -> Result<(), StoreError> {
        self.db.put(txn.rw(), &endpoint_key(endpoint), &[])?;
        Ok(())
    }

    pub fn del(
        &self,
        txn: &mut WriteTransaction,
        endpoint: &SocketAddrV6,
    ) -> Result<(), StoreError> {
        self.db.delete(txn.rw(), &endpoint_key(endpoint))?;
        Ok(())
    }

    pub fn exists(
        &self,
        txn: &impl Transaction,
        endpoint: &SocketAddrV6,
    ) -> Result<bool, StoreError> {
        Ok(self.db.get(txn.ro(), &endpoint_key(endpoint))?.is_some())
    }

    pub fn iter(&self, txn: &impl Transaction) -> Result<Vec<SocketAddrV6>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.iter(txn.ro())? {
            let (key, _) = item?;
            out.push(endpoint_from_key(key)?);
        }
        Ok(out)
    }

    pub fn clear(&self, txn: &mut WriteTransaction) -> Result<(), StoreError> {
        self.db.clear(txn.rw())?;
        Ok(())
    }
}
