//! Persistent account store
//!
//! Durably maps `domain -> AccountRecord` in a single file (`data.db`) with
//! one "Accounts" table. The underlying store serializes writers and lets
//! readers run concurrently; records are encoded as self-describing CBOR.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;
use tracing::debug;

use crate::acme::AccountRecord;

const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("Accounts");

/// Errors from the account store; failures of the underlying database
/// surface unchanged to the reconciler.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Account store error: {0}")]
    Database(#[from] redb::Error),

    #[error("Failed to encode account record for '{domain}': {message}")]
    Encode { domain: String, message: String },

    #[error("Failed to decode account record for '{domain}': {message}")]
    Decode { domain: String, message: String },
}

impl From<redb::DatabaseError> for StoreError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Database(err.into())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Database(err.into())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        Self::Database(err.into())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(err: redb::StorageError) -> Self {
        Self::Database(err.into())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(err: redb::CommitError) -> Self {
        Self::Database(err.into())
    }
}

/// Single-file account store
#[derive(Debug)]
pub struct AccountStore {
    db: Database,
}

impl AccountStore {
    /// Open (or create) the store and ensure the accounts table exists.
    ///
    /// A failure here is fatal to the process; there is no account state
    /// without it.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path)?;
        let tx = db.begin_write()?;
        {
            tx.open_table(ACCOUNTS)?;
        }
        tx.commit()?;
        debug!(path = %path.display(), "account store open");
        Ok(Self { db })
    }

    /// Look up the record for a domain.
    pub fn find(&self, domain: &str) -> Result<Option<AccountRecord>, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(ACCOUNTS)?;
        match table.get(domain)? {
            Some(raw) => {
                let record =
                    ciborium::de::from_reader(raw.value()).map_err(|e| StoreError::Decode {
                        domain: domain.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Upsert a record under its domain.
    pub fn save(&self, record: &AccountRecord) -> Result<(), StoreError> {
        let mut encoded = Vec::new();
        ciborium::ser::into_writer(record, &mut encoded).map_err(|e| StoreError::Encode {
            domain: record.domain.clone(),
            message: e.to_string(),
        })?;

        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(ACCOUNTS)?;
            table.insert(record.domain.as_str(), encoded.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove a record; removing an absent domain is a no-op.
    pub fn delete(&self, domain: &str) -> Result<(), StoreError> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(ACCOUNTS)?;
            table.remove(domain)?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::account::testing::record_with_small_keys;
    use rsa::pkcs1::EncodeRsaPrivateKey;

    fn open_store() -> (tempfile::TempDir, AccountStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::open(&dir.path().join("data.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_find_absent_returns_none() {
        let (_dir, store) = open_store();
        assert!(store.find("missing.example.com").unwrap().is_none());
    }

    #[test]
    fn test_save_then_find_round_trips() {
        let (_dir, store) = open_store();

        let mut record = record_with_small_keys("admin@example.com", "example.com");
        record.registration.uri = "https://ca.example/reg/1".to_string();
        record.certificate = Some(b"-----BEGIN CERTIFICATE-----\n...".to_vec());
        record.certificate_url = Some("https://ca.example/cert/42".to_string());

        store.save(&record).unwrap();
        let found = store.find("example.com").unwrap().unwrap();

        assert_eq!(found.domain, record.domain);
        assert_eq!(found.email, record.email);
        assert_eq!(found.registration, record.registration);
        assert_eq!(found.certificate, record.certificate);
        assert_eq!(found.certificate_url, record.certificate_url);
        assert_eq!(
            found.account_key.to_pkcs1_der().unwrap().as_bytes(),
            record.account_key.to_pkcs1_der().unwrap().as_bytes()
        );
        assert_eq!(
            found.certificate_key.to_pkcs1_der().unwrap().as_bytes(),
            record.certificate_key.to_pkcs1_der().unwrap().as_bytes()
        );
    }

    #[test]
    fn test_save_is_upsert() {
        let (_dir, store) = open_store();

        let mut record = record_with_small_keys("a@b", "example.com");
        store.save(&record).unwrap();

        record.certificate_url = Some("https://ca.example/cert/7".to_string());
        store.save(&record).unwrap();

        let found = store.find("example.com").unwrap().unwrap();
        assert_eq!(
            found.certificate_url.as_deref(),
            Some("https://ca.example/cert/7")
        );
    }

    #[test]
    fn test_delete_removes_record() {
        let (_dir, store) = open_store();

        let record = record_with_small_keys("a@b", "example.com");
        store.save(&record).unwrap();
        assert!(store.find("example.com").unwrap().is_some());

        store.delete("example.com").unwrap();
        assert!(store.find("example.com").unwrap().is_none());
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let (_dir, store) = open_store();
        store.delete("never-existed.example.com").unwrap();
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");

        let record = record_with_small_keys("a@b", "example.com");
        {
            let store = AccountStore::open(&path).unwrap();
            store.save(&record).unwrap();
        }

        let store = AccountStore::open(&path).unwrap();
        let found = store.find("example.com").unwrap().unwrap();
        assert_eq!(found.domain, "example.com");
    }
}
