//! The public façade: a `Core` ties a connection, a catalog, and
//! the three engine operations together, and tracks the one piece of
//! observable runtime state the design calls out — `insert_retries`.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::instrument;

use crate::backend::KvConnection;
use crate::delete;
use crate::error::Result;
use crate::insert;
use crate::query;
use crate::record::TableRecord;
use crate::schema::MetadataStore;
use crate::selector::{ResultRow, Selector};

/// The engine's embedding API: insert, delete, select, and whole-store reset,
/// bound to one connection and one catalog.
pub struct Core {
    conn: KvConnection,
    metadata_store: MetadataStore,
    insert_retries: AtomicU32,
}

impl Core {
    /// Build a `Core` over an already-connected backend and catalog.
    pub fn new(conn: KvConnection, metadata_store: MetadataStore) -> Self {
        Core {
            conn,
            metadata_store,
            insert_retries: AtomicU32::new(0),
        }
    }

    /// The catalog this `Core` was built with.
    pub fn metadata_store(&self) -> &MetadataStore {
        &self.metadata_store
    }

    /// Cumulative optimistic-retry attempts spent across every
    /// `TRANSACTIONAL` insert this `Core` has performed.
    pub fn insert_retries(&self) -> u32 {
        self.insert_retries.load(Ordering::Relaxed)
    }

    /// Validate `record` against its table's functional dependencies and
    /// commit it, using the configured insert strategy.
    #[instrument(skip(self, record))]
    pub async fn insert(&self, record: &TableRecord) -> Result<()> {
        let retries = insert::insert(&self.conn, &self.metadata_store, record).await?;
        if retries > 0 {
            self.insert_retries.fetch_add(retries, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Remove `record` and every dependency-index membership it held.
    #[instrument(skip(self, record))]
    pub async fn delete(&self, record: &TableRecord) -> Result<()> {
        delete::delete(&self.conn, &self.metadata_store, record).await
    }

    /// Run `selector` and return the projected result rows.
    #[instrument(skip(self, selector))]
    pub async fn select(&self, selector: &Selector) -> Result<Vec<ResultRow>> {
        query::select(&self.conn, &self.metadata_store, selector).await
    }

    /// Drop every key this `Core`'s connection can see (`FLUSHDB`).
    pub async fn clean_store(&self) -> Result<()> {
        self.conn.flush_db().await
    }
}
