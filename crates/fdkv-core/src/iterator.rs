//! Table iteration: stream a table's primary-key identifiers, via
//! whichever of the three strategies is configured.

use crate::backend::KvConnection;
use crate::config::ListRecordsType;
use crate::error::Result;
use crate::schema::{MetadataStore, TableDefinition, TableDescriptor};

/// Every primary-key identifier currently stored for `table`, in whatever
/// order the configured strategy happens to produce (no ordering guarantee).
pub async fn list_key_identifiers(
    conn: &KvConnection,
    metadata_store: &MetadataStore,
    table_descriptor: &TableDescriptor,
) -> Result<Vec<String>> {
    let table = metadata_store.table(table_descriptor)?;

    match metadata_store.config.list_records_type {
        ListRecordsType::Scan => scan_identifiers(conn, table).await,
        ListRecordsType::Keys => keys_identifiers(conn, table).await,
        ListRecordsType::Set => conn.smembers(&table.table_key()).await,
    }
}

/// Strip the `__value__:<table>:<field>:` prefix, leaving the bare PK
/// identifier — the fourth colon-separated segment onward.
fn extract_key_identifier(key: &str) -> &str {
    key.splitn(4, ':').nth(3).unwrap_or(key)
}

async fn scan_identifiers(conn: &KvConnection, table: &TableDefinition) -> Result<Vec<String>> {
    let pattern = format!("{}:*", table.field_key_prefix(table.arbitrary_field()));
    let keys = conn.scan_match(&pattern).await?;
    Ok(keys.iter().map(|k| extract_key_identifier(k).to_string()).collect())
}

async fn keys_identifiers(conn: &KvConnection, table: &TableDefinition) -> Result<Vec<String>> {
    let pattern = format!("{}:*", table.field_key_prefix(table.arbitrary_field()));
    let keys = conn.keys(&pattern).await?;
    Ok(keys.iter().map(|k| extract_key_identifier(k).to_string()).collect())
}
