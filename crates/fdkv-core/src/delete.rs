//! Delete path: idempotent removal of a record and its dependency-index
//! memberships, via whichever of the two strategies is configured.

use tracing::instrument;

use crate::backend::{DeleteField, DeletePlan, KvConnection};
use crate::config::DeleteType;
use crate::error::Result;
use crate::key_policy::KeyPolicy;
use crate::record::{determinant_identifier, primary_key_identifier, TableRecord};
use crate::schema::MetadataStore;

/// Remove `record` and every dependency-index membership it held. Deleting a
/// record that is not present is a no-op, not an error.
#[instrument(skip(conn, metadata_store, record), fields(table = record.table.name()))]
pub async fn delete(conn: &KvConnection, metadata_store: &MetadataStore, record: &TableRecord) -> Result<()> {
    let table = metadata_store.table(&record.table)?;
    let policy = KeyPolicy::from(metadata_store.config.key_policy);
    let pk_identifier = primary_key_identifier(table, policy, record)?;

    let mut fields = Vec::new();
    for field in table.all_fields() {
        let field_key = table.cell_key(field, &pk_identifier);
        let mut dependency_keys = Vec::new();
        for fd in table.dependencies_for(field) {
            let determinant_id = determinant_identifier(fd, policy, record)?;
            dependency_keys.push(fd.index_key(&determinant_id));
        }
        fields.push(DeleteField {
            field_key,
            dependency_keys,
        });
    }

    let plan = DeletePlan {
        table_key: table.table_key(),
        key_identifier: pk_identifier,
        fields,
    };

    match metadata_store.config.delete_type {
        DeleteType::Simple => conn.run_delete_simple(&plan).await,
        DeleteType::ServerScript => conn.run_delete_plan(&plan).await,
    }
}
