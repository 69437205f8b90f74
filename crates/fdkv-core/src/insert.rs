//! Insert path: validate functional dependencies and commit, via
//! whichever of the three interchangeable strategies the catalog's
//! configuration selects.

use tracing::{instrument, warn};

use crate::backend::{InsertField, InsertPlan, KvConnection};
use crate::config::InsertType;
use crate::error::{CoreError, Result};
use crate::key_policy::KeyPolicy;
use crate::record::{determinant_identifier, primary_key_identifier, TableRecord};
use crate::schema::MetadataStore;

/// Outcome of a successful insert: how many optimistic-retry attempts were
/// spent before it committed (always 0 outside `TRANSACTIONAL`).
pub type InsertRetries = u32;

/// Validate `record` against its table's functional dependencies and commit
/// it, using the strategy configured on `metadata_store`.
///
/// Returns the number of optimistic-retry attempts spent, or
/// [`CoreError::DependencyBroken`] if committing would violate a declared FD.
#[instrument(skip(conn, metadata_store, record), fields(table = record.table.name()))]
pub async fn insert(
    conn: &KvConnection,
    metadata_store: &MetadataStore,
    record: &TableRecord,
) -> Result<InsertRetries> {
    let table = metadata_store.table(&record.table)?;
    let policy = KeyPolicy::from(metadata_store.config.key_policy);
    let pk_identifier = primary_key_identifier(table, policy, record)?;

    let mut fields = Vec::new();

    for field in table.all_fields() {
        let field_value = record.value(field).map(str::to_string);
        let field_key = table.cell_key(field, &pk_identifier);

        let mut dependency_keys = Vec::new();
        for fd in table.dependencies_for(field) {
            let determinant_id = determinant_identifier(fd, policy, record)?;
            dependency_keys.push(fd.index_key(&determinant_id));
        }

        fields.push(InsertField {
            field_key,
            field_value,
            dependency_keys,
        });
    }

    let plan = InsertPlan {
        table_key: table.table_key(),
        key_identifier: pk_identifier,
        fields,
    };

    let (broken, retries) = match metadata_store.config.insert_type {
        InsertType::Simple => (conn.run_insert_simple(&plan).await?, 0),
        InsertType::Transactional => conn.run_insert_transactional(&plan).await?,
        InsertType::ServerScript => (conn.run_insert_plan(&plan).await?, 0),
    };

    if retries > 0 {
        warn!(retries, "insert committed after optimistic-retry conflicts");
    }

    match broken {
        None => Ok(retries),
        Some(broken) => Err(CoreError::DependencyBroken {
            table: table.name().to_string(),
            determinants: broken.determinants,
            dependent: broken.dependent,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::CoreConfiguration;
    use crate::schema::{FieldDefinition, FieldDescriptor, FunctionalDependency, TableDefinition, TableDescriptor};

    fn store(config: CoreConfiguration) -> MetadataStore {
        let table = TableDefinition::new(
            "person",
            vec![
                FieldDefinition::primary_key("id"),
                FieldDefinition::new("city"),
                FieldDefinition::new("country"),
            ],
            vec![FunctionalDependency::new(vec!["city".into()], "country")],
        )
        .unwrap();
        MetadataStore::new(vec![table], config)
    }

    fn record(id: &str, city: &str, country: &str) -> TableRecord {
        let mut values = HashMap::new();
        values.insert(FieldDescriptor::new("id"), id.to_string());
        values.insert(FieldDescriptor::new("city"), city.to_string());
        values.insert(FieldDescriptor::new("country"), country.to_string());
        TableRecord::new(TableDescriptor::new("person"), values)
    }

    #[tokio::test]
    async fn server_script_insert_rejects_conflicting_fd() {
        let conn = KvConnection::memory();
        let metadata = store(CoreConfiguration {
            insert_type: InsertType::ServerScript,
            ..Default::default()
        });

        insert(&conn, &metadata, &record("1", "Wroclaw", "Poland")).await.unwrap();

        let err = insert(&conn, &metadata, &record("2", "Wroclaw", "Germany")).await.unwrap_err();
        assert!(matches!(err, CoreError::DependencyBroken { .. }));
    }

    #[tokio::test]
    async fn simple_insert_accepts_consistent_fd() {
        let conn = KvConnection::memory();
        let metadata = store(CoreConfiguration {
            insert_type: InsertType::Simple,
            ..Default::default()
        });

        insert(&conn, &metadata, &record("1", "Wroclaw", "Poland")).await.unwrap();
        insert(&conn, &metadata, &record("2", "Wroclaw", "Poland")).await.unwrap();
    }

    #[tokio::test]
    async fn transactional_insert_commits_with_zero_retries_against_memory_fake() {
        let conn = KvConnection::memory();
        let metadata = store(CoreConfiguration {
            insert_type: InsertType::Transactional,
            ..Default::default()
        });

        let retries = insert(&conn, &metadata, &record("1", "Wroclaw", "Poland")).await.unwrap();
        assert_eq!(retries, 0);
    }

    fn two_fd_store(config: CoreConfiguration) -> MetadataStore {
        let table = TableDefinition::new(
            "person",
            vec![
                FieldDefinition::primary_key("id"),
                FieldDefinition::new("city"),
                FieldDefinition::new("country"),
                FieldDefinition::new("email"),
                FieldDefinition::new("username"),
            ],
            vec![
                FunctionalDependency::new(vec!["city".into()], "country"),
                FunctionalDependency::new(vec!["email".into()], "username"),
            ],
        )
        .unwrap();
        MetadataStore::new(vec![table], config)
    }

    fn two_fd_record(id: &str, city: &str, country: &str, email: &str, username: &str) -> TableRecord {
        let mut values = HashMap::new();
        values.insert(FieldDescriptor::new("id"), id.to_string());
        values.insert(FieldDescriptor::new("city"), city.to_string());
        values.insert(FieldDescriptor::new("country"), country.to_string());
        values.insert(FieldDescriptor::new("email"), email.to_string());
        values.insert(FieldDescriptor::new("username"), username.to_string());
        TableRecord::new(TableDescriptor::new("person"), values)
    }

    #[tokio::test]
    async fn dependency_broken_error_names_the_fd_that_actually_failed() {
        // "city" is declared before "email" in the table, but the second
        // insert only conflicts on the email->username dependency. The
        // reported error must name that FD, not the unrelated city->country
        // one encountered first during plan construction.
        let conn = KvConnection::memory();
        let metadata = two_fd_store(CoreConfiguration {
            insert_type: InsertType::ServerScript,
            ..Default::default()
        });

        insert(&conn, &metadata, &two_fd_record("1", "Wroclaw", "Poland", "a@example.com", "alice"))
            .await
            .unwrap();

        let err = insert(
            &conn,
            &metadata,
            &two_fd_record("2", "Warszawa", "Poland", "a@example.com", "bob"),
        )
        .await
        .unwrap_err();

        match err {
            CoreError::DependencyBroken { determinants, dependent, .. } => {
                assert_eq!(determinants, "email");
                assert_eq!(dependent, "username");
            }
            other => panic!("expected DependencyBroken, got {other:?}"),
        }
    }
}
