//! End-to-end scenarios against the in-memory fake backend: the
//! person/country/self-join setup, functional-dependency enforcement across
//! every insert strategy, and delete idempotence.

use std::collections::HashMap;

use fdkv_core::{
    Condition, Core, CoreConfiguration, DeleteType, FieldDefinition, FieldDescriptor,
    FunctionalDependency, InsertType, JoinStatement, KeyPolicyType, KvConnection, MetadataStore,
    Selector, TableDefinition, TableDescriptor, TableRecord,
};

fn metadata_store(insert_type: InsertType) -> MetadataStore {
    let person = TableDefinition::new(
        "person",
        vec![
            FieldDefinition::primary_key("name"),
            FieldDefinition::primary_key("lastname"),
            FieldDefinition::new("city"),
            FieldDefinition::new("country"),
        ],
        vec![FunctionalDependency::new(vec!["city".into()], "country")],
    )
    .unwrap();

    let country = TableDefinition::new(
        "country",
        vec![
            FieldDefinition::primary_key("name"),
            FieldDefinition::new("language"),
            FieldDefinition::new("president_name"),
            FieldDefinition::new("president_lastname"),
        ],
        vec![],
    )
    .unwrap();

    MetadataStore::new(
        vec![person, country],
        CoreConfiguration {
            insert_type,
            delete_type: DeleteType::ServerScript,
            key_policy: KeyPolicyType::Json,
            ..Default::default()
        },
    )
}

fn person(name: &str, lastname: &str, city: &str, country: &str) -> TableRecord {
    let mut values = HashMap::new();
    values.insert(FieldDescriptor::new("name"), name.to_string());
    values.insert(FieldDescriptor::new("lastname"), lastname.to_string());
    values.insert(FieldDescriptor::new("city"), city.to_string());
    values.insert(FieldDescriptor::new("country"), country.to_string());
    TableRecord::new(TableDescriptor::new("person"), values)
}

fn country(name: &str, language: &str, president_name: &str, president_lastname: &str) -> TableRecord {
    let mut values = HashMap::new();
    values.insert(FieldDescriptor::new("name"), name.to_string());
    values.insert(FieldDescriptor::new("language"), language.to_string());
    values.insert(FieldDescriptor::new("president_name"), president_name.to_string());
    values.insert(FieldDescriptor::new("president_lastname"), president_lastname.to_string());
    TableRecord::new(TableDescriptor::new("country"), values)
}

async fn seeded_core(insert_type: InsertType) -> Core {
    let core = Core::new(KvConnection::memory(), metadata_store(insert_type));

    core.insert(&person("Jan", "Kowalski", "Wroclaw", "Poland")).await.unwrap();
    core.insert(&person("Anna", "Nowak", "Warszawa", "Poland")).await.unwrap();
    core.insert(&person("John", "Smith", "London", "England")).await.unwrap();
    core.insert(&person("Charles", "Adams", "Birmingham", "England")).await.unwrap();
    core.insert(&country("Poland", "Polish", "Jan", "Kowalski")).await.unwrap();
    core.insert(&country("England", "English", "Charles", "Adams")).await.unwrap();

    core
}

fn demo_selector() -> (TableDescriptor, TableDescriptor, TableDescriptor, Selector) {
    let table_person = TableDescriptor::new("person");
    let table_country = TableDescriptor::new("country");
    let table_president = TableDescriptor::with_alias("person", "president");

    let name = FieldDescriptor::new("name");
    let lastname = FieldDescriptor::new("lastname");
    let city = FieldDescriptor::new("city");
    let country_field = FieldDescriptor::new("country");
    let language = FieldDescriptor::new("language");
    let president_name = FieldDescriptor::new("president_name");
    let president_lastname = FieldDescriptor::new("president_lastname");

    let selector = Selector::new(
        HashMap::from([
            (table_person.clone(), vec![name.clone(), lastname.clone()]),
            (table_country.clone(), vec![name.clone(), language.clone()]),
            (table_president.clone(), vec![name.clone(), lastname.clone(), city.clone()]),
        ]),
        table_person.clone(),
        vec![
            JoinStatement {
                base_fields: vec![(table_person.clone(), country_field.clone())],
                target_table: table_country.clone(),
                target_fields: vec![name.clone()],
            },
            JoinStatement {
                base_fields: vec![
                    (table_country.clone(), president_name.clone()),
                    (table_country.clone(), president_lastname.clone()),
                ],
                target_table: table_president.clone(),
                target_fields: vec![name.clone(), lastname.clone()],
            },
        ],
        vec![Condition::not(Condition::equals(table_person.clone(), city, "Wroclaw"))],
    );

    (table_person, table_country, table_president, selector)
}

#[tokio::test]
async fn self_join_and_not_condition_exclude_wroclaw_and_resolve_presidents() {
    let core = seeded_core(InsertType::ServerScript).await;
    let (table_person, table_country, table_president, selector) = demo_selector();

    let rows = core.select(&selector).await.unwrap();

    // Jan Kowalski (Wroclaw) is filtered out by the NOT condition; the other
    // three residents remain.
    assert_eq!(rows.len(), 3);

    for row in &rows {
        let person_name = row.get(&table_person, &FieldDescriptor::new("name")).unwrap().unwrap();
        assert_ne!(person_name, "Jan");

        let country_name = row.get(&table_country, &FieldDescriptor::new("name")).unwrap().unwrap();
        let president_name = row.get(&table_president, &FieldDescriptor::new("name")).unwrap().unwrap();

        match country_name {
            "Poland" => assert_eq!(president_name, "Jan"),
            "England" => assert_eq!(president_name, "Charles"),
            other => panic!("unexpected country: {other}"),
        }
    }
}

#[tokio::test]
async fn every_insert_strategy_enforces_the_same_functional_dependency() {
    for insert_type in [InsertType::Simple, InsertType::Transactional, InsertType::ServerScript] {
        let core = seeded_core(insert_type).await;

        let err = core
            .insert(&person("Adam", "Charles", "Birmingham", "Poland"))
            .await
            .unwrap_err();

        assert!(
            matches!(err, fdkv_core::CoreError::DependencyBroken { .. }),
            "insert_type {insert_type:?} did not reject the conflicting city->country mapping"
        );
    }
}

#[tokio::test]
async fn transactional_insert_counts_zero_retries_with_no_contention() {
    let core = seeded_core(InsertType::Transactional).await;
    assert_eq!(core.insert_retries(), 0);
}

#[tokio::test]
async fn delete_is_idempotent_and_frees_the_dependency_for_a_new_value() {
    let core = seeded_core(InsertType::ServerScript).await;

    core.delete(&person("Jan", "Kowalski", "Wroclaw", "Poland")).await.unwrap();
    // Deleting the same (already-gone) record again must not error.
    core.delete(&person("Jan", "Kowalski", "Wroclaw", "Poland")).await.unwrap();

    // Wroclaw is no longer tied to Poland, so a new resident may declare a
    // different country for it.
    core.insert(&person("Zoe", "Lis", "Wroclaw", "Germany")).await.unwrap();
}

#[tokio::test]
async fn select_projection_omits_unprojected_fields() {
    let core = seeded_core(InsertType::ServerScript).await;
    let (table_person, _, _, selector) = demo_selector();

    let rows = core.select(&selector).await.unwrap();
    let row = rows.first().expect("at least one row");

    let person_fields = &row.values[&table_person];
    assert!(person_fields.contains_key(&FieldDescriptor::new("name")));
    assert!(person_fields.contains_key(&FieldDescriptor::new("lastname")));
    // "city" is needed for the condition but never projected for `person`.
    assert!(!person_fields.contains_key(&FieldDescriptor::new("city")));
}
