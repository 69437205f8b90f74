//! fdkv: command-line driver for the fdkv-core engine.
//!
//! ## Commands
//!
//! - `demo`: run the canonical person/country scenario end-to-end against a
//!   live KV server, printing the joined result rows.
//! - `flush`: drop every key this `Core` knows about (`FLUSHDB`).

use std::collections::HashMap;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use fdkv_core::{
    Condition, Core, CoreConfiguration, DeleteType, FieldDefinition, FieldDescriptor,
    FunctionalDependency, InsertType, JoinStatement, KeyPolicyType, KvConnection, MetadataStore,
    Selector, TableDefinition, TableDescriptor, TableRecord,
};

#[derive(Parser)]
#[command(name = "fdkv")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Relational query engine with functional-dependency enforcement over a KV store", long_about = None)]
struct Cli {
    /// Enable verbose (debug-level) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// KV server host
    #[arg(long, env = "FDKV_HOST", default_value = "127.0.0.1")]
    host: String,

    /// KV server port
    #[arg(long, env = "FDKV_PORT", default_value = "6379")]
    port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the person/country demo scenario and print the joined rows
    Demo,

    /// Drop every key on the configured server
    Flush,
}

fn init_tracing(json: bool, level: Level) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let url = format!("redis://{}:{}", cli.host, cli.port);
    let conn = KvConnection::connect(&url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;

    match cli.command {
        Commands::Demo => cmd_demo(conn).await,
        Commands::Flush => cmd_flush(conn).await,
    }
}

async fn cmd_flush(conn: KvConnection) -> Result<()> {
    let core = Core::new(conn, demo_metadata_store()?);
    core.clean_store().await?;
    println!("Flushed.");
    Ok(())
}

/// The schema from the original demo: a `person` table keyed on
/// (name, lastname) with a city->country functional dependency, and a
/// `country` table keyed on name.
fn demo_metadata_store() -> Result<MetadataStore> {
    let person = TableDefinition::new(
        "person",
        vec![
            FieldDefinition::primary_key("name"),
            FieldDefinition::primary_key("lastname"),
            FieldDefinition::new("city"),
            FieldDefinition::new("country"),
        ],
        vec![FunctionalDependency::new(vec!["city".into()], "country")],
    )?;

    let country = TableDefinition::new(
        "country",
        vec![
            FieldDefinition::primary_key("name"),
            FieldDefinition::new("language"),
            FieldDefinition::new("president_name"),
            FieldDefinition::new("president_lastname"),
        ],
        vec![],
    )?;

    Ok(MetadataStore::new(
        vec![person, country],
        CoreConfiguration {
            insert_type: InsertType::ServerScript,
            delete_type: DeleteType::ServerScript,
            key_policy: KeyPolicyType::Json,
            ..Default::default()
        },
    ))
}

fn person_record(name: &str, lastname: &str, city: &str, country: &str) -> TableRecord {
    let mut values = HashMap::new();
    values.insert(FieldDescriptor::new("name"), name.to_string());
    values.insert(FieldDescriptor::new("lastname"), lastname.to_string());
    values.insert(FieldDescriptor::new("city"), city.to_string());
    values.insert(FieldDescriptor::new("country"), country.to_string());
    TableRecord::new(TableDescriptor::new("person"), values)
}

fn country_record(name: &str, language: &str, president_name: &str, president_lastname: &str) -> TableRecord {
    let mut values = HashMap::new();
    values.insert(FieldDescriptor::new("name"), name.to_string());
    values.insert(FieldDescriptor::new("language"), language.to_string());
    values.insert(FieldDescriptor::new("president_name"), president_name.to_string());
    values.insert(FieldDescriptor::new("president_lastname"), president_lastname.to_string());
    TableRecord::new(TableDescriptor::new("country"), values)
}

async fn cmd_demo(conn: KvConnection) -> Result<()> {
    let metadata_store = demo_metadata_store()?;
    let core = Core::new(conn, metadata_store);
    core.clean_store().await?;

    core.insert(&person_record("Jan", "Kowalski", "Wroclaw", "Poland")).await?;
    core.insert(&person_record("Anna", "Nowak", "Warszawa", "Poland")).await?;
    core.insert(&person_record("John", "Smith", "London", "England")).await?;
    core.insert(&person_record("Charles", "Adams", "Birmingham", "England")).await?;

    core.insert(&country_record("Poland", "Polish", "Jan", "Kowalski")).await?;
    core.insert(&country_record("England", "English", "Charles", "Adams")).await?;

    // A fifth Wroclaw resident with a different declared country would
    // violate the city->country dependency already established above.
    match core.insert(&person_record("Adam", "Charles", "Birmingham", "Poland")).await {
        Ok(()) => unreachable!("Birmingham is already tied to England"),
        Err(err) => info!(%err, "rejected insert, as expected"),
    }

    let table_person = TableDescriptor::new("person");
    let table_country = TableDescriptor::new("country");
    let table_president = TableDescriptor::with_alias("person", "president");

    let name = FieldDescriptor::new("name");
    let lastname = FieldDescriptor::new("lastname");
    let city = FieldDescriptor::new("city");
    let country = FieldDescriptor::new("country");
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
                base_fields: vec![(table_person.clone(), country.clone())],
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
        vec![Condition::not(Condition::equals(table_person.clone(), city.clone(), "Wroclaw"))],
    );

    let rows = core.select(&selector).await?;
    for row in &rows {
        let mut line = String::new();
        for (table, fields) in &row.values {
            for (field, value) in fields {
                line.push_str(&format!("{}.{} = {:?}, ", table.identity(), field.name(), value));
            }
        }
        println!("{}", line.trim_end_matches(", "));
    }

    info!(rows = rows.len(), retries = core.insert_retries(), "demo complete");
    Ok(())
}
