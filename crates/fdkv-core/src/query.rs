//! Query executor: single-table scan with predicate pushdown, then
//! nested-loop joins (with a primary-key fast path), then projection.

use std::collections::HashMap;

use crate::backend::KvConnection;
use crate::config::JoiningAlgorithm;
use crate::error::Result;
use crate::iterator::list_key_identifiers;
use crate::key_policy::KeyPolicy;
use crate::schema::{FieldDescriptor, MetadataStore, TableDescriptor};
use crate::selector::{project, JoinStatement, ResultRow, Selector};

/// Run `selector` to completion and return the projected result rows.
///
/// Materializes the full result set rather than truly streaming — matching
/// the nested-loop join's need to hold the accumulated rows from prior
/// stages before joining in the next table.
pub async fn select(
    conn: &KvConnection,
    metadata_store: &MetadataStore,
    selector: &Selector,
) -> Result<Vec<ResultRow>> {
    match metadata_store.config.joining_algorithm {
        JoiningAlgorithm::NestedLoops => nested_loops_select(conn, metadata_store, selector).await,
    }
}

async fn nested_loops_select(
    conn: &KvConnection,
    metadata_store: &MetadataStore,
    selector: &Selector,
) -> Result<Vec<ResultRow>> {
    let mut accumulated = single_table_select(conn, metadata_store, selector, &selector.from_table).await?;

    for join in &selector.joins {
        accumulated = if is_primary_key_joinable(metadata_store, join)? {
            primary_key_join(conn, metadata_store, selector, &accumulated, join).await?
        } else {
            let target_rows = single_table_select(conn, metadata_store, selector, &join.target_table).await?;
            nested_loops_join(&accumulated, &target_rows, join)
        };
    }

    Ok(accumulated.iter().map(|row| project(selector, row)).collect())
}

/// Whether `join.target_fields` is exactly the target table's primary key
/// (in some order) — when it is, we can fetch directly by identifier instead
/// of scanning the whole target table.
fn is_primary_key_joinable(metadata_store: &MetadataStore, join: &JoinStatement) -> Result<bool> {
    let target_table = metadata_store.table(&join.target_table)?;
    let pk_fields = target_table.primary_key_fields();

    if join.target_fields.len() != pk_fields.len() {
        return Ok(false);
    }
    Ok(join.target_fields.iter().all(|f| pk_fields.contains(&f)))
}

/// Fetch the joined table's row directly via its primary-key identifier,
/// derived from the accumulator's bound join fields — no scan of the target
/// table at all.
async fn primary_key_join(
    conn: &KvConnection,
    metadata_store: &MetadataStore,
    selector: &Selector,
    accumulator: &[ResultRow],
    join: &JoinStatement,
) -> Result<Vec<ResultRow>> {
    let target_table = metadata_store.table(&join.target_table)?;
    let policy = KeyPolicy::from(metadata_store.config.key_policy);
    let needed_fields = selector.all_needed_fields.get(&join.target_table);

    let mut joined = Vec::with_capacity(accumulator.len());

    for row in accumulator {
        let mut pk_valuation: Vec<(&FieldDescriptor, Option<&str>)> = Vec::with_capacity(join.base_fields.len());
        for ((base_table, base_field), target_field) in join.base_fields.iter().zip(&join.target_fields) {
            let value = row.get(base_table, base_field).flatten();
            pk_valuation.push((target_field, value));
        }
        let key_identifier = policy.identify(&pk_valuation)?;

        let mut values = HashMap::new();
        if let Some(fields) = needed_fields {
            for field in fields {
                let field_key = target_table.cell_key(field, &key_identifier);
                let value = conn.get(&field_key).await?;
                values.insert(field.clone(), value);
            }
        }

        joined.push(row.merged_with(&single_table_row(&join.target_table, values)));
    }

    Ok(joined)
}

fn single_table_row(table: &TableDescriptor, values: HashMap<FieldDescriptor, Option<String>>) -> ResultRow {
    let mut row = ResultRow::new();
    row.values.insert(table.clone(), values);
    row
}

/// Scan every identifier in `table`, fetch `selector`'s needed fields for
/// each, evaluate pushed-down predicates during the fetch, and keep only the
/// rows that pass.
async fn single_table_select(
    conn: &KvConnection,
    metadata_store: &MetadataStore,
    selector: &Selector,
    table_descriptor: &TableDescriptor,
) -> Result<Vec<ResultRow>> {
    let table = metadata_store.table(table_descriptor)?;
    let empty_needed: std::collections::HashSet<FieldDescriptor> = Default::default();
    let needed_fields = selector.all_needed_fields.get(table_descriptor).unwrap_or(&empty_needed);
    let empty_conditions: HashMap<FieldDescriptor, Vec<crate::condition::Condition>> = Default::default();
    let table_conditions = selector.parsed_conditions.get(table_descriptor).unwrap_or(&empty_conditions);

    let identifiers = list_key_identifiers(conn, metadata_store, table_descriptor).await?;
    let mut rows = Vec::with_capacity(identifiers.len());

    'outer: for identifier in identifiers {
        let mut values = HashMap::with_capacity(needed_fields.len());

        for field in needed_fields {
            let field_key = table.cell_key(field, &identifier);
            let value = conn.get(&field_key).await?;

            if let Some(conditions) = table_conditions.get(field) {
                for condition in conditions {
                    if !condition.evaluate(value.as_deref()) {
                        continue 'outer;
                    }
                }
            }

            values.insert(field.clone(), value);
        }

        rows.push(single_table_row(table_descriptor, values));
    }

    Ok(rows)
}

fn nested_loops_join(accumulator: &[ResultRow], target_rows: &[ResultRow], join: &JoinStatement) -> Vec<ResultRow> {
    let mut joined = Vec::new();

    for base_row in accumulator {
        for target_row in target_rows {
            let matches = join.base_fields.iter().zip(&join.target_fields).all(|((base_table, base_field), target_field)| {
                base_row.get(base_table, base_field).flatten() == target_row.get(&join.target_table, target_field).flatten()
            });

            if matches {
                joined.push(base_row.merged_with(target_row));
            }
        }
    }

    joined
}
