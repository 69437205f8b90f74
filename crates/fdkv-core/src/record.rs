//! Record model: maps a logical record onto its primary-key identifier
//! and per-field cell keys, via the schema catalog and the configured key
//! policy.

use std::collections::HashMap;

use crate::error::Result;
use crate::key_policy::KeyPolicy;
use crate::schema::{FieldDescriptor, FunctionalDependency, TableDefinition, TableDescriptor};

/// A record to be inserted, deleted, or otherwise addressed by primary key.
/// Omitted fields are treated as null.
#[derive(Debug, Clone)]
pub struct TableRecord {
    /// The table this record belongs to (by name; alias is irrelevant here).
    pub table: TableDescriptor,
    values: HashMap<FieldDescriptor, String>,
}

impl TableRecord {
    /// Build a record for `table` from an explicit field->value mapping.
    pub fn new(table: TableDescriptor, values: HashMap<FieldDescriptor, String>) -> Self {
        TableRecord { table, values }
    }

    /// The value of `field`, or `None` if omitted (null).
    pub fn value(&self, field: &FieldDescriptor) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }
}

/// The record's primary-key valuation, in the table's declared PK field order.
pub(crate) fn primary_key_valuation<'a>(
    table: &'a TableDefinition,
    record: &'a TableRecord,
) -> Vec<(&'a FieldDescriptor, Option<&'a str>)> {
    table
        .primary_key_fields()
        .into_iter()
        .map(|f| (f, record.value(f)))
        .collect()
}

/// The record's determinant valuation for one functional dependency.
pub(crate) fn determinant_valuation<'a>(
    fd: &'a FunctionalDependency,
    record: &'a TableRecord,
) -> Vec<(&'a FieldDescriptor, Option<&'a str>)> {
    fd.determinants
        .iter()
        .map(|f| (f, record.value(f)))
        .collect()
}

/// The record's primary-key identifier under the given key policy.
pub(crate) fn primary_key_identifier(
    table: &TableDefinition,
    policy: KeyPolicy,
    record: &TableRecord,
) -> Result<String> {
    policy.identify(&primary_key_valuation(table, record))
}

/// This FD's determinant identifier for the record, under the given policy.
pub(crate) fn determinant_identifier(
    fd: &FunctionalDependency,
    policy: KeyPolicy,
    record: &TableRecord,
) -> Result<String> {
    policy.identify(&determinant_valuation(fd, record))
}
