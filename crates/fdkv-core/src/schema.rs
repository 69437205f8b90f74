//! Schema catalog: tables, fields, functional dependencies, and the derived
//! key-space layout.
//!
//! Every key layout here is part of the external contract: a second
//! implementation interoperating with data written by this one must produce
//! byte-identical keys, so these formats are not to be changed casually.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::config::CoreConfiguration;
use crate::error::{CoreError, Result};

/// The name of one field. Structural equality — share freely.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDescriptor(Arc<str>);

impl FieldDescriptor {
    /// Build a descriptor from a field name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        FieldDescriptor(name.into())
    }

    /// The field name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldDescriptor {
    fn from(name: &str) -> Self {
        FieldDescriptor::new(name)
    }
}

impl std::fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a table within a query. Two descriptors collide iff their
/// *identities* (alias if present, else name) match — this is what makes
/// self-joins possible: the same underlying table under two aliases.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    name: Arc<str>,
    alias: Option<Arc<str>>,
}

impl TableDescriptor {
    /// A table referenced by its own name (no alias).
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        TableDescriptor {
            name: name.into(),
            alias: None,
        }
    }

    /// A table referenced under an alias, e.g. for a self-join.
    pub fn with_alias(name: impl Into<Arc<str>>, alias: impl Into<Arc<str>>) -> Self {
        TableDescriptor {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }

    /// The underlying table name. Storage keys are always derived from this,
    /// never from the alias.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The identity used for equality/hashing and for binding query results:
    /// the alias if set, else the name.
    pub fn identity(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

impl From<&str> for TableDescriptor {
    fn from(name: &str) -> Self {
        TableDescriptor::new(name)
    }
}

impl PartialEq for TableDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for TableDescriptor {}

impl Hash for TableDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

/// Whether a field participates in the table's primary key.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    /// The field this definition describes.
    pub field: FieldDescriptor,
    /// Whether this field is part of the primary key.
    pub primary_key: bool,
}

impl FieldDefinition {
    /// A plain, non-key field.
    pub fn new(field: impl Into<FieldDescriptor>) -> Self {
        FieldDefinition {
            field: field.into(),
            primary_key: false,
        }
    }

    /// A field that participates in the primary key.
    pub fn primary_key(field: impl Into<FieldDescriptor>) -> Self {
        FieldDefinition {
            field: field.into(),
            primary_key: true,
        }
    }
}

/// `determinants => dependent`: across a table, equal values of the
/// determinant fields imply an equal value of the dependent field.
#[derive(Debug, Clone)]
pub struct FunctionalDependency {
    /// Ordered set of determinant fields.
    pub determinants: Vec<FieldDescriptor>,
    /// The field whose value is implied.
    pub dependent: FieldDescriptor,
}

impl FunctionalDependency {
    /// Declare `determinants => dependent`.
    pub fn new(determinants: Vec<FieldDescriptor>, dependent: impl Into<FieldDescriptor>) -> Self {
        FunctionalDependency {
            determinants,
            dependent: dependent.into(),
        }
    }

    /// Determinant field names, sorted and joined with `&`, as used in the
    /// FD-index key layout.
    pub(crate) fn determinant_names_joined(&self) -> String {
        let mut names: Vec<&str> = self.determinants.iter().map(FieldDescriptor::name).collect();
        names.sort_unstable();
        names.join("&")
    }

    /// The FD-index set key for a given determinant-valuation identifier.
    pub(crate) fn index_key(&self, determinant_identifier: &str) -> String {
        format!(
            "__dependency_index__:{}=>{}:{}",
            self.determinant_names_joined(),
            self.dependent.name(),
            determinant_identifier
        )
    }
}

/// One table's fields and declared functional dependencies.
pub struct TableDefinition {
    name: Arc<str>,
    fields: Vec<FieldDefinition>,
    by_field: HashMap<FieldDescriptor, usize>,
    /// Dependent field -> FDs that determine it.
    dependencies: HashMap<FieldDescriptor, Vec<FunctionalDependency>>,
}

impl TableDefinition {
    /// Build a table definition, validating its invariants:
    /// at least one primary-key field, and every FD field is a table member.
    pub fn new(
        name: impl Into<Arc<str>>,
        fields: Vec<FieldDefinition>,
        dependencies: Vec<FunctionalDependency>,
    ) -> Result<Self> {
        let name = name.into();

        if !fields.iter().any(|f| f.primary_key) {
            return Err(CoreError::InvalidDescriptor(format!(
                "table {name} declares no primary-key field"
            )));
        }

        let mut by_field = HashMap::with_capacity(fields.len());
        for (idx, f) in fields.iter().enumerate() {
            by_field.insert(f.field.clone(), idx);
        }

        let mut grouped: HashMap<FieldDescriptor, Vec<FunctionalDependency>> = HashMap::new();
        for fd in dependencies {
            for determinant in &fd.determinants {
                if !by_field.contains_key(determinant) {
                    return Err(CoreError::InvalidDescriptor(format!(
                        "table {name}: FD determinant {determinant} is not a table field"
                    )));
                }
            }
            if !by_field.contains_key(&fd.dependent) {
                return Err(CoreError::InvalidDescriptor(format!(
                    "table {name}: FD dependent {} is not a table field",
                    fd.dependent
                )));
            }
            grouped.entry(fd.dependent.clone()).or_default().push(fd);
        }

        Ok(TableDefinition {
            name,
            fields,
            by_field,
            dependencies: grouped,
        })
    }

    /// The underlying table name (never an alias).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every field declared on this table.
    pub fn all_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().map(|f| &f.field)
    }

    /// Primary-key fields, in declaration order.
    pub fn primary_key_fields(&self) -> Vec<&FieldDescriptor> {
        self.fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| &f.field)
            .collect()
    }

    /// Whether `field` is declared on this table.
    pub fn has_field(&self, field: &FieldDescriptor) -> bool {
        self.by_field.contains_key(field)
    }

    /// The functional dependencies whose dependent is `field`, if any.
    pub fn dependencies_for(&self, field: &FieldDescriptor) -> &[FunctionalDependency] {
        self.dependencies
            .get(field)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All functional dependencies declared on this table.
    pub fn all_dependencies(&self) -> impl Iterator<Item = &FunctionalDependency> {
        self.dependencies.values().flatten()
    }

    /// The table-index set key: `__table_keys__:<table-name>`.
    pub(crate) fn table_key(&self) -> String {
        format!("__table_keys__:{}", self.name)
    }

    /// The cell-key prefix for `field`: `__value__:<table-name>:<field-name>`.
    pub(crate) fn field_key_prefix(&self, field: &FieldDescriptor) -> String {
        format!("__value__:{}:{}", self.name, field.name())
    }

    /// The full cell key for `field` under the given PK identifier.
    pub(crate) fn cell_key(&self, field: &FieldDescriptor, pk_identifier: &str) -> String {
        format!("{}:{}", self.field_key_prefix(field), pk_identifier)
    }

    /// An arbitrary but stable field, used to scope the SCAN/KEYS iteration
    /// pattern to a single field prefix: the first declared field.
    pub(crate) fn arbitrary_field(&self) -> &FieldDescriptor {
        &self.fields[0].field
    }
}

/// Table definitions plus the strategy selectors for one `Core`.
pub struct MetadataStore {
    tables: HashMap<String, TableDefinition>,
    /// Strategy selectors for this `Core`.
    pub config: CoreConfiguration,
}

impl MetadataStore {
    /// Build a catalog from table definitions and a configuration.
    pub fn new(tables: Vec<TableDefinition>, config: CoreConfiguration) -> Self {
        let mut by_name = HashMap::with_capacity(tables.len());
        for table in tables {
            by_name.insert(table.name().to_string(), table);
        }
        MetadataStore {
            tables: by_name,
            config,
        }
    }

    /// Look up a table definition by its descriptor's underlying name
    /// (aliases never affect storage lookups).
    pub fn table(&self, descriptor: &TableDescriptor) -> Result<&TableDefinition> {
        self.tables
            .get(descriptor.name())
            .ok_or_else(|| CoreError::InvalidDescriptor(descriptor.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_descriptor_identity_is_alias_or_name() {
        let plain = TableDescriptor::new("t");
        let aliased = TableDescriptor::with_alias("t", "a");

        assert_eq!(plain.identity(), "t");
        assert_eq!(aliased.identity(), "a");
        assert_eq!(aliased.name(), "t");
    }

    #[test]
    fn self_join_aliases_are_distinct_identities() {
        let a = TableDescriptor::with_alias("t", "a");
        let b = TableDescriptor::with_alias("t", "b");
        assert_ne!(a, b);
        assert_eq!(a.name(), b.name());
    }

    #[test]
    fn table_definition_rejects_missing_primary_key() {
        let result = TableDefinition::new("t", vec![FieldDefinition::new("f")], vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn table_definition_rejects_fd_field_not_in_table() {
        let result = TableDefinition::new(
            "t",
            vec![FieldDefinition::primary_key("p")],
            vec![FunctionalDependency::new(vec!["x".into()], "p")],
        );
        assert!(result.is_err());
    }

    #[test]
    fn fd_index_key_layout_matches_contract() {
        let table = TableDefinition::new(
            "t",
            vec![
                FieldDefinition::primary_key("p"),
                FieldDefinition::new("f1"),
                FieldDefinition::new("f2"),
                FieldDefinition::new("f3"),
            ],
            vec![FunctionalDependency::new(
                vec!["f2".into(), "f1".into()],
                "f3",
            )],
        )
        .unwrap();

        let fd = &table.dependencies_for(&"f3".into())[0];
        assert_eq!(fd.index_key("ID"), "__dependency_index__:f1&f2=>f3:ID");
    }

    #[test]
    fn key_layouts_match_contract() {
        let table = TableDefinition::new("t", vec![FieldDefinition::primary_key("p")], vec![]).unwrap();
        assert_eq!(table.table_key(), "__table_keys__:t");
        assert_eq!(
            table.cell_key(&"p".into(), "ID"),
            "__value__:t:p:ID"
        );
    }
}
