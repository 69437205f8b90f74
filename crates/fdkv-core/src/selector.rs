//! Query shape: projected fields, the base table, equi-joins, and
//! predicates — plus the two fields derived eagerly at construction.

use std::collections::{HashMap, HashSet};

use crate::condition::Condition;
use crate::schema::{FieldDescriptor, TableDescriptor};

/// One equi-join: `base_fields[i]` of the accumulated rows must equal
/// `target_fields[i]` of `target_table`, position-wise.
#[derive(Debug, Clone)]
pub struct JoinStatement {
    /// (table, field) pairs from the rows accumulated so far.
    pub base_fields: Vec<(TableDescriptor, FieldDescriptor)>,
    /// The table being joined in.
    pub target_table: TableDescriptor,
    /// Fields of `target_table`, zipped position-wise with `base_fields`.
    pub target_fields: Vec<FieldDescriptor>,
}

/// One row of query output: per-table, per-field values (or null), keyed by
/// table *identity* (alias if set, else name).
#[derive(Debug, Clone, Default)]
pub struct ResultRow {
    pub values: HashMap<TableDescriptor, HashMap<FieldDescriptor, Option<String>>>,
}

impl ResultRow {
    /// An empty row.
    pub fn new() -> Self {
        ResultRow::default()
    }

    /// Merge `other`'s per-table values into a new row (used when joining).
    pub(crate) fn merged_with(&self, other: &ResultRow) -> ResultRow {
        let mut values = self.values.clone();
        for (table, fields) in &other.values {
            values.insert(table.clone(), fields.clone());
        }
        ResultRow { values }
    }

    /// The value of `field` under `table`, if the row has that table bound.
    pub fn get(&self, table: &TableDescriptor, field: &FieldDescriptor) -> Option<Option<&str>> {
        self.values
            .get(table)
            .and_then(|fields| fields.get(field))
            .map(|v| v.as_deref())
    }
}

/// A projection-select query: base table, joins, predicates, and the fields
/// the caller wants back.
pub struct Selector {
    /// Fields to project, per table (by identity/alias).
    pub select_fields: HashMap<TableDescriptor, Vec<FieldDescriptor>>,
    /// The table the scan starts from.
    pub from_table: TableDescriptor,
    /// Joins, applied in declared order.
    pub joins: Vec<JoinStatement>,
    /// Predicates over fetched field values.
    pub conditions: Vec<Condition>,

    /// Union of projected, joined, and condition-referenced fields, per table.
    /// Built once, eagerly, and is a pure function of the fields above.
    pub(crate) all_needed_fields: HashMap<TableDescriptor, HashSet<FieldDescriptor>>,
    /// Conditions grouped by (table, field), for predicate pushdown during
    /// field fetch.
    pub(crate) parsed_conditions: HashMap<TableDescriptor, HashMap<FieldDescriptor, Vec<Condition>>>,
}

impl Selector {
    /// Build a selector, eagerly deriving `all_needed_fields` and
    /// `parsed_conditions` from the declared fields.
    pub fn new(
        select_fields: HashMap<TableDescriptor, Vec<FieldDescriptor>>,
        from_table: TableDescriptor,
        joins: Vec<JoinStatement>,
        conditions: Vec<Condition>,
    ) -> Self {
        let mut all_needed_fields: HashMap<TableDescriptor, HashSet<FieldDescriptor>> = HashMap::new();

        for (table, fields) in &select_fields {
            all_needed_fields
                .entry(table.clone())
                .or_default()
                .extend(fields.iter().cloned());
        }

        for join in &joins {
            let target_entry = all_needed_fields.entry(join.target_table.clone()).or_default();
            target_entry.extend(join.target_fields.iter().cloned());

            for (table, field) in &join.base_fields {
                all_needed_fields
                    .entry(table.clone())
                    .or_default()
                    .insert(field.clone());
            }
        }

        let mut parsed_conditions: HashMap<TableDescriptor, HashMap<FieldDescriptor, Vec<Condition>>> =
            HashMap::new();

        for condition in conditions.iter().cloned() {
            let table = condition.table().clone();
            let field = condition.field().clone();

            parsed_conditions
                .entry(table.clone())
                .or_default()
                .entry(field.clone())
                .or_default()
                .push(condition);

            all_needed_fields.entry(table).or_default().insert(field);
        }

        Selector {
            select_fields,
            from_table,
            joins,
            conditions,
            all_needed_fields,
            parsed_conditions,
        }
    }
}

/// Keep only the fields the caller actually projected, preserving aliases
/// (the only point where the external API sees the stream).
pub(crate) fn project(selector: &Selector, row: &ResultRow) -> ResultRow {
    let mut values = HashMap::new();

    for (table, fields) in &selector.select_fields {
        let mut projected = HashMap::with_capacity(fields.len());
        if let Some(row_fields) = row.values.get(table) {
            for field in fields {
                let value = row_fields.get(field).cloned().unwrap_or(None);
                projected.insert(field.clone(), value);
            }
        } else {
            for field in fields {
                projected.insert(field.clone(), None);
            }
        }
        values.insert(table.clone(), projected);
    }

    ResultRow { values }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_needed_fields_unions_projected_joined_and_condition_fields() {
        let t = TableDescriptor::new("t");
        let u = TableDescriptor::new("u");

        let selector = Selector::new(
            HashMap::from([(t.clone(), vec![FieldDescriptor::new("a")])]),
            t.clone(),
            vec![JoinStatement {
                base_fields: vec![(t.clone(), FieldDescriptor::new("b"))],
                target_table: u.clone(),
                target_fields: vec![FieldDescriptor::new("c")],
            }],
            vec![Condition::equals(t.clone(), "d", "x")],
        );

        let t_fields = &selector.all_needed_fields[&t];
        assert!(t_fields.contains(&FieldDescriptor::new("a")));
        assert!(t_fields.contains(&FieldDescriptor::new("b")));
        assert!(t_fields.contains(&FieldDescriptor::new("d")));

        let u_fields = &selector.all_needed_fields[&u];
        assert!(u_fields.contains(&FieldDescriptor::new("c")));
    }

    #[test]
    fn parsed_conditions_are_grouped_by_table_and_field() {
        let t = TableDescriptor::new("t");
        let selector = Selector::new(
            HashMap::new(),
            t.clone(),
            vec![],
            vec![
                Condition::equals(t.clone(), "f", "x"),
                Condition::not(Condition::equals(t.clone(), "f", "y")),
            ],
        );

        let conditions = &selector.parsed_conditions[&t][&FieldDescriptor::new("f")];
        assert_eq!(conditions.len(), 2);
    }
}
