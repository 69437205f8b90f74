//! Composable predicates: `Equals` / `In` / `Not`. A small algebraic
//! data type rather than an inheritance hierarchy.

use std::collections::HashSet;

use crate::schema::{FieldDescriptor, TableDescriptor};

/// A predicate over one field of one table, evaluated against a fetched
/// `FieldValue` (or `None` for a missing/null cell).
#[derive(Debug, Clone)]
pub enum Condition {
    /// True iff the fetched value equals `literal` (null equals null only).
    Equals {
        table: TableDescriptor,
        field: FieldDescriptor,
        literal: Option<String>,
    },
    /// True iff the fetched value is present and a member of `literals`.
    In {
        table: TableDescriptor,
        field: FieldDescriptor,
        literals: HashSet<String>,
    },
    /// Strict logical negation of `inner` — no three-valued logic.
    Not(Box<Condition>),
}

impl Condition {
    /// Build an `Equals` condition.
    pub fn equals(
        table: TableDescriptor,
        field: impl Into<FieldDescriptor>,
        literal: impl Into<String>,
    ) -> Self {
        Condition::Equals {
            table,
            field: field.into(),
            literal: Some(literal.into()),
        }
    }

    /// Build an `Equals(None)` condition — "is null".
    pub fn is_null(table: TableDescriptor, field: impl Into<FieldDescriptor>) -> Self {
        Condition::Equals {
            table,
            field: field.into(),
            literal: None,
        }
    }

    /// Build an `In` condition.
    pub fn in_set(
        table: TableDescriptor,
        field: impl Into<FieldDescriptor>,
        literals: impl IntoIterator<Item = String>,
    ) -> Self {
        Condition::In {
            table,
            field: field.into(),
            literals: literals.into_iter().collect(),
        }
    }

    /// Wrap `inner` in a logical negation.
    pub fn not(inner: Condition) -> Self {
        Condition::Not(Box::new(inner))
    }

    /// The table this condition is declared against.
    pub fn table(&self) -> &TableDescriptor {
        match self {
            Condition::Equals { table, .. } | Condition::In { table, .. } => table,
            Condition::Not(inner) => inner.table(),
        }
    }

    /// The field this condition is declared against.
    pub fn field(&self) -> &FieldDescriptor {
        match self {
            Condition::Equals { field, .. } | Condition::In { field, .. } => field,
            Condition::Not(inner) => inner.field(),
        }
    }

    /// Evaluate this condition against a fetched field value.
    pub fn evaluate(&self, value: Option<&str>) -> bool {
        match self {
            Condition::Equals { literal, .. } => match (literal.as_deref(), value) {
                (None, None) => true,
                (None, Some(_)) | (Some(_), None) => false,
                (Some(l), Some(v)) => l == v,
            },
            Condition::In { literals, .. } => value.map_or(false, |v| literals.contains(v)),
            Condition::Not(inner) => !inner.evaluate(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t() -> TableDescriptor {
        TableDescriptor::new("t")
    }

    #[test]
    fn equals_matches_literal() {
        let c = Condition::equals(t(), "f1", "f1");
        assert!(c.evaluate(Some("f1")));
        assert!(!c.evaluate(Some("f2")));
        assert!(!c.evaluate(None));
    }

    #[test]
    fn equals_null_only_matches_null() {
        let c = Condition::is_null(t(), "f1");
        assert!(c.evaluate(None));
        assert!(!c.evaluate(Some("anything")));
    }

    #[test]
    fn not_is_strict_negation() {
        let c = Condition::not(Condition::equals(t(), "f1", "f1"));
        assert!(!c.evaluate(Some("f1")));
        assert!(c.evaluate(Some("f2")));
        assert!(c.evaluate(None));
    }

    #[test]
    fn in_set_requires_presence() {
        let c = Condition::in_set(t(), "f1", ["a".to_string(), "b".to_string()]);
        assert!(c.evaluate(Some("a")));
        assert!(!c.evaluate(Some("c")));
        assert!(!c.evaluate(None));
    }
}
