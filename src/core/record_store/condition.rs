//! Typed scan conditions and the backend predicate tree they compile to.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::backend::Properties;

/// Comparison operator usable in scan conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
}

impl Operator {
    /// Whether `ordering` (stored value compared to operand) satisfies the operator.
    pub const fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Equal => matches!(ordering, Ordering::Equal),
            Self::NotEqual => !matches!(ordering, Ordering::Equal),
            Self::LessThan => matches!(ordering, Ordering::Less),
            Self::LessThanOrEqual => !matches!(ordering, Ordering::Greater),
            Self::GreaterThan => matches!(ordering, Ordering::Greater),
            Self::GreaterThanOrEqual => !matches!(ordering, Ordering::Less),
        }
    }
}

/// Right-hand side of a condition, typed so it can be checked against the schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// String comparison.
    String(String),
    /// Numeric comparison.
    Number(f64),
    /// Boolean comparison.
    Boolean(bool),
    /// Instant comparison (stored as epoch milliseconds).
    Date(DateTime<Utc>),
}

impl From<&str> for Operand {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Operand {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&String> for Operand {
    fn from(value: &String) -> Self {
        Self::String(value.clone())
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<u32> for Operand {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i32> for Operand {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<bool> for Operand {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<DateTime<Utc>> for Operand {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

/// One `property <op> operand` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Property name as declared in the schema.
    pub property: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Value compared against.
    pub operand: Operand,
}

/// Conjunction of conditions passed to `scan`/`query`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    items: Vec<Condition>,
}

impl Conditions {
    /// Empty condition set (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an arbitrary clause.
    #[must_use]
    pub fn with(
        mut self,
        property: impl Into<String>,
        operator: Operator,
        operand: impl Into<Operand>,
    ) -> Self {
        self.items.push(Condition {
            property: property.into(),
            operator,
            operand: operand.into(),
        });
        self
    }

    /// `property == operand`
    #[must_use]
    pub fn eq(self, property: impl Into<String>, operand: impl Into<Operand>) -> Self {
        self.with(property, Operator::Equal, operand)
    }

    /// `property != operand`
    #[must_use]
    pub fn ne(self, property: impl Into<String>, operand: impl Into<Operand>) -> Self {
        self.with(property, Operator::NotEqual, operand)
    }

    /// `property < operand`
    #[must_use]
    pub fn lt(self, property: impl Into<String>, operand: impl Into<Operand>) -> Self {
        self.with(property, Operator::LessThan, operand)
    }

    /// `property <= operand`
    #[must_use]
    pub fn le(self, property: impl Into<String>, operand: impl Into<Operand>) -> Self {
        self.with(property, Operator::LessThanOrEqual, operand)
    }

    /// `property > operand`
    #[must_use]
    pub fn gt(self, property: impl Into<String>, operand: impl Into<Operand>) -> Self {
        self.with(property, Operator::GreaterThan, operand)
    }

    /// `property >= operand`
    #[must_use]
    pub fn ge(self, property: impl Into<String>, operand: impl Into<Operand>) -> Self {
        self.with(property, Operator::GreaterThanOrEqual, operand)
    }

    /// Iterate clauses in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.items.iter()
    }

    /// Number of clauses.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when no clauses were added.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What a predicate clause looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// Encoded partition key.
    PartitionKey,
    /// Encoded row key.
    RowKey,
    /// Stored property.
    Property(String),
}

/// Backend-neutral filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every record.
    All,
    /// Single comparison.
    Compare {
        /// Compared field.
        field: Field,
        /// Operator.
        operator: Operator,
        /// Stored-form operand.
        value: Value,
    },
    /// Conjunction.
    And(Vec<Predicate>),
}

impl Predicate {
    /// Build a conjunction, collapsing trivial cases.
    pub fn and(mut clauses: Vec<Self>) -> Self {
        clauses.retain(|clause| !matches!(clause, Self::All));
        match clauses.len() {
            0 => Self::All,
            1 => clauses.pop().unwrap_or(Self::All),
            _ => Self::And(clauses),
        }
    }

    /// Exact partition key, if the predicate pins one at the top level.
    pub fn exact_partition(&self) -> Option<&str> {
        match self {
            Self::Compare {
                field: Field::PartitionKey,
                operator: Operator::Equal,
                value: Value::String(key),
            } => Some(key),
            Self::And(clauses) => clauses.iter().find_map(Self::exact_partition),
            _ => None,
        }
    }

    /// Evaluate against a stored record.
    pub fn matches(&self, partition_key: &str, row_key: &str, properties: &Properties) -> bool {
        match self {
            Self::All => true,
            Self::And(clauses) => clauses
                .iter()
                .all(|clause| clause.matches(partition_key, row_key, properties)),
            Self::Compare {
                field,
                operator,
                value,
            } => {
                let stored = match field {
                    Field::PartitionKey => Some(Value::String(partition_key.to_owned())),
                    Field::RowKey => Some(Value::String(row_key.to_owned())),
                    Field::Property(name) => properties.get(name).cloned(),
                };
                stored
                    .as_ref()
                    .and_then(|stored| compare_values(stored, value))
                    .is_some_and(|ordering| operator.accepts(ordering))
            }
        }
    }
}

/// Order two stored values of the same kind; mixed kinds never match.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        _ => None,
    }
}
