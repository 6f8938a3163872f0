//! Versioned schema descriptors for record tables.
//!
//! A [`Schema`] is an ordered list of [`SchemaVersion`]s plus the key builders
//! fixed by version 1. Records written under an older version are migrated
//! forward on load, one version at a time.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::backend::Properties;
use super::condition::Operand;
use crate::core::StoreError;

/// Declared type of a stored property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    /// UTF-8 string.
    String,
    /// Number (integer or float).
    Number,
    /// Boolean.
    Boolean,
    /// Instant stored as epoch milliseconds.
    Date,
    /// Arbitrary JSON; never filterable.
    Json,
}

impl PropertyType {
    fn admits(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Date => value.is_i64(),
            Self::Json => true,
        }
    }
}

/// Derives an encoded key from record properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyBuilder {
    /// Key is the value of one string property.
    String(String),
    /// Key is a fixed literal.
    Constant(String),
    /// Key joins several string properties with `~`.
    Composite(Vec<String>),
}

impl KeyBuilder {
    /// Key taken from a single string property.
    pub fn string(property: impl Into<String>) -> Self {
        Self::String(property.into())
    }

    /// Fixed key.
    pub fn constant(value: impl Into<String>) -> Self {
        Self::Constant(value.into())
    }

    /// Key composed from several string properties.
    pub fn composite<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Composite(properties.into_iter().map(Into::into).collect())
    }

    /// Properties that feed this key.
    pub fn properties(&self) -> Vec<&str> {
        match self {
            Self::String(property) => vec![property.as_str()],
            Self::Constant(_) => Vec::new(),
            Self::Composite(properties) => properties.iter().map(String::as_str).collect(),
        }
    }

    /// Encode the key from a property bag (extra properties are ignored).
    pub fn build(&self, properties: &Properties) -> Result<String, StoreError> {
        let component = |name: &str| -> Result<String, StoreError> {
            properties
                .get(name)
                .and_then(Value::as_str)
                .map(encode_key_component)
                .ok_or_else(|| StoreError::Schema(format!("key property `{name}` missing or not a string")))
        };
        match self {
            Self::String(property) => component(property),
            Self::Constant(value) => Ok(value.clone()),
            Self::Composite(names) => {
                let parts = names
                    .iter()
                    .map(|name| component(name))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(parts.join("~"))
            }
        }
    }
}

/// Escape characters that are illegal in backend keys or used as separators.
pub fn encode_key_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '/' | '\\' | '#' | '?' | '%' | '~' => out.push_str(&format!("%{:02X}", u32::from(ch))),
            c if c.is_control() => out.push_str(&format!("%{:02X}", u32::from(c))),
            c => out.push(c),
        }
    }
    if out.is_empty() {
        // Backends reject empty keys.
        out.push('!');
    }
    out
}

/// Upgrades a property bag from the previous version.
pub type Migration = Arc<dyn Fn(Properties) -> Result<Properties, StoreError> + Send + Sync>;

/// One version of a schema.
#[derive(Clone)]
pub struct SchemaVersion {
    /// Version number, starting at 1.
    pub version: u32,
    /// Declared properties.
    pub properties: BTreeMap<String, PropertyType>,
    migrate: Option<Migration>,
}

impl fmt::Debug for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaVersion")
            .field("version", &self.version)
            .field("properties", &self.properties)
            .field("migrate", &self.migrate.is_some())
            .finish()
    }
}

/// Complete table descriptor.
#[derive(Debug, Clone)]
pub struct Schema {
    table_name: String,
    partition_key: KeyBuilder,
    row_key: KeyBuilder,
    versions: Vec<SchemaVersion>,
}

impl Schema {
    /// Start building a schema for `table_name`.
    pub fn builder(table_name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            table_name: table_name.into(),
            partition_key: None,
            row_key: None,
            versions: Vec::new(),
        }
    }

    /// Backing table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Partition key builder.
    pub const fn partition_key(&self) -> &KeyBuilder {
        &self.partition_key
    }

    /// Row key builder.
    pub const fn row_key(&self) -> &KeyBuilder {
        &self.row_key
    }

    /// Latest version number.
    pub fn latest_version(&self) -> u32 {
        self.latest().version
    }

    fn latest(&self) -> &SchemaVersion {
        // The builder guarantees at least one version.
        &self.versions[self.versions.len() - 1]
    }

    /// Declared type of a property in the latest version.
    pub fn property_type(&self, name: &str) -> Option<PropertyType> {
        self.latest().properties.get(name).copied()
    }

    /// Whether `name` feeds the partition or row key.
    pub fn is_key_property(&self, name: &str) -> bool {
        self.partition_key.properties().contains(&name) || self.row_key.properties().contains(&name)
    }

    /// Names of all key-defining properties.
    pub fn key_properties(&self) -> Vec<&str> {
        let mut names = self.partition_key.properties();
        names.extend(self.row_key.properties());
        names
    }

    /// Encoded (partition, row) keys for a property bag.
    pub fn keys_for(&self, properties: &Properties) -> Result<(String, String), StoreError> {
        Ok((
            self.partition_key.build(properties)?,
            self.row_key.build(properties)?,
        ))
    }

    /// Check a property bag against the latest version.
    pub fn validate(&self, properties: &Properties) -> Result<(), StoreError> {
        let latest = self.latest();
        for (name, kind) in &latest.properties {
            let value = properties
                .get(name)
                .ok_or_else(|| StoreError::Schema(format!("property `{name}` is missing")))?;
            if !kind.admits(value) {
                return Err(StoreError::Schema(format!(
                    "property `{name}` is not a valid {kind:?}"
                )));
            }
        }
        if let Some(unknown) = properties.keys().find(|k| !latest.properties.contains_key(*k)) {
            return Err(StoreError::Schema(format!("property `{unknown}` is not declared")));
        }
        Ok(())
    }

    /// Bring properties stored at `version` up to the latest version.
    pub fn migrate(&self, version: u32, mut properties: Properties) -> Result<Properties, StoreError> {
        let latest = self.latest_version();
        if version == 0 || version > latest {
            return Err(StoreError::Schema(format!(
                "stored version {version} is unknown (latest is {latest})"
            )));
        }
        for next in &self.versions[version as usize..] {
            let migrate = next.migrate.as_ref().ok_or_else(|| {
                StoreError::Schema(format!("version {} has no migration", next.version))
            })?;
            properties = migrate(properties)?;
        }
        Ok(properties)
    }

    /// Convert a typed operand into the stored form of `property`.
    pub fn operand_value(&self, property: &str, operand: &Operand) -> Result<Value, StoreError> {
        let kind = self
            .property_type(property)
            .ok_or_else(|| StoreError::InvalidQuery(format!("unknown property `{property}`")))?;
        match (kind, operand) {
            (PropertyType::String, Operand::String(s)) => Ok(Value::String(s.clone())),
            (PropertyType::Boolean, Operand::Boolean(b)) => Ok(Value::Bool(*b)),
            (PropertyType::Date, Operand::Date(d)) => Ok(Value::from(d.timestamp_millis())),
            (PropertyType::Number, Operand::Number(n)) => number_value(*n).ok_or_else(|| {
                StoreError::InvalidQuery(format!("`{property}` operand is not a finite number"))
            }),
            (PropertyType::Json, _) => Err(StoreError::InvalidQuery(format!(
                "JSON property `{property}` cannot be filtered"
            ))),
            (kind, operand) => Err(StoreError::InvalidQuery(format!(
                "`{property}` is {kind:?} but operand is {operand:?}"
            ))),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn number_value(n: f64) -> Option<Value> {
    // Keep integral operands integral so they compare exactly with stored integers.
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Some(Value::from(n as i64));
    }
    serde_json::Number::from_f64(n).map(Value::Number)
}

/// Builder for [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    table_name: String,
    partition_key: Option<KeyBuilder>,
    row_key: Option<KeyBuilder>,
    versions: Vec<SchemaVersion>,
}

impl SchemaBuilder {
    /// Set the partition key builder.
    #[must_use]
    pub fn partition_key(mut self, key: KeyBuilder) -> Self {
        self.partition_key = Some(key);
        self
    }

    /// Set the row key builder.
    #[must_use]
    pub fn row_key(mut self, key: KeyBuilder) -> Self {
        self.row_key = Some(key);
        self
    }

    /// Declare the first version.
    #[must_use]
    pub fn version<I, S>(mut self, version: u32, properties: I) -> Self
    where
        I: IntoIterator<Item = (S, PropertyType)>,
        S: Into<String>,
    {
        self.versions.push(SchemaVersion {
            version,
            properties: properties.into_iter().map(|(k, t)| (k.into(), t)).collect(),
            migrate: None,
        });
        self
    }

    /// Declare a later version with its migration from the previous one.
    #[must_use]
    pub fn migrated_version<I, S, F>(mut self, version: u32, properties: I, migrate: F) -> Self
    where
        I: IntoIterator<Item = (S, PropertyType)>,
        S: Into<String>,
        F: Fn(Properties) -> Result<Properties, StoreError> + Send + Sync + 'static,
    {
        self.versions.push(SchemaVersion {
            version,
            properties: properties.into_iter().map(|(k, t)| (k.into(), t)).collect(),
            migrate: Some(Arc::new(migrate)),
        });
        self
    }

    /// Validate and produce the schema.
    pub fn build(self) -> Result<Schema, StoreError> {
        let partition_key = self
            .partition_key
            .ok_or_else(|| StoreError::Schema("partition key is required".into()))?;
        let row_key = self
            .row_key
            .ok_or_else(|| StoreError::Schema("row key is required".into()))?;
        if self.versions.is_empty() {
            return Err(StoreError::Schema("at least one version is required".into()));
        }
        for (index, version) in self.versions.iter().enumerate() {
            let expected = u32::try_from(index + 1).unwrap_or(u32::MAX);
            if version.version != expected {
                return Err(StoreError::Schema(format!(
                    "expected version {expected}, found {}",
                    version.version
                )));
            }
            if index > 0 && version.migrate.is_none() {
                return Err(StoreError::Schema(format!(
                    "version {expected} needs a migration"
                )));
            }
            for key in partition_key.properties().into_iter().chain(row_key.properties()) {
                if version.properties.get(key) != Some(&PropertyType::String) {
                    return Err(StoreError::Schema(format!(
                        "key property `{key}` must be a String in version {expected}"
                    )));
                }
            }
        }
        Ok(Schema {
            table_name: self.table_name,
            partition_key,
            row_key,
            versions: self.versions,
        })
    }
}
