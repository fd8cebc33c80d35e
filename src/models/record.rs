//! Candidate records and their identifiers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a business record in the external store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(i64);

impl RecordId {
    /// Creates a record ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric ID.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Kind of business entity being deduplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Counterparties (clients, suppliers) compared by name.
    #[default]
    Counterparty,
    /// Nomenclature items compared by description.
    Nomenclature,
}

impl EntityType {
    /// Returns the entity type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Counterparty => "counterparty",
            Self::Nomenclature => "nomenclature",
        }
    }

    /// Parses an entity type, accepting a few common aliases.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "counterparty" | "counterparties" | "client" => Some(Self::Counterparty),
            "nomenclature" | "item" | "items" => Some(Self::Nomenclature),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// A business record streamed from the candidate source.
///
/// `name` is the field compared by the similarity scorer. `fields` holds the
/// remaining attributes (tax number, address, phone, ...) that a merge may
/// copy into the master record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record identifier.
    pub id: RecordId,
    /// Project the record belongs to.
    pub project_id: i64,
    /// Entity type of the record.
    pub entity_type: EntityType,
    /// The compared text (counterparty name or nomenclature description).
    pub name: String,
    /// Additional attributes.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Record {
    /// Creates a record with no additional attributes.
    #[must_use]
    pub fn new(id: i64, project_id: i64, entity_type: EntityType, name: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(id),
            project_id,
            entity_type,
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Number of populated attributes, counting the name.
    ///
    /// Used to pick the most complete member of a group as its master.
    #[must_use]
    pub fn completeness(&self) -> usize {
        let name = usize::from(!self.name.trim().is_empty());
        name + self
            .fields
            .values()
            .filter(|v| !v.trim().is_empty())
            .count()
    }

    /// Returns `true` when the attribute is missing or blank.
    #[must_use]
    pub fn is_missing(&self, key: &str) -> bool {
        self.fields.get(key).is_none_or(|v| v.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completeness_counts_non_empty() {
        let record = Record::new(1, 7, EntityType::Counterparty, "ООО Ромашка")
            .with_field("inn", "7701234567")
            .with_field("kpp", "  ")
            .with_field("phone", "");
        assert_eq!(record.completeness(), 2);
        assert!(record.is_missing("kpp"));
        assert!(record.is_missing("address"));
        assert!(!record.is_missing("inn"));
    }

    #[test]
    fn test_entity_type_parse() {
        assert_eq!(EntityType::parse("Counterparty"), Some(EntityType::Counterparty));
        assert_eq!(EntityType::parse("items"), Some(EntityType::Nomenclature));
        assert_eq!(EntityType::parse("project"), None);
        assert_eq!(
            "nomenclature".parse::<EntityType>(),
            Ok(EntityType::Nomenclature)
        );
    }

    #[test]
    fn test_record_id_ordering() {
        assert!(RecordId::new(10) < RecordId::new(11));
        assert_eq!(RecordId::from(5).get(), 5);
        assert_eq!(RecordId::new(42).to_string(), "42");
    }
}
