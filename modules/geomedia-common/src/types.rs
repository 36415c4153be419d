use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Duration, NaiveDate};
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::GeomediaError;

// --- Tags ---

/// A single value of a tag dimension.
///
/// Documents with an empty tag set in a dimension still contribute one row to
/// the hypercube; that row carries `Tag::Untagged` instead of a placeholder
/// string so it can never collide with a real entity code. Serialized as a
/// nullable string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Tag {
    Untagged,
    Value(String),
}

impl Tag {
    pub fn value(v: impl Into<String>) -> Self {
        Tag::Value(v.into())
    }

    pub fn as_value(&self) -> Option<&str> {
        match self {
            Tag::Untagged => None,
            Tag::Value(v) => Some(v.as_str()),
        }
    }

    pub fn is_tagged(&self) -> bool {
        matches!(self, Tag::Value(_))
    }
}

impl From<Option<String>> for Tag {
    fn from(v: Option<String>) -> Self {
        match v {
            Some(v) => Tag::Value(v),
            None => Tag::Untagged,
        }
    }
}

impl From<Tag> for Option<String> {
    fn from(t: Tag) -> Self {
        match t {
            Tag::Untagged => None,
            Tag::Value(v) => Some(v),
        }
    }
}

impl From<&str> for Tag {
    fn from(v: &str) -> Self {
        Tag::Value(v.to_string())
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tag::Untagged => write!(f, "(untagged)"),
            Tag::Value(v) => write!(f, "{v}"),
        }
    }
}

impl JsonSchema for Tag {
    fn schema_name() -> String {
        "Tag".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        <Option<String>>::json_schema(gen)
    }
}

/// The tag fields a document carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TagField {
    Topic,
    GeoA,
    GeoB,
}

/// Which tag field plays each role of the hypercube for a given run.
///
/// Pointing both geo roles at the same field (e.g. `geo_a = geo_b = geo_a`)
/// yields the co-mention cube of a single entity family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct RoleSelectors {
    pub topic: TagField,
    pub geo_a: TagField,
    pub geo_b: TagField,
}

impl Default for RoleSelectors {
    fn default() -> Self {
        Self {
            topic: TagField::Topic,
            geo_a: TagField::GeoA,
            geo_b: TagField::GeoB,
        }
    }
}

// --- Documents ---

fn default_sequence() -> u32 {
    1
}

/// A news item (or one text unit of it) with its pre-assigned tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaggedDocument {
    pub id: String,
    /// Position of the text unit inside its news item (1 = headline).
    #[serde(default = "default_sequence")]
    pub sequence: u32,
    pub source: String,
    pub timestamp: NaiveDate,
    #[serde(default)]
    pub topic_tags: BTreeSet<String>,
    #[serde(default)]
    pub geo_tags_a: BTreeSet<String>,
    #[serde(default)]
    pub geo_tags_b: BTreeSet<String>,
}

impl TaggedDocument {
    pub fn tags(&self, field: TagField) -> &BTreeSet<String> {
        match field {
            TagField::Topic => &self.topic_tags,
            TagField::GeoA => &self.geo_tags_a,
            TagField::GeoB => &self.geo_tags_b,
        }
    }

    /// Tag values of a field, with `Tag::Untagged` standing in for an empty set.
    pub fn role_values(&self, field: TagField) -> Vec<Tag> {
        let tags = self.tags(field);
        if tags.is_empty() {
            vec![Tag::Untagged]
        } else {
            tags.iter().map(|t| Tag::Value(t.clone())).collect()
        }
    }
}

// --- Time buckets ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TimeResolution {
    Day,
    #[default]
    Week,
    Month,
}

impl TimeResolution {
    /// First day of the bucket containing `date`. Weeks start on Monday.
    pub fn bucket(&self, date: NaiveDate) -> NaiveDate {
        match self {
            TimeResolution::Day => date,
            TimeResolution::Week => {
                date - Duration::days(date.weekday().num_days_from_monday() as i64)
            }
            TimeResolution::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

impl std::fmt::Display for TimeResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeResolution::Day => write!(f, "day"),
            TimeResolution::Week => write!(f, "week"),
            TimeResolution::Month => write!(f, "month"),
        }
    }
}

// --- Geographic reference ---

/// One entry of the geographic reference table (e.g. an ISO3 country).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeoReference {
    pub entity_code: String,
    pub display_name: String,
    pub longitude: f64,
    pub latitude: f64,
}

/// Lookup of reference entries by entity code.
#[derive(Debug, Clone, Default)]
pub struct GeoReferenceTable {
    entries: BTreeMap<String, GeoReference>,
}

impl GeoReferenceTable {
    /// Index reference entries. Empty or duplicated codes are rejected.
    pub fn from_entries(entries: Vec<GeoReference>) -> Result<Self, GeomediaError> {
        let mut map = BTreeMap::new();
        for entry in entries {
            if entry.entity_code.trim().is_empty() {
                return Err(GeomediaError::MalformedInput(format!(
                    "geographic reference '{}' has an empty entity code",
                    entry.display_name
                )));
            }
            if let Some(prev) = map.insert(entry.entity_code.clone(), entry) {
                return Err(GeomediaError::MalformedInput(format!(
                    "duplicate geographic reference code '{}'",
                    prev.entity_code
                )));
            }
        }
        Ok(Self { entries: map })
    }

    pub fn get(&self, code: &str) -> Option<&GeoReference> {
        self.entries.get(code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
