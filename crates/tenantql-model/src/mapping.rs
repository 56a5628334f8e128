//! Per-tenant mapping records
//!
//! A [`MappingSet`] is the only state that persists across restarts. Its
//! collections are ordered vectors so that a save/load cycle reproduces the
//! record byte for byte.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingKind {
    Direct,
    Derived,
}

/// Where one canonical field lives in the tenant schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub canonical_table: String,
    pub canonical_field: String,
    pub target_table: String,

    /// `None` for derived fields; their SQL lives in the matching [`DerivedMapping`]
    #[serde(default)]
    pub target_column: Option<String>,

    pub confidence: f64,
    pub kind: MappingKind,
}

/// A canonical field that has no single tenant column and is computed instead.
///
/// `expression` is stored and replayed verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMapping {
    pub canonical_field: String,
    pub expression: String,
    pub confidence: f64,

    /// Tenant table the expression reads from
    #[serde(default)]
    pub source_table: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMapping {
    pub canonical_table: String,
    pub tenant_table: String,

    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

fn full_confidence() -> f64 {
    1.0
}

/// Canonical field that discovery could not map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmappedField {
    pub canonical_table: String,
    pub canonical_field: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSet {
    pub tenant_id: String,

    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,

    #[serde(default)]
    pub table_mappings: Vec<TableMapping>,

    #[serde(default)]
    pub derived_mappings: Vec<DerivedMapping>,

    #[serde(default)]
    pub unmapped: Vec<UnmappedField>,

    /// Canonical vocabulary version the set was discovered against
    #[serde(default)]
    pub canonical_version: String,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub usage_count: u64,

    pub last_used_at: DateTime<Utc>,
}

impl MappingSet {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: tenant_id.into(),
            field_mappings: Vec::new(),
            table_mappings: Vec::new(),
            derived_mappings: Vec::new(),
            unmapped: Vec::new(),
            canonical_version: String::new(),
            created_at: now,
            usage_count: 0,
            last_used_at: now,
        }
    }

    pub fn table(&self, canonical_table: &str) -> Option<&TableMapping> {
        self.table_mappings
            .iter()
            .find(|m| m.canonical_table.eq_ignore_ascii_case(canonical_table))
    }

    pub fn field(&self, canonical_field: &str) -> Option<&FieldMapping> {
        self.field_mappings
            .iter()
            .find(|m| m.canonical_field.eq_ignore_ascii_case(canonical_field))
    }

    pub fn derived(&self, canonical_field: &str) -> Option<&DerivedMapping> {
        self.derived_mappings
            .iter()
            .find(|m| m.canonical_field.eq_ignore_ascii_case(canonical_field))
    }

    pub fn unmapped_field(&self, canonical_field: &str) -> Option<&UnmappedField> {
        self.unmapped
            .iter()
            .find(|u| u.canonical_field.eq_ignore_ascii_case(canonical_field))
    }

    /// Derived mappings whose field belongs to the given canonical table
    pub fn derived_for_table<'a>(
        &'a self,
        canonical_table: &'a str,
    ) -> impl Iterator<Item = &'a DerivedMapping> + 'a {
        self.derived_mappings.iter().filter(move |d| {
            self.field(&d.canonical_field)
                .map(|f| f.canonical_table.eq_ignore_ascii_case(canonical_table))
                .unwrap_or(false)
        })
    }

    /// Record one more use
    pub fn touch(&mut self) {
        self.usage_count += 1;
        self.last_used_at = Utc::now();
    }

    /// Same record with usage counters zeroed, for comparisons that ignore usage
    pub fn without_usage(&self) -> Self {
        Self {
            usage_count: 0,
            last_used_at: self.created_at,
            ..self.clone()
        }
    }
}
