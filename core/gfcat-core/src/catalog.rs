//! Catalog document model (made by FontLab https://www.fontlab.com/)
//!
//! These types are the JSON shape handed to downstream integration. Fields a
//! validator must be able to judge (category, variant identifiers) are kept as
//! plain strings so that a hand-edited or foreign document still deserializes
//! and can be rejected with a precise finding instead of a parse error.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fetch::RequestCounts;

/// License bucket a family lives under in the upstream repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum License {
    Ofl,
    Apache,
    Ufl,
}

impl License {
    pub fn as_str(self) -> &'static str {
        match self {
            License::Ofl => "ofl",
            License::Apache => "apache",
            License::Ufl => "ufl",
        }
    }
}

impl fmt::Display for License {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for License {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ofl" => Ok(License::Ofl),
            "apache" => Ok(License::Apache),
            "ufl" => Ok(License::Ufl),
            other => Err(anyhow!("unknown license bucket: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    SansSerif,
    Serif,
    Monospace,
    Display,
    Handwriting,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::SansSerif,
        Category::Serif,
        Category::Monospace,
        Category::Display,
        Category::Handwriting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::SansSerif => "sans-serif",
            Category::Serif => "serif",
            Category::Monospace => "monospace",
            Category::Display => "display",
            Category::Handwriting => "handwriting",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    /// Accepts both catalog spelling (`sans-serif`) and metadata spelling (`SANS_SERIF`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| anyhow!("unknown category: {s}"))
    }
}

/// Variable-font axis tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    #[serde(rename = "wght")]
    Weight,
    #[serde(rename = "ital")]
    Italic,
    #[serde(rename = "opsz")]
    OpticalSize,
}

impl Axis {
    /// Map a registered axis tag; other tags are not modelled.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "wght" => Some(Axis::Weight),
            "ital" => Some(Axis::Italic),
            "opsz" => Some(Axis::OpticalSize),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WeightRange {
    pub min: u16,
    pub max: u16,
}

/// One resolved source location for a variant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset: Option<String>,
    /// Present when one variable-font file serves a whole weight range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_range: Option<WeightRange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FamilyStatus {
    #[default]
    Complete,
    Degraded,
    Failed,
}

/// Metadata attributes the resolver may or may not recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataField {
    Name,
    Category,
    Subsets,
    Designer,
}

impl MetadataField {
    pub const ALL: [MetadataField; 4] = [
        MetadataField::Name,
        MetadataField::Category,
        MetadataField::Subsets,
        MetadataField::Designer,
    ];
}

/// Degradation markers attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RecordWarning {
    /// The metadata document does not exist.
    MetadataMissing,
    /// The metadata document parsed but lacked some fields.
    MetadataPartial { missing: Vec<MetadataField> },
    /// The metadata source could not be reached.
    MetadataUnavailable { reason: String },
    /// Variant identifiers came from the fallback table; no files resolved.
    VariantsFallback { reason: String },
    /// The run deadline expired before this family finished.
    DeadlineExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyRecord {
    pub family: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,
    pub category: String,
    #[serde(default)]
    pub subsets: BTreeSet<String>,
    pub variants: Vec<String>,
    #[serde(default)]
    pub axes: BTreeSet<Axis>,
    #[serde(default)]
    pub files: BTreeMap<String, Vec<FileRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub designer: Option<String>,
    #[serde(default)]
    pub status: FamilyStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<RecordWarning>,
}

impl FamilyRecord {
    pub fn is_degraded(&self) -> bool {
        self.status != FamilyStatus::Complete
    }

    /// Parsed category, `None` when the stored string is outside the closed set.
    pub fn category(&self) -> Option<Category> {
        self.category.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub complete: usize,
    pub degraded: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a FamilyRecord>) -> Self {
        let mut counts = Self::default();
        for record in records {
            match record.status {
                FamilyStatus::Complete => counts.complete += 1,
                FamilyStatus::Degraded => counts.degraded += 1,
                FamilyStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// Worst-case outcome of a whole pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    #[default]
    Complete,
    Degraded,
    FailedThresholdExceeded,
    DeadlineExceeded,
}

impl RunStatus {
    /// Fatal runs must not be published regardless of validation.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            RunStatus::FailedThresholdExceeded | RunStatus::DeadlineExceeded
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogMeta {
    #[serde(default)]
    pub generated: DateTime<Utc>,
    #[serde(default)]
    pub generator: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub licenses: Vec<License>,
    pub total_families: usize,
    #[serde(default, alias = "total_variant_count")]
    pub total_variants: usize,
    #[serde(default, alias = "api_calls")]
    pub requests: RequestCounts,
    #[serde(default, alias = "generation_time_seconds")]
    pub elapsed_seconds: f64,
    #[serde(default)]
    pub families_by_status: StatusCounts,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_licenses: Vec<License>,
    #[serde(default)]
    pub duplicates_dropped: usize,
    #[serde(default)]
    pub run_status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub items: Vec<FamilyRecord>,
    pub meta: CatalogMeta,
}

impl CatalogDocument {
    pub fn variant_count(&self) -> usize {
        self.items.iter().map(|item| item.variants.len()).sum()
    }
}
