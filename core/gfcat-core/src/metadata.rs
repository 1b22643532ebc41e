//! Per-family metadata extraction (made by FontLab https://www.fontlab.com/)
//!
//! `METADATA.pb` files are protobuf text format, but inconsistently populated
//! across the repository. Each field is pulled out by its own tolerant pattern
//! and is independently optional.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;
use url::Url;

use crate::catalog::{Axis, Category, License, MetadataField};
use crate::config::Endpoints;
use crate::error::FetchError;
use crate::fetch::RetryingFetcher;
use crate::rate_limit::ResourceClass;
use crate::transport::Request;

/// Whatever could be recovered from one metadata document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPartial {
    pub name: Option<String>,
    pub category: Option<Category>,
    pub subsets: Option<BTreeSet<String>>,
    pub designer: Option<String>,
    /// Axes declared in `axes { tag: ... }` blocks; absent for static families.
    pub axes: BTreeSet<Axis>,
    pub recovered: BTreeSet<MetadataField>,
}

impl MetadataPartial {
    pub fn missing(&self) -> Vec<MetadataField> {
        MetadataField::ALL
            .into_iter()
            .filter(|field| !self.recovered.contains(field))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.recovered.len() == MetadataField::ALL.len()
    }
}

struct Patterns {
    name: Regex,
    category: Regex,
    subset: Regex,
    designer: Regex,
    axis_tag: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        name: Regex::new(r#"(?m)^\s*name:\s*"([^"]+)""#).expect("static regex"),
        category: Regex::new(r#"(?m)^\s*category:\s*"([^"]+)""#).expect("static regex"),
        subset: Regex::new(r#"(?m)^\s*subsets?:\s*"([^"]+)""#).expect("static regex"),
        designer: Regex::new(r#"(?m)^\s*designer:\s*"([^"]+)""#).expect("static regex"),
        axis_tag: Regex::new(r#"(?m)^\s*tag:\s*"([^"]+)""#).expect("static regex"),
    })
}

/// Extract family name, category, subsets and designer from a metadata document.
///
/// The first `name:` is the family name (per-file `fonts { name: ... }` blocks come
/// later). Unknown category values count as unrecovered; the `menu` pseudo-subset
/// is dropped.
pub fn parse_metadata(text: &str) -> MetadataPartial {
    let p = patterns();
    let mut partial = MetadataPartial::default();

    if let Some(name) = first_capture(&p.name, text) {
        partial.name = Some(name);
        partial.recovered.insert(MetadataField::Name);
    }

    partial.category = p
        .category
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse::<Category>().ok())
        .next();
    if partial.category.is_some() {
        partial.recovered.insert(MetadataField::Category);
    }

    let subsets: BTreeSet<String> = p
        .subset
        .captures_iter(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| !s.is_empty() && s != "menu")
        .collect();
    if !subsets.is_empty() {
        partial.subsets = Some(subsets);
        partial.recovered.insert(MetadataField::Subsets);
    }

    if let Some(designer) = first_capture(&p.designer, text) {
        partial.designer = Some(designer);
        partial.recovered.insert(MetadataField::Designer);
    }

    partial.axes = p
        .axis_tag
        .captures_iter(text)
        .filter_map(|caps| Axis::from_tag(caps[1].trim()))
        .collect();

    partial
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Fetches and parses `METADATA.pb` for one family directory.
pub struct MetadataResolver {
    fetcher: Arc<RetryingFetcher>,
    endpoints: Endpoints,
}

impl MetadataResolver {
    pub fn new(fetcher: Arc<RetryingFetcher>, endpoints: Endpoints) -> Self {
        Self { fetcher, endpoints }
    }

    pub fn metadata_url(&self, slug: &str, license: License) -> Result<Url, FetchError> {
        let raw = format!(
            "{}/{}/{}/{}/{}/METADATA.pb",
            self.endpoints.raw_content.trim_end_matches('/'),
            self.endpoints.repository,
            self.endpoints.branch,
            license,
            slug
        );
        Url::parse(&raw).map_err(|e| FetchError::Request(format!("{raw}: {e}")))
    }

    /// Fetch errors propagate; missing fields inside a fetched document do not.
    pub async fn resolve(&self, slug: &str, license: License) -> Result<MetadataPartial, FetchError> {
        let request = Request::get(self.metadata_url(slug, license)?);
        let response = self.fetcher.fetch(ResourceClass::Metadata, &request).await?;
        let partial = parse_metadata(&response.body);

        if !partial.is_complete() {
            debug!(slug, missing = ?partial.missing(), "metadata partially recovered");
        }
        Ok(partial)
    }
}
